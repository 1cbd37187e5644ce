//! MMD 刚体封装
//!
//! 一个刚体 = Rapier 刚体 + 碰撞体 + 运动状态。
//! 刚体相对骨骼的局部变换在创建时由骨骼初始世界变换计算一次。

use glam::{Mat4, Quat, Vec3};
use rapier3d::prelude::*;

use super::config::PhysicsConfig;
use super::motion_state::MotionState;
use super::world::{mat4_to_isometry, PhysicsWorld};
use crate::skeleton::BoneSet;
use crate::{MmdError, Result};

/// 刚体与骨骼的耦合模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhysicsMode {
    /// 跟随骨骼
    #[default]
    Kinematic,
    /// 物理驱动骨骼
    Simulated,
    /// 物理驱动旋转，位置跟随骨骼
    Aligned,
}

impl PhysicsMode {
    /// 模型数据中的模式编号（0 跟随骨骼, 1 物理, 2 物理+骨骼位置）
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => PhysicsMode::Simulated,
            2 => PhysicsMode::Aligned,
            _ => PhysicsMode::Kinematic,
        }
    }
}

/// 刚体描述（由模型加载器给出）
#[derive(Debug, Clone)]
pub struct RigidBodyDesc {
    pub name: String,
    /// 关联骨骼，None 表示以世界原点为参考
    pub bone_index: Option<usize>,
    /// 碰撞组 (0..16)
    pub group: u8,
    /// 碰撞掩码
    pub group_mask: u16,
    /// 形状编号：0 球, 1 盒, 2 胶囊
    pub shape: u8,
    /// 球：x 为半径；盒：半尺寸；胶囊：x 半径, y 高度
    pub size: Vec3,
    /// 世界位置（骨骼初始姿态下）
    pub position: Vec3,
    /// 欧拉角（弧度，Y-X-Z 顺序组合）
    pub rotation: Vec3,
    pub mass: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub restitution: f32,
    pub friction: f32,
    pub mode: PhysicsMode,
}

impl Default for RigidBodyDesc {
    fn default() -> Self {
        Self {
            name: String::new(),
            bone_index: None,
            group: 0,
            group_mask: u16::MAX,
            shape: 0,
            size: Vec3::splat(1.0),
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            mass: 1.0,
            linear_damping: 0.5,
            angular_damping: 0.5,
            restitution: 0.0,
            friction: 0.5,
            mode: PhysicsMode::Kinematic,
        }
    }
}

impl RigidBodyDesc {
    /// 刚体初始世界变换
    pub fn world_transform(&self) -> Mat4 {
        let rotation = Quat::from_rotation_y(self.rotation.y)
            * Quat::from_rotation_x(self.rotation.x)
            * Quat::from_rotation_z(self.rotation.z);
        Mat4::from_rotation_translation(rotation, self.position)
    }

    fn build_shape(&self) -> Result<SharedShape> {
        match self.shape {
            0 => Ok(SharedShape::ball(self.size.x)),
            1 => Ok(SharedShape::cuboid(self.size.x, self.size.y, self.size.z)),
            // 胶囊沿 Y 轴：半高 + 半径
            2 => Ok(SharedShape::capsule_y(self.size.y * 0.5, self.size.x)),
            other => Err(MmdError::UnsupportedShape(other)),
        }
    }
}

/// MMD 刚体
pub struct MMDRigidBody {
    pub name: String,
    pub bone_index: Option<usize>,
    pub mode: PhysicsMode,
    body_handle: RigidBodyHandle,
    collider_handle: ColliderHandle,
    /// 刚体相对于骨骼的偏移
    local: Mat4,
    inv_local: Mat4,
    /// 当前生效的运动状态
    active_state: MotionState,
    /// 运行时切换为跟随骨骼时，被挂起的原状态
    suspended_state: Option<MotionState>,
}

impl MMDRigidBody {
    /// 创建刚体并加入物理世界
    ///
    /// 形状不受支持时返回错误，此时世界不被修改。
    pub fn setup(
        desc: &RigidBodyDesc,
        bones: &BoneSet,
        world: &mut PhysicsWorld,
        config: &PhysicsConfig,
    ) -> Result<Self> {
        let shape = desc.build_shape()?;
        if let Some(index) = desc.bone_index {
            if index >= bones.len() {
                return Err(MmdError::BoneIndexOutOfRange { index, count: bones.len() });
            }
        }

        let body_world = desc.world_transform();
        let local = match desc.bone_index.and_then(|i| bones.world_transform(i)) {
            Some(bone_world) => bone_world.inverse() * body_world,
            None => body_world,
        };

        let kinematic = desc.mode == PhysicsMode::Kinematic;
        let body_type = if kinematic {
            RigidBodyType::KinematicPositionBased
        } else {
            RigidBodyType::Dynamic
        };
        let body = RigidBodyBuilder::new(body_type)
            .position(mat4_to_isometry(body_world))
            .linear_damping(desc.linear_damping * config.linear_damping_scale)
            .angular_damping(desc.angular_damping * config.angular_damping_scale)
            .ccd_enabled(false)
            .can_sleep(false)
            .build();

        let groups = InteractionGroups::new(
            Group::from_bits_truncate(1 << desc.group.min(15)),
            Group::from_bits_truncate(desc.group_mask as u32),
        );
        let builder = ColliderBuilder::new(shape)
            .restitution(desc.restitution)
            .friction(desc.friction)
            .collision_groups(groups)
            .solver_groups(groups);
        let builder = if kinematic {
            builder.density(0.0)
        } else {
            builder.mass((desc.mass * config.mass_scale).max(1.0e-3))
        };
        let collider = builder.build();

        let (body_handle, collider_handle) = world.add_rigid_body(body, collider);

        let active_state = match desc.mode {
            PhysicsMode::Kinematic => MotionState::kinematic(desc.bone_index, local, bones),
            PhysicsMode::Simulated => MotionState::Simulated { transform: body_world },
            PhysicsMode::Aligned => MotionState::Aligned {
                bone: desc.bone_index,
                local,
                reference: body_world,
                transform: body_world,
            },
        };

        Ok(Self {
            name: desc.name.clone(),
            bone_index: desc.bone_index,
            mode: desc.mode,
            body_handle,
            collider_handle,
            local,
            inv_local: local.inverse(),
            active_state,
            suspended_state: None,
        })
    }

    #[inline]
    pub fn body_handle(&self) -> RigidBodyHandle {
        self.body_handle
    }

    #[inline]
    pub fn collider_handle(&self) -> ColliderHandle {
        self.collider_handle
    }

    #[inline]
    pub fn local_transform(&self) -> Mat4 {
        self.local
    }

    #[inline]
    pub fn motion_state(&self) -> &MotionState {
        &self.active_state
    }

    /// 当前是否由骨骼驱动（原本就是跟随模式或被临时切换）
    #[inline]
    pub fn is_kinematic(&self) -> bool {
        self.active_state.is_kinematic()
    }

    /// 当前世界变换（运动状态中的值）
    #[inline]
    pub fn world_transform(&self) -> Mat4 {
        self.active_state.world_transform()
    }

    /// 由骨骼当前姿态计算刚体应有的世界变换
    pub fn bone_driven_transform(&self, bones: &BoneSet) -> Mat4 {
        self.bone_index
            .and_then(|i| bones.world_transform(i))
            .map(|bone_world| bone_world * self.local)
            .unwrap_or(self.local)
    }

    /// 在跟随骨骼与原模式之间切换
    ///
    /// 切换时把当前刚体变换交给新状态，避免跳变。原本就是跟随模式的刚体不受影响。
    pub fn set_kinematic(&mut self, kinematic: bool, world: &mut PhysicsWorld) {
        if self.mode == PhysicsMode::Kinematic || kinematic == self.active_state.is_kinematic() {
            return;
        }
        let current = world
            .body_transform(self.body_handle)
            .unwrap_or_else(|| self.active_state.world_transform());

        if kinematic {
            let shadow = MotionState::Kinematic {
                bone: self.bone_index,
                local: self.local,
                transform: current,
            };
            self.suspended_state = Some(std::mem::replace(&mut self.active_state, shadow));
        } else {
            let mut restored = self
                .suspended_state
                .take()
                .unwrap_or(MotionState::Simulated { transform: current });
            restored.set_world_transform(current);
            self.active_state = restored;
        }

        world.set_body_kinematic(self.body_handle, kinematic);
        world.set_body_transform(self.body_handle, current);
        log::debug!("刚体 '{}' 切换为{}", self.name, if kinematic { "跟随骨骼" } else { "物理驱动" });
    }

    /// 步进前：跟随状态从骨骼取变换推给引擎，对齐状态刷新参考姿态
    pub fn push(&mut self, bones: &BoneSet, world: &mut PhysicsWorld) {
        self.active_state.refresh(bones);
        if self.active_state.is_kinematic() {
            world.set_kinematic_target(self.body_handle, self.active_state.world_transform());
        }
    }

    /// 步进后：把引擎的变换写入运动状态
    ///
    /// 对齐状态只接受旋转，刚体在引擎中被放回参考位置。
    pub fn pull(&mut self, world: &mut PhysicsWorld) {
        let Some(transform) = world.body_transform(self.body_handle) else {
            return;
        };
        self.active_state.set_world_transform(transform);
        if let MotionState::Aligned { transform, .. } = self.active_state {
            world.set_body_translation(self.body_handle, transform.w_axis.truncate());
        }
    }

    /// 把物理结果写回骨骼
    ///
    /// 物理驱动：骨骼世界变换 = 刚体变换 * local⁻¹；
    /// 对齐：只取旋转，位置保持骨骼当前值；跟随状态与无骨骼刚体不写回。
    pub fn apply_transform_to_bone(&self, bones: &mut BoneSet) {
        let Some(bone) = self.bone_index else {
            return;
        };
        match self.active_state {
            MotionState::Kinematic { .. } => {}
            MotionState::Simulated { transform } => {
                bones.set_global_transform_physics(bone, transform * self.inv_local);
            }
            MotionState::Aligned { transform, .. } => {
                let Some(bone_world) = bones.world_transform(bone) else {
                    return;
                };
                let mut result = transform * self.inv_local;
                result.w_axis = bone_world.w_axis;
                bones.set_global_transform_physics(bone, result);
            }
        }
    }

    /// 瞬移到骨骼推导的姿态并清零速度
    pub fn reset(&mut self, bones: &BoneSet, world: &mut PhysicsWorld) {
        let transform = self.bone_driven_transform(bones);
        self.active_state.refresh(bones);
        self.active_state.set_world_transform(transform);
        world.set_body_transform(self.body_handle, transform);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::{BoneKind, BoneLink};

    fn bones() -> BoneSet {
        BoneSet::build(vec![
            BoneLink::new("head", BoneKind::Free, Vec3::new(0.0, 15.0, 0.0)),
            BoneLink::new("hair", BoneKind::Free, Vec3::new(0.0, 14.0, -1.0)).with_parent(0),
        ])
        .unwrap()
    }

    fn hair_desc(mode: PhysicsMode) -> RigidBodyDesc {
        RigidBodyDesc {
            name: "hair".to_string(),
            bone_index: Some(1),
            shape: 2,
            size: Vec3::new(0.3, 1.0, 0.0),
            position: Vec3::new(0.0, 13.5, -1.0),
            mode,
            ..RigidBodyDesc::default()
        }
    }

    #[test]
    fn test_unsupported_shape() {
        let bones = bones();
        let mut world = PhysicsWorld::with_config(&PhysicsConfig::default());
        let desc = RigidBodyDesc { shape: 7, ..hair_desc(PhysicsMode::Simulated) };
        let result = MMDRigidBody::setup(&desc, &bones, &mut world, &PhysicsConfig::default());
        assert!(matches!(result, Err(MmdError::UnsupportedShape(7))));
        assert_eq!(world.body_count(), 0);
    }

    #[test]
    fn test_local_offset_from_bone() {
        let bones = bones();
        let mut world = PhysicsWorld::with_config(&PhysicsConfig::default());
        let body = MMDRigidBody::setup(&hair_desc(PhysicsMode::Kinematic), &bones, &mut world, &PhysicsConfig::default())
            .unwrap();
        let expected = Mat4::from_translation(Vec3::new(0.0, -0.5, 0.0));
        assert!(body.local_transform().abs_diff_eq(expected, 1e-5));
        assert!(body.bone_driven_transform(&bones).abs_diff_eq(hair_desc(PhysicsMode::Kinematic).world_transform(), 1e-5));
    }

    #[test]
    fn test_kinematic_round_trip_keeps_bone() {
        let mut bones = bones();
        let config = PhysicsConfig::default();
        let mut world = PhysicsWorld::with_config(&config);
        let mut body = MMDRigidBody::setup(&hair_desc(PhysicsMode::Simulated), &bones, &mut world, &config).unwrap();
        let before = bones.world_transform(1).unwrap();

        body.set_kinematic(true, &mut world);
        assert!(body.is_kinematic());
        body.set_kinematic(false, &mut world);
        assert!(!body.is_kinematic());

        body.pull(&mut world);
        body.apply_transform_to_bone(&mut bones);
        assert!(bones.world_transform(1).unwrap().abs_diff_eq(before, 1e-5));
    }

    #[test]
    fn test_kinematic_mode_ignores_switch() {
        let bones = bones();
        let config = PhysicsConfig::default();
        let mut world = PhysicsWorld::with_config(&config);
        let mut body = MMDRigidBody::setup(&hair_desc(PhysicsMode::Kinematic), &bones, &mut world, &config).unwrap();
        body.set_kinematic(false, &mut world);
        assert!(body.is_kinematic());
    }

    #[test]
    fn test_aligned_keeps_bone_position() {
        let mut bones = bones();
        let config = PhysicsConfig::default();
        let mut world = PhysicsWorld::with_config(&config);
        let mut body = MMDRigidBody::setup(&hair_desc(PhysicsMode::Aligned), &bones, &mut world, &config).unwrap();

        let tilted = Mat4::from_rotation_translation(Quat::from_rotation_x(0.5), Vec3::new(3.0, 3.0, 3.0));
        world.set_body_transform(body.body_handle(), tilted);
        body.pull(&mut world);
        let position = bones.world_transform(1).unwrap().w_axis;
        body.apply_transform_to_bone(&mut bones);

        let result = bones.world_transform(1).unwrap();
        assert!(result.w_axis.abs_diff_eq(position, 1e-6));
        let (_, rotation, _) = result.to_scale_rotation_translation();
        assert!(rotation.abs_diff_eq(Quat::from_rotation_x(0.5), 1e-5));
    }

    #[test]
    fn test_aligned_body_stays_at_bone() {
        let mut bones = bones();
        let config = PhysicsConfig::default();
        let mut world = PhysicsWorld::with_config(&config);
        let mut body = MMDRigidBody::setup(&hair_desc(PhysicsMode::Aligned), &bones, &mut world, &config).unwrap();
        let anchor = body.bone_driven_transform(&bones).w_axis.truncate();

        for _ in 0..10 {
            body.push(&bones, &mut world);
            world.step(1.0 / 30.0);
            body.pull(&mut world);
            body.apply_transform_to_bone(&mut bones);
        }

        let engine = world.body_transform(body.body_handle()).unwrap();
        assert!(engine.w_axis.truncate().abs_diff_eq(anchor, 1e-4));
        assert!(body.world_transform().w_axis.truncate().abs_diff_eq(anchor, 1e-4));
        assert!(bones.world_transform(1).unwrap().w_axis.truncate().abs_diff_eq(Vec3::new(0.0, 14.0, -1.0), 1e-4));
    }
}
