//! 物理世界封装
//!
//! 把 Rapier 的各个集合与流水线收拢成一个对象，对外只暴露
//! 刚体/约束的增删、步进和变换读写。
//!
//! | 操作 | Rapier |
//! |------|--------|
//! | add_rigid_body | RigidBodySet::insert + ColliderSet::insert_with_parent |
//! | add_constraint | ImpulseJointSet::insert |
//! | step | PhysicsPipeline::step（固定步长子步） |

use std::num::NonZeroUsize;

use glam::{Mat4, Quat, Vec3};
use rapier3d::na::{Quaternion, Translation3, UnitQuaternion};
use rapier3d::prelude::*;

use super::config::{get_config, PhysicsConfig};

/// Rapier 物理世界
pub struct PhysicsWorld {
    pipeline: PhysicsPipeline,
    integration_parameters: IntegrationParameters,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    gravity: Vector<Real>,
    /// 地面刚体句柄
    floor: Option<RigidBodyHandle>,
    fps: f32,
    max_substep_count: i32,
    max_linear_velocity: f32,
    max_angular_velocity: f32,
}

impl PhysicsWorld {
    /// 使用全局配置创建
    pub fn new() -> Self {
        Self::with_config(&get_config())
    }

    /// 使用显式配置创建
    pub fn with_config(config: &PhysicsConfig) -> Self {
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = config.fixed_time_step();
        if let Some(iterations) = NonZeroUsize::new(config.solver_iterations) {
            integration_parameters.num_solver_iterations = iterations;
        }

        let mut world = Self {
            pipeline: PhysicsPipeline::new(),
            integration_parameters,
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            gravity: vector![0.0, config.gravity_y, 0.0],
            floor: None,
            fps: config.physics_fps.max(1.0),
            max_substep_count: config.max_substep_count.max(1),
            max_linear_velocity: config.max_linear_velocity,
            max_angular_velocity: config.max_angular_velocity,
        };

        if config.floor_enabled {
            // 地面：上表面位于 y = 0 的大静态盒子
            let ground = RigidBodyBuilder::fixed().translation(vector![0.0, -50.0, 0.0]).build();
            let handle = world.bodies.insert(ground);
            let collider = ColliderBuilder::cuboid(1000.0, 50.0, 1000.0).build();
            world.colliders.insert_with_parent(collider, handle, &mut world.bodies);
            world.floor = Some(handle);
        }

        if config.debug_log {
            log::info!(
                "[物理配置] FPS={}, 重力Y={}, 求解器迭代={}, 地面={}",
                config.physics_fps, config.gravity_y, config.solver_iterations, config.floor_enabled
            );
        }
        world
    }

    // ========================================
    // 参数
    // ========================================

    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = vector![gravity.x, gravity.y, gravity.z];
    }

    pub fn gravity(&self) -> Vec3 {
        Vec3::new(self.gravity.x, self.gravity.y, self.gravity.z)
    }

    #[inline]
    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn set_fps(&mut self, fps: f32) {
        self.fps = fps.max(1.0);
    }

    pub fn set_max_substep_count(&mut self, count: i32) {
        self.max_substep_count = count.max(1);
    }

    #[inline]
    pub fn has_floor(&self) -> bool {
        self.floor.is_some()
    }

    /// 刚体数量（不含地面）
    pub fn body_count(&self) -> usize {
        self.bodies.len() - usize::from(self.floor.is_some())
    }

    pub fn constraint_count(&self) -> usize {
        self.impulse_joints.len()
    }

    // ========================================
    // 刚体与约束
    // ========================================

    /// 加入刚体及其碰撞体
    pub fn add_rigid_body(&mut self, body: RigidBody, collider: Collider) -> (RigidBodyHandle, ColliderHandle) {
        let body_handle = self.bodies.insert(body);
        let collider_handle = self.colliders.insert_with_parent(collider, body_handle, &mut self.bodies);
        (body_handle, collider_handle)
    }

    /// 移除刚体（连带碰撞体和与之相连的关节）
    pub fn remove_rigid_body(&mut self, handle: RigidBodyHandle) -> bool {
        self.bodies
            .remove(
                handle,
                &mut self.island_manager,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                true,
            )
            .is_some()
    }

    /// 加入连接两个刚体的约束
    pub fn add_constraint(
        &mut self,
        body_a: RigidBodyHandle,
        body_b: RigidBodyHandle,
        joint: GenericJoint,
    ) -> ImpulseJointHandle {
        self.impulse_joints.insert(body_a, body_b, joint, true)
    }

    pub fn remove_constraint(&mut self, handle: ImpulseJointHandle) -> bool {
        self.impulse_joints.remove(handle, true).is_some()
    }

    #[inline]
    pub fn body(&self, handle: RigidBodyHandle) -> Option<&RigidBody> {
        self.bodies.get(handle)
    }

    // ========================================
    // 变换读写
    // ========================================

    /// 刚体当前世界变换
    pub fn body_transform(&self, handle: RigidBodyHandle) -> Option<Mat4> {
        self.bodies.get(handle).map(|body| isometry_to_mat4(body.position()))
    }

    /// 瞬移刚体并清零速度
    pub fn set_body_transform(&mut self, handle: RigidBodyHandle, transform: Mat4) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.set_position(mat4_to_isometry(transform), true);
            if body.is_kinematic() {
                body.set_next_kinematic_position(mat4_to_isometry(transform));
            }
            body.set_linvel(vector![0.0, 0.0, 0.0], true);
            body.set_angvel(vector![0.0, 0.0, 0.0], true);
        }
    }

    /// 只改刚体平移并清零线速度，保留旋转与角速度
    pub fn set_body_translation(&mut self, handle: RigidBodyHandle, translation: Vec3) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.set_translation(vector![translation.x, translation.y, translation.z], true);
            body.set_linvel(vector![0.0, 0.0, 0.0], true);
        }
    }

    /// 运动学刚体的下一步目标位置（步进时由 Rapier 推导速度）
    pub fn set_kinematic_target(&mut self, handle: RigidBodyHandle, transform: Mat4) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.set_next_kinematic_position(mat4_to_isometry(transform));
        }
    }

    /// 在动态/运动学之间切换刚体类型
    pub fn set_body_kinematic(&mut self, handle: RigidBodyHandle, kinematic: bool) {
        if let Some(body) = self.bodies.get_mut(handle) {
            let body_type = if kinematic {
                RigidBodyType::KinematicPositionBased
            } else {
                RigidBodyType::Dynamic
            };
            body.set_body_type(body_type, true);
        }
    }

    // ========================================
    // 步进
    // ========================================

    /// 步进物理模拟
    ///
    /// 需要的固定步数不超过上限时全部用固定 dt；否则前 N-1 步用固定 dt，
    /// 最后一步消化剩余时间。步进后截断超速刚体。
    pub fn step(&mut self, seconds: f32) {
        if seconds <= 0.0 {
            return;
        }
        let fixed_dt = 1.0 / self.fps;
        let needed_steps = (seconds / fixed_dt).ceil() as i32;

        if needed_steps <= self.max_substep_count {
            let mut remaining = seconds;
            for _ in 0..needed_steps {
                let dt = remaining.min(fixed_dt);
                self.step_once(dt);
                remaining -= dt;
            }
        } else {
            let fixed_steps = self.max_substep_count - 1;
            for _ in 0..fixed_steps {
                self.step_once(fixed_dt);
            }
            self.step_once(seconds - fixed_steps as f32 * fixed_dt);
        }

        self.clamp_velocities();
    }

    fn step_once(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        self.integration_parameters.dt = dt;
        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            None,
            &(),
            &(),
        );
    }

    /// 限制刚体速度，防止物理爆炸
    fn clamp_velocities(&mut self) {
        let (max_lin, max_ang) = (self.max_linear_velocity, self.max_angular_velocity);
        for (_, body) in self.bodies.iter_mut() {
            if !body.is_dynamic() {
                continue;
            }
            let linvel = *body.linvel();
            let linvel_mag = linvel.norm();
            if linvel_mag > max_lin {
                body.set_linvel(linvel * (max_lin / linvel_mag), true);
            }
            let angvel = *body.angvel();
            let angvel_mag = angvel.norm();
            if angvel_mag > max_ang {
                body.set_angvel(angvel * (max_ang / angvel_mag), true);
            }
        }
    }
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// glam <-> nalgebra
// ============================================================================

/// glam Mat4（刚体变换，无缩放）转 Rapier Isometry
pub(crate) fn mat4_to_isometry(mat: Mat4) -> Isometry<Real> {
    let (_, rotation, translation) = mat.to_scale_rotation_translation();
    let rotation = UnitQuaternion::from_quaternion(Quaternion::new(rotation.w, rotation.x, rotation.y, rotation.z));
    Isometry::from_parts(Translation3::new(translation.x, translation.y, translation.z), rotation)
}

/// Rapier Isometry 转 glam Mat4
pub(crate) fn isometry_to_mat4(iso: &Isometry<Real>) -> Mat4 {
    let t = iso.translation.vector;
    let q = iso.rotation.coords;
    Mat4::from_rotation_translation(Quat::from_xyzw(q.x, q.y, q.z, q.w), Vec3::new(t.x, t.y, t.z))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ball_at(world: &mut PhysicsWorld, y: f32) -> RigidBodyHandle {
        let body = RigidBodyBuilder::dynamic().translation(vector![0.0, y, 0.0]).build();
        let collider = ColliderBuilder::ball(0.5).build();
        world.add_rigid_body(body, collider).0
    }

    #[test]
    fn test_isometry_conversion() {
        let mat = Mat4::from_rotation_translation(Quat::from_rotation_y(0.7), Vec3::new(1.0, 2.0, 3.0));
        let back = isometry_to_mat4(&mat4_to_isometry(mat));
        assert!(back.abs_diff_eq(mat, 1e-5));
    }

    #[test]
    fn test_gravity_pulls_body_down() {
        let mut world = PhysicsWorld::with_config(&PhysicsConfig::default());
        let handle = ball_at(&mut world, 10.0);
        world.step(0.5);
        let y = world.body_transform(handle).unwrap().w_axis.y;
        assert!(y < 10.0);
    }

    #[test]
    fn test_add_remove() {
        let mut world = PhysicsWorld::with_config(&PhysicsConfig {
            floor_enabled: true,
            ..PhysicsConfig::default()
        });
        assert!(world.has_floor());
        let a = ball_at(&mut world, 1.0);
        let b = ball_at(&mut world, 2.0);
        assert_eq!(world.body_count(), 2);

        let joint = GenericJointBuilder::new(JointAxesMask::LOCKED_FIXED_AXES).build();
        let handle = world.add_constraint(a, b, joint);
        assert_eq!(world.constraint_count(), 1);
        assert!(world.remove_constraint(handle));
        assert!(!world.remove_constraint(handle));

        assert!(world.remove_rigid_body(a));
        assert_eq!(world.body_count(), 1);
    }

    #[test]
    fn test_kinematic_switch_keeps_pose() {
        let mut world = PhysicsWorld::with_config(&PhysicsConfig::default());
        let handle = ball_at(&mut world, 3.0);
        world.set_body_kinematic(handle, true);
        world.step(1.0 / 30.0);
        let y = world.body_transform(handle).unwrap().w_axis.y;
        assert!((y - 3.0).abs() < 1e-5);
    }
}
