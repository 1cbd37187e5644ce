//! MMD 物理世界管理器
//!
//! 骨骼与刚体的双向同步。每帧流程：
//! sync_bodies（骨骼 → 跟随刚体）→ step → sync_bones（物理刚体 → 骨骼）。

use glam::Vec3;

use super::config::{get_config, PhysicsConfig};
use super::mmd_joint::{ConstraintDesc, MMDJoint};
use super::mmd_rigid_body::{MMDRigidBody, PhysicsMode, RigidBodyDesc};
use super::world::PhysicsWorld;
use crate::skeleton::BoneSet;
use crate::{MmdError, Result};

/// MMD 物理世界管理器
///
/// Drop 时先移除约束再移除刚体。
pub struct MMDPhysics {
    /// MMD 关节列表
    joints: Vec<MMDJoint>,
    /// MMD 刚体列表
    rigid_bodies: Vec<MMDRigidBody>,
    /// Rapier 物理世界
    world: PhysicsWorld,
    config: PhysicsConfig,
    /// 由物理驱动的骨骼索引（构建时计算一次）
    simulated_bone_indices: Vec<usize>,
}

impl MMDPhysics {
    /// 使用全局配置创建
    pub fn new() -> Self {
        Self::with_config(get_config())
    }

    /// 使用显式配置创建
    pub fn with_config(config: PhysicsConfig) -> Self {
        Self {
            joints: Vec::new(),
            rigid_bodies: Vec::new(),
            world: PhysicsWorld::with_config(&config),
            config,
            simulated_bone_indices: Vec::new(),
        }
    }

    /// 构建所有刚体和关节
    ///
    /// 骨骼应处于初始姿态（刚体描述中的位置以此为准）。任一描述非法时返回错误，
    /// 已经加入世界的对象在 Drop 时清理。
    pub fn setup(
        &mut self,
        bodies: &[RigidBodyDesc],
        constraints: &[ConstraintDesc],
        bones: &BoneSet,
    ) -> Result<()> {
        if !self.rigid_bodies.is_empty() {
            return Err(MmdError::Physics("physics is already set up".to_string()));
        }

        self.rigid_bodies.reserve(bodies.len());
        for desc in bodies {
            let body = MMDRigidBody::setup(desc, bones, &mut self.world, &self.config)?;
            self.rigid_bodies.push(body);
        }

        if self.config.joints_enabled {
            self.joints.reserve(constraints.len());
            for desc in constraints {
                let joint = MMDJoint::setup(desc, &self.rigid_bodies, &mut self.world, &self.config)?;
                self.joints.push(joint);
            }
        } else if !constraints.is_empty() {
            log::warn!("关节已禁用，跳过 {} 个约束", constraints.len());
        }

        self.simulated_bone_indices = self
            .rigid_bodies
            .iter()
            .filter(|rb| rb.mode != PhysicsMode::Kinematic)
            .filter_map(|rb| rb.bone_index)
            .collect();
        self.simulated_bone_indices.sort_unstable();
        self.simulated_bone_indices.dedup();

        let count = |mode: PhysicsMode| self.rigid_bodies.iter().filter(|rb| rb.mode == mode).count();
        log::info!(
            "物理构建完成: {} 刚体 ({}跟骨 + {}物理 + {}物理跟骨), {} 关节",
            self.rigid_bodies.len(),
            count(PhysicsMode::Kinematic),
            count(PhysicsMode::Simulated),
            count(PhysicsMode::Aligned),
            self.joints.len()
        );
        Ok(())
    }

    // ========================================
    // 每帧流程
    // ========================================

    /// 步进前：把骨骼姿态推给跟随骨骼的刚体
    pub fn sync_bodies(&mut self, bones: &BoneSet) {
        for body in &mut self.rigid_bodies {
            body.push(bones, &mut self.world);
        }
    }

    /// 步进物理模拟（秒）
    pub fn step(&mut self, seconds: f32) {
        self.world.step(seconds);
    }

    /// 步进后：读取刚体变换并写回物理驱动的骨骼
    pub fn sync_bones(&mut self, bones: &mut BoneSet) {
        for body in &mut self.rigid_bodies {
            body.pull(&mut self.world);
            body.apply_transform_to_bone(bones);
        }
    }

    /// 切换单个刚体是否临时跟随骨骼
    pub fn set_kinematic(&mut self, index: usize, kinematic: bool) -> Result<()> {
        let count = self.rigid_bodies.len();
        let body = self
            .rigid_bodies
            .get_mut(index)
            .ok_or(MmdError::RigidBodyIndexOutOfRange { index, count })?;
        body.set_kinematic(kinematic, &mut self.world);
        Ok(())
    }

    /// 所有刚体瞬移到骨骼推导的姿态，速度清零
    pub fn reset(&mut self, bones: &BoneSet) {
        for body in &mut self.rigid_bodies {
            body.reset(bones, &mut self.world);
        }
    }

    // ========================================
    // 访问器
    // ========================================

    /// 由物理驱动的骨骼索引（升序、去重）
    #[inline]
    pub fn simulated_bone_indices(&self) -> &[usize] {
        &self.simulated_bone_indices
    }

    /// 当前实际由物理驱动的骨骼索引（排除运行时切换为跟随骨骼的刚体）
    pub fn driven_bone_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .rigid_bodies
            .iter()
            .filter(|rb| !rb.is_kinematic())
            .filter_map(|rb| rb.bone_index)
            .collect();
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    #[inline]
    pub fn rigid_bodies(&self) -> &[MMDRigidBody] {
        &self.rigid_bodies
    }

    #[inline]
    pub fn joints(&self) -> &[MMDJoint] {
        &self.joints
    }

    #[inline]
    pub fn world(&self) -> &PhysicsWorld {
        &self.world
    }

    #[inline]
    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    pub fn rigid_body_count(&self) -> usize {
        self.rigid_bodies.len()
    }

    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.world.set_gravity(gravity);
    }
}

impl Default for MMDPhysics {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MMDPhysics {
    fn drop(&mut self) {
        for joint in self.joints.drain(..) {
            self.world.remove_constraint(joint.handle());
        }
        for body in self.rigid_bodies.drain(..) {
            self.world.remove_rigid_body(body.body_handle());
        }
    }
}
