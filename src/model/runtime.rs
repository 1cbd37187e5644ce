//! 模型运行时：骨骼 + Morph + 动作层 + 物理
//!
//! 每帧顺序固定：
//! 动作求值 → 世界变换 → IK → 世界变换 → 推送跟骨刚体 → 物理步进 → 回写物理骨骼 → 物理后更新

use std::sync::Arc;

use glam::Mat4;

use super::ModelDescriptor;
use crate::animation::{Motion, MotionManager, PlayerOptions, PlayerStatus, MOTION_FPS};
use crate::morph::MorphManager;
use crate::physics::{get_config, MMDPhysics, PhysicsConfig};
use crate::skeleton::BoneSet;
use crate::{MmdError, Result};

/// MMD 模型运行时
pub struct MmdModel {
    bones: BoneSet,
    morphs: MorphManager,
    motions: MotionManager,
    physics: Option<MMDPhysics>,
    physics_enabled: bool,
}

impl MmdModel {
    /// 使用全局物理配置构建
    pub fn build(desc: ModelDescriptor) -> Result<Self> {
        Self::with_physics_config(desc, get_config())
    }

    /// 使用显式物理配置构建，任一部分校验失败则整体失败
    pub fn with_physics_config(desc: ModelDescriptor, config: PhysicsConfig) -> Result<Self> {
        let ModelDescriptor {
            bones,
            ik_chains,
            morph_names,
            rigid_bodies,
            constraints,
        } = desc;

        let mut bones = BoneSet::build(bones)?;
        for chain in ik_chains {
            bones.add_ik_chain(chain)?;
        }
        bones.update_world_transforms();

        let morphs = MorphManager::from_names(morph_names);

        let physics = if rigid_bodies.is_empty() {
            None
        } else {
            let mut physics = MMDPhysics::with_config(config);
            physics.setup(&rigid_bodies, &constraints, &bones)?;
            refresh_simulated_flags(&mut bones, &physics, true);
            Some(physics)
        };

        log::info!(
            "模型构建完成: {} 骨骼, {} IK, {} Morph, 物理 {}",
            bones.len(),
            bones.ik_solvers().len(),
            morphs.morph_count(),
            if physics.is_some() { "启用" } else { "无" }
        );

        Ok(Self {
            bones,
            morphs,
            motions: MotionManager::new(),
            physics_enabled: physics.is_some(),
            physics,
        })
    }

    // ========================================
    // 每帧入口
    // ========================================

    /// 推进 `delta_frames` 动画帧（30 帧/秒），返回是否仍有活动动作
    pub fn advance(&mut self, delta_frames: f64) -> bool {
        let running = self.motions.update(delta_frames, &mut self.bones, &mut self.morphs);
        self.update_pose(delta_frames as f32 / MOTION_FPS);
        running
    }

    /// 在指定帧求值所有动作，不推进播放头也不步进物理
    ///
    /// 物理刚体直接瞬移到求值后的姿态。
    pub fn control(&mut self, frame: f32) {
        self.motions.control(frame, &mut self.bones, &mut self.morphs);
        self.bones.update();
        self.bones.update_world_transforms();
        if let Some(physics) = self.physics.as_mut().filter(|_| self.physics_enabled) {
            physics.reset(&self.bones);
            physics.sync_bones(&mut self.bones);
            self.bones.update_after_physics();
        }
    }

    fn update_pose(&mut self, seconds: f32) {
        self.bones.update();
        self.bones.update_world_transforms();

        if !self.physics_enabled {
            return;
        }
        if let Some(physics) = self.physics.as_mut() {
            physics.sync_bodies(&self.bones);
            physics.step(seconds);
            physics.sync_bones(&mut self.bones);
            self.bones.update_after_physics();
        }
    }

    // ========================================
    // 动作
    // ========================================

    pub fn start_motion(&mut self, name: &str, motion: Arc<Motion>, options: PlayerOptions) -> Result<()> {
        self.motions.start_motion(name, motion, options, &self.bones, &self.morphs)
    }

    pub fn swap_motion(&mut self, name: &str, motion: Arc<Motion>) -> Result<()> {
        self.motions.swap_motion(name, motion, &self.bones, &self.morphs)
    }

    pub fn delete_motion(&mut self, name: &str) -> bool {
        self.motions.delete_motion(name)
    }

    pub fn player_status(&self, name: &str) -> Option<PlayerStatus> {
        self.motions.status(name)
    }

    #[inline]
    pub fn motions(&self) -> &MotionManager {
        &self.motions
    }

    #[inline]
    pub fn motions_mut(&mut self) -> &mut MotionManager {
        &mut self.motions
    }

    /// 停止所有动作，骨骼/Morph 回到初始姿态，刚体同步到该姿态
    pub fn reset(&mut self) {
        self.motions.clear();
        self.bones.reset_all();
        self.morphs.reset_all_weights();
        self.bones.update_world_transforms();
        self.reset_physics();
    }

    // ========================================
    // 物理
    // ========================================

    /// 所有刚体瞬移到当前骨骼姿态
    pub fn reset_physics(&mut self) {
        if let Some(physics) = self.physics.as_mut() {
            physics.reset(&self.bones);
        }
    }

    /// 开关物理；关闭时物理骨骼交还给动画，重新开启时刚体从当前姿态出发
    pub fn set_physics_enabled(&mut self, enabled: bool) {
        if self.physics_enabled == enabled {
            return;
        }
        let Some(physics) = self.physics.as_mut() else {
            return;
        };
        self.physics_enabled = enabled;

        refresh_simulated_flags(&mut self.bones, physics, enabled);
        if enabled {
            self.bones.update_world_transforms();
            physics.reset(&self.bones);
        }
        log::debug!("物理{}", if enabled { "开启" } else { "关闭" });
    }

    /// 运行时让单个刚体临时跟随骨骼（或恢复原模式），同步骨骼的物理标志与 IK 禁用状态
    pub fn set_rigid_body_kinematic(&mut self, index: usize, kinematic: bool) -> Result<()> {
        let physics = self
            .physics
            .as_mut()
            .ok_or_else(|| MmdError::Physics("model has no physics".to_string()))?;
        physics.set_kinematic(index, kinematic)?;
        refresh_simulated_flags(&mut self.bones, physics, self.physics_enabled);
        Ok(())
    }

    pub fn is_physics_enabled(&self) -> bool {
        self.physics_enabled && self.physics.is_some()
    }

    pub fn has_physics(&self) -> bool {
        self.physics.is_some()
    }

    pub fn physics(&self) -> Option<&MMDPhysics> {
        self.physics.as_ref()
    }

    pub fn physics_mut(&mut self) -> Option<&mut MMDPhysics> {
        self.physics.as_mut()
    }

    // ========================================
    // 只读访问
    // ========================================

    #[inline]
    pub fn bones(&self) -> &BoneSet {
        &self.bones
    }

    #[inline]
    pub fn bones_mut(&mut self) -> &mut BoneSet {
        &mut self.bones
    }

    #[inline]
    pub fn morphs(&self) -> &MorphManager {
        &self.morphs
    }

    #[inline]
    pub fn morphs_mut(&mut self) -> &mut MorphManager {
        &mut self.morphs
    }

    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    pub fn find_bone(&self, name: &str) -> Option<usize> {
        self.bones.find_bone_by_name(name)
    }

    pub fn bone_world_transform(&self, index: usize) -> Option<Mat4> {
        self.bones.world_transform(index)
    }

    pub fn skinning_matrices(&self) -> Vec<Mat4> {
        self.bones.skinning_matrices()
    }

    pub fn find_morph(&self, name: &str) -> Option<usize> {
        self.morphs.find_morph_by_name(name)
    }

    pub fn morph_weight(&self, index: usize) -> f32 {
        self.morphs.get_morph_weight(index)
    }

    pub fn morph_weights(&self) -> Vec<f32> {
        self.morphs.weights()
    }
}

/// 按刚体当前状态重设骨骼的物理标志，物理关闭时全部交还给动画
fn refresh_simulated_flags(bones: &mut BoneSet, physics: &MMDPhysics, enabled: bool) {
    for &index in physics.simulated_bone_indices() {
        bones.set_simulated(index, false);
    }
    if enabled {
        for index in physics.driven_bone_indices() {
            bones.set_simulated(index, true);
        }
    }
    bones.refresh_ik_simulation_flags();
}
