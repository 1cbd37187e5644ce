//! 骨骼集合 - 模型独占的骨骼数组
//!
//! 负责：
//! - 加载期校验层级（父骨骼必须排在子骨骼之前，索引不越界）
//! - 根到叶的世界变换传播
//! - IK 调度（物理驱动末端的链被跳过）
//! - 物理回写后的二次更新

use std::collections::HashMap;

use glam::Mat4;

use super::bone_link::{refresh_world_transform, BoneFlags, BoneKind, BoneLink};
use super::ik_solver::{IkOutcome, IkSolver};
use crate::{MmdError, Result};

/// 模型根（センター）骨骼名称
pub const CENTER_BONE_NAME: &str = "センター";

/// 骨骼集合
#[derive(Clone, Debug, Default)]
pub struct BoneSet {
    /// 骨骼数组（索引顺序保证父先于子）
    bones: Vec<BoneLink>,
    /// 名称 → 索引
    name_to_index: HashMap<String, usize>,
    /// 子骨骼缓存
    children_cache: Vec<Vec<usize>>,
    /// IK 求解器
    ik_solvers: Vec<IkSolver>,
    /// 末端由物理驱动而被禁用的 IK 链
    ik_disabled_by_simulation: Vec<bool>,
    /// センター 骨骼索引
    center_index: Option<usize>,
}

impl BoneSet {
    /// 从加载器给出的骨骼数组构建
    ///
    /// FollowRotate 骨骼的 target_index 按约定保存系数编码（ID * 0.01），
    /// 这里转为 follow_coefficient 并清空 target_index。
    pub fn build(mut bones: Vec<BoneLink>) -> Result<Self> {
        for bone in bones.iter_mut() {
            if bone.kind == BoneKind::FollowRotate {
                if let Some(coded) = bone.target_index.take() {
                    bone.follow_coefficient = coded as f32 * 0.01;
                }
            }
        }

        Self::validate(&bones)?;

        let count = bones.len();
        let mut name_to_index = HashMap::with_capacity(count);
        let mut children_cache = vec![Vec::new(); count];
        for (i, bone) in bones.iter().enumerate() {
            name_to_index.entry(bone.name.clone()).or_insert(i);
            if let Some(parent) = bone.parent_index {
                children_cache[parent].push(i);
            }
        }

        // 偏移：父骨骼先于子骨骼，按索引顺序计算即可
        for i in 0..count {
            let parent_origin = bones[i].parent_index.map(|p| bones[p].origin);
            bones[i].compute_offset(parent_origin);
        }

        let center_index = name_to_index.get(CENTER_BONE_NAME).copied();
        for i in 0..count {
            let dependent = match bones[i].parent_index {
                _ if Some(i) == center_index => true,
                Some(parent) => {
                    !bones[parent].flags.contains(BoneFlags::MOTION_INDEPENDENT)
                }
                None => false,
            };
            bones[i].flags.set(BoneFlags::MOTION_INDEPENDENT, !dependent);
        }

        let mut set = Self {
            bones,
            name_to_index,
            children_cache,
            ik_solvers: Vec::new(),
            ik_disabled_by_simulation: Vec::new(),
            center_index,
        };
        set.reset_all();
        set.update_world_transforms();

        log::debug!("骨骼集合构建完成: {} 骨骼", count);
        Ok(set)
    }

    fn validate(bones: &[BoneLink]) -> Result<()> {
        let count = bones.len();
        let check = |index: usize| -> Result<()> {
            if index >= count {
                Err(MmdError::BoneIndexOutOfRange { index, count })
            } else {
                Ok(())
            }
        };

        for (i, bone) in bones.iter().enumerate() {
            if let Some(parent) = bone.parent_index {
                check(parent)?;
                if parent >= i {
                    return Err(MmdError::InvalidHierarchy {
                        index: i,
                        reason: format!("parent {} does not precede its child", parent),
                    });
                }
            }
            if let Some(child) = bone.child_index {
                check(child)?;
            }
            if let Some(target) = bone.target_index {
                check(target)?;
            }
        }
        Ok(())
    }

    /// 添加 IK 链
    pub fn add_ik_chain(&mut self, solver: IkSolver) -> Result<()> {
        let count = self.bones.len();
        let bone = solver.bone_index;
        for index in [solver.bone_index, solver.config.effector_bone]
            .into_iter()
            .chain(solver.config.links.iter().map(|l| l.bone_index))
        {
            if index >= count {
                return Err(MmdError::BoneIndexOutOfRange { index, count });
            }
        }
        if solver.config.links.is_empty() {
            return Err(MmdError::InvalidIkChain {
                bone,
                reason: "chain has no links".to_string(),
            });
        }

        self.ik_solvers.push(solver);
        self.ik_disabled_by_simulation.push(false);
        self.refresh_ik_simulation_flags();
        Ok(())
    }

    // ========================================
    // 访问器
    // ========================================

    #[inline]
    pub fn len(&self) -> usize {
        self.bones.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    #[inline]
    pub fn bones(&self) -> &[BoneLink] {
        &self.bones
    }

    #[inline]
    pub fn bone(&self, idx: usize) -> Option<&BoneLink> {
        self.bones.get(idx)
    }

    #[inline]
    pub fn bone_mut(&mut self, idx: usize) -> Option<&mut BoneLink> {
        self.bones.get_mut(idx)
    }

    /// 父骨骼
    #[inline]
    pub fn parent_of(&self, idx: usize) -> Option<&BoneLink> {
        self.bones.get(idx)?.parent_index.and_then(|p| self.bones.get(p))
    }

    #[inline]
    pub fn children(&self, idx: usize) -> &[usize] {
        self.children_cache.get(idx).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn find_bone_by_name(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    #[inline]
    pub fn center_index(&self) -> Option<usize> {
        self.center_index
    }

    #[inline]
    pub fn world_transform(&self, idx: usize) -> Option<Mat4> {
        self.bones.get(idx).map(BoneLink::global_transform)
    }

    #[inline]
    pub fn ik_solvers(&self) -> &[IkSolver] {
        &self.ik_solvers
    }

    #[inline]
    pub fn is_ik_disabled_by_simulation(&self, chain: usize) -> bool {
        self.ik_disabled_by_simulation.get(chain).copied().unwrap_or(false)
    }

    /// 所有骨骼的蒙皮矩阵
    pub fn skinning_matrices(&self) -> Vec<Mat4> {
        self.bones.iter().map(BoneLink::skinning_matrix).collect()
    }

    // ========================================
    // 姿态与变换
    // ========================================

    /// 所有骨骼本地姿态归零
    pub fn reset_all(&mut self) {
        for bone in &mut self.bones {
            bone.reset();
        }
    }

    /// 刷新单个骨骼（父骨骼必须已是最新）
    pub fn update_world_transform(&mut self, idx: usize) {
        if idx < self.bones.len() {
            refresh_world_transform(&mut self.bones, idx);
        }
    }

    /// 根到叶更新全部骨骼
    pub fn update_world_transforms(&mut self) {
        for i in 0..self.bones.len() {
            refresh_world_transform(&mut self.bones, i);
        }
    }

    /// 物理回写之后的更新：跳过物理驱动的骨骼，
    /// 其余骨骼基于（可能已被物理改写的）父骨骼重新计算
    pub fn update_after_physics(&mut self) {
        for i in 0..self.bones.len() {
            if !self.bones[i].is_simulated() {
                refresh_world_transform(&mut self.bones, i);
            }
        }
    }

    /// 更新骨骼及其全部子孙
    pub fn update_subtree(&mut self, idx: usize) {
        IkSolver::update_global_transform_recursive(&mut self.bones, &self.children_cache, idx);
    }

    /// 依次求解所有 IK 链
    pub fn solve_ik(&mut self) -> Vec<IkOutcome> {
        let mut outcomes = Vec::with_capacity(self.ik_solvers.len());
        for (i, solver) in self.ik_solvers.iter().enumerate() {
            if self.ik_disabled_by_simulation[i] {
                outcomes.push(IkOutcome::default());
                continue;
            }
            outcomes.push(solver.solve(&mut self.bones, &self.children_cache));
        }
        outcomes
    }

    /// 动画求值后的完整骨骼更新：世界变换 → IK
    pub fn update(&mut self) {
        self.update_world_transforms();
        if !self.ik_solvers.is_empty() {
            self.solve_ik();
        }
    }

    // ========================================
    // 物理
    // ========================================

    pub fn set_simulated(&mut self, idx: usize, simulated: bool) {
        if let Some(bone) = self.bones.get_mut(idx) {
            bone.set_simulated(simulated);
        }
    }

    /// 重新计算"末端被物理驱动"的 IK 禁用表
    pub fn refresh_ik_simulation_flags(&mut self) {
        for (i, solver) in self.ik_solvers.iter().enumerate() {
            let disabled = self
                .bones
                .get(solver.effector_index())
                .map(BoneLink::is_simulated)
                .unwrap_or(false);
            self.ik_disabled_by_simulation[i] = disabled;
        }
    }

    /// 物理回写：直接覆盖世界变换，本地姿态保持动画值
    pub fn set_global_transform_physics(&mut self, idx: usize, transform: Mat4) {
        if let Some(bone) = self.bones.get_mut(idx) {
            bone.set_global_transform(transform);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::bone_link::{IkConfig, IkLink};
    use glam::{Quat, Vec3};

    fn chain() -> Vec<BoneLink> {
        vec![
            BoneLink::new("root", BoneKind::Free, Vec3::ZERO),
            BoneLink::new(CENTER_BONE_NAME, BoneKind::Free, Vec3::new(0.0, 1.0, 0.0)).with_parent(0),
            BoneLink::new("spine", BoneKind::Free, Vec3::new(0.0, 2.0, 0.0)).with_parent(1),
            BoneLink::new("leg_ik", BoneKind::Free, Vec3::new(0.5, 0.0, 0.0)).with_parent(0),
        ]
    }

    #[test]
    fn test_build_validates_hierarchy() {
        let mut bones = chain();
        bones[1].parent_index = Some(2);
        assert!(matches!(BoneSet::build(bones), Err(MmdError::InvalidHierarchy { index: 1, .. })));

        let mut bones = chain();
        bones[2].target_index = Some(42);
        assert!(matches!(
            BoneSet::build(bones),
            Err(MmdError::BoneIndexOutOfRange { index: 42, count: 4 })
        ));
    }

    #[test]
    fn test_world_transform_propagation() {
        let mut set = BoneSet::build(chain()).unwrap();
        set.bone_mut(0).unwrap().set_local_rotation(Quat::from_rotation_z(0.3));
        set.bone_mut(1).unwrap().set_local_translation(Vec3::new(0.2, 0.0, 0.0));
        set.bone_mut(2).unwrap().set_local_rotation(Quat::from_rotation_x(0.4));
        set.update_world_transforms();

        for i in 1..set.len() {
            let bone = set.bone(i).unwrap();
            let parent = set.parent_of(i).unwrap().global_transform();
            let expected = parent * bone.local_transform(None);
            assert!(bone.global_transform().abs_diff_eq(expected, 1e-5));
        }
    }

    #[test]
    fn test_motion_independent_flags() {
        let set = BoneSet::build(chain()).unwrap();
        assert_eq!(set.center_index(), Some(1));
        assert!(set.bone(0).unwrap().is_motion_independent());
        assert!(!set.bone(1).unwrap().is_motion_independent());
        assert!(!set.bone(2).unwrap().is_motion_independent());
        assert!(set.bone(3).unwrap().is_motion_independent());
    }

    #[test]
    fn test_follow_rotate_coefficient_decoded() {
        let bones = vec![
            BoneLink::new("eye", BoneKind::Free, Vec3::ZERO),
            BoneLink::new("eyes_follow", BoneKind::FollowRotate, Vec3::ZERO)
                .with_child(0)
                .with_target(25),
        ];
        let set = BoneSet::build(bones).unwrap();
        let follow = set.bone(1).unwrap();
        assert!((follow.follow_coefficient - 0.25).abs() < 1e-6);
        assert_eq!(follow.target_index, None);
    }

    #[test]
    fn test_find_bone_by_name() {
        let set = BoneSet::build(chain()).unwrap();
        assert_eq!(set.find_bone_by_name("spine"), Some(2));
        assert_eq!(set.find_bone_by_name("tail"), None);
    }

    #[test]
    fn test_ik_disabled_by_simulation() {
        let mut set = BoneSet::build(chain()).unwrap();
        set.add_ik_chain(IkSolver::new(3, IkConfig {
            effector_bone: 2,
            iterations: 4,
            limit_angle: 1.0,
            links: vec![IkLink::new(1)],
        }))
        .unwrap();
        assert!(!set.is_ik_disabled_by_simulation(0));

        set.set_simulated(2, true);
        set.refresh_ik_simulation_flags();
        assert!(set.is_ik_disabled_by_simulation(0));

        let before = set.bone(1).unwrap().local_rotation;
        set.update();
        assert!(set.bone(1).unwrap().local_rotation.abs_diff_eq(before, 1e-6));
    }

    #[test]
    fn test_invalid_ik_chain() {
        let mut set = BoneSet::build(chain()).unwrap();
        let empty = IkSolver::new(3, IkConfig {
            effector_bone: 2,
            iterations: 4,
            limit_angle: 1.0,
            links: Vec::new(),
        });
        assert!(matches!(set.add_ik_chain(empty), Err(MmdError::InvalidIkChain { bone: 3, .. })));
    }

    #[test]
    fn test_update_after_physics_skips_simulated() {
        let mut set = BoneSet::build(chain()).unwrap();
        set.set_simulated(1, true);
        let physics_pose = Mat4::from_translation(Vec3::new(5.0, 5.0, 5.0));
        set.set_global_transform_physics(1, physics_pose);
        set.update_after_physics();

        assert!(set.world_transform(1).unwrap().abs_diff_eq(physics_pose, 1e-6));
        let spine = set.world_transform(2).unwrap();
        assert!(spine.w_axis.truncate().abs_diff_eq(Vec3::new(5.0, 6.0, 5.0), 1e-5));
    }
}
