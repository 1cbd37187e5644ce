//! 骨骼系统
//!
//! 核心设计思想：
//! - BoneLink: 单个骨骼节点，父/子/目标均为数组索引
//! - BoneSet: 模型独占的骨骼数组，负责校验、传播与 IK 调度
//! - IkSolver: CCD IK 求解器

mod bone_link;
mod bone_set;
mod ik_solver;

pub use bone_link::{BoneFlags, BoneKind, BoneLink, IkConfig, IkLink};
pub use bone_set::{BoneSet, CENTER_BONE_NAME};
pub use ik_solver::{IkOutcome, IkSolver};

use glam::{Mat4, Quat, Vec3};

// ============================================================================
// 公共类型定义
// ============================================================================

/// 骨骼本地姿态（动作求值的输出单位）
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoneTransform {
    pub translation: Vec3,
    pub rotation: Quat,
}

impl Default for BoneTransform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl BoneTransform {
    pub fn new(translation: Vec3, rotation: Quat) -> Self {
        Self { translation, rotation }
    }

    /// 转换为 4x4 矩阵
    #[inline]
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.translation)
    }

    /// 按比率混合：平移线性插值，旋转球面插值
    #[inline]
    pub fn blend(&self, other: &BoneTransform, rate: f32) -> BoneTransform {
        BoneTransform {
            translation: self.translation.lerp(other.translation, rate),
            rotation: self.rotation.slerp(other.rotation, rate),
        }
    }
}
