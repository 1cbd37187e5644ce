//! MMD 模型运行时
//!
//! 外部加载器把骨骼、IK、Morph 名称和刚体/约束表填进 [`ModelDescriptor`]，
//! [`MmdModel::build`] 一次性校验并构建，之后宿主每帧调用 `advance`。

mod runtime;

pub use runtime::MmdModel;

use crate::physics::{ConstraintDesc, RigidBodyDesc};
use crate::skeleton::{BoneLink, IkSolver};

/// 模型描述（加载器输出）
///
/// 骨骼按父先子后的顺序排列，父/子/目标均为本数组内的索引。
#[derive(Clone, Debug, Default)]
pub struct ModelDescriptor {
    pub bones: Vec<BoneLink>,
    pub ik_chains: Vec<IkSolver>,
    pub morph_names: Vec<String>,
    pub rigid_bodies: Vec<RigidBodyDesc>,
    pub constraints: Vec<ConstraintDesc>,
}

impl ModelDescriptor {
    pub fn new(bones: Vec<BoneLink>) -> Self {
        Self {
            bones,
            ..Self::default()
        }
    }

    pub fn has_physics(&self) -> bool {
        !self.rigid_bodies.is_empty()
    }
}
