//! MMD 运行时动画核心
//!
//! 负责：
//! - 骨骼层级与世界变换传播（旋转继承、物理标志）
//! - VMD 风格关键帧动作：插值、多层混合、平滑开始、循环与淡出
//! - CCD IK 求解
//! - 骨骼与 Rapier 刚体之间的双向同步（运动学 / 物理 / 对齐 三种模式）
//!
//! 文件解析、渲染、UI 都不在本 crate 中；模型与动作数据由外部加载后
//! 通过 [`model::ModelDescriptor`] 与 [`animation::Motion`] 传入。
//! 日志走 `log` 门面，宿主不安装后端时所有日志调用均为空操作。

pub mod animation;
pub mod model;
pub mod morph;
pub mod physics;
pub mod skeleton;

pub use animation::{CameraController, Motion, MotionController, MotionManager};
pub use model::{MmdModel, ModelDescriptor};
pub use morph::MorphManager;
pub use physics::MMDPhysics;
pub use skeleton::{BoneKind, BoneLink, BoneSet, IkSolver};

use thiserror::Error;

/// MMD 核心错误类型
///
/// 只用于加载期的结构错误；运行期的名称缺失等情况静默跳过。
#[derive(Error, Debug)]
pub enum MmdError {
    #[error("bone index {index} out of range (bone count {count})")]
    BoneIndexOutOfRange { index: usize, count: usize },

    #[error("invalid bone hierarchy at bone {index}: {reason}")]
    InvalidHierarchy { index: usize, reason: String },

    #[error("invalid IK chain on bone {bone}: {reason}")]
    InvalidIkChain { bone: usize, reason: String },

    #[error("unsupported rigid body shape type {0}")]
    UnsupportedShape(u8),

    #[error("rigid body index {index} out of range (body count {count})")]
    RigidBodyIndexOutOfRange { index: usize, count: usize },

    #[error("invalid constraint '{name}': {reason}")]
    InvalidConstraint { name: String, reason: String },

    #[error("Physics error: {0}")]
    Physics(String),

    #[error("Animation error: {0}")]
    Animation(String),
}

pub type Result<T> = std::result::Result<T, MmdError>;
