//! 动画系统
//!
//! - 关键帧与贝塞尔插值表
//! - 轨道求值（提示索引 + 二分查找）
//! - 动作控制器 / 多层动作管理器 / 相机控制器

pub mod bezier_curve;
pub mod camera_controller;
pub mod keyframe;
pub mod motion;
pub mod motion_controller;
pub mod motion_manager;
pub mod motion_track;

pub use bezier_curve::{BezierCurve, BezierCurveCache, BezierCurveFactory, Curve, Interpolation, INTERPOLATION_TABLE_SIZE};
pub use camera_controller::CameraController;
pub use keyframe::{BoneKeyframe, CameraKeyframe, Keyframe, MorphKeyframe};
pub use motion::Motion;
pub use motion_controller::{MotionController, BONE_START_MARGIN_FRAME, MORPH_START_MARGIN_FRAME};
pub use motion_manager::{
    MotionEndPolicy, MotionManager, MotionPlayer, PlayerOptions, PlayerStatus, DEFAULT_BONE_FADE_FRAMES,
    DEFAULT_MORPH_FADE_FRAMES, NON_CONTROLLED_RESET_FRAMES,
};
pub use motion_track::{
    interpolate_bone, BoneMotionTrack, CameraFrameTransform, CameraMotionTrack, MorphMotionTrack, MotionTrack,
};

/// 动作帧率（帧 → 秒换算，仅用于物理步长）
pub const MOTION_FPS: f32 = 30.0;
