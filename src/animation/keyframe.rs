//! 动画关键帧
//!
//! 每个关键帧的插值参数描述的是"从上一关键帧到本关键帧"这一段（VMD 约定）。

use glam::{Quat, Vec3};

use super::bezier_curve::{BezierCurveFactory, Interpolation};

/// 关键帧公共接口（供轨道查找使用）
pub trait Keyframe {
    fn frame(&self) -> f32;
}

/// 骨骼关键帧
#[derive(Clone, Debug)]
pub struct BoneKeyframe {
    pub frame: f32,
    pub translation: Vec3,
    pub rotation: Quat,
    pub interpolation_x: Interpolation,
    pub interpolation_y: Interpolation,
    pub interpolation_z: Interpolation,
    pub interpolation_r: Interpolation,
}

impl BoneKeyframe {
    /// 线性插值的骨骼关键帧
    pub fn new(frame: f32, translation: Vec3, rotation: Quat) -> Self {
        Self {
            frame,
            translation,
            rotation,
            interpolation_x: Interpolation::Linear,
            interpolation_y: Interpolation::Linear,
            interpolation_z: Interpolation::Linear,
            interpolation_r: Interpolation::Linear,
        }
    }

    /// 设置四个通道的 VMD 插值参数（X, Y, Z, 旋转）
    pub fn with_parameters(mut self, parameters: [[u8; 4]; 4], factory: &dyn BezierCurveFactory) -> Self {
        self.interpolation_x = Interpolation::from_parameters(parameters[0], factory);
        self.interpolation_y = Interpolation::from_parameters(parameters[1], factory);
        self.interpolation_z = Interpolation::from_parameters(parameters[2], factory);
        self.interpolation_r = Interpolation::from_parameters(parameters[3], factory);
        self
    }
}

impl Keyframe for BoneKeyframe {
    #[inline]
    fn frame(&self) -> f32 {
        self.frame
    }
}

/// Morph 关键帧（权重通道，线性插值）
#[derive(Clone, Debug)]
pub struct MorphKeyframe {
    pub frame: f32,
    pub weight: f32,
}

impl MorphKeyframe {
    pub fn new(frame: f32, weight: f32) -> Self {
        Self { frame, weight }
    }
}

impl Keyframe for MorphKeyframe {
    #[inline]
    fn frame(&self) -> f32 {
        self.frame
    }
}

/// 相机关键帧
#[derive(Clone, Debug)]
pub struct CameraKeyframe {
    pub frame: f32,
    /// 到注视点的距离
    pub distance: f32,
    /// 注视点
    pub position: Vec3,
    /// 欧拉角（弧度）
    pub angle: Vec3,
    /// 视野角（度）
    pub fov: f32,
    pub perspective: bool,
    pub interpolation_x: Interpolation,
    pub interpolation_y: Interpolation,
    pub interpolation_z: Interpolation,
    pub interpolation_r: Interpolation,
    pub interpolation_distance: Interpolation,
    pub interpolation_fov: Interpolation,
}

impl CameraKeyframe {
    pub fn new(frame: f32, position: Vec3, angle: Vec3, distance: f32, fov: f32) -> Self {
        Self {
            frame,
            distance,
            position,
            angle,
            fov,
            perspective: true,
            interpolation_x: Interpolation::Linear,
            interpolation_y: Interpolation::Linear,
            interpolation_z: Interpolation::Linear,
            interpolation_r: Interpolation::Linear,
            interpolation_distance: Interpolation::Linear,
            interpolation_fov: Interpolation::Linear,
        }
    }

    /// 设置六个通道的 VMD 插值参数（X, Y, Z, 旋转, 距离, 视野角）
    pub fn with_parameters(mut self, parameters: [[u8; 4]; 6], factory: &dyn BezierCurveFactory) -> Self {
        self.interpolation_x = Interpolation::from_parameters(parameters[0], factory);
        self.interpolation_y = Interpolation::from_parameters(parameters[1], factory);
        self.interpolation_z = Interpolation::from_parameters(parameters[2], factory);
        self.interpolation_r = Interpolation::from_parameters(parameters[3], factory);
        self.interpolation_distance = Interpolation::from_parameters(parameters[4], factory);
        self.interpolation_fov = Interpolation::from_parameters(parameters[5], factory);
        self
    }
}

impl Keyframe for CameraKeyframe {
    #[inline]
    fn frame(&self) -> f32 {
        self.frame
    }
}
