//! 相机控制器
//!
//! 与骨骼动作使用同一套求值算法，但只有单一轨道，没有混合层。

use std::sync::Arc;

use glam::{Mat4, Vec3};

use super::motion::Motion;
use super::motion_track::{CameraFrameTransform, MotionTrack};

/// 相机控制器
#[derive(Clone, Debug)]
pub struct CameraController {
    motion: Arc<Motion>,
    hint: usize,
    current_frame: f64,
    previous_frame: f64,
    max_frame: f64,
    state: CameraFrameTransform,
}

impl CameraController {
    /// 动作不含相机关键帧时返回 None
    pub fn new(motion: Arc<Motion>) -> Option<Self> {
        if !motion.has_camera_data() {
            return None;
        }
        let max_frame = motion.camera_track().max_frame() as f64;
        let mut controller = Self {
            motion,
            hint: 0,
            current_frame: 0.0,
            previous_frame: 0.0,
            max_frame,
            state: CameraFrameTransform::default(),
        };
        controller.control(0.0);
        Some(controller)
    }

    #[inline]
    pub fn current_frame(&self) -> f64 {
        self.current_frame
    }

    #[inline]
    pub fn max_frame(&self) -> f64 {
        self.max_frame
    }

    /// 最近一次求值结果
    #[inline]
    pub fn state(&self) -> &CameraFrameTransform {
        &self.state
    }

    /// 在指定帧求值
    pub fn control(&mut self, frame: f32) {
        self.state = self.motion.camera_track().seek(frame, &mut self.hint);
    }

    /// 求值当前帧并推进，越过末帧的那一次返回 true
    pub fn advance(&mut self, delta: f64) -> bool {
        self.control(self.current_frame as f32);
        self.previous_frame = self.current_frame;
        self.current_frame += delta;
        if self.current_frame >= self.max_frame {
            self.current_frame = self.max_frame;
            return self.previous_frame < self.max_frame;
        }
        false
    }

    pub fn reset(&mut self) {
        self.hint = 0;
        self.current_frame = 0.0;
        self.previous_frame = 0.0;
        self.control(0.0);
    }

    /// 相机位置
    pub fn eye(&self) -> Vec3 {
        self.state.eye()
    }

    /// 视图矩阵（右手系）
    pub fn view_matrix(&self) -> Mat4 {
        let up = self.state.orientation() * Vec3::Y;
        Mat4::look_at_rh(self.eye(), self.state.look_at, up)
    }

    /// 垂直视野角（弧度）
    pub fn fov_radians(&self) -> f32 {
        self.state.fov.to_radians()
    }
}
