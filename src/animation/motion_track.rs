//! 动画轨道
//!
//! 存储单个骨骼、Morph 或相机的所有关键帧（按时间升序），
//! 并提供基于提示索引的区间查找和插值。

use glam::{Quat, Vec3};

use super::keyframe::{BoneKeyframe, CameraKeyframe, Keyframe, MorphKeyframe};
use crate::skeleton::BoneTransform;

/// 动画轨道 trait
pub trait MotionTrack {
    type Key: Keyframe;
    type Frame;

    /// 按时间升序排列的关键帧
    fn keyframes(&self) -> &[Self::Key];

    /// 在指定帧求值，`hint` 为上一次查到的关键帧索引
    fn seek(&self, frame: f32, hint: &mut usize) -> Self::Frame;

    /// 获取轨道长度
    fn len(&self) -> usize {
        self.keyframes().len()
    }

    /// 是否为空
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 最后一个关键帧的时间
    fn max_frame(&self) -> f32 {
        self.keyframes().last().map(Keyframe::frame).unwrap_or(0.0)
    }

    /// 查找包围 `frame` 的前后关键帧索引 (k1, k2)
    ///
    /// 帧在首帧之前返回 (0, 0)，在末帧之后返回 (n-1, n-1)。
    /// 逐帧播放时先检查提示索引及其下一个区间，命中则 O(1)，否则二分查找。
    fn search_closest(&self, frame: f32, hint: &mut usize) -> (usize, usize) {
        let keys = self.keyframes();
        let n = keys.len();
        if n == 0 {
            return (0, 0);
        }
        if frame <= keys[0].frame() {
            *hint = 0;
            return (0, 0);
        }
        if frame >= keys[n - 1].frame() {
            *hint = n - 1;
            return (n - 1, n - 1);
        }

        let start = (*hint).min(n - 2);
        for k1 in [start, start + 1] {
            if k1 + 1 < n && keys[k1].frame() <= frame && frame < keys[k1 + 1].frame() {
                *hint = k1;
                return (k1, k1 + 1);
            }
        }

        let k2 = keys.partition_point(|k| k.frame() <= frame);
        let k1 = k2 - 1;
        *hint = k1;
        (k1, k2)
    }
}

/// 按时间排序，同一时间保留最后插入的关键帧
fn sort_and_dedup<K: Keyframe>(keyframes: &mut Vec<K>) {
    keyframes.sort_by(|a, b| a.frame().total_cmp(&b.frame()));
    let mut i = 0;
    while i + 1 < keyframes.len() {
        if keyframes[i].frame() == keyframes[i + 1].frame() {
            keyframes.remove(i);
        } else {
            i += 1;
        }
    }
}

/// 区间内的经过比例，区间长度为 0 时返回 None
#[inline]
fn elapsed_fraction(frame: f32, t1: f32, t2: f32) -> Option<f32> {
    let span = t2 - t1;
    if span <= f32::EPSILON {
        None
    } else {
        Some(((frame - t1) / span).clamp(0.0, 1.0))
    }
}

#[inline]
fn lerp_f32(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

// ============================================================================
// 骨骼轨道
// ============================================================================

/// 从任意起点姿态插值到关键帧 `to`，使用 `to` 的插值曲线
pub fn interpolate_bone(from: BoneTransform, to: &BoneKeyframe, w: f32) -> BoneTransform {
    let translation = Vec3::new(
        lerp_f32(from.translation.x, to.translation.x, to.interpolation_x.weight(w)),
        lerp_f32(from.translation.y, to.translation.y, to.interpolation_y.weight(w)),
        lerp_f32(from.translation.z, to.translation.z, to.interpolation_z.weight(w)),
    );
    let rotation = from.rotation.slerp(to.rotation, to.interpolation_r.weight(w));
    BoneTransform::new(translation, rotation)
}

/// 骨骼动画轨道
#[derive(Debug, Clone, Default)]
pub struct BoneMotionTrack {
    /// 骨骼名称
    pub name: String,
    /// 关键帧（finalize 后升序）
    pub keyframes: Vec<BoneKeyframe>,
}

impl BoneMotionTrack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keyframes: Vec::new(),
        }
    }

    /// 插入关键帧
    pub fn insert_keyframe(&mut self, keyframe: BoneKeyframe) {
        self.keyframes.push(keyframe);
    }

    /// 排序并去重
    pub fn finalize(&mut self) {
        sort_and_dedup(&mut self.keyframes);
    }

    /// 关键帧的姿态
    #[inline]
    pub fn key_transform(&self, index: usize) -> BoneTransform {
        let key = &self.keyframes[index];
        BoneTransform::new(key.translation, key.rotation)
    }
}

impl MotionTrack for BoneMotionTrack {
    type Key = BoneKeyframe;
    type Frame = BoneTransform;

    fn keyframes(&self) -> &[BoneKeyframe] {
        &self.keyframes
    }

    fn seek(&self, frame: f32, hint: &mut usize) -> BoneTransform {
        if self.keyframes.is_empty() {
            return BoneTransform::default();
        }
        let (k1, k2) = self.search_closest(frame, hint);
        let from = self.key_transform(k1);
        if k1 == k2 {
            return from;
        }
        let to = &self.keyframes[k2];
        match elapsed_fraction(frame, self.keyframes[k1].frame, to.frame) {
            Some(w) => interpolate_bone(from, to, w),
            None => from,
        }
    }
}

// ============================================================================
// Morph 轨道
// ============================================================================

/// Morph 动画轨道
#[derive(Debug, Clone, Default)]
pub struct MorphMotionTrack {
    /// Morph 名称
    pub name: String,
    /// 关键帧（finalize 后升序）
    pub keyframes: Vec<MorphKeyframe>,
}

impl MorphMotionTrack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keyframes: Vec::new(),
        }
    }

    /// 插入关键帧
    pub fn insert_keyframe(&mut self, keyframe: MorphKeyframe) {
        self.keyframes.push(keyframe);
    }

    pub fn finalize(&mut self) {
        sort_and_dedup(&mut self.keyframes);
    }
}

impl MotionTrack for MorphMotionTrack {
    type Key = MorphKeyframe;
    type Frame = f32;

    fn keyframes(&self) -> &[MorphKeyframe] {
        &self.keyframes
    }

    fn seek(&self, frame: f32, hint: &mut usize) -> f32 {
        if self.keyframes.is_empty() {
            return 0.0;
        }
        let (k1, k2) = self.search_closest(frame, hint);
        let (a, b) = (&self.keyframes[k1], &self.keyframes[k2]);
        match elapsed_fraction(frame, a.frame, b.frame) {
            // Morph 使用线性插值
            Some(w) if k1 != k2 => lerp_f32(a.weight, b.weight, w),
            _ => a.weight,
        }
    }
}

// ============================================================================
// 相机轨道
// ============================================================================

/// 相机帧求值结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraFrameTransform {
    /// 注视点
    pub look_at: Vec3,
    /// 欧拉角（弧度）
    pub angle: Vec3,
    /// 到注视点的距离
    pub distance: f32,
    /// 视野角（度）
    pub fov: f32,
    pub perspective: bool,
}

impl Default for CameraFrameTransform {
    fn default() -> Self {
        Self {
            look_at: Vec3::new(0.0, 10.0, 0.0),
            angle: Vec3::ZERO,
            distance: -45.0,
            fov: 30.0,
            perspective: true,
        }
    }
}

impl CameraFrameTransform {
    fn from_key(key: &CameraKeyframe) -> Self {
        Self {
            look_at: key.position,
            angle: key.angle,
            distance: key.distance,
            fov: key.fov,
            perspective: key.perspective,
        }
    }

    /// 相机朝向（MMD 相机欧拉角按 Y-X-Z 顺序组合）
    pub fn orientation(&self) -> Quat {
        Quat::from_rotation_y(self.angle.y)
            * Quat::from_rotation_x(self.angle.x)
            * Quat::from_rotation_z(self.angle.z)
    }

    /// 相机位置 = 注视点 + 朝向 * (0, 0, distance)
    pub fn eye(&self) -> Vec3 {
        self.look_at + self.orientation() * Vec3::new(0.0, 0.0, self.distance)
    }
}

/// 两个关键帧间隔不超过该帧数时视为镜头切换
pub const CAMERA_CUT_FRAMES: f32 = 1.0;

/// 相机动画轨道
#[derive(Debug, Clone, Default)]
pub struct CameraMotionTrack {
    pub keyframes: Vec<CameraKeyframe>,
}

impl CameraMotionTrack {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入关键帧
    pub fn insert_keyframe(&mut self, keyframe: CameraKeyframe) {
        self.keyframes.push(keyframe);
    }

    pub fn finalize(&mut self) {
        sort_and_dedup(&mut self.keyframes);
    }
}

impl MotionTrack for CameraMotionTrack {
    type Key = CameraKeyframe;
    type Frame = CameraFrameTransform;

    fn keyframes(&self) -> &[CameraKeyframe] {
        &self.keyframes
    }

    fn seek(&self, frame: f32, hint: &mut usize) -> CameraFrameTransform {
        if self.keyframes.is_empty() {
            return CameraFrameTransform::default();
        }
        let (k1, k2) = self.search_closest(frame, hint);
        let (a, b) = (&self.keyframes[k1], &self.keyframes[k2]);
        if k1 == k2 || b.frame - a.frame <= CAMERA_CUT_FRAMES {
            // 镜头切换：不插值
            return CameraFrameTransform::from_key(a);
        }
        let Some(w) = elapsed_fraction(frame, a.frame, b.frame) else {
            return CameraFrameTransform::from_key(a);
        };

        let look_at = Vec3::new(
            lerp_f32(a.position.x, b.position.x, b.interpolation_x.weight(w)),
            lerp_f32(a.position.y, b.position.y, b.interpolation_y.weight(w)),
            lerp_f32(a.position.z, b.position.z, b.interpolation_z.weight(w)),
        );
        CameraFrameTransform {
            look_at,
            angle: a.angle.lerp(b.angle, b.interpolation_r.weight(w)),
            distance: lerp_f32(a.distance, b.distance, b.interpolation_distance.weight(w)),
            fov: lerp_f32(a.fov, b.fov, b.interpolation_fov.weight(w)),
            perspective: a.perspective,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::bezier_curve::BezierCurveCache;

    fn linear_track() -> BoneMotionTrack {
        let mut track = BoneMotionTrack::new("bone");
        track.insert_keyframe(BoneKeyframe::new(10.0, Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY));
        track.insert_keyframe(BoneKeyframe::new(0.0, Vec3::ZERO, Quat::IDENTITY));
        track.finalize();
        track
    }

    #[test]
    fn test_linear_midpoint() {
        let track = linear_track();
        let mut hint = 0;
        let pose = track.seek(5.0, &mut hint);
        assert!(pose.translation.abs_diff_eq(Vec3::new(0.5, 0.0, 0.0), 1e-6));
    }

    #[test]
    fn test_clamps_outside_range() {
        let track = linear_track();
        let mut hint = 0;
        assert_eq!(track.seek(-3.0, &mut hint).translation, Vec3::ZERO);
        assert_eq!(track.seek(25.0, &mut hint).translation, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(track.max_frame(), 10.0);
    }

    #[test]
    fn test_search_with_stale_hint() {
        let mut track = BoneMotionTrack::new("bone");
        for i in 0..10 {
            track.insert_keyframe(BoneKeyframe::new(i as f32 * 10.0, Vec3::splat(i as f32), Quat::IDENTITY));
        }
        track.finalize();

        let mut hint = 7;
        assert_eq!(track.search_closest(15.0, &mut hint), (1, 2));
        assert_eq!(hint, 1);
        assert_eq!(track.search_closest(25.0, &mut hint), (2, 3));
        assert_eq!(track.search_closest(80.0, &mut hint), (8, 9));
    }

    #[test]
    fn test_duplicate_frames_keep_last() {
        let mut track = MorphMotionTrack::new("mouth");
        track.insert_keyframe(MorphKeyframe::new(0.0, 0.2));
        track.insert_keyframe(MorphKeyframe::new(0.0, 0.8));
        track.finalize();
        assert_eq!(track.len(), 1);
        let mut hint = 0;
        assert_eq!(track.seek(0.0, &mut hint), 0.8);
    }

    #[test]
    fn test_bezier_channel_eases() {
        let cache = BezierCurveCache::new();
        let mut track = BoneMotionTrack::new("bone");
        track.insert_keyframe(BoneKeyframe::new(0.0, Vec3::ZERO, Quat::IDENTITY));
        track.insert_keyframe(
            BoneKeyframe::new(10.0, Vec3::ONE, Quat::IDENTITY)
                .with_parameters([[64, 0, 127, 127], [20, 20, 107, 107], [20, 20, 107, 107], [20, 20, 107, 107]], &cache),
        );
        track.finalize();

        let mut hint = 0;
        let pose = track.seek(3.0, &mut hint);
        assert!(pose.translation.x < 0.3);
        assert!((pose.translation.y - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_camera_cut() {
        let mut track = CameraMotionTrack::new();
        track.insert_keyframe(CameraKeyframe::new(0.0, Vec3::ZERO, Vec3::ZERO, -30.0, 30.0));
        track.insert_keyframe(CameraKeyframe::new(1.0, Vec3::new(10.0, 0.0, 0.0), Vec3::ZERO, -50.0, 45.0));
        track.insert_keyframe(CameraKeyframe::new(11.0, Vec3::new(20.0, 0.0, 0.0), Vec3::ZERO, -50.0, 55.0));
        track.finalize();

        let mut hint = 0;
        let cut = track.seek(0.5, &mut hint);
        assert_eq!(cut.look_at, Vec3::ZERO);
        assert_eq!(cut.distance, -30.0);

        let mid = track.seek(6.0, &mut hint);
        assert!(mid.look_at.abs_diff_eq(Vec3::new(15.0, 0.0, 0.0), 1e-5));
        assert!((mid.fov - 50.0).abs() < 1e-5);
    }

    #[test]
    fn test_camera_eye() {
        let camera = CameraFrameTransform {
            look_at: Vec3::new(0.0, 10.0, 0.0),
            angle: Vec3::ZERO,
            distance: -45.0,
            fov: 30.0,
            perspective: true,
        };
        assert!(camera.eye().abs_diff_eq(Vec3::new(0.0, 10.0, -45.0), 1e-5));
    }
}
