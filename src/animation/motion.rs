//! Motion 核心数据结构
//!
//! 存储完整的动画数据，包括骨骼轨道、Morph 轨道和相机轨道。
//! 由外部加载器逐帧插入关键帧，调用 `finalize` 后只读共享（`Arc<Motion>`）。

use std::collections::HashMap;

use super::bezier_curve::BezierCurveCache;
use super::keyframe::{BoneKeyframe, CameraKeyframe, MorphKeyframe};
use super::motion_track::{BoneMotionTrack, CameraMotionTrack, MorphMotionTrack, MotionTrack};

/// 动画数据
#[derive(Debug, Clone, Default)]
pub struct Motion {
    /// 动作名称
    pub name: String,
    /// 骨骼动画轨道
    bone_tracks: Vec<BoneMotionTrack>,
    bone_track_index: HashMap<String, usize>,
    /// Morph 动画轨道
    morph_tracks: Vec<MorphMotionTrack>,
    morph_track_index: HashMap<String, usize>,
    /// 相机动画轨道（单一轨道）
    camera_track: CameraMotionTrack,
    /// 贝塞尔曲线缓存
    bezier_cache: BezierCurveCache,
    /// 最大帧（finalize 时计算）
    max_frame: f32,
}

impl Motion {
    /// 创建空的 Motion
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// 曲线缓存，构建带插值参数的关键帧时使用
    pub fn bezier_cache(&self) -> &BezierCurveCache {
        &self.bezier_cache
    }

    /// 插入骨骼关键帧
    pub fn insert_bone_keyframe(&mut self, name: &str, keyframe: BoneKeyframe) {
        let index = match self.bone_track_index.get(name) {
            Some(&index) => index,
            None => {
                self.bone_tracks.push(BoneMotionTrack::new(name));
                self.bone_track_index.insert(name.to_string(), self.bone_tracks.len() - 1);
                self.bone_tracks.len() - 1
            }
        };
        self.bone_tracks[index].insert_keyframe(keyframe);
    }

    /// 插入 Morph 关键帧
    pub fn insert_morph_keyframe(&mut self, name: &str, keyframe: MorphKeyframe) {
        let index = match self.morph_track_index.get(name) {
            Some(&index) => index,
            None => {
                self.morph_tracks.push(MorphMotionTrack::new(name));
                self.morph_track_index.insert(name.to_string(), self.morph_tracks.len() - 1);
                self.morph_tracks.len() - 1
            }
        };
        self.morph_tracks[index].insert_keyframe(keyframe);
    }

    /// 插入相机关键帧
    pub fn insert_camera_keyframe(&mut self, keyframe: CameraKeyframe) {
        self.camera_track.insert_keyframe(keyframe);
    }

    /// 排序所有轨道并计算最大帧
    pub fn finalize(&mut self) {
        for track in &mut self.bone_tracks {
            track.finalize();
        }
        for track in &mut self.morph_tracks {
            track.finalize();
        }
        self.camera_track.finalize();

        let bone_max = self.bone_tracks.iter().map(|t| t.max_frame()).fold(0.0, f32::max);
        let morph_max = self.morph_tracks.iter().map(|t| t.max_frame()).fold(0.0, f32::max);
        self.max_frame = bone_max.max(morph_max).max(self.camera_track.max_frame());
    }

    /// 获取动画持续时间（最大帧）
    #[inline]
    pub fn max_frame(&self) -> f32 {
        self.max_frame
    }

    #[inline]
    pub fn bone_tracks(&self) -> &[BoneMotionTrack] {
        &self.bone_tracks
    }

    #[inline]
    pub fn morph_tracks(&self) -> &[MorphMotionTrack] {
        &self.morph_tracks
    }

    pub fn find_bone_track(&self, name: &str) -> Option<&BoneMotionTrack> {
        self.bone_track_index.get(name).map(|&i| &self.bone_tracks[i])
    }

    pub fn find_morph_track(&self, name: &str) -> Option<&MorphMotionTrack> {
        self.morph_track_index.get(name).map(|&i| &self.morph_tracks[i])
    }

    #[inline]
    pub fn camera_track(&self) -> &CameraMotionTrack {
        &self.camera_track
    }

    /// 是否包含相机数据
    pub fn has_camera_data(&self) -> bool {
        !self.camera_track.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    #[test]
    fn test_finalize_computes_max_frame() {
        let mut motion = Motion::new("walk");
        motion.insert_bone_keyframe("arm", BoneKeyframe::new(30.0, Vec3::ZERO, Quat::IDENTITY));
        motion.insert_bone_keyframe("arm", BoneKeyframe::new(0.0, Vec3::ZERO, Quat::IDENTITY));
        motion.insert_morph_keyframe("blink", MorphKeyframe::new(45.0, 1.0));
        motion.finalize();

        assert_eq!(motion.max_frame(), 45.0);
        let arm = motion.find_bone_track("arm").unwrap();
        assert_eq!(arm.keyframes[0].frame, 0.0);
        assert_eq!(arm.keyframes[1].frame, 30.0);
        assert!(motion.find_bone_track("leg").is_none());
        assert!(!motion.has_camera_data());
    }

    #[test]
    fn test_empty_motion() {
        let mut motion = Motion::new("empty");
        motion.finalize();
        assert_eq!(motion.max_frame(), 0.0);
        assert!(motion.bone_tracks().is_empty());
    }
}
