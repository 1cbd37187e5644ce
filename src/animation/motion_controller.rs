//! 动作控制器
//!
//! 一个控制器对应一个正在播放的 Motion：维护播放头、按帧求值各轨道，
//! 并按混合率把结果写入骨骼本地姿态与 Morph 权重。
//!
//! 平滑开始：`override_first` 打开时，开始（或循环）那一刻的实时姿态被记录为快照，
//! 在起始余量窗口内把快照当作虚拟首关键帧，向轨道的真实关键帧过渡。

use std::sync::Arc;

use glam::Vec3;

use super::motion::Motion;
use super::motion_track::{interpolate_bone, BoneMotionTrack, MorphMotionTrack, MotionTrack};
use crate::morph::MorphManager;
use crate::skeleton::{BoneSet, BoneTransform};

/// 骨骼平滑开始的余量帧数
pub const BONE_START_MARGIN_FRAME: f32 = 20.0;
/// Morph 平滑开始的余量帧数
pub const MORPH_START_MARGIN_FRAME: f32 = 6.0;
/// 播放头到达末帧的判定容差（累加的小数帧存在舍入误差）
const FRAME_EPSILON: f64 = 1.0e-6;

/// 骨骼绑定
#[derive(Clone, Debug)]
struct BoneElement {
    bone_index: usize,
    track_index: usize,
    hint: usize,
    snapshot: BoneTransform,
    /// 快照是否有效
    looped: bool,
}

/// Morph 绑定
#[derive(Clone, Debug)]
struct MorphElement {
    morph_index: usize,
    track_index: usize,
    hint: usize,
    snapshot: f32,
    looped: bool,
}

/// 动作控制器
#[derive(Clone, Debug)]
pub struct MotionController {
    motion: Arc<Motion>,
    bone_elements: Vec<BoneElement>,
    morph_elements: Vec<MorphElement>,

    current_frame: f64,
    previous_frame: f64,
    max_frame: f64,

    bone_blend_rate: f32,
    morph_blend_rate: f32,
    /// 忽略只有一个关键帧的轨道（静态姿态不覆盖下层动作）
    ignore_single_keyframe: bool,
    override_first: bool,
    /// 实际使用的余量（短动作会收缩到 max_frame）
    bone_start_margin: f32,
    morph_start_margin: f32,
}

impl MotionController {
    /// 把动作的轨道按名称绑定到模型的骨骼与 Morph，找不到的名称静默跳过
    pub fn new(motion: Arc<Motion>, bones: &BoneSet, morphs: &MorphManager) -> Self {
        let mut bone_elements = Vec::with_capacity(motion.bone_tracks().len());
        for (track_index, track) in motion.bone_tracks().iter().enumerate() {
            match bones.find_bone_by_name(&track.name) {
                Some(bone_index) => bone_elements.push(BoneElement {
                    bone_index,
                    track_index,
                    hint: 0,
                    snapshot: BoneTransform::default(),
                    looped: false,
                }),
                None => log::debug!("动作 '{}' 的骨骼 '{}' 不存在，跳过", motion.name, track.name),
            }
        }

        let mut morph_elements = Vec::with_capacity(motion.morph_tracks().len());
        for (track_index, track) in motion.morph_tracks().iter().enumerate() {
            match morphs.find_morph_by_name(&track.name) {
                Some(morph_index) => morph_elements.push(MorphElement {
                    morph_index,
                    track_index,
                    hint: 0,
                    snapshot: 0.0,
                    looped: false,
                }),
                None => log::debug!("动作 '{}' 的 Morph '{}' 不存在，跳过", motion.name, track.name),
            }
        }

        let max_frame = motion.max_frame() as f64;
        Self {
            motion,
            bone_elements,
            morph_elements,
            current_frame: 0.0,
            previous_frame: 0.0,
            max_frame,
            bone_blend_rate: 1.0,
            morph_blend_rate: 1.0,
            ignore_single_keyframe: false,
            override_first: false,
            bone_start_margin: BONE_START_MARGIN_FRAME,
            morph_start_margin: MORPH_START_MARGIN_FRAME,
        }
    }

    // ========================================
    // 访问器与设置
    // ========================================

    #[inline]
    pub fn motion(&self) -> &Arc<Motion> {
        &self.motion
    }

    #[inline]
    pub fn current_frame(&self) -> f64 {
        self.current_frame
    }

    #[inline]
    pub fn previous_frame(&self) -> f64 {
        self.previous_frame
    }

    #[inline]
    pub fn max_frame(&self) -> f64 {
        self.max_frame
    }

    /// 跳转播放头（不求值）
    pub fn set_current_frame(&mut self, frame: f64) {
        self.current_frame = frame.clamp(0.0, self.max_frame);
        self.previous_frame = self.current_frame;
    }

    pub fn set_bone_blend_rate(&mut self, rate: f32) {
        self.bone_blend_rate = rate;
    }

    pub fn set_morph_blend_rate(&mut self, rate: f32) {
        self.morph_blend_rate = rate;
    }

    #[inline]
    pub fn bone_blend_rate(&self) -> f32 {
        self.bone_blend_rate
    }

    #[inline]
    pub fn morph_blend_rate(&self) -> f32 {
        self.morph_blend_rate
    }

    pub fn set_ignore_single_keyframe(&mut self, ignore: bool) {
        self.ignore_single_keyframe = ignore;
    }

    #[inline]
    pub fn is_override_first(&self) -> bool {
        self.override_first
    }

    /// 绑定到的骨骼索引
    pub fn controlled_bones(&self) -> impl Iterator<Item = usize> + '_ {
        self.bone_elements.iter().map(|e| e.bone_index)
    }

    /// 绑定到的 Morph 索引
    pub fn controlled_morphs(&self) -> impl Iterator<Item = usize> + '_ {
        self.morph_elements.iter().map(|e| e.morph_index)
    }

    // ========================================
    // 平滑开始
    // ========================================

    /// 打开平滑开始并立即记录快照
    pub fn set_override_first(&mut self, bones: &BoneSet, morphs: &MorphManager) {
        self.override_first = true;
        self.shrink_margins();
        let center = Self::center_offset(bones);
        self.take_snapshot(center, bones, morphs);
    }

    /// 记录当前实时姿态为快照
    ///
    /// 与模型根无关的骨骼（`MOTION_INDEPENDENT`）快照减去 `center` 偏移，
    /// 使循环时这些骨骼不会被根的位移带偏。
    pub fn take_snapshot(&mut self, center: Option<Vec3>, bones: &BoneSet, morphs: &MorphManager) {
        let center = center.unwrap_or(Vec3::ZERO);
        for element in &mut self.bone_elements {
            let Some(bone) = bones.bone(element.bone_index) else {
                continue;
            };
            let mut translation = bone.local_translation;
            if bone.is_motion_independent() {
                translation -= center;
            }
            element.snapshot = BoneTransform::new(translation, bone.local_rotation);
            element.looped = true;
        }
        for element in &mut self.morph_elements {
            element.snapshot = morphs.get_morph_weight(element.morph_index);
            element.looped = true;
        }
    }

    fn center_offset(bones: &BoneSet) -> Option<Vec3> {
        bones
            .center_index()
            .and_then(|i| bones.bone(i))
            .map(|bone| bone.local_translation)
    }

    fn shrink_margins(&mut self) {
        let max = self.max_frame as f32;
        self.bone_start_margin = BONE_START_MARGIN_FRAME.min(max);
        self.morph_start_margin = MORPH_START_MARGIN_FRAME.min(max);
    }

    // ========================================
    // 求值
    // ========================================

    /// 在指定帧求值并写入骨骼和 Morph
    pub fn control(&mut self, frame: f32, bones: &mut BoneSet, morphs: &mut MorphManager) {
        let motion = Arc::clone(&self.motion);
        let override_first = self.override_first;

        for element in &mut self.bone_elements {
            let track = &motion.bone_tracks()[element.track_index];
            if track.is_empty() || (self.ignore_single_keyframe && track.len() <= 1) {
                continue;
            }
            let pose = if override_first && element.looped {
                sample_bone_with_snapshot(track, element, frame, self.bone_start_margin)
            } else {
                track.seek(frame, &mut element.hint)
            };

            let Some(bone) = bones.bone_mut(element.bone_index) else {
                continue;
            };
            if self.bone_blend_rate >= 1.0 {
                bone.local_translation = pose.translation;
                bone.local_rotation = pose.rotation;
            } else {
                let current = BoneTransform::new(bone.local_translation, bone.local_rotation);
                let blended = current.blend(&pose, self.bone_blend_rate);
                bone.local_translation = blended.translation;
                bone.local_rotation = blended.rotation;
            }
        }

        for element in &mut self.morph_elements {
            let track = &motion.morph_tracks()[element.track_index];
            if track.is_empty() || (self.ignore_single_keyframe && track.len() <= 1) {
                continue;
            }
            let weight = if override_first && element.looped {
                sample_morph_with_snapshot(track, element, frame, self.morph_start_margin)
            } else {
                track.seek(frame, &mut element.hint)
            };

            if self.morph_blend_rate >= 1.0 {
                morphs.set_morph_weight(element.morph_index, weight);
            } else {
                let current = morphs.get_morph_weight(element.morph_index);
                morphs.set_morph_weight(
                    element.morph_index,
                    current + (weight - current) * self.morph_blend_rate,
                );
            }
        }
    }

    /// 求值当前帧并推进播放头
    ///
    /// 到达末帧时停在 `max_frame`，只在越过末帧的那一次调用返回 true。
    pub fn advance(&mut self, delta: f64, bones: &mut BoneSet, morphs: &mut MorphManager) -> bool {
        self.control(self.current_frame as f32, bones, morphs);
        self.previous_frame = self.current_frame;
        self.current_frame += delta;
        if self.current_frame + FRAME_EPSILON >= self.max_frame {
            self.current_frame = self.max_frame;
            return self.previous_frame + FRAME_EPSILON < self.max_frame || self.max_frame == 0.0;
        }
        false
    }

    /// 回到开头继续播放，越过末帧的部分计入新一轮
    pub fn rewind(&mut self, delta: f64, bones: &BoneSet, morphs: &MorphManager) {
        let mut frame = (self.previous_frame + delta - self.max_frame).max(0.0);
        if self.max_frame > 0.0 {
            frame = frame.rem_euclid(self.max_frame);
        }
        self.current_frame = frame.max(0.0);
        self.previous_frame = 0.0;

        if self.override_first {
            self.shrink_margins();
            let center = Self::center_offset(bones);
            self.take_snapshot(center, bones, morphs);
        }
    }

    /// 重置播放状态（播放头、提示索引、快照）
    pub fn reset(&mut self) {
        self.current_frame = 0.0;
        self.previous_frame = 0.0;
        for element in &mut self.bone_elements {
            element.hint = 0;
            element.looped = false;
        }
        for element in &mut self.morph_elements {
            element.hint = 0;
            element.looped = false;
        }
    }
}

// ============================================================================
// 带快照的求值
// ============================================================================

/// 快照接入：
/// - 第二关键帧不晚于余量结束：快照替换首关键帧（t=0），用第二关键帧的曲线过渡
/// - 否则首关键帧推迟到 max(t0, margin)，之前从快照线性过渡到首关键帧
///
/// 第二种情况下第二关键帧总晚于余量，余量之后关键帧动画照常播放。
fn sample_bone_with_snapshot(
    track: &BoneMotionTrack,
    element: &mut BoneElement,
    frame: f32,
    margin: f32,
) -> BoneTransform {
    let keys = &track.keyframes;
    if keys.len() >= 2 && keys[1].frame <= margin {
        if frame < keys[1].frame {
            element.hint = 0;
            return interpolate_bone(element.snapshot, &keys[1], frame / keys[1].frame);
        }
        return track.seek(frame, &mut element.hint);
    }

    let start = keys[0].frame.max(margin);
    if frame < start {
        element.hint = 0;
        return element.snapshot.blend(&track.key_transform(0), (frame / start).max(0.0));
    }
    if keys.len() >= 2 && frame < keys[1].frame && start > keys[0].frame {
        element.hint = 0;
        let span = keys[1].frame - start;
        let w = if span > f32::EPSILON { (frame - start) / span } else { 1.0 };
        return interpolate_bone(track.key_transform(0), &keys[1], w);
    }
    track.seek(frame, &mut element.hint)
}

fn sample_morph_with_snapshot(
    track: &MorphMotionTrack,
    element: &mut MorphElement,
    frame: f32,
    margin: f32,
) -> f32 {
    let keys = &track.keyframes;
    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    if keys.len() >= 2 && keys[1].frame <= margin {
        if frame < keys[1].frame {
            element.hint = 0;
            return lerp(element.snapshot, keys[1].weight, frame / keys[1].frame);
        }
        return track.seek(frame, &mut element.hint);
    }

    let start = keys[0].frame.max(margin);
    if frame < start {
        element.hint = 0;
        return lerp(element.snapshot, keys[0].weight, (frame / start).max(0.0));
    }
    if keys.len() >= 2 && frame < keys[1].frame && start > keys[0].frame {
        element.hint = 0;
        let span = keys[1].frame - start;
        let w = if span > f32::EPSILON { (frame - start) / span } else { 1.0 };
        return lerp(keys[0].weight, keys[1].weight, w);
    }
    track.seek(frame, &mut element.hint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::keyframe::{BoneKeyframe, MorphKeyframe};
    use crate::skeleton::{BoneKind, BoneLink};
    use glam::Quat;

    fn model() -> (BoneSet, MorphManager) {
        let bones = BoneSet::build(vec![
            BoneLink::new("root", BoneKind::Free, Vec3::ZERO),
            BoneLink::new("arm", BoneKind::Free, Vec3::new(1.0, 0.0, 0.0)).with_parent(0),
        ])
        .unwrap();
        (bones, MorphManager::from_names(["blink"]))
    }

    fn slide_motion() -> Arc<Motion> {
        let mut motion = Motion::new("slide");
        motion.insert_bone_keyframe("arm", BoneKeyframe::new(0.0, Vec3::ZERO, Quat::IDENTITY));
        motion.insert_bone_keyframe("arm", BoneKeyframe::new(10.0, Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY));
        motion.insert_bone_keyframe("missing", BoneKeyframe::new(0.0, Vec3::ONE, Quat::IDENTITY));
        motion.insert_morph_keyframe("blink", MorphKeyframe::new(0.0, 0.0));
        motion.insert_morph_keyframe("blink", MorphKeyframe::new(10.0, 1.0));
        motion.finalize();
        Arc::new(motion)
    }

    #[test]
    fn test_missing_names_are_skipped() {
        let (bones, morphs) = model();
        let controller = MotionController::new(slide_motion(), &bones, &morphs);
        assert_eq!(controller.controlled_bones().collect::<Vec<_>>(), vec![1]);
        assert_eq!(controller.controlled_morphs().count(), 1);
    }

    #[test]
    fn test_control_samples_midpoint() {
        let (mut bones, mut morphs) = model();
        let mut controller = MotionController::new(slide_motion(), &bones, &morphs);
        controller.control(5.0, &mut bones, &mut morphs);
        let arm = bones.bone(1).unwrap();
        assert!(arm.local_translation.abs_diff_eq(Vec3::new(0.5, 0.0, 0.0), 1e-6));
        assert!((morphs.get_morph_weight(0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_advance_reports_end_once() {
        let (mut bones, mut morphs) = model();
        let mut controller = MotionController::new(slide_motion(), &bones, &morphs);
        let mut ends = 0;
        for _ in 0..4 {
            if controller.advance(2.5, &mut bones, &mut morphs) {
                ends += 1;
            }
        }
        assert_eq!(ends, 1);
        assert_eq!(controller.current_frame(), 10.0);
    }

    #[test]
    fn test_blend_rate_extremes() {
        let (mut bones, mut morphs) = model();
        let mut controller = MotionController::new(slide_motion(), &bones, &morphs);

        bones.bone_mut(1).unwrap().local_translation = Vec3::new(0.0, 3.0, 0.0);
        controller.set_bone_blend_rate(0.0);
        controller.set_morph_blend_rate(0.0);
        controller.control(10.0, &mut bones, &mut morphs);
        assert!(bones.bone(1).unwrap().local_translation.abs_diff_eq(Vec3::new(0.0, 3.0, 0.0), 1e-6));
        assert_eq!(morphs.get_morph_weight(0), 0.0);

        controller.set_bone_blend_rate(1.0);
        controller.control(10.0, &mut bones, &mut morphs);
        assert!(bones.bone(1).unwrap().local_translation.abs_diff_eq(Vec3::new(1.0, 0.0, 0.0), 1e-6));
    }

    #[test]
    fn test_ignore_single_keyframe_tracks() {
        let (mut bones, mut morphs) = model();
        let mut motion = Motion::new("pose");
        motion.insert_bone_keyframe("arm", BoneKeyframe::new(0.0, Vec3::ONE, Quat::IDENTITY));
        motion.finalize();

        let mut controller = MotionController::new(Arc::new(motion), &bones, &morphs);
        controller.set_ignore_single_keyframe(true);
        controller.control(0.0, &mut bones, &mut morphs);
        assert_eq!(bones.bone(1).unwrap().local_translation, Vec3::ZERO);

        controller.set_ignore_single_keyframe(false);
        controller.control(0.0, &mut bones, &mut morphs);
        assert_eq!(bones.bone(1).unwrap().local_translation, Vec3::ONE);
    }

    #[test]
    fn test_smooth_start_from_snapshot() {
        let (mut bones, mut morphs) = model();
        let mut motion = Motion::new("late");
        motion.insert_bone_keyframe("arm", BoneKeyframe::new(0.0, Vec3::new(2.0, 0.0, 0.0), Quat::IDENTITY));
        motion.insert_bone_keyframe("arm", BoneKeyframe::new(40.0, Vec3::new(2.0, 0.0, 0.0), Quat::IDENTITY));
        motion.finalize();

        bones.bone_mut(1).unwrap().local_translation = Vec3::ZERO;
        let mut controller = MotionController::new(Arc::new(motion), &bones, &morphs);
        controller.set_override_first(&bones, &morphs);

        controller.control(0.0, &mut bones, &mut morphs);
        assert!(bones.bone(1).unwrap().local_translation.abs_diff_eq(Vec3::ZERO, 1e-6));

        controller.control(10.0, &mut bones, &mut morphs);
        assert!(bones.bone(1).unwrap().local_translation.abs_diff_eq(Vec3::new(1.0, 0.0, 0.0), 1e-5));

        controller.control(25.0, &mut bones, &mut morphs);
        assert!(bones.bone(1).unwrap().local_translation.abs_diff_eq(Vec3::new(2.0, 0.0, 0.0), 1e-5));
    }

    #[test]
    fn test_rewind_carries_overflow() {
        let (mut bones, mut morphs) = model();
        let mut controller = MotionController::new(slide_motion(), &bones, &morphs);
        controller.set_current_frame(9.0);
        assert!(controller.advance(3.0, &mut bones, &mut morphs));
        controller.rewind(3.0, &bones, &morphs);
        assert!((controller.current_frame() - 2.0).abs() < 1e-9);
        assert_eq!(controller.previous_frame(), 0.0);
    }

    #[test]
    fn test_short_smooth_loop_keeps_playing() {
        let (mut bones, mut morphs) = model();
        let mut controller = MotionController::new(slide_motion(), &bones, &morphs);
        controller.set_override_first(&bones, &morphs);
        assert_eq!(controller.bone_start_margin, 10.0);
        assert_eq!(controller.morph_start_margin, MORPH_START_MARGIN_FRAME);

        let mut xs = Vec::new();
        for _ in 0..4 {
            controller.advance(2.5, &mut bones, &mut morphs);
            xs.push(bones.bone(1).unwrap().local_translation.x);
        }
        // 第二关键帧正好在余量末尾：快照 (0) 直接过渡到 x = 1
        for (x, expected) in xs.iter().zip([0.0, 0.25, 0.5, 0.75]) {
            assert!((x - expected).abs() < 1e-5);
        }
        // Morph 第二关键帧晚于余量：首关键帧推迟到第 6 帧，之后压缩播放到第 10 帧
        assert!((morphs.get_morph_weight(0) - 0.375).abs() < 1e-5);

        // 循环时重新记录快照，新一轮从 0.75 出发
        controller.rewind(2.5, &bones, &morphs);
        assert_eq!(controller.current_frame(), 0.0);
        controller.control(0.0, &mut bones, &mut morphs);
        assert!((bones.bone(1).unwrap().local_translation.x - 0.75).abs() < 1e-5);
        controller.control(5.0, &mut bones, &mut morphs);
        assert!((bones.bone(1).unwrap().local_translation.x - 0.875).abs() < 1e-5);
    }

    #[test]
    fn test_snapshot_replaces_first_key_when_second_is_early() {
        let (mut bones, mut morphs) = model();
        let mut motion = Motion::new("wave");
        motion.insert_bone_keyframe("arm", BoneKeyframe::new(0.0, Vec3::ZERO, Quat::IDENTITY));
        motion.insert_bone_keyframe("arm", BoneKeyframe::new(5.0, Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY));
        motion.insert_bone_keyframe("arm", BoneKeyframe::new(40.0, Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY));
        motion.insert_morph_keyframe("blink", MorphKeyframe::new(0.0, 0.0));
        motion.insert_morph_keyframe("blink", MorphKeyframe::new(4.0, 1.0));
        motion.insert_morph_keyframe("blink", MorphKeyframe::new(40.0, 1.0));
        motion.finalize();

        bones.bone_mut(1).unwrap().local_translation = Vec3::new(3.0, 0.0, 0.0);
        morphs.set_morph_weight(0, 0.2);
        let mut controller = MotionController::new(Arc::new(motion), &bones, &morphs);
        controller.set_override_first(&bones, &morphs);

        controller.control(2.5, &mut bones, &mut morphs);
        assert!(bones.bone(1).unwrap().local_translation.abs_diff_eq(Vec3::new(2.0, 0.0, 0.0), 1e-5));
        controller.control(2.0, &mut bones, &mut morphs);
        assert!((morphs.get_morph_weight(0) - 0.6).abs() < 1e-5);

        controller.control(5.0, &mut bones, &mut morphs);
        assert!(bones.bone(1).unwrap().local_translation.abs_diff_eq(Vec3::new(1.0, 0.0, 0.0), 1e-5));
        assert_eq!(morphs.get_morph_weight(0), 1.0);
    }

    #[test]
    fn test_fractional_steps_reach_end() {
        let (mut bones, mut morphs) = model();
        let mut motion = Motion::new("tap");
        motion.insert_bone_keyframe("arm", BoneKeyframe::new(0.0, Vec3::ZERO, Quat::IDENTITY));
        motion.insert_bone_keyframe("arm", BoneKeyframe::new(1.0, Vec3::ONE, Quat::IDENTITY));
        motion.finalize();

        let mut controller = MotionController::new(Arc::new(motion), &bones, &morphs);
        let ends: Vec<bool> = (0..10).map(|_| controller.advance(0.1, &mut bones, &mut morphs)).collect();
        assert_eq!(ends.iter().filter(|&&end| end).count(), 1);
        assert!(ends[9]);
        assert_eq!(controller.current_frame(), 1.0);
    }
}
