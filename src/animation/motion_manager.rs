//! 动作管理器 - 单个角色的多层动作
//!
//! 播放器按优先级升序排列，同一帧内后面的（高优先级）播放器在前面的结果之上
//! 覆盖或混合。淡出结束的播放器先标记为非活动，下一次 `update` 开头统一清理。

use std::sync::Arc;

use super::motion::Motion;
use super::motion_controller::MotionController;
use crate::morph::MorphManager;
use crate::skeleton::BoneSet;
use crate::{MmdError, Result};

/// 淡出时骨骼混合的默认帧数
pub const DEFAULT_BONE_FADE_FRAMES: f32 = 20.0;
/// 淡出时 Morph 混合的默认帧数
pub const DEFAULT_MORPH_FADE_FRAMES: f32 = 5.0;
/// 基础动作切换后，未被控制的骨骼/Morph 回到初始姿态所用的帧数
pub const NON_CONTROLLED_RESET_FRAMES: f32 = 10.0;

/// 播放到末尾时的处理
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MotionEndPolicy {
    /// 停在最后一帧
    Hold,
    /// 回到开头
    #[default]
    Loop,
    /// 淡出后删除
    FadeOut,
}

/// 播放器状态（每次 update 刷新，供宿主同步事件）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerStatus {
    Running,
    /// 本帧发生了循环
    Looped,
    /// 本帧淡出结束，下一次 update 时移除
    Deleted,
}

/// 开始播放时的选项
#[derive(Clone, Copy, Debug)]
pub struct PlayerOptions {
    /// 层级，数值大的后求值
    pub priority: i32,
    pub end_policy: MotionEndPolicy,
    /// 完整动作：单关键帧轨道也生效，并作为基础动作参与未控制骨骼的复位
    pub full: bool,
    /// 平滑开始
    pub smooth: bool,
    pub blend_rate: f32,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            end_policy: MotionEndPolicy::Loop,
            full: true,
            smooth: true,
            blend_rate: 1.0,
        }
    }
}

/// 动作播放器
#[derive(Clone, Debug)]
pub struct MotionPlayer {
    name: String,
    controller: MotionController,
    priority: i32,
    end_policy: MotionEndPolicy,
    blend_rate: f32,
    ignore_static: bool,
    active: bool,
    status: PlayerStatus,
    bone_fade_frames: f32,
    morph_fade_frames: f32,
    bone_fade_remaining: f32,
    morph_fade_remaining: f32,
}

impl MotionPlayer {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    #[inline]
    pub fn end_policy(&self) -> MotionEndPolicy {
        self.end_policy
    }

    #[inline]
    pub fn blend_rate(&self) -> f32 {
        self.blend_rate
    }

    #[inline]
    pub fn status(&self) -> PlayerStatus {
        self.status
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn is_fading(&self) -> bool {
        self.bone_fade_remaining > 0.0 || self.morph_fade_remaining > 0.0
    }

    #[inline]
    pub fn controller(&self) -> &MotionController {
        &self.controller
    }

    fn start_fade_out(&mut self) {
        self.bone_fade_remaining = self.bone_fade_frames;
        self.morph_fade_remaining = self.morph_fade_frames;
    }
}

/// 动作管理器
#[derive(Clone, Debug, Default)]
pub struct MotionManager {
    players: Vec<MotionPlayer>,
    /// 未控制骨骼复位的剩余帧数
    non_controlled_reset_remaining: f32,
}

impl MotionManager {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn players(&self) -> &[MotionPlayer] {
        &self.players
    }

    fn find_active(&self, name: &str) -> Option<usize> {
        self.players.iter().position(|p| p.active && p.name == name)
    }

    /// 开始播放新动作，同名活动播放器已存在时失败
    pub fn start_motion(
        &mut self,
        name: &str,
        motion: Arc<Motion>,
        options: PlayerOptions,
        bones: &BoneSet,
        morphs: &MorphManager,
    ) -> Result<()> {
        if self.find_active(name).is_some() {
            return Err(MmdError::Animation(format!("motion '{}' is already playing", name)));
        }

        let controller = Self::make_controller(motion, options.full, options.smooth, bones, morphs);
        if options.full {
            self.non_controlled_reset_remaining = NON_CONTROLLED_RESET_FRAMES;
        }

        let player = MotionPlayer {
            name: name.to_string(),
            controller,
            priority: options.priority,
            end_policy: options.end_policy,
            blend_rate: options.blend_rate,
            ignore_static: !options.full,
            active: true,
            status: PlayerStatus::Running,
            bone_fade_frames: DEFAULT_BONE_FADE_FRAMES,
            morph_fade_frames: DEFAULT_MORPH_FADE_FRAMES,
            bone_fade_remaining: 0.0,
            morph_fade_remaining: 0.0,
        };

        // 同优先级按开始顺序排列
        let position = self
            .players
            .iter()
            .position(|p| p.priority > options.priority)
            .unwrap_or(self.players.len());
        self.players.insert(position, player);

        log::debug!("开始播放动作 '{}'（优先级 {}）", name, options.priority);
        Ok(())
    }

    /// 替换活动播放器的动作，保留其层级与选项
    pub fn swap_motion(
        &mut self,
        name: &str,
        motion: Arc<Motion>,
        bones: &BoneSet,
        morphs: &MorphManager,
    ) -> Result<()> {
        let index = self
            .find_active(name)
            .ok_or_else(|| MmdError::Animation(format!("motion '{}' is not playing", name)))?;

        let full = !self.players[index].ignore_static;
        let smooth = self.players[index].controller.is_override_first();
        let controller = Self::make_controller(motion, full, smooth, bones, morphs);
        if full {
            self.non_controlled_reset_remaining = NON_CONTROLLED_RESET_FRAMES;
        }

        let player = &mut self.players[index];
        player.controller = controller;
        player.bone_fade_remaining = 0.0;
        player.morph_fade_remaining = 0.0;
        player.status = PlayerStatus::Running;
        Ok(())
    }

    fn make_controller(
        motion: Arc<Motion>,
        full: bool,
        smooth: bool,
        bones: &BoneSet,
        morphs: &MorphManager,
    ) -> MotionController {
        let mut controller = MotionController::new(motion, bones, morphs);
        controller.set_ignore_single_keyframe(!full);
        if smooth {
            controller.set_override_first(bones, morphs);
        }
        controller
    }

    /// 让播放器淡出，淡出结束后删除
    pub fn delete_motion(&mut self, name: &str) -> bool {
        match self.find_active(name) {
            Some(index) => {
                self.players[index].start_fade_out();
                true
            }
            None => false,
        }
    }

    /// 修改层级并重新排序（稳定排序，同优先级保持原顺序）
    pub fn set_priority(&mut self, name: &str, priority: i32) -> bool {
        let Some(index) = self.find_active(name) else {
            return false;
        };
        self.players[index].priority = priority;
        self.players.sort_by_key(|p| p.priority);
        true
    }

    pub fn set_blend_rate(&mut self, name: &str, rate: f32) -> bool {
        let Some(index) = self.find_active(name) else {
            return false;
        };
        self.players[index].blend_rate = rate;
        true
    }

    pub fn set_end_policy(&mut self, name: &str, policy: MotionEndPolicy) -> bool {
        let Some(index) = self.find_active(name) else {
            return false;
        };
        self.players[index].end_policy = policy;
        true
    }

    /// 播放器状态（已删除但尚未清理的播放器返回 `Deleted`）
    pub fn status(&self, name: &str) -> Option<PlayerStatus> {
        self.players.iter().find(|p| p.name == name).map(|p| p.status)
    }

    /// 活动播放器名称（按求值顺序）
    pub fn player_names(&self) -> Vec<&str> {
        self.players.iter().filter(|p| p.active).map(|p| p.name.as_str()).collect()
    }

    /// 停止并移除所有播放器
    pub fn clear(&mut self) {
        self.players.clear();
        self.non_controlled_reset_remaining = 0.0;
    }

    /// 移除非活动播放器
    fn purge(&mut self) {
        self.players.retain(|p| p.active);
    }

    // ========================================
    // 每帧更新
    // ========================================

    /// 推进所有播放器 `delta` 帧，返回是否仍有活动播放器
    pub fn update(&mut self, delta: f64, bones: &mut BoneSet, morphs: &mut MorphManager) -> bool {
        self.purge();

        if self.non_controlled_reset_remaining > 0.0 {
            self.non_controlled_reset_remaining = (self.non_controlled_reset_remaining - delta as f32).max(0.0);
            self.reset_non_controlled(bones, morphs);
        }

        for player in &mut self.players {
            player.status = PlayerStatus::Running;

            if player.is_fading() {
                let bone_rate = if player.bone_fade_frames > 0.0 {
                    player.blend_rate * player.bone_fade_remaining / player.bone_fade_frames
                } else {
                    0.0
                };
                let morph_rate = if player.morph_fade_frames > 0.0 {
                    player.morph_fade_remaining / player.morph_fade_frames
                } else {
                    0.0
                };
                player.controller.set_bone_blend_rate(bone_rate);
                player.controller.set_morph_blend_rate(morph_rate);

                player.bone_fade_remaining = (player.bone_fade_remaining - delta as f32).max(0.0);
                player.morph_fade_remaining = (player.morph_fade_remaining - delta as f32).max(0.0);
                if !player.is_fading() {
                    player.active = false;
                    player.status = PlayerStatus::Deleted;
                    log::debug!("动作 '{}' 淡出结束", player.name);
                }
                player.controller.advance(delta, bones, morphs);
                continue;
            }

            player.controller.set_bone_blend_rate(player.blend_rate);
            player.controller.set_morph_blend_rate(1.0);
            if player.controller.advance(delta, bones, morphs) {
                match player.end_policy {
                    MotionEndPolicy::Hold => {}
                    MotionEndPolicy::Loop => {
                        if player.controller.max_frame() != 0.0 {
                            player.controller.rewind(delta, bones, morphs);
                            player.status = PlayerStatus::Looped;
                        }
                    }
                    MotionEndPolicy::FadeOut => player.start_fade_out(),
                }
            }
        }

        self.players.iter().any(|p| p.active)
    }

    /// 所有活动播放器在同一帧求值，不推进播放头（编辑器拖动时间轴时使用）
    pub fn control(&mut self, frame: f32, bones: &mut BoneSet, morphs: &mut MorphManager) {
        for player in self.players.iter_mut().filter(|p| p.active) {
            player.controller.set_bone_blend_rate(player.blend_rate);
            player.controller.set_morph_blend_rate(1.0);
            player.controller.control(frame, bones, morphs);
        }
    }

    /// 把基础动作未控制的骨骼/Morph 按剩余帧数比例拉回初始姿态
    fn reset_non_controlled(&self, bones: &mut BoneSet, morphs: &mut MorphManager) {
        let Some(base) = self.players.iter().find(|p| p.active && !p.ignore_static) else {
            return;
        };
        let rate = self.non_controlled_reset_remaining / NON_CONTROLLED_RESET_FRAMES;

        let mut controlled = vec![false; bones.len()];
        for index in base.controller.controlled_bones() {
            controlled[index] = true;
        }
        for index in (0..controlled.len()).filter(|&i| !controlled[i]) {
            if let Some(bone) = bones.bone_mut(index) {
                bone.local_translation *= rate;
                bone.local_rotation = glam::Quat::IDENTITY.slerp(bone.local_rotation, rate);
            }
        }

        let mut controlled = vec![false; morphs.morph_count()];
        for index in base.controller.controlled_morphs() {
            controlled[index] = true;
        }
        for index in (0..controlled.len()).filter(|&i| !controlled[i]) {
            let weight = morphs.get_morph_weight(index);
            morphs.set_morph_weight(index, weight * rate);
        }
    }
}
