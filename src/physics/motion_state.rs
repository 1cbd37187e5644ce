//! 刚体运动状态
//!
//! 物理引擎与骨骼之间的变换桥：引擎通过 `world_transform` 读取、
//! 通过 `set_world_transform` 写回。三种耦合模式用一个枚举表示，
//! 模式切换就是替换变体并交接当前变换。

use glam::Mat4;

use crate::skeleton::BoneSet;

/// 运动状态
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MotionState {
    /// 跟随骨骼：变换总是 `bone.world * local`，忽略引擎写回
    Kinematic {
        bone: Option<usize>,
        local: Mat4,
        transform: Mat4,
    },
    /// 物理驱动：双向存储，引擎拥有变换
    Simulated { transform: Mat4 },
    /// 物理驱动，但骨骼提供参考姿态：只模拟旋转，位置总是取参考姿态的
    Aligned {
        bone: Option<usize>,
        local: Mat4,
        reference: Mat4,
        transform: Mat4,
    },
}

impl MotionState {
    /// 以骨骼当前世界变换创建跟随状态
    pub fn kinematic(bone: Option<usize>, local: Mat4, bones: &BoneSet) -> Self {
        let mut state = MotionState::Kinematic {
            bone,
            local,
            transform: local,
        };
        state.refresh(bones);
        state
    }

    /// 引擎读取的世界变换
    #[inline]
    pub fn world_transform(&self) -> Mat4 {
        match *self {
            MotionState::Kinematic { transform, .. }
            | MotionState::Simulated { transform }
            | MotionState::Aligned { transform, .. } => transform,
        }
    }

    /// 引擎写回世界变换，跟随状态忽略，对齐状态的平移替换为参考姿态的平移
    pub fn set_world_transform(&mut self, value: Mat4) {
        match self {
            MotionState::Kinematic { .. } => {}
            MotionState::Simulated { transform } => *transform = value,
            MotionState::Aligned { reference, transform, .. } => {
                let mut aligned = value;
                aligned.w_axis = reference.w_axis;
                *transform = aligned;
            }
        }
    }

    /// 从骨骼刷新：跟随状态重算变换，对齐状态重算参考姿态
    pub fn refresh(&mut self, bones: &BoneSet) {
        match self {
            MotionState::Kinematic { bone, local, transform } => {
                *transform = bone_frame(*bone, bones) * *local;
            }
            MotionState::Aligned { bone, local, reference, .. } => {
                *reference = bone_frame(*bone, bones) * *local;
            }
            MotionState::Simulated { .. } => {}
        }
    }

    #[inline]
    pub fn is_kinematic(&self) -> bool {
        matches!(self, MotionState::Kinematic { .. })
    }
}

/// 无骨骼的刚体以世界原点为参考
fn bone_frame(bone: Option<usize>, bones: &BoneSet) -> Mat4 {
    bone.and_then(|i| bones.world_transform(i)).unwrap_or(Mat4::IDENTITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::{BoneKind, BoneLink};
    use glam::Vec3;

    #[test]
    fn test_kinematic_ignores_writes() {
        let bones = BoneSet::build(vec![BoneLink::new("head", BoneKind::Free, Vec3::new(0.0, 15.0, 0.0))]).unwrap();
        let local = Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0));
        let mut state = MotionState::kinematic(Some(0), local, &bones);
        let expected = Mat4::from_translation(Vec3::new(0.0, 16.0, 0.0));
        assert!(state.world_transform().abs_diff_eq(expected, 1e-6));

        state.set_world_transform(Mat4::IDENTITY);
        assert!(state.world_transform().abs_diff_eq(expected, 1e-6));
    }

    #[test]
    fn test_simulated_stores_writes() {
        let mut state = MotionState::Simulated { transform: Mat4::IDENTITY };
        let moved = Mat4::from_translation(Vec3::X);
        state.set_world_transform(moved);
        assert_eq!(state.world_transform(), moved);
        assert!(!state.is_kinematic());
    }

    #[test]
    fn test_aligned_keeps_reference_origin() {
        let bones = BoneSet::build(vec![BoneLink::new("head", BoneKind::Free, Vec3::new(0.0, 15.0, 0.0))]).unwrap();
        let local = Mat4::from_translation(Vec3::new(0.0, -0.5, 0.0));
        let mut state = MotionState::Aligned {
            bone: Some(0),
            local,
            reference: Mat4::IDENTITY,
            transform: Mat4::IDENTITY,
        };
        state.refresh(&bones);

        let swung = Mat4::from_rotation_translation(glam::Quat::from_rotation_z(0.3), Vec3::new(4.0, 9.0, 2.0));
        state.set_world_transform(swung);

        let written = state.world_transform();
        assert!(written.w_axis.abs_diff_eq(glam::Vec4::new(0.0, 14.5, 0.0, 1.0), 1e-5));
        let (_, rotation, _) = written.to_scale_rotation_translation();
        assert!(rotation.abs_diff_eq(glam::Quat::from_rotation_z(0.3), 1e-5));
    }
}
