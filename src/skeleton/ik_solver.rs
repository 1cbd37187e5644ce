//! IK 求解器 - CCD 迭代求解
//!
//! 设计原则：
//! - 从末端相邻骨骼到根逐个旋转链骨骼
//! - 每次旋转后立即刷新该骨骼及其子孙的世界变换
//! - 支持单轴模式（膝盖等），并在第 0 次迭代强制朝限制方向旋转

use glam::{Quat, Vec3};
use std::f32::consts::PI;

use super::bone_link::{refresh_world_transform, BoneLink, IkConfig};

/// 末端与目标距离平方小于该值视为收敛
const K_MIN_DISTANCE: f32 = 0.0001;
/// 小于该角度的旋转忽略
const K_MIN_ANGLE: f32 = 0.000_000_01;
/// 旋转轴长度平方下限
const K_MIN_AXIS: f32 = 0.000_000_1;
/// 单轴关节的累积角度下限
const K_MIN_ROT_SUM: f32 = 0.002;
/// 单轴关节限制后的最小有效旋转
const K_MIN_ROTATION: f32 = 0.000_01;

/// 一次求解的结果
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IkOutcome {
    /// 是否在迭代上限内达到目标
    pub converged: bool,
    /// 实际应用的旋转次数
    pub rotations: u32,
}

// ============================================================================
// IK 求解器
// ============================================================================

/// IK 求解器
#[derive(Clone, Debug)]
pub struct IkSolver {
    /// 目标骨骼索引（IK 骨骼本身，决定末端要到达的位置）
    pub bone_index: usize,
    /// IK 配置
    pub config: IkConfig,
    /// 是否启用
    pub enabled: bool,
}

impl IkSolver {
    /// 创建新的 IK 求解器
    pub fn new(bone_index: usize, config: IkConfig) -> Self {
        Self {
            bone_index,
            config,
            enabled: true,
        }
    }

    /// 末端骨骼索引
    #[inline]
    pub fn effector_index(&self) -> usize {
        self.config.effector_bone
    }

    /// 求解 IK
    ///
    /// 调用前所有相关骨骼的世界变换必须是最新的。
    pub fn solve(&self, bones: &mut [BoneLink], children_cache: &[Vec<usize>]) -> IkOutcome {
        let mut outcome = IkOutcome::default();
        if !self.enabled {
            return outcome;
        }

        let effector_idx = self.config.effector_bone;
        if effector_idx >= bones.len() || self.bone_index >= bones.len() {
            return outcome;
        }

        let destination = bones[self.bone_index].position();
        let original_effector_rotation = bones[effector_idx].local_rotation;

        'iterations: for iteration in 0..self.config.iterations {
            for link in &self.config.links {
                let link_idx = link.bone_index;
                if link_idx >= bones.len() || link_idx == effector_idx {
                    continue;
                }

                let inv_link = bones[link_idx].global_transform().inverse();
                let local_dest = inv_link.transform_point3(destination);
                let local_target = inv_link.transform_point3(bones[effector_idx].position());

                if local_dest.distance_squared(local_target) < K_MIN_DISTANCE {
                    outcome.converged = true;
                    break 'iterations;
                }

                let dest_vec = local_dest.normalize_or_zero();
                let target_vec = local_target.normalize_or_zero();
                if dest_vec == Vec3::ZERO || target_vec == Vec3::ZERO {
                    continue;
                }

                let dot = dest_vec.dot(target_vec);
                if dot > 1.0 {
                    continue;
                }
                let mut angle = dot.max(-1.0).acos();
                if angle.abs() < K_MIN_ANGLE {
                    continue;
                }
                angle = angle.clamp(-self.config.limit_angle, self.config.limit_angle);

                let axis = target_vec.cross(dest_vec);
                if axis.length_squared() < K_MIN_AXIS {
                    continue;
                }
                let axis = axis.normalize();

                let current = bones[link_idx].local_rotation;
                let delta = match link.limit_axis {
                    Some(limit_axis) => {
                        let limit_axis = limit_axis.normalize_or_zero();
                        if limit_axis == Vec3::ZERO {
                            continue;
                        }
                        // 第 0 次迭代直接朝限制方向转最大允许角度，腿部收敛更快；
                        // 之后按投影角度。两者都受累积角度 [K_MIN_ROT_SUM, π] 限制
                        let mut step = if iteration == 0 {
                            angle.abs()
                        } else {
                            axis.dot(limit_axis) * angle
                        };
                        let accumulated = twist_angle(current, limit_axis);
                        if step + accumulated > PI {
                            step = PI - accumulated;
                        }
                        if K_MIN_ROT_SUM > step + accumulated {
                            step = K_MIN_ROT_SUM - accumulated;
                        }
                        step = step.clamp(-self.config.limit_angle, self.config.limit_angle);
                        if step.abs() < K_MIN_ROTATION {
                            continue;
                        }
                        Quat::from_axis_angle(limit_axis, step)
                    }
                    None => Quat::from_axis_angle(axis, angle),
                };

                bones[link_idx].local_rotation = (current * delta).normalize();
                outcome.rotations += 1;
                Self::update_global_transform_recursive(bones, children_cache, link_idx);
            }
        }

        // 求解只旋转链骨骼，末端保持动画给出的旋转
        bones[effector_idx].local_rotation = original_effector_rotation;
        Self::update_global_transform_recursive(bones, children_cache, effector_idx);

        outcome
    }

    /// 递归更新全局变换
    pub(crate) fn update_global_transform_recursive(
        bones: &mut [BoneLink],
        children_cache: &[Vec<usize>],
        idx: usize,
    ) {
        if idx >= bones.len() {
            return;
        }

        refresh_world_transform(bones, idx);

        // 递归更新子骨骼
        if idx < children_cache.len() {
            for &child_idx in &children_cache[idx] {
                Self::update_global_transform_recursive(bones, children_cache, child_idx);
            }
        }
    }
}

/// 旋转在指定轴上的扭转角，范围 (-π, π]
fn twist_angle(rotation: Quat, axis: Vec3) -> f32 {
    let projection = Vec3::new(rotation.x, rotation.y, rotation.z).dot(axis);
    let mut angle = 2.0 * projection.atan2(rotation.w);
    if angle > PI {
        angle -= 2.0 * PI;
    } else if angle <= -PI {
        angle += 2.0 * PI;
    }
    angle
}
