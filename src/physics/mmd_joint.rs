//! MMD 关节（约束）封装
//!
//! 6DOF 弹簧约束用 Rapier 的 GenericJoint 配合 limits 与 motors 实现。
//! 关节在两个刚体上的局部坐标系只在创建时由双方世界变换计算一次，
//! 之后约束求解完全交给引擎。

use glam::{Mat4, Quat, Vec3};
use rapier3d::prelude::*;

use super::config::PhysicsConfig;
use super::mmd_rigid_body::MMDRigidBody;
use super::world::{mat4_to_isometry, PhysicsWorld};
use crate::{MmdError, Result};

const AXIS_EPSILON: f32 = 1.0e-4;

/// 约束描述（由模型加载器给出）
#[derive(Debug, Clone, Default)]
pub struct ConstraintDesc {
    pub name: String,
    pub body_a: usize,
    pub body_b: usize,
    /// 关节世界位置
    pub position: Vec3,
    /// 欧拉角（弧度，Z-Y-X 顺序组合）
    pub rotation: Vec3,
    pub linear_lower: Vec3,
    pub linear_upper: Vec3,
    pub angular_lower: Vec3,
    pub angular_upper: Vec3,
    pub linear_spring: Vec3,
    pub angular_spring: Vec3,
}

impl ConstraintDesc {
    /// 关节世界变换
    pub fn world_transform(&self) -> Mat4 {
        let rotation = Quat::from_rotation_z(self.rotation.z)
            * Quat::from_rotation_y(self.rotation.y)
            * Quat::from_rotation_x(self.rotation.x);
        Mat4::from_rotation_translation(rotation, self.position)
    }
}

/// MMD 关节
#[derive(Debug, Clone)]
pub struct MMDJoint {
    pub name: String,
    pub body_a: usize,
    pub body_b: usize,
    handle: ImpulseJointHandle,
    /// 关节在刚体 A 局部空间的变换
    local_frame_a: Mat4,
    /// 关节在刚体 B 局部空间的变换
    local_frame_b: Mat4,
}

impl MMDJoint {
    /// 创建约束并加入物理世界
    pub fn setup(
        desc: &ConstraintDesc,
        bodies: &[MMDRigidBody],
        world: &mut PhysicsWorld,
        config: &PhysicsConfig,
    ) -> Result<Self> {
        let count = bodies.len();
        for index in [desc.body_a, desc.body_b] {
            if index >= count {
                return Err(MmdError::RigidBodyIndexOutOfRange { index, count });
            }
        }
        if desc.body_a == desc.body_b {
            return Err(MmdError::InvalidConstraint {
                name: desc.name.clone(),
                reason: "both ends reference the same rigid body".to_string(),
            });
        }

        let (rb_a, rb_b) = (&bodies[desc.body_a], &bodies[desc.body_b]);
        let world_a = world.body_transform(rb_a.body_handle()).ok_or_else(|| MmdError::Physics(
            format!("rigid body '{}' is not in the physics world", rb_a.name),
        ))?;
        let world_b = world.body_transform(rb_b.body_handle()).ok_or_else(|| MmdError::Physics(
            format!("rigid body '{}' is not in the physics world", rb_b.name),
        ))?;

        let joint_world = desc.world_transform();
        let local_frame_a = world_a.inverse() * joint_world;
        let local_frame_b = world_b.inverse() * joint_world;

        let joint = Self::build_joint(desc, local_frame_a, local_frame_b, config);
        let handle = world.add_constraint(rb_a.body_handle(), rb_b.body_handle(), joint);

        Ok(Self {
            name: desc.name.clone(),
            body_a: desc.body_a,
            body_b: desc.body_b,
            handle,
            local_frame_a,
            local_frame_b,
        })
    }

    #[inline]
    pub fn handle(&self) -> ImpulseJointHandle {
        self.handle
    }

    #[inline]
    pub fn local_frames(&self) -> (Mat4, Mat4) {
        (self.local_frame_a, self.local_frame_b)
    }

    /// 创建 Rapier GenericJoint
    ///
    /// - 线性范围为 0 的轴锁定，其余轴设置限制
    /// - 上限小于下限的轴不设限制
    /// - 弹簧用电机模拟：目标 0，damping = sqrt(stiffness * factor)
    fn build_joint(desc: &ConstraintDesc, frame_a: Mat4, frame_b: Mat4, config: &PhysicsConfig) -> GenericJoint {
        let lin_axes = [
            (JointAxis::LinX, JointAxesMask::LIN_X, 0),
            (JointAxis::LinY, JointAxesMask::LIN_Y, 1),
            (JointAxis::LinZ, JointAxesMask::LIN_Z, 2),
        ];
        let ang_axes = [(JointAxis::AngX, 0), (JointAxis::AngY, 1), (JointAxis::AngZ, 2)];

        let mut locked_axes = JointAxesMask::empty();
        for (_, mask, i) in lin_axes {
            if (desc.linear_upper[i] - desc.linear_lower[i]).abs() < AXIS_EPSILON {
                locked_axes |= mask;
            }
        }

        let mut joint = GenericJointBuilder::new(locked_axes)
            .local_frame1(mat4_to_isometry(frame_a))
            .local_frame2(mat4_to_isometry(frame_b))
            .contacts_enabled(false)
            .build();

        for (axis, mask, i) in lin_axes {
            if locked_axes.contains(mask) {
                continue;
            }
            if desc.linear_lower[i] <= desc.linear_upper[i] {
                joint.set_limits(axis, [desc.linear_lower[i], desc.linear_upper[i]]);
            }
            if desc.linear_spring[i] != 0.0 {
                let stiffness = desc.linear_spring[i] * config.linear_spring_stiffness_scale;
                let damping = (stiffness * config.linear_spring_damping_factor).max(0.0).sqrt();
                joint.set_motor(axis, 0.0, 0.0, stiffness, damping);
            }
        }

        for (axis, i) in ang_axes {
            if desc.angular_lower[i] <= desc.angular_upper[i] {
                joint.set_limits(axis, [desc.angular_lower[i], desc.angular_upper[i]]);
            }
            if desc.angular_spring[i] != 0.0 {
                let stiffness = desc.angular_spring[i] * config.angular_spring_stiffness_scale;
                let damping = (stiffness * config.angular_spring_damping_factor).max(0.0).sqrt();
                joint.set_motor(axis, 0.0, 0.0, stiffness, damping);
            }
        }

        joint
    }
}
