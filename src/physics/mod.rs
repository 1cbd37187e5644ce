//! MMD 物理系统模块
//!
//! 使用 Rapier3D 物理引擎实现。
//!
//! ## 结构
//! | 模块 | 职责 |
//! |------|------|
//! | world | Rapier 集合与流水线封装 |
//! | motion_state | 跟随骨骼 / 物理驱动 / 对齐 三种运动状态 |
//! | mmd_rigid_body | 刚体 + 碰撞体 + 运动状态 |
//! | mmd_joint | 6DOF 弹簧约束（GenericJoint） |
//! | mmd_physics | 骨骼与刚体的双向同步 |

pub mod config;
mod mmd_joint;
mod mmd_physics;
mod mmd_rigid_body;
mod motion_state;
mod world;

pub use config::{get_config, reset_config, set_config, PhysicsConfig};
pub use mmd_joint::{ConstraintDesc, MMDJoint};
pub use mmd_physics::MMDPhysics;
pub use mmd_rigid_body::{MMDRigidBody, PhysicsMode, RigidBodyDesc};
pub use motion_state::MotionState;
pub use world::PhysicsWorld;
