//! MMD 物理配置
//!
//! 所有参数扁平化。进程级默认值放在全局实例中，
//! 需要按模型注入时用 `MMDPhysics::with_config` 传入显式配置。

use once_cell::sync::Lazy;
use std::sync::RwLock;

/// 物理配置（扁平化，不嵌套）
#[derive(Debug, Clone)]
pub struct PhysicsConfig {
    // ========== 重力 ==========
    /// 重力 Y 分量（负数向下），默认 -98.0（MMD 标准）
    pub gravity_y: f32,

    // ========== 模拟参数 ==========
    /// 物理 FPS，默认 60.0
    pub physics_fps: f32,
    /// 每帧最大子步数，默认 5
    pub max_substep_count: i32,
    /// 求解器迭代次数，默认 8
    pub solver_iterations: usize,

    // ========== 刚体阻尼 ==========
    /// 线性阻尼缩放（乘以模型原值），默认 1.0
    pub linear_damping_scale: f32,
    /// 角速度阻尼缩放（乘以模型原值），默认 1.0
    pub angular_damping_scale: f32,

    // ========== 质量 ==========
    /// 质量缩放（乘以模型原值），默认 1.0
    pub mass_scale: f32,

    // ========== 6DOF 弹簧 ==========
    /// 线性弹簧刚度缩放，默认 1.0
    pub linear_spring_stiffness_scale: f32,
    /// 角度弹簧刚度缩放，默认 1.0
    pub angular_spring_stiffness_scale: f32,
    /// 线性弹簧阻尼系数：damping = sqrt(stiffness * factor)
    pub linear_spring_damping_factor: f32,
    /// 角度弹簧阻尼系数：damping = sqrt(stiffness * factor)
    pub angular_spring_damping_factor: f32,

    // ========== 速度限制 ==========
    /// 最大线速度，默认 100.0
    pub max_linear_velocity: f32,
    /// 最大角速度，默认 50.0
    pub max_angular_velocity: f32,

    // ========== 调试 ==========
    /// 是否启用关节，默认 true
    pub joints_enabled: bool,
    /// 是否创建地面，默认 false
    pub floor_enabled: bool,
    /// 是否输出调试日志，默认 false
    pub debug_log: bool,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            // ====== 重力 ======
            // 模型的弹簧/质量/阻尼参数都是为此重力设计的
            gravity_y: -98.0,

            // ====== 模拟参数 ======
            // 建议范围: 30~120，60 是平衡点
            physics_fps: 60.0,
            max_substep_count: 5,
            // 建议范围: 4~16
            solver_iterations: 8,

            // ====== 刚体阻尼 ======
            linear_damping_scale: 1.0,
            angular_damping_scale: 1.0,

            // ====== 质量 ======
            mass_scale: 1.0,

            // ====== 6DOF 弹簧 ======
            linear_spring_stiffness_scale: 1.0,
            angular_spring_stiffness_scale: 1.0,
            linear_spring_damping_factor: 0.5,
            angular_spring_damping_factor: 0.5,

            // ====== 速度限制（适配 -98 重力）======
            max_linear_velocity: 100.0,
            max_angular_velocity: 50.0,

            // ====== 调试 ======
            joints_enabled: true,
            floor_enabled: false,
            debug_log: false,
        }
    }
}

impl PhysicsConfig {
    /// 固定步长（秒）
    #[inline]
    pub fn fixed_time_step(&self) -> f32 {
        1.0 / self.physics_fps.max(1.0)
    }
}

/// 全局配置实例
static PHYSICS_CONFIG: Lazy<RwLock<PhysicsConfig>> = Lazy::new(|| {
    RwLock::new(PhysicsConfig::default())
});

/// 获取当前配置（只读）
pub fn get_config() -> PhysicsConfig {
    PHYSICS_CONFIG.read().unwrap_or_else(|e| e.into_inner()).clone()
}

/// 手动设置配置（用于运行时调试）
pub fn set_config(config: PhysicsConfig) {
    *PHYSICS_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = config;
}

/// 重置为默认配置
pub fn reset_config() {
    *PHYSICS_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = PhysicsConfig::default();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_config_roundtrip() {
        let custom = PhysicsConfig {
            gravity_y: -9.8,
            joints_enabled: false,
            ..PhysicsConfig::default()
        };
        set_config(custom);
        let current = get_config();
        assert_eq!(current.gravity_y, -9.8);
        assert!(!current.joints_enabled);

        reset_config();
        assert_eq!(get_config().gravity_y, -98.0);
    }

    #[test]
    fn test_fixed_time_step_clamps_fps() {
        let config = PhysicsConfig { physics_fps: 0.0, ..PhysicsConfig::default() };
        assert_eq!(config.fixed_time_step(), 1.0);
        assert!((PhysicsConfig::default().fixed_time_step() - 1.0 / 60.0).abs() < 1e-7);
    }
}
