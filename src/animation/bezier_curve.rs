//! 贝塞尔曲线 - 预计算查找表
//!
//! 用于 VMD 动画的非线性插值：把经过比例 (0..1) 映射为缓动后的比例。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use glam::Vec2;

/// 查找表默认分辨率
pub const INTERPOLATION_TABLE_SIZE: usize = 64;

/// 曲线 trait
pub trait Curve {
    fn value(&self, v: f32) -> f32;
}

/// 三次贝塞尔曲线（端点固定为 (0,0) 与 (1,1)）
#[derive(Debug, Clone, PartialEq)]
pub struct BezierCurve {
    /// 预计算的查找表，长度 resolution + 1，table[i] = y(x = i / resolution)
    table: Vec<f32>,
    /// 控制点1
    c0: Vec2,
    /// 控制点2
    c1: Vec2,
    /// 两个控制点都在对角线上时退化为线性
    linear: bool,
}

impl BezierCurve {
    /// 创建新的贝塞尔曲线
    ///
    /// # 参数
    /// - `c0`: 控制点1 (归一化到 0-1 范围)
    /// - `c1`: 控制点2 (归一化到 0-1 范围)
    /// - `resolution`: 查找表分辨率
    pub fn new(c0: Vec2, c1: Vec2, resolution: usize) -> Self {
        let resolution = resolution.max(1);
        let linear = c0.x == c0.y && c1.x == c1.y;

        let table = if linear {
            (0..=resolution).map(|i| i as f32 / resolution as f32).collect()
        } else {
            let mut table = Vec::with_capacity(resolution + 1);
            for i in 0..resolution {
                let x = i as f32 / resolution as f32;
                let t = Self::solve_parameter(x, c0.x, c1.x);
                table.push(Self::bezier(t, c0.y, c1.y));
            }
            table.push(1.0);
            table
        };

        Self { table, c0, c1, linear }
    }

    /// 从 VMD 参数创建贝塞尔曲线
    ///
    /// VMD 使用 [0, 127] 范围的控制点参数: [x1, y1, x2, y2]
    pub fn from_parameters(parameters: [u8; 4], resolution: usize) -> Self {
        let c0 = Vec2::new(parameters[0] as f32 / 127.0, parameters[1] as f32 / 127.0);
        let c1 = Vec2::new(parameters[2] as f32 / 127.0, parameters[3] as f32 / 127.0);
        Self::new(c0, c1, resolution)
    }

    /// 导出为 VMD 参数格式
    pub fn to_parameters(&self) -> [u8; 4] {
        [
            (self.c0.x * 127.0).round() as u8,
            (self.c0.y * 127.0).round() as u8,
            (self.c1.x * 127.0).round() as u8,
            (self.c1.y * 127.0).round() as u8,
        ]
    }

    #[inline]
    pub fn is_linear(&self) -> bool {
        self.linear
    }

    #[inline]
    pub fn resolution(&self) -> usize {
        self.table.len() - 1
    }

    /// B(t) = 3(1-t)²t·p1 + 3(1-t)t²·p2 + t³
    #[inline]
    fn bezier(t: f32, p1: f32, p2: f32) -> f32 {
        let it = 1.0 - t;
        3.0 * it * it * t * p1 + 3.0 * it * t * t * p2 + t * t * t
    }

    /// 求 Bx(t) = x 的参数 t（二分法，x 分量在 [0,1] 上单调）
    fn solve_parameter(x: f32, p1: f32, p2: f32) -> f32 {
        let (mut lo, mut hi) = (0.0_f32, 1.0_f32);
        let mut t = x;
        for _ in 0..32 {
            let v = Self::bezier(t, p1, p2) - x;
            if v.abs() < 1.0e-6 {
                break;
            }
            if v > 0.0 {
                hi = t;
            } else {
                lo = t;
            }
            t = (lo + hi) * 0.5;
        }
        t
    }
}

impl Curve for BezierCurve {
    /// 根据经过比例计算缓动比例
    ///
    /// index = floor(w * size)，在相邻表项之间线性插值
    fn value(&self, v: f32) -> f32 {
        if self.linear {
            return v;
        }
        let size = self.resolution();
        let pos = v.clamp(0.0, 1.0) * size as f32;
        let index = pos.floor() as usize;
        if index >= size {
            return self.table[size];
        }
        let frac = pos - index as f32;
        self.table[index] + (self.table[index + 1] - self.table[index]) * frac
    }
}

// ============================================================================
// 通道插值
// ============================================================================

/// 单个通道的插值方式
#[derive(Debug, Clone, Default)]
pub enum Interpolation {
    /// 线性，直接使用经过比例
    #[default]
    Linear,
    /// 贝塞尔查找表
    Curve(Arc<BezierCurve>),
}

impl Interpolation {
    /// 由 VMD 控制点参数创建，对角线参数直接退化为线性
    pub fn from_parameters(parameters: [u8; 4], factory: &dyn BezierCurveFactory) -> Self {
        if parameters[0] == parameters[1] && parameters[2] == parameters[3] {
            Interpolation::Linear
        } else {
            Interpolation::Curve(factory.get_or_new(parameters, INTERPOLATION_TABLE_SIZE))
        }
    }

    /// 计算缓动后的权重
    #[inline]
    pub fn weight(&self, w: f32) -> f32 {
        match self {
            Interpolation::Linear => w,
            Interpolation::Curve(curve) => curve.value(w),
        }
    }
}

// ============================================================================
// 曲线缓存
// ============================================================================

/// 贝塞尔曲线工厂 trait
pub trait BezierCurveFactory {
    fn get_or_new(&self, parameters: [u8; 4], resolution: usize) -> Arc<BezierCurve>;
}

/// 贝塞尔曲线缓存
///
/// 避免重复创建相同参数的曲线
#[derive(Debug, Default)]
pub struct BezierCurveCache(RwLock<HashMap<[u8; 4], Arc<BezierCurve>>>);

impl BezierCurveCache {
    pub fn new() -> Self {
        Self(RwLock::new(HashMap::new()))
    }

    pub fn len(&self) -> usize {
        self.0.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BezierCurveFactory for BezierCurveCache {
    fn get_or_new(&self, parameters: [u8; 4], resolution: usize) -> Arc<BezierCurve> {
        let build_new_curve = || Arc::new(BezierCurve::from_parameters(parameters, resolution));

        // 尝试读取缓存
        {
            let map = self.0.read().unwrap_or_else(|e| e.into_inner());
            if let Some(curve) = map.get(&parameters) {
                // 缓存的分辨率不足时重新创建
                if curve.resolution() >= resolution {
                    return curve.clone();
                }
            }
        }

        // 写入缓存
        let mut map = self.0.write().unwrap_or_else(|e| e.into_inner());
        let curve = build_new_curve();
        map.insert(parameters, curve.clone());
        curve
    }
}

impl Clone for BezierCurveCache {
    fn clone(&self) -> Self {
        // 克隆时创建新的空缓存
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagonal_curve_is_linear() {
        let curve = BezierCurve::new(Vec2::new(0.25, 0.25), Vec2::new(0.75, 0.75), 64);
        assert!(curve.is_linear());
        for i in 0..=100 {
            let w = i as f32 / 100.0;
            assert_eq!(curve.value(w), w);
        }
    }

    #[test]
    fn test_ease_in_curve() {
        let curve = BezierCurve::new(Vec2::new(0.42, 0.0), Vec2::new(1.0, 1.0), 64);
        assert!(curve.value(0.25) < 0.25);
        assert!(curve.value(0.0).abs() < 1e-4);
        assert!((curve.value(1.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_monotonic_and_idempotent() {
        let curve = BezierCurve::from_parameters([20, 0, 107, 127], INTERPOLATION_TABLE_SIZE);
        let mut prev = curve.value(0.0);
        for i in 1..=200 {
            let w = i as f32 / 200.0;
            let v = curve.value(w);
            assert!(v >= prev - 1e-6, "not monotonic at {}", w);
            assert_eq!(v, curve.value(w));
            prev = v;
        }
    }

    #[test]
    fn test_interpolation_from_diagonal_parameters() {
        let cache = BezierCurveCache::new();
        let interp = Interpolation::from_parameters([20, 20, 107, 107], &cache);
        assert!(matches!(interp, Interpolation::Linear));
        assert!(cache.is_empty());
        assert_eq!(interp.weight(0.3), 0.3);
    }

    #[test]
    fn test_cache() {
        let cache = BezierCurveCache::new();

        let curve1 = cache.get_or_new([32, 0, 96, 127], 64);
        let curve2 = cache.get_or_new([32, 0, 96, 127], 64);

        // 应该返回相同的 Arc
        assert!(Arc::ptr_eq(&curve1, &curve2));
        assert_eq!(cache.len(), 1);
    }
}
