//! Morph 权重通道

/// 单个 Morph
#[derive(Clone, Debug, Default)]
pub struct Morph {
    pub name: String,
    /// 当前权重（动作求值结果，不做截断）
    pub weight: f32,
}

impl Morph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            weight: 0.0,
        }
    }

    #[inline]
    pub fn set_weight(&mut self, weight: f32) {
        self.weight = weight;
    }

    #[inline]
    pub fn reset(&mut self) {
        self.weight = 0.0;
    }
}
