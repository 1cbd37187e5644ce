//! Morph 管理器

use std::collections::HashMap;

use super::Morph;

/// Morph 管理器
///
/// 模型独占的权重通道表，按索引访问；名称只在绑定动作时查找一次。
#[derive(Clone, Debug, Default)]
pub struct MorphManager {
    morphs: Vec<Morph>,
    name_to_index: HashMap<String, usize>,
}

impl MorphManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 由名称表构建，重名时名称查找命中第一个
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut manager = Self::new();
        for name in names {
            manager.add_morph(Morph::new(name));
        }
        manager
    }

    /// 添加 Morph
    pub fn add_morph(&mut self, morph: Morph) {
        let index = self.morphs.len();
        self.name_to_index.entry(morph.name.clone()).or_insert(index);
        self.morphs.push(morph);
    }

    /// 通过名称查找 Morph
    pub fn find_morph_by_name(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// 获取 Morph 数量
    pub fn morph_count(&self) -> usize {
        self.morphs.len()
    }

    pub fn get_morph(&self, index: usize) -> Option<&Morph> {
        self.morphs.get(index)
    }

    pub fn morphs(&self) -> &[Morph] {
        &self.morphs
    }

    /// 设置 Morph 权重，越界索引忽略
    pub fn set_morph_weight(&mut self, index: usize, weight: f32) {
        if let Some(morph) = self.morphs.get_mut(index) {
            morph.set_weight(weight);
        }
    }

    /// 获取 Morph 权重，越界索引返回 0
    pub fn get_morph_weight(&self, index: usize) -> f32 {
        self.morphs.get(index).map(|m| m.weight).unwrap_or(0.0)
    }

    /// 所有权重（按索引）
    pub fn weights(&self) -> Vec<f32> {
        self.morphs.iter().map(|m| m.weight).collect()
    }

    /// 重置所有 Morph 权重
    pub fn reset_all_weights(&mut self) {
        for morph in &mut self.morphs {
            morph.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_by_index_and_name() {
        let mut manager = MorphManager::from_names(["まばたき", "あ", "まばたき"]);
        assert_eq!(manager.morph_count(), 3);
        assert_eq!(manager.find_morph_by_name("まばたき"), Some(0));
        assert_eq!(manager.find_morph_by_name("い"), None);

        manager.set_morph_weight(1, 0.75);
        manager.set_morph_weight(10, 1.0);
        assert_eq!(manager.get_morph_weight(1), 0.75);
        assert_eq!(manager.get_morph_weight(10), 0.0);

        manager.reset_all_weights();
        assert_eq!(manager.weights(), vec![0.0; 3]);
    }
}
