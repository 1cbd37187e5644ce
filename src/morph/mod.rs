//! Morph 系统
//!
//! 本核心只关心 Morph 的权重通道：动作写入权重，顶点/材质的实际形变
//! 由外部渲染层根据权重完成。

mod manager;
mod morph;

pub use manager::MorphManager;
pub use morph::Morph;
