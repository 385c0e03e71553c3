//! 渲染模块
//!
//! - `pfx` - 池化粒子特效与拖尾

pub mod pfx;

// Re-export particle system components
pub use pfx::{GpuBackend, ParticleFx, PfxObjects, PfxStats, TrlObjects, WgpuBackend};
