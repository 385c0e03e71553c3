//! 核心模块
//!
//! 包含：
//! - `error` - 错误类型定义
//! - `macros` - 通用宏

pub mod error;
#[macro_use]
pub mod macros;

// 重新导出错误类型
pub use error::{PfxError, PfxResult};
