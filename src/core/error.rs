//! 统一错误处理模块
//!
//! 粒子系统几乎没有可恢复的失败面：违反内部不变量（例如释放仍有存活粒子的块）
//! 直接 panic；外部可感知的错误只有配置错误和越界的帧槽位。

use crate::config::ConfigError;
use thiserror::Error;

/// 粒子系统错误类型
#[derive(Error, Debug)]
pub enum PfxError {
    #[error("Frame slot {slot} out of range ({frames} frames in flight)")]
    FrameSlotOutOfRange { slot: usize, frames: usize },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// 粒子系统结果类型别名
pub type PfxResult<T> = Result<T, PfxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let config_err = ConfigError::ValidationError("bad".to_string());
        let err: PfxError = config_err.into();
        assert!(matches!(err, PfxError::Config(_)));
    }

    #[test]
    fn test_error_display() {
        let err = PfxError::FrameSlotOutOfRange { slot: 3, frames: 2 };
        assert_eq!(
            err.to_string(),
            "Frame slot 3 out of range (2 frames in flight)"
        );
    }
}
