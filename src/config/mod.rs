//! 粒子系统配置
//!
//! 提供TOML/JSON配置文件、环境变量覆盖和日志初始化

use crate::render::pfx::gpu::MAX_FRAMES_IN_FLIGHT;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 文件读取错误
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),
    /// 解析错误
    #[error("Config parse error: {0}")]
    ParseError(String),
    /// 验证错误
    #[error("Config validation error: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 粒子系统主配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PfxConfig {
    /// 可见距离，超出距离的发射器不发射新粒子
    pub view_range: f32,

    /// 飞行帧数（帧槽位数）
    pub frames_in_flight: usize,

    /// 随机种子，未设置时使用系统熵
    pub rng_seed: Option<u64>,

    /// 日志配置
    pub logging: LoggingConfig,
}

use crate::{impl_default, impl_default_and_new};

impl_default_and_new!(PfxConfig {
    view_range: 3000.0,
    frames_in_flight: 2,
    rng_seed: None,
    logging: LoggingConfig::default(),
});

impl PfxConfig {
    /// 从TOML文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 从TOML字符串解析配置
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// 从JSON字符串解析配置
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 保存为TOML文件
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 从环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// 按给定的查找函数覆盖配置，无法解析的值被忽略
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(range) = lookup("PFX_VIEW_RANGE").and_then(|v| v.parse().ok()) {
            self.view_range = range;
        }
        if let Some(frames) = lookup("PFX_FRAMES_IN_FLIGHT").and_then(|v| v.parse().ok()) {
            self.frames_in_flight = frames;
        }
        if let Some(seed) = lookup("PFX_RNG_SEED").and_then(|v| v.parse().ok()) {
            self.rng_seed = Some(seed);
        }
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.view_range.is_finite() || self.view_range <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "view_range must be positive, got {}",
                self.view_range
            )));
        }
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            return Err(ConfigError::ValidationError(format!(
                "frames_in_flight must be in 1..={}, got {}",
                MAX_FRAMES_IN_FLIGHT, self.frames_in_flight
            )));
        }
        Ok(())
    }

    /// 自动查找并加载配置文件
    ///
    /// 按以下顺序查找：
    /// 1. ./pfx.toml
    /// 2. ./pfx.json
    /// 3. <用户配置目录>/pfx_engine/pfx.toml
    /// 4. 使用默认配置
    ///
    /// 找到的配置之后还会应用环境变量覆盖。
    pub fn load_or_default() -> Self {
        let mut config = Self::find().unwrap_or_else(|| {
            tracing::info!(target: "pfx", "Using default configuration");
            Self::default()
        });
        config.apply_env_overrides();
        config
    }

    fn find() -> Option<Self> {
        if let Ok(config) = Self::from_toml_file("pfx.toml") {
            tracing::info!(target: "pfx", "Loaded config from pfx.toml");
            return Some(config);
        }

        if let Ok(config) = Self::from_json_file("pfx.json") {
            tracing::info!(target: "pfx", "Loaded config from pfx.json");
            return Some(config);
        }

        let path = dirs::config_dir()?.join("pfx_engine").join("pfx.toml");
        match Self::from_toml_file(&path) {
            Ok(config) => {
                tracing::info!(target: "pfx", "Loaded config from {:?}", path);
                Some(config)
            }
            Err(_) => None,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别（`RUST_LOG` 优先）
    pub level: LogLevel,

    /// 是否输出到控制台
    pub log_to_console: bool,

    /// 是否输出日志目标
    pub with_target: bool,
}

impl_default!(LoggingConfig {
    level: LogLevel::Info,
    log_to_console: true,
    with_target: true,
});

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// 跟踪
    Trace,
    /// 调试
    Debug,
    /// 信息
    Info,
    /// 警告
    Warn,
    /// 错误
    Error,
}

impl LogLevel {
    /// `EnvFilter` 指令
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// 安装全局日志订阅器
///
/// 已经安装过订阅器时不做任何事，返回是否由本次调用安装。
pub fn init_logging(config: &LoggingConfig) -> bool {
    if !config.log_to_console {
        return false;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .try_init()
        .is_ok()
}
