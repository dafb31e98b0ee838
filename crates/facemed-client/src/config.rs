//! 客户端配置
//!
//! 按以下顺序合并配置来源，后者覆盖前者：
//! 1. 内置默认值
//! 2. 可选的配置文件（TOML/YAML/JSON，按扩展名识别）
//! 3. 以 `FACEMED_` 为前缀的环境变量，层级之间用 `__` 分隔，例如 `FACEMED_API__BASE_URL`

use config::{Config, Environment, File};
use facemed_core::{FacemedError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// 客户端完整配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ClientConfig {
    /// 远程API配置
    pub api: ApiConfig,
    /// 会话持久化配置
    pub session: SessionConfig,
    /// 识别相关配置
    pub recognition: RecognitionConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 远程API配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiConfig {
    /// API根地址
    pub base_url: String,
    /// 请求超时时间（秒）
    pub timeout_secs: u64,
    /// User-Agent
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            timeout_secs: 30,
            user_agent: format!("facemed-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 会话持久化配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SessionConfig {
    /// 会话文件路径，未设置时仅保存在内存中
    pub store_path: Option<String>,
}

/// 识别相关配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecognitionConfig {
    /// 上传图像大小上限（MB）
    pub max_image_size_mb: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self { max_image_size_mb: 5 }
    }
}

impl RecognitionConfig {
    pub fn max_image_bytes(&self) -> usize {
        (self.max_image_size_mb as usize).saturating_mul(1024 * 1024)
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// 日志级别或 EnvFilter 表达式
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ClientConfig {
    /// 加载配置
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = Config::try_from(&ClientConfig::default()).map_err(config_error)?;

        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = config_path {
            debug!("Adding configuration file source: {}", path);
            builder = builder.add_source(File::with_name(path));
        }
        builder = builder.add_source(
            Environment::with_prefix("FACEMED")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder.build().map_err(config_error)?;
        let config: ClientConfig = settings.try_deserialize().map_err(config_error)?;
        config.validate()?;

        info!("Configuration loaded (api base url: {})", config.api.base_url);
        Ok(config)
    }

    /// 校验配置取值
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if !(self.api.base_url.starts_with("http://") || self.api.base_url.starts_with("https://")) {
            errors.push("api.base_url must start with http:// or https://".to_string());
        }
        if self.api.timeout_secs == 0 {
            errors.push("api.timeout_secs must be greater than 0".to_string());
        }
        if self.recognition.max_image_size_mb == 0 {
            errors.push("recognition.max_image_size_mb must be greater than 0".to_string());
        }
        if self.logging.level.trim().is_empty() {
            errors.push("logging.level must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(FacemedError::Config(format!(
                "Configuration validation failed: {}",
                errors.join("; ")
            )))
        }
    }
}

fn config_error(err: config::ConfigError) -> FacemedError {
    FacemedError::Config(err.to_string())
}
