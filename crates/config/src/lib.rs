//! 统一配置中心
//!
//! 加载顺序：内置默认值 -> `APP_CONFIG_FILE` 指定的文件（按扩展名识别 TOML/YAML/JSON）
//! -> `APP_` 前缀的环境变量（`__` 表示嵌套，如 `APP_SERVER__PORT=5000`）。
//! 提取后统一校验，校验失败时启动中止。

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{Validate, ValidationErrors};

pub const CONFIG_FILE_ENV: &str = "APP_CONFIG_FILE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationErrors),
    #[error("storage.database_url is required when storage.backend = \"postgres\"")]
    MissingDatabaseUrl,
}

/// 全局应用配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    /// 允许跨域访问的来源
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    #[validate(url)]
    pub database_url: Option<String>,
    #[validate(range(min = 1))]
    pub max_connections: u32,
}

/// 实时通道配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RealtimeConfig {
    /// 断开连接时是否向其他连接广播 userDisconnected，默认关闭
    #[serde(default)]
    pub announce_disconnects: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 5000,
                cors_origins: vec![
                    "http://localhost:5000".into(),
                    "http://localhost:3000".into(),
                    "http://localhost:3001".into(),
                ],
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                database_url: None,
                max_connections: 5,
            },
            realtime: RealtimeConfig::default(),
        }
    }
}

impl AppConfig {
    /// 按默认值、配置文件、环境变量的顺序加载并校验
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            figment = if path.ends_with(".yml") || path.ends_with(".yaml") {
                figment.merge(Yaml::file(path))
            } else if path.ends_with(".json") {
                figment.merge(Json::file(path))
            } else {
                figment.merge(Toml::file(path))
            };
        }
        Self::from_figment(figment.merge(Env::prefixed("APP_").split("__")))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        if config.storage.backend == StorageBackend::Postgres
            && config.storage.database_url.is_none()
        {
            return Err(ConfigError::MissingDatabaseUrl);
        }
        Ok(config)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 用于日志输出，隐藏数据库连接串中的凭据
    pub fn sanitize(&self) -> String {
        let mut sanitized = self.clone();
        if let Some(url) = sanitized.storage.database_url.as_mut() {
            if let Some((scheme, rest)) = url.split_once("://") {
                if let Some((_, host)) = rest.rsplit_once('@') {
                    *url = format!("{scheme}://[REDACTED]@{host}");
                }
            }
        }
        format!("{sanitized:?}")
    }
}
