//! 统一配置中心
//!
//! 配置按以下顺序叠加，后者覆盖前者：
//! - 内置默认值
//! - `APP_CONFIG_FILE` 指定的配置文件（toml / yaml / json）
//! - `HUB_` 前缀的环境变量，`__` 表示嵌套（如 `HUB_HUB__HEARTBEAT_INTERVAL_SECS`）
//! - 约定俗成的 `JWT_SECRET`、`DATABASE_URL`、`PORT`
//!
//! 签名密钥没有默认值，缺失时拒绝启动。

use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 签名密钥的最小长度（256 位）
pub const MIN_SECRET_LEN: usize = 32;

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AppConfig {
    /// 服务配置
    #[validate(nested)]
    pub server: ServerConfig,
    /// 数据库配置
    #[validate(nested)]
    pub database: DatabaseConfig,
    /// 凭证校验配置
    pub auth: AuthConfig,
    /// 实时消息中心配置
    #[validate(nested)]
    pub hub: HubConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    /// 唯一的 WebSocket 升级路径
    #[validate(length(min = 2))]
    pub ws_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            ws_path: "/ws".into(),
        }
    }
}

/// 数据库配置；未设置 url 时使用内存存储（仅限开发）
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    #[validate(range(min = 1))]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

/// JWT 凭证配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: Option<String>,
    /// 原始 `Cookie:` 头中凭证的键名
    pub cookie_name: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            cookie_name: "token".into(),
        }
    }
}

/// 单个动作的限流窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct RateLimitPolicy {
    #[validate(range(min = 1))]
    pub window_ms: u64,
    #[validate(range(min = 1))]
    pub max: u32,
}

impl RateLimitPolicy {
    pub const fn new(max: u32, window_ms: u64) -> Self {
        Self { window_ms, max }
    }
}

/// 各动作的限流配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RateLimitConfig {
    /// 全局聊天发送：每 10 秒 5 条
    #[validate(nested)]
    pub chat_send: RateLimitPolicy,
    /// 私信发送：每 10 秒 10 条
    #[validate(nested)]
    pub dm_send: RateLimitPolicy,
    /// 反应切换（全局与私信共用窗口）：每 5 秒 20 次
    #[validate(nested)]
    pub reaction: RateLimitPolicy,
    /// 正在输入提示：每 5 秒 10 次
    #[validate(nested)]
    pub typing: RateLimitPolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            chat_send: RateLimitPolicy::new(5, 10_000),
            dm_send: RateLimitPolicy::new(10, 10_000),
            reaction: RateLimitPolicy::new(20, 5_000),
            typing: RateLimitPolicy::new(10, 5_000),
        }
    }
}

/// 实时消息中心配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HubConfig {
    /// 允许的 Origin；为空或包含 `*` 时不限制
    pub allowed_origins: Vec<String>,
    #[validate(range(min = 1))]
    pub max_connections_per_ip: u32,
    #[validate(range(min = 256))]
    pub max_frame_bytes: usize,
    #[validate(range(min = 1))]
    pub heartbeat_interval_secs: u64,
    #[validate(range(min = 1, max = 1000))]
    pub history_limit: usize,
    #[validate(range(min = 1))]
    pub outbound_queue_capacity: usize,
    /// 被拒绝的事件是否回复本地 error 帧
    pub error_replies: bool,
    #[validate(nested)]
    pub rate_limits: RateLimitConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            max_connections_per_ip: 20,
            max_frame_bytes: 64 * 1024,
            heartbeat_interval_secs: 30,
            history_limit: 200,
            outbound_queue_capacity: 256,
            error_replies: true,
            rate_limits: RateLimitConfig::default(),
        }
    }
}

impl HubConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// 检查升级请求的 Origin 是否被允许
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o == "*") {
            return true;
        }
        match origin {
            Some(origin) => self
                .allowed_origins
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(origin)),
            None => false,
        }
    }
}

impl AppConfig {
    /// 构建完整的配置来源链
    pub fn figment() -> Figment {
        let mut fig = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var("APP_CONFIG_FILE") {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                fig = fig.merge(Json::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }
        fig.merge(Env::prefixed("HUB_").split("__"))
            .merge(
                Env::raw()
                    .only(&["JWT_SECRET"])
                    .map(|_| "auth.jwt_secret".into()),
            )
            .merge(
                Env::raw()
                    .only(&["DATABASE_URL"])
                    .map(|_| "database.url".into()),
            )
            .merge(Env::raw().only(&["PORT"]).map(|_| "server.port".into()))
    }

    /// 从环境加载并校验配置
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.ensure_valid()?;
        Ok(config)
    }

    /// 校验配置有效性
    pub fn ensure_valid(&self) -> Result<(), ConfigError> {
        match self.auth.jwt_secret.as_deref() {
            None => return Err(ConfigError::MissingSecret),
            Some(secret) if secret.trim().is_empty() => return Err(ConfigError::MissingSecret),
            Some(secret) if secret.len() < MIN_SECRET_LEN => {
                return Err(ConfigError::WeakSecret(MIN_SECRET_LEN))
            }
            Some(_) => {}
        }

        if !self.server.ws_path.starts_with('/') {
            return Err(ConfigError::InvalidServerConfig(
                "ws_path must start with '/'".to_string(),
            ));
        }

        self.validate()?;
        Ok(())
    }

    /// 签名密钥；只有通过 `ensure_valid` 的配置才能保证存在
    pub fn jwt_secret(&self) -> Result<&str, ConfigError> {
        self.auth
            .jwt_secret
            .as_deref()
            .ok_or(ConfigError::MissingSecret)
    }

    /// 用于日志输出的脱敏表示
    pub fn sanitized(&self) -> String {
        let mut copy = self.clone();
        if copy.auth.jwt_secret.is_some() {
            copy.auth.jwt_secret = Some("[REDACTED]".into());
        }
        if let Some(url) = copy.database.url.as_mut() {
            if let Some(at) = url.rfind('@') {
                let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
                url.replace_range(scheme_end..at, "[REDACTED]");
            }
        }
        format!("{:?}", copy)
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("JWT_SECRET is required; refusing to start without a signing secret")]
    MissingSecret,
    #[error("JWT secret must be at least {0} characters long")]
    WeakSecret(usize),
    #[error("Invalid server configuration: {0}")]
    InvalidServerConfig(String),
    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
    #[error("Configuration could not be loaded: {0}")]
    Load(#[from] Box<figment::Error>),
}
