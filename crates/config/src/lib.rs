//! horizon-config - 配置加载库
//!
//! 加载顺序：`{dir}/default.toml` → `{dir}/{APP_ENV}.toml` → `HORIZON_` 前缀的环境变量
//! （嵌套字段使用 `__` 分隔，例如 `HORIZON_JWT__SECRET`）。

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use secrecy::Secret;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),
}

/// 数据库配置
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

/// Redis 配置
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: Secret<String>,
    #[serde(default)]
    pub key_prefix: Option<String>,
}

/// JWT 配置
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// 签名密钥，至少 32 字节；`base64:` 前缀表示 Base64 编码
    #[serde(default)]
    pub secret: Option<Secret<String>>,
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_access_ttl_secs")]
    pub access_ttl_secs: u64,
    #[serde(default = "default_refresh_ttl_secs")]
    pub refresh_ttl_secs: u64,
    #[serde(default = "default_refresh_threshold_secs")]
    pub refresh_threshold_secs: u64,
    #[serde(default = "default_version_ttl_secs")]
    pub version_ttl_secs: u64,
    /// 仅开发环境生效：未配置密钥时生成进程内临时密钥
    #[serde(default)]
    pub allow_ephemeral_key: bool,
}

fn default_issuer() -> String {
    "cosv-horizon".to_string()
}

fn default_access_ttl_secs() -> u64 {
    5 * 60
}

fn default_refresh_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_refresh_threshold_secs() -> u64 {
    12 * 60 * 60
}

fn default_version_ttl_secs() -> u64 {
    30 * 24 * 60 * 60
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: None,
            issuer: default_issuer(),
            access_ttl_secs: default_access_ttl_secs(),
            refresh_ttl_secs: default_refresh_ttl_secs(),
            refresh_threshold_secs: default_refresh_threshold_secs(),
            version_ttl_secs: default_version_ttl_secs(),
            allow_ephemeral_key: false,
        }
    }
}

/// API Key 配置
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyConfig {
    /// 明文密钥前缀中的品牌段，例如 `cosv_ab12CD34.<secret>`
    #[serde(default = "default_brand")]
    pub brand: String,
    /// 允许授予的 scope；为空表示只做格式校验
    #[serde(default = "default_allowed_scopes")]
    pub allowed_scopes: Vec<String>,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

fn default_brand() -> String {
    "cosv".to_string()
}

fn default_allowed_scopes() -> Vec<String> {
    ["vuln:read", "vuln:write", "org:read", "org:write", "notification:read"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_store_timeout_ms() -> u64 {
    2000
}

impl Default for ApiKeyConfig {
    fn default() -> Self {
        Self {
            brand: default_brand(),
            allowed_scopes: default_allowed_scopes(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl ApiKeyConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// OAuth 前门配置（仅签名 state 使用）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OAuthConfig {
    #[serde(default)]
    pub state_secret: Option<Secret<String>>,
}

/// 认证中间件配置
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// 单个请求认证决策的总超时
    #[serde(default = "default_auth_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_auth_timeout_ms() -> u64 {
    3000
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_auth_timeout_ms(),
        }
    }
}

impl AuthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// 服务器配置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// 遥测配置
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 输出 JSON 格式日志
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_app_env")]
    pub app_env: String,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
    #[serde(default)]
    pub api_key: ApiKeyConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_app_name() -> String {
    "cosv-horizon".to_string()
}

fn default_app_env() -> String {
    "development".to_string()
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| default_app_env());
        let config: Self = Self::figment(config_dir, &env).extract()?;
        Ok(config)
    }

    /// 构建配置源（便于测试时替换）
    pub fn figment(config_dir: &str, env: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(Env::prefixed("HORIZON_").split("__"))
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    /// 是否为开发环境
    pub fn is_development(&self) -> bool {
        self.app_env == "development"
    }

    /// 是否允许使用临时签名密钥：需要显式开关且仅限开发环境
    pub fn allows_ephemeral_signing_key(&self) -> bool {
        self.jwt.allow_ephemeral_key && self.is_development()
    }
}
