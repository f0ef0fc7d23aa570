//! horizon-telemetry - 可观测性库
//!
//! 日志基于 tracing，指标通过 Prometheus 导出。认证相关的指标名集中在 [`names`] 中，
//! 由认证核心和网关共同使用。

use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub use metrics_exporter_prometheus::PrometheusHandle;

/// 指标名
pub mod names {
    /// 认证请求总数，标签：`outcome`
    pub const AUTH_REQUESTS_TOTAL: &str = "auth_requests_total";
    /// 认证失败总数，标签：`mechanism`、`reason`
    pub const AUTH_FAILURES_TOTAL: &str = "auth_failures_total";
    /// 因存储异常而丢弃的 API Key 使用记录数
    pub const API_KEY_USAGE_DROPPED_TOTAL: &str = "api_key_usage_dropped_total";
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to install Prometheus recorder: {0}")]
    Metrics(String),
}

/// 初始化 tracing
pub fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// 初始化 JSON 格式的 tracing（生产环境）
pub fn init_tracing_json(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// 初始化 Prometheus metrics 并注册指标说明
pub fn init_metrics() -> Result<PrometheusHandle, TelemetryError> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TelemetryError::Metrics(e.to_string()))?;

    describe_metrics();
    Ok(handle)
}

fn describe_metrics() {
    metrics::describe_counter!(
        names::AUTH_REQUESTS_TOTAL,
        "Authentication decisions by outcome"
    );
    metrics::describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Rejected credentials by mechanism and reason"
    );
    metrics::describe_counter!(
        names::API_KEY_USAGE_DROPPED_TOTAL,
        "API key usage records dropped because the store was unavailable"
    );
}

/// 健康检查状态
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub checks: Vec<HealthCheck>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            healthy: true,
            checks: Vec::new(),
        }
    }

    pub fn add_check(&mut self, name: impl Into<String>, healthy: bool, message: Option<String>) {
        if !healthy {
            self.healthy = false;
        }
        self.checks.push(HealthCheck {
            name: name.into(),
            healthy,
            message,
        });
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}
