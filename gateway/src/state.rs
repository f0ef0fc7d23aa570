//! 网关共享状态

use async_trait::async_trait;
use horizon_auth_core::{ApiKeyAuthenticator, AuthenticationChain, TokenService};
use horizon_bootstrap::Infrastructure;
use horizon_ports::UsageAuditSink;
use horizon_telemetry::{HealthStatus, PrometheusHandle};
use std::sync::Arc;
use std::time::Duration;

/// 依赖就绪检查
#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    async fn readiness(&self) -> HealthStatus;
}

#[async_trait]
impl ReadinessCheck for Infrastructure {
    async fn readiness(&self) -> HealthStatus {
        Infrastructure::readiness(self).await
    }
}

/// 认证中间件状态
#[derive(Clone)]
pub struct AuthState {
    pub chain: AuthenticationChain,
    pub api_keys: Arc<ApiKeyAuthenticator>,
    pub usage_sink: Arc<dyn UsageAuditSink>,
    /// 单个请求认证决策的总超时
    pub timeout: Duration,
}

/// 路由状态
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthState,
    pub tokens: Arc<TokenService>,
    pub readiness: Arc<dyn ReadinessCheck>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn from_infrastructure(infra: Arc<Infrastructure>, metrics: PrometheusHandle) -> Self {
        let auth = AuthState {
            chain: infra.auth_chain(),
            api_keys: infra.api_keys(),
            usage_sink: infra.usage_sink(),
            timeout: infra.config().auth.timeout(),
        };

        Self {
            auth,
            tokens: infra.token_service(),
            readiness: infra,
            metrics: Some(metrics),
        }
    }
}
