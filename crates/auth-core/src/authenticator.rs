//! 认证策略链
//!
//! 每个请求按顺序尝试各个策略，第一个成功的策略决定主体；
//! 失败的凭证只记录日志，不阻止后续策略，也不会合并不同机制的能力。

use async_trait::async_trait;
use horizon_telemetry::names;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::api_key::{ApiKeyAuthenticator, looks_like_api_key};
use crate::error::AuthResult;
use crate::principal::{Principal, SubjectType};
use crate::token::TokenService;

/// 从请求中提取的原始凭证
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// `X-API-Key` 头
    pub api_key: Option<String>,
    /// `Authorization: Bearer` 的值
    pub bearer: Option<String>,
}

impl Credentials {
    /// 由 `X-API-Key` 与 `Authorization` 头构造；空值视为未提供
    pub fn from_headers(api_key_header: Option<&str>, authorization: Option<&str>) -> Self {
        let non_empty = |v: &str| {
            let v = v.trim();
            (!v.is_empty()).then(|| v.to_string())
        };

        Self {
            api_key: api_key_header.and_then(non_empty),
            bearer: authorization
                .and_then(|h| h.trim().strip_prefix("Bearer "))
                .and_then(non_empty),
        }
    }

    /// 提交给 API Key 策略的候选值：优先 `X-API-Key`，其次形如 API Key 的 bearer
    pub fn api_key_candidate(&self) -> Option<&str> {
        self.api_key.as_deref().or_else(|| {
            self.bearer
                .as_deref()
                .filter(|bearer| looks_like_api_key(bearer))
        })
    }

    /// 提交给会话策略的候选值；形如 API Key 的 bearer 不是 JWT
    pub fn session_candidate(&self) -> Option<&str> {
        self.bearer
            .as_deref()
            .filter(|bearer| !looks_like_api_key(bearer))
    }

    pub fn is_empty(&self) -> bool {
        self.api_key.is_none() && self.bearer.is_none()
    }
}

/// 认证结果（状态机终态）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Unauthenticated,
    ApiKeyAuthenticated(Principal),
    SessionAuthenticated(Principal),
}

impl AuthOutcome {
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Self::Unauthenticated => None,
            Self::ApiKeyAuthenticated(p) | Self::SessionAuthenticated(p) => Some(p),
        }
    }

    pub fn into_principal(self) -> Option<Principal> {
        match self {
            Self::Unauthenticated => None,
            Self::ApiKeyAuthenticated(p) | Self::SessionAuthenticated(p) => Some(p),
        }
    }

    /// 指标标签
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "anonymous",
            Self::ApiKeyAuthenticated(_) => "api_key",
            Self::SessionAuthenticated(_) => "session",
        }
    }
}

impl From<Principal> for AuthOutcome {
    fn from(principal: Principal) -> Self {
        match principal.subject_type() {
            SubjectType::ApiKey => Self::ApiKeyAuthenticated(principal),
            SubjectType::User => Self::SessionAuthenticated(principal),
        }
    }
}

/// 认证策略
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// 机制名（日志与指标标签）
    fn mechanism(&self) -> &'static str;

    /// 未提供本机制的凭证时返回 `None`
    async fn authenticate(&self, credentials: &Credentials) -> Option<AuthResult<Principal>>;
}

/// API Key 策略
pub struct ApiKeyStrategy {
    api_keys: Arc<ApiKeyAuthenticator>,
}

impl ApiKeyStrategy {
    pub fn new(api_keys: Arc<ApiKeyAuthenticator>) -> Self {
        Self { api_keys }
    }
}

#[async_trait]
impl Authenticator for ApiKeyStrategy {
    fn mechanism(&self) -> &'static str {
        "api_key"
    }

    async fn authenticate(&self, credentials: &Credentials) -> Option<AuthResult<Principal>> {
        let candidate = credentials.api_key_candidate()?;
        Some(
            self.api_keys
                .validate_api_key(candidate)
                .await
                .map(Principal::from_api_key),
        )
    }
}

/// 会话令牌策略
pub struct SessionStrategy {
    tokens: Arc<TokenService>,
}

impl SessionStrategy {
    pub fn new(tokens: Arc<TokenService>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl Authenticator for SessionStrategy {
    fn mechanism(&self) -> &'static str {
        "session"
    }

    async fn authenticate(&self, credentials: &Credentials) -> Option<AuthResult<Principal>> {
        let token = credentials.session_candidate()?;
        Some(
            self.tokens
                .validate_session_token(token)
                .await
                .and_then(|claims| Principal::from_session(&claims)),
        )
    }
}

/// 有序认证策略链，第一个成功者生效
#[derive(Clone)]
pub struct AuthenticationChain {
    strategies: Vec<Arc<dyn Authenticator>>,
}

impl AuthenticationChain {
    pub fn new(strategies: Vec<Arc<dyn Authenticator>>) -> Self {
        Self { strategies }
    }

    /// API Key 优先，其次会话令牌
    pub fn standard(api_keys: Arc<ApiKeyAuthenticator>, tokens: Arc<TokenService>) -> Self {
        Self::new(vec![
            Arc::new(ApiKeyStrategy::new(api_keys)),
            Arc::new(SessionStrategy::new(tokens)),
        ])
    }

    pub async fn authenticate(&self, credentials: &Credentials) -> AuthOutcome {
        for strategy in &self.strategies {
            let mechanism = strategy.mechanism();
            match strategy.authenticate(credentials).await {
                None => continue,
                Some(Ok(principal)) => {
                    debug!(
                        mechanism,
                        user_id = %principal.subject_id(),
                        role = %principal.role(),
                        "Request authenticated"
                    );
                    return AuthOutcome::from(principal);
                }
                Some(Err(e)) => {
                    if e.is_store_unavailable() {
                        error!(mechanism, error = %e, "Credential check failed closed");
                    } else {
                        warn!(mechanism, reason = e.reason(), "Presented credential rejected");
                    }
                    metrics::counter!(
                        names::AUTH_FAILURES_TOTAL,
                        "mechanism" => mechanism,
                        "reason" => e.reason()
                    )
                    .increment(1);
                }
            }
        }

        AuthOutcome::Unauthenticated
    }
}
