//! 认证错误分类

use horizon_common::RoleParseError;
use horizon_errors::{AppError, AppResult};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

/// 认证与授权错误
///
/// 请求路径上的任何失败都只会导致“未附加主体”，不会直接变成传输层错误；
/// 管理操作（创建、撤销、更新 Key）通过 `From<AuthError> for AppError` 返回给调用方。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Malformed credential")]
    Malformed,

    #[error("Token signature invalid")]
    SignatureInvalid,

    #[error("Credential expired")]
    Expired,

    #[error("Token version has been revoked")]
    RevokedVersion,

    #[error("Not found")]
    NotFound,

    #[error("API key revoked")]
    Revoked,

    #[error("Missing scope: {required}")]
    ScopeInsufficient { required: String },

    #[error("Cross-tenant access denied")]
    CrossTenantForbidden,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Credential store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl AuthError {
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// 指标标签
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::SignatureInvalid => "signature_invalid",
            Self::Expired => "expired",
            Self::RevokedVersion => "revoked_version",
            Self::NotFound => "not_found",
            Self::Revoked => "revoked",
            Self::ScopeInsufficient { .. } => "scope_insufficient",
            Self::CrossTenantForbidden => "cross_tenant",
            Self::Forbidden(_) => "forbidden",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Configuration(_) => "configuration",
            Self::Validation(_) => "validation",
        }
    }

    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Malformed
            | AuthError::SignatureInvalid
            | AuthError::Expired
            | AuthError::RevokedVersion
            | AuthError::Revoked => AppError::unauthorized(err.to_string()),
            AuthError::NotFound => AppError::not_found(err.to_string()),
            AuthError::ScopeInsufficient { .. }
            | AuthError::CrossTenantForbidden
            | AuthError::Forbidden(_) => AppError::forbidden(err.to_string()),
            AuthError::StoreUnavailable(msg) => AppError::external_service(msg),
            AuthError::Configuration(msg) => AppError::configuration(msg),
            AuthError::Validation(msg) => AppError::validation(msg),
        }
    }
}

impl From<RoleParseError> for AuthError {
    fn from(err: RoleParseError) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Result 类型别名
pub type AuthResult<T> = Result<T, AuthError>;

/// 带超时地调用外部存储；超时或存储错误一律视为 `StoreUnavailable`
pub(crate) async fn store_call<T, F>(operation: &'static str, timeout: Duration, call: F) -> AuthResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            error!(operation, error = %e, "Credential store call failed");
            Err(AuthError::StoreUnavailable(format!("{}: {}", operation, e)))
        }
        Err(_) => {
            error!(
                operation,
                timeout_ms = timeout.as_millis() as u64,
                "Credential store call timed out"
            );
            Err(AuthError::StoreUnavailable(format!("{}: timed out", operation)))
        }
    }
}
