//! horizon-errors - 统一错误处理
//!
//! 基于 RFC 7807 Problem Details 规范

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    pub fn external_service(msg: impl Into<String>) -> Self {
        Self::ExternalService(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::Unauthenticated(msg.into())
    }

    pub fn failed_precondition(msg: impl Into<String>) -> Self {
        Self::FailedPrecondition(msg.into())
    }

    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    /// 转换为 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Validation(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::Conflict(_) => 409,
            Self::Internal(_) => 500,
            Self::Database(_) => 500,
            Self::ExternalService(_) => 502,
            Self::Configuration(_) => 500,
            Self::Unauthenticated(_) => 401,
            Self::FailedPrecondition(_) => 412,
            Self::ResourceExhausted(_) => 429,
        }
    }

    /// 是否为服务端错误（5xx）
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// 转换为 Problem Details
    pub fn to_problem_details(&self) -> ProblemDetails {
        ProblemDetails {
            r#type: self.problem_type(),
            title: self.problem_title(),
            status: self.status_code(),
            detail: self.public_detail(),
            instance: None,
        }
    }

    /// 对外展示的错误详情：服务端错误不暴露内部信息
    fn public_detail(&self) -> String {
        if self.is_server_error() {
            self.problem_title()
        } else {
            self.to_string()
        }
    }

    fn problem_type(&self) -> String {
        let slug = match self {
            Self::NotFound(_) => "not-found",
            Self::Validation(_) => "validation",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Conflict(_) => "conflict",
            Self::Internal(_) => "internal",
            Self::Database(_) => "database",
            Self::ExternalService(_) => "external-service",
            Self::Configuration(_) => "configuration",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::FailedPrecondition(_) => "failed-precondition",
            Self::ResourceExhausted(_) => "resource-exhausted",
        };
        format!("https://api.cosv-horizon.org/problems/{}", slug)
    }

    fn problem_title(&self) -> String {
        match self {
            Self::NotFound(_) => "Resource Not Found".to_string(),
            Self::Validation(_) => "Validation Error".to_string(),
            Self::Unauthorized(_) => "Unauthorized".to_string(),
            Self::Forbidden(_) => "Forbidden".to_string(),
            Self::Conflict(_) => "Conflict".to_string(),
            Self::Internal(_) => "Internal Server Error".to_string(),
            Self::Database(_) => "Database Error".to_string(),
            Self::ExternalService(_) => "External Service Error".to_string(),
            Self::Configuration(_) => "Configuration Error".to_string(),
            Self::Unauthenticated(_) => "Unauthenticated".to_string(),
            Self::FailedPrecondition(_) => "Failed Precondition".to_string(),
            Self::ResourceExhausted(_) => "Resource Exhausted".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.is_server_error() {
            tracing::error!(error = %self, "Request failed with server error");
        }

        let problem = self.to_problem_details();
        let status =
            StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::to_string(&problem).unwrap_or_default();

        let mut response = (status, body).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

/// RFC 7807 Problem Details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDetails {
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

/// Result 类型别名
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::unauthorized("x").status_code(), 401);
        assert_eq!(AppError::forbidden("x").status_code(), 403);
        assert_eq!(AppError::external_service("x").status_code(), 502);
        assert_eq!(AppError::configuration("x").status_code(), 500);
    }

    #[test]
    fn test_problem_details_hides_server_error_detail() {
        let problem = AppError::database("connection refused at 10.0.0.3").to_problem_details();
        assert_eq!(problem.status, 500);
        assert!(!problem.detail.contains("10.0.0.3"));

        let problem = AppError::forbidden("Cross-tenant access denied").to_problem_details();
        assert_eq!(problem.status, 403);
        assert!(problem.detail.contains("Cross-tenant"));
    }

    #[test]
    fn test_into_response_sets_problem_json() {
        let response = AppError::unauthorized("Authentication required").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/problem+json"
        );
    }
}
