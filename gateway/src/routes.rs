//! HTTP 路由

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use horizon_auth_core::{ApiKeySummary, Principal, RefreshedSession, UsagePageRequest};
use horizon_common::ApiKeyId;
use horizon_errors::{AppError, AppResult};
use horizon_ports::UsagePage;
use horizon_telemetry::HealthStatus;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::middleware::{AuthPrincipal, authenticate};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/v1/auth/me", get(current_principal))
        .route("/api/v1/auth/refresh", post(refresh_session))
        .route("/api/v1/auth/revoke-all", post(revoke_all_sessions))
        .route("/api/v1/api-keys", get(list_api_keys))
        .route("/api/v1/api-keys/{id}", get(get_api_key).delete(revoke_api_key))
        .route("/api/v1/api-keys/{id}/usage", get(list_api_key_usage))
        .layer(middleware::from_fn_with_state(state.auth.clone(), authenticate));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .merge(api)
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let status = state.readiness.readiness().await;
    let code = if status.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn current_principal(AuthPrincipal(principal): AuthPrincipal) -> Json<Principal> {
    Json(principal)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

async fn refresh_session(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> AppResult<Json<RefreshedSession>> {
    let session = state.tokens.refresh_session(&request.refresh_token).await?;
    Ok(Json(session))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeAllResponse {
    pub version: i64,
}

/// 会话管理只对用户本人开放，API Key 不能代替用户操作
fn require_session(principal: &Principal) -> AppResult<()> {
    if principal.is_api_key() {
        return Err(AppError::forbidden("Session authentication required"));
    }
    Ok(())
}

async fn revoke_all_sessions(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
) -> AppResult<Json<RevokeAllResponse>> {
    require_session(&principal)?;
    let version = state.tokens.revoke_all_tokens(principal.subject_id()).await?;
    info!(user_id = %principal.subject_id(), "All sessions revoked by user");
    Ok(Json(RevokeAllResponse { version }))
}

async fn list_api_keys(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
) -> AppResult<Json<Vec<ApiKeySummary>>> {
    require_session(&principal)?;
    let keys = state.auth.api_keys.list_owned_keys(principal.subject_id()).await?;
    Ok(Json(keys))
}

fn parse_key_id(raw: &str) -> AppResult<ApiKeyId> {
    raw.parse()
        .map_err(|_| AppError::validation(format!("Invalid API key id: {}", raw)))
}

async fn get_api_key(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<String>,
) -> AppResult<Json<ApiKeySummary>> {
    require_session(&principal)?;
    let id = parse_key_id(&id)?;
    let key = state.auth.api_keys.get_api_key(&id, principal.subject_id()).await?;
    Ok(Json(key))
}

async fn revoke_api_key(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    require_session(&principal)?;
    let id = parse_key_id(&id)?;
    state
        .auth
        .api_keys
        .revoke_api_key(&id, principal.subject_id())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `?page=&size=&from=&to=`，时间为 RFC 3339
async fn list_api_key_usage(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<String>,
    Query(request): Query<UsagePageRequest>,
) -> AppResult<Json<UsagePage>> {
    require_session(&principal)?;
    let id = parse_key_id(&id)?;
    let page = state
        .auth
        .api_keys
        .list_usage(&id, principal.subject_id(), request)
        .await?;
    Ok(Json(page))
}
