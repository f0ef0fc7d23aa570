//! 认证中间件
//!
//! 每个请求只做一次认证决策：API Key 优先，会话令牌兜底，都失败则保持匿名。
//! 是否必须登录由各个处理函数通过 [`AuthPrincipal`] 决定。

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use horizon_auth_core::{AuthOutcome, Credentials, Principal};
use horizon_common::ApiKeyId;
use horizon_errors::AppError;
use horizon_ports::UsageEvent;
use horizon_telemetry::names;
use std::net::{IpAddr, SocketAddr};
use tracing::warn;

use crate::state::AuthState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// 已认证主体提取器，匿名请求返回 401
pub struct AuthPrincipal(pub Principal);

impl<S> FromRequestParts<S> for AuthPrincipal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(AuthPrincipal)
            .ok_or_else(|| AppError::unauthenticated("Authentication required"))
    }
}

/// 等响应产生后再写入的使用记录
struct PendingUsage {
    api_key_id: ApiKeyId,
    ip: Option<String>,
    method: String,
    path: String,
    user_agent: Option<String>,
}

fn header_str<'a>(headers: &'a HeaderMap, name: impl header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// 客户端 IP：`X-Forwarded-For` 第一项，其次 `X-Real-IP`，最后是连接对端地址
///
/// 头部值必须能解析为 IP 地址，否则忽略该头部。
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let parse = |v: &str| v.trim().parse::<IpAddr>().ok();
    let forwarded = header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .and_then(parse);
    let real_ip = header_str(headers, "x-real-ip").and_then(parse);

    forwarded
        .or(real_ip)
        .or_else(|| peer.map(|addr| addr.ip()))
        .map(|ip| ip.to_string())
}

/// 认证中间件
pub async fn authenticate(State(auth): State<AuthState>, mut request: Request, next: Next) -> Response {
    let headers = request.headers();
    let credentials = Credentials::from_headers(
        header_str(headers, API_KEY_HEADER),
        header_str(headers, header::AUTHORIZATION),
    );

    let outcome = if credentials.is_empty() {
        AuthOutcome::Unauthenticated
    } else {
        match tokio::time::timeout(auth.timeout, auth.chain.authenticate(&credentials)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    timeout_ms = auth.timeout.as_millis() as u64,
                    "Authentication timed out, continuing unauthenticated"
                );
                AuthOutcome::Unauthenticated
            }
        }
    };
    metrics::counter!(names::AUTH_REQUESTS_TOTAL, "outcome" => outcome.label()).increment(1);

    let usage = match &outcome {
        AuthOutcome::ApiKeyAuthenticated(principal) => {
            principal.api_key_id().cloned().map(|api_key_id| {
                let peer = request
                    .extensions()
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| *addr);
                PendingUsage {
                    api_key_id,
                    ip: client_ip(request.headers(), peer),
                    method: request.method().to_string(),
                    path: request.uri().path().to_string(),
                    user_agent: header_str(request.headers(), header::USER_AGENT).map(String::from),
                }
            })
        }
        _ => None,
    };

    if let Some(principal) = outcome.into_principal() {
        request.extensions_mut().insert(principal);
    }

    let response = next.run(request).await;

    if let Some(usage) = usage {
        dispatch_usage(&auth, usage, response.status().as_u16());
    }
    response
}

/// 后台写入使用日志与最近使用信息，失败只记录不影响响应
fn dispatch_usage(auth: &AuthState, usage: PendingUsage, status_code: u16) {
    let sink = auth.usage_sink.clone();
    let api_keys = auth.api_keys.clone();
    let timeout = api_keys.policy().store_timeout;

    tokio::spawn(async move {
        let event = UsageEvent {
            api_key_id: usage.api_key_id.clone(),
            timestamp: Utc::now(),
            ip: usage.ip.clone(),
            method: usage.method,
            path: usage.path,
            status_code,
            user_agent: usage.user_agent,
        };

        let recorded = match tokio::time::timeout(timeout, sink.record(event)).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err("timed out".to_string()),
        };
        if let Err(e) = recorded {
            warn!(api_key_id = %usage.api_key_id, error = %e, "Failed to record API key usage");
            metrics::counter!(names::API_KEY_USAGE_DROPPED_TOTAL, "kind" => "usage_log").increment(1);
        }

        api_keys
            .update_last_used(&usage.api_key_id, usage.ip.as_deref())
            .await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, body::Body, http::StatusCode, middleware, routing::get};
    use horizon_adapter_memory::{
        MemoryApiKeyStore, MemoryMembership, MemoryRevocationStore, MemoryUsageAuditSink,
        MemoryUserDirectory,
    };
    use horizon_auth_core::{
        ApiKeyAuthenticator, ApiKeyPolicy, AuthenticationChain, CreateApiKeyRequest, SigningKey,
        TokenService,
    };
    use horizon_common::{Role, UserId};
    use horizon_config::{ApiKeyConfig, JwtConfig};
    use horizon_ports::UserAccount;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    struct Harness {
        app: Router,
        tokens: Arc<TokenService>,
        api_keys: Arc<ApiKeyAuthenticator>,
        store: Arc<MemoryApiKeyStore>,
        sink: Arc<MemoryUsageAuditSink>,
        user: UserId,
    }

    async fn whoami(AuthPrincipal(principal): AuthPrincipal) -> Json<Principal> {
        Json(principal)
    }

    async fn public() -> &'static str {
        "public"
    }

    fn harness(timeout: Duration) -> Harness {
        let store = Arc::new(MemoryApiKeyStore::new());
        let users = Arc::new(MemoryUserDirectory::new());
        let sink = Arc::new(MemoryUsageAuditSink::new());
        let user = UserId::new();
        users.insert(UserAccount {
            id: user.clone(),
            username: "alice".to_string(),
            role: Role::User,
        });

        let key = SigningKey::from_secret("gateway-test-secret-with-32-bytes!!").unwrap();
        let tokens = Arc::new(
            TokenService::new(
                &JwtConfig::default(),
                &key,
                Arc::new(MemoryRevocationStore::new()),
                Duration::from_millis(200),
            )
            .unwrap(),
        );
        let mut policy = ApiKeyPolicy::from_config(&ApiKeyConfig::default());
        policy.store_timeout = Duration::from_millis(200);
        let api_keys = Arc::new(ApiKeyAuthenticator::new(
            store.clone(),
            users,
            Arc::new(MemoryMembership::new()),
            sink.clone(),
            policy,
        ));

        let state = AuthState {
            chain: AuthenticationChain::standard(api_keys.clone(), tokens.clone()),
            api_keys: api_keys.clone(),
            usage_sink: sink.clone(),
            timeout,
        };
        let app = Router::new()
            .route("/me", get(whoami))
            .route("/public", get(public))
            .layer(middleware::from_fn_with_state(state, authenticate));

        Harness {
            app,
            tokens,
            api_keys,
            store,
            sink,
            user,
        }
    }

    async fn create_key(h: &Harness) -> (ApiKeyId, String) {
        let created = h
            .api_keys
            .create_api_key(CreateApiKeyRequest {
                owner: h.user.clone(),
                scopes: vec!["vuln:read".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();
        (created.key.id, created.plaintext)
    }

    async fn send(app: &Router, uri: &str, headers: &[(&str, &str)]) -> (StatusCode, serde_json::Value) {
        let mut builder = axum::http::Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let response = app
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    async fn wait_for_usage(sink: &MemoryUsageAuditSink) -> Vec<UsageEvent> {
        for _ in 0..100 {
            let events = sink.events();
            if !events.is_empty() {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sink.events()
    }

    #[tokio::test]
    async fn test_anonymous_request() {
        let h = harness(Duration::from_secs(1));
        let (status, _) = send(&h.app, "/public", &[]).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&h.app, "/me", &[]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["status"], 401);
    }

    #[tokio::test]
    async fn test_session_token() {
        let h = harness(Duration::from_secs(1));
        let token = h.tokens.issue_access_token(&h.user, Role::User).unwrap();
        let bearer = format!("Bearer {}", token);

        let (status, body) = send(&h.app, "/me", &[("authorization", &bearer)]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subjectType"], "USER");
        assert_eq!(body["subjectId"], h.user.to_string());
        assert!(h.sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_session_token_is_anonymous() {
        let h = harness(Duration::from_secs(1));
        let (status, _) = send(&h.app, "/me", &[("authorization", "Bearer a.b.c")]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&h.app, "/public", &[("authorization", "Bearer a.b.c")]).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_invalid_api_key_falls_back_to_session() {
        let h = harness(Duration::from_secs(1));
        let token = h.tokens.issue_access_token(&h.user, Role::Admin).unwrap();
        let bearer = format!("Bearer {}", token);

        let (status, body) = send(
            &h.app,
            "/me",
            &[("x-api-key", "cosv_nope0000.deadbeef"), ("authorization", &bearer)],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subjectType"], "USER");
        assert_eq!(body["role"], "ADMIN");
    }

    #[tokio::test]
    async fn test_api_key_records_usage() {
        let h = harness(Duration::from_secs(1));
        let (id, plaintext) = create_key(&h).await;

        let (status, body) = send(
            &h.app,
            "/me",
            &[
                ("x-api-key", &plaintext),
                ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
                ("user-agent", "horizon-cli/1.0"),
            ],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subjectType"], "API_KEY");
        assert_eq!(body["role"], "API");

        let events = wait_for_usage(&h.sink).await;
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.api_key_id, id);
        assert_eq!(event.ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(event.method, "GET");
        assert_eq!(event.path, "/me");
        assert_eq!(event.status_code, 200);
        assert_eq!(event.user_agent.as_deref(), Some("horizon-cli/1.0"));

        for _ in 0..100 {
            if h.store.get(&id).and_then(|r| r.last_used_time).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let record = h.store.get(&id).unwrap();
        assert!(record.last_used_time.is_some());
        assert_eq!(record.last_used_ip.as_deref(), Some("203.0.113.7"));
    }

    #[tokio::test]
    async fn test_api_key_as_bearer() {
        let h = harness(Duration::from_secs(1));
        let (_, plaintext) = create_key(&h).await;
        let bearer = format!("Bearer {}", plaintext);

        let (status, body) = send(&h.app, "/me", &[("authorization", &bearer)]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subjectType"], "API_KEY");
    }

    #[tokio::test]
    async fn test_usage_sink_failure_does_not_change_response() {
        let h = harness(Duration::from_secs(1));
        let (id, plaintext) = create_key(&h).await;
        h.sink.set_unavailable(true);

        let (status, _) = send(&h.app, "/me", &[("x-api-key", &plaintext)]).await;
        assert_eq!(status, StatusCode::OK);

        // 使用日志写入失败后仍然更新最近使用时间
        for _ in 0..100 {
            if h.store.get(&id).and_then(|r| r.last_used_time).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(h.store.get(&id).unwrap().last_used_time.is_some());
        assert!(h.sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_store_outage_fails_closed() {
        let h = harness(Duration::from_secs(1));
        let (_, plaintext) = create_key(&h).await;
        h.store.set_unavailable(true);

        let (status, _) = send(&h.app, "/me", &[("x-api-key", &plaintext)]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_slow_store_times_out_unauthenticated() {
        let h = harness(Duration::from_millis(50));
        let (_, plaintext) = create_key(&h).await;
        h.store.set_latency(Duration::from_millis(150));

        let (status, _) = send(&h.app, "/me", &[("x-api-key", &plaintext)]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.sink.events().is_empty());
    }

    #[test]
    fn test_client_ip_precedence() {
        let peer: SocketAddr = "192.0.2.10:4711".parse().unwrap();

        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(peer)).as_deref(), Some("192.0.2.10"));
        assert_eq!(client_ip(&headers, None), None);

        headers.insert("x-real-ip", "198.51.100.2".parse().unwrap());
        assert_eq!(client_ip(&headers, Some(peer)).as_deref(), Some("198.51.100.2"));

        headers.insert("x-forwarded-for", " 203.0.113.9 , 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers, Some(peer)).as_deref(), Some("203.0.113.9"));

        headers.insert("x-forwarded-for", "2001:db8::1".parse().unwrap());
        assert_eq!(client_ip(&headers, Some(peer)).as_deref(), Some("2001:db8::1"));
    }

    #[test]
    fn test_client_ip_ignores_unparseable_headers() {
        let peer: SocketAddr = "192.0.2.10:4711".parse().unwrap();
        let long = "a".repeat(300);

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", long.parse().unwrap());
        assert_eq!(client_ip(&headers, Some(peer)).as_deref(), Some("192.0.2.10"));
        assert_eq!(client_ip(&headers, None), None);

        headers.insert("x-real-ip", "198.51.100.2".parse().unwrap());
        assert_eq!(client_ip(&headers, Some(peer)).as_deref(), Some("198.51.100.2"));

        headers.insert("x-real-ip", "unknown".parse().unwrap());
        assert_eq!(client_ip(&headers, Some(peer)).as_deref(), Some("192.0.2.10"));
    }
}
