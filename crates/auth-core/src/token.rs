//! 会话令牌服务
//!
//! `validate_access_token` 只做签名与过期校验，不访问外部存储。
//! 请求认证走 `validate_session_token`，额外比对主体的会话截止时间：
//! `revoke_all_tokens` 记录截止时间，签发时间不晚于它的访问令牌随即失效。
//! 截止时间精确到秒，撤销当秒签发的令牌同样失效。
//! 刷新令牌携带版本号，校验时与 `RevocationStore` 中的当前版本比对。

use chrono::Utc;
use horizon_common::{Role, UserId};
use horizon_config::JwtConfig;
use horizon_ports::RevocationStore;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::claims::{Claims, TokenType};
use crate::error::{AuthError, AuthResult, store_call};
use crate::signing::SigningKey;

/// 登录响应中的令牌对
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// 秒
    pub access_expires_in: i64,
    /// 秒
    pub refresh_expires_in: i64,
}

/// 刷新会话的结果；`refresh_token` 为 `None` 时调用方继续使用原刷新令牌
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshedSession {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub access_expires_in: i64,
}

/// Token 服务
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    access_token_expires_in: i64,
    refresh_token_expires_in: i64,
    refresh_threshold: i64,
    version_ttl: Duration,
    cutoff_ttl: Duration,
    store_timeout: Duration,
    revocations: Arc<dyn RevocationStore>,
}

impl TokenService {
    pub fn new(
        config: &JwtConfig,
        key: &SigningKey,
        revocations: Arc<dyn RevocationStore>,
        store_timeout: Duration,
    ) -> AuthResult<Self> {
        let secs = |name: &str, value: u64| {
            i64::try_from(value)
                .map_err(|_| AuthError::configuration(format!("jwt.{} is out of range", name)))
        };

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&config.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.leeway = 0; // 不允许时间偏差

        Ok(Self {
            encoding_key: EncodingKey::from_secret(key.as_bytes()),
            decoding_key: DecodingKey::from_secret(key.as_bytes()),
            validation,
            issuer: config.issuer.clone(),
            access_token_expires_in: secs("access_ttl_secs", config.access_ttl_secs)?,
            refresh_token_expires_in: secs("refresh_ttl_secs", config.refresh_ttl_secs)?,
            refresh_threshold: secs("refresh_threshold_secs", config.refresh_threshold_secs)?,
            version_ttl: Duration::from_secs(config.version_ttl_secs),
            // 超过访问令牌 TTL 后，截止时间之前签发的令牌都已自然过期
            cutoff_ttl: Duration::from_secs(config.access_ttl_secs),
            store_timeout,
            revocations,
        })
    }

    /// 生成访问令牌（无外部 I/O）
    pub fn issue_access_token(&self, subject: &UserId, role: Role) -> AuthResult<String> {
        let claims = Claims::new(
            subject,
            role,
            TokenType::Access,
            None,
            self.access_token_expires_in,
            &self.issuer,
        );
        self.sign(&claims)
    }

    /// 生成刷新令牌，嵌入主体当前版本（不存在时初始化为 1）
    pub async fn issue_refresh_token(&self, subject: &UserId, role: Role) -> AuthResult<String> {
        let version = store_call(
            "revocation.get_or_init",
            self.store_timeout,
            self.revocations.get_or_init(subject, self.version_ttl),
        )
        .await?;

        let claims = Claims::new(
            subject,
            role,
            TokenType::Refresh,
            Some(version),
            self.refresh_token_expires_in,
            &self.issuer,
        );
        self.sign(&claims)
    }

    /// 生成访问令牌与刷新令牌
    pub async fn issue_token_pair(&self, subject: &UserId, role: Role) -> AuthResult<TokenPair> {
        let refresh_token = self.issue_refresh_token(subject, role).await?;
        let access_token = self.issue_access_token(subject, role)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            access_expires_in: self.access_token_expires_in,
            refresh_expires_in: self.refresh_token_expires_in,
        })
    }

    /// 验证访问令牌（签名 + 过期 + 类型）
    pub fn validate_access_token(&self, token: &str) -> AuthResult<Claims> {
        let claims = self.decode(token)?;

        if !claims.is_access_token() {
            return Err(AuthError::Malformed);
        }

        claims.user_id()?;
        Ok(claims)
    }

    /// 验证请求携带的访问令牌，并比对主体的会话截止时间
    pub async fn validate_session_token(&self, token: &str) -> AuthResult<Claims> {
        let claims = self.validate_access_token(token)?;
        let subject = claims.user_id()?;

        let cutoff = store_call(
            "revocation.invalid_after",
            self.store_timeout,
            self.revocations.invalid_after(&subject),
        )
        .await?;

        match cutoff {
            Some(cutoff) if claims.iat <= cutoff => {
                debug!(
                    user_id = %subject,
                    issued_at = claims.iat,
                    invalid_after = cutoff,
                    "Access token issued before session cutoff"
                );
                Err(AuthError::RevokedVersion)
            }
            _ => Ok(claims),
        }
    }

    /// 验证刷新令牌，并比对主体当前版本
    ///
    /// 版本计数器不存在（例如已过期被清理）时同样视为已撤销。
    pub async fn validate_refresh_token(&self, token: &str) -> AuthResult<Claims> {
        let claims = self.decode(token)?;

        if !claims.is_refresh_token() {
            return Err(AuthError::Malformed);
        }
        let version = claims.version.ok_or(AuthError::Malformed)?;
        let subject = claims.user_id()?;

        let current = store_call(
            "revocation.current",
            self.store_timeout,
            self.revocations.current(&subject),
        )
        .await?;

        match current {
            Some(current) if current == version => Ok(claims),
            current => {
                debug!(
                    user_id = %subject,
                    token_version = version,
                    current_version = ?current,
                    "Refresh token version mismatch"
                );
                Err(AuthError::RevokedVersion)
            }
        }
    }

    /// 剩余有效期是否已进入刷新阈值；无效或已过期的令牌返回 false
    pub fn needs_refresh(&self, token: &str) -> bool {
        match self.decode(token) {
            Ok(claims) => claims.remaining_secs() < self.refresh_threshold,
            Err(_) => false,
        }
    }

    /// 撤销主体的全部会话，返回新版本号
    ///
    /// 先写会话截止时间再递增版本；中途失败时调用方应重试。
    pub async fn revoke_all_tokens(&self, subject: &UserId) -> AuthResult<i64> {
        store_call(
            "revocation.set_invalid_after",
            self.store_timeout,
            self.revocations
                .set_invalid_after(subject, Utc::now().timestamp(), self.cutoff_ttl),
        )
        .await?;

        let version = store_call(
            "revocation.increment",
            self.store_timeout,
            self.revocations.increment(subject, self.version_ttl),
        )
        .await?;

        info!(user_id = %subject, version, "All sessions revoked");
        Ok(version)
    }

    /// 用刷新令牌换取新的访问令牌；刷新令牌临近过期时一并轮换
    pub async fn refresh_session(&self, refresh_token: &str) -> AuthResult<RefreshedSession> {
        let claims = self.validate_refresh_token(refresh_token).await?;
        let subject = claims.user_id()?;

        let access_token = self.issue_access_token(&subject, claims.role)?;
        let refresh_token = if self.needs_refresh(refresh_token) {
            debug!(user_id = %subject, "Rotating refresh token");
            Some(self.issue_refresh_token(&subject, claims.role).await?)
        } else {
            None
        };

        Ok(RefreshedSession {
            access_token,
            refresh_token,
            access_expires_in: self.access_token_expires_in,
        })
    }

    /// 获取访问令牌过期时间（秒）
    pub fn access_token_expires_in(&self) -> i64 {
        self.access_token_expires_in
    }

    fn sign(&self, claims: &Claims) -> AuthResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AuthError::configuration(format!("Failed to sign token: {}", e)))
    }

    fn decode(&self, token: &str) -> AuthResult<Claims> {
        decode::<Claims>(token.trim(), &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    AuthError::SignatureInvalid
                }
                _ => AuthError::Malformed,
            })
    }
}
