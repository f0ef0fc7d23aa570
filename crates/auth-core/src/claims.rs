//! 会话令牌 Claims

use chrono::Utc;
use horizon_common::{Role, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};

/// 令牌类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT Claims
///
/// `role` 是封闭枚举，未知角色的令牌在解码阶段即被拒绝。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    pub role: Role,
    #[serde(rename = "tokenType")]
    pub token_type: TokenType,
    /// 仅刷新令牌携带
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    /// Issued at
    pub iat: i64,
    /// Expiration time
    pub exp: i64,
    /// JWT ID
    pub jti: String,
    /// Issuer
    pub iss: String,
}

impl Claims {
    pub fn new(
        subject: &UserId,
        role: Role,
        token_type: TokenType,
        version: Option<i64>,
        expires_in_secs: i64,
        issuer: &str,
    ) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: subject.to_string(),
            role,
            token_type,
            version,
            iat: now,
            exp: now.saturating_add(expires_in_secs),
            jti: Uuid::now_v7().to_string(),
            iss: issuer.to_string(),
        }
    }

    pub fn user_id(&self) -> AuthResult<UserId> {
        self.sub.parse().map_err(|_| AuthError::Malformed)
    }

    pub fn is_access_token(&self) -> bool {
        self.token_type == TokenType::Access
    }

    pub fn is_refresh_token(&self) -> bool {
        self.token_type == TokenType::Refresh
    }

    /// 剩余有效秒数（已过期时为负）
    pub fn remaining_secs(&self) -> i64 {
        self.exp - Utc::now().timestamp()
    }
}
