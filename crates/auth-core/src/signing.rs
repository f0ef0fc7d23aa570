//! 签名密钥解析

use base64::{Engine, engine::general_purpose::STANDARD};
use horizon_config::AppConfig;
use rand::RngCore;
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, Secret};
use std::fmt;
use tracing::warn;

use crate::error::{AuthError, AuthResult};

/// 密钥最小长度（256 位）
pub const MIN_KEY_BYTES: usize = 32;

const BASE64_PREFIX: &str = "base64:";

/// HS256 签名密钥
pub struct SigningKey {
    bytes: Secret<Vec<u8>>,
    ephemeral: bool,
}

impl SigningKey {
    /// 从配置值构造；`base64:` 前缀的值先解码
    pub fn from_secret(secret: &str) -> AuthResult<Self> {
        let secret = secret.trim();
        let bytes = match secret.strip_prefix(BASE64_PREFIX) {
            Some(encoded) => STANDARD
                .decode(encoded.trim())
                .map_err(|e| AuthError::configuration(format!("jwt.secret is not valid base64: {}", e)))?,
            None => secret.as_bytes().to_vec(),
        };

        if bytes.len() < MIN_KEY_BYTES {
            return Err(AuthError::configuration(format!(
                "jwt.secret must be at least {} bytes, got {}",
                MIN_KEY_BYTES,
                bytes.len()
            )));
        }

        Ok(Self {
            bytes: Secret::new(bytes),
            ephemeral: false,
        })
    }

    /// 进程内随机密钥，重启后所有已签发令牌失效
    pub fn ephemeral() -> Self {
        let mut bytes = vec![0u8; MIN_KEY_BYTES * 2];
        OsRng.fill_bytes(&mut bytes);
        Self {
            bytes: Secret::new(bytes),
            ephemeral: true,
        }
    }

    /// 按配置解析签名密钥
    ///
    /// 未配置 `jwt.secret` 时拒绝启动，除非开发环境显式打开 `jwt.allow_ephemeral_key`。
    pub fn resolve(config: &AppConfig) -> AuthResult<Self> {
        match &config.jwt.secret {
            Some(secret) => Self::from_secret(secret.expose_secret()),
            None if config.allows_ephemeral_signing_key() => {
                warn!(
                    app_env = %config.app_env,
                    "jwt.secret not configured, using an ephemeral signing key; all tokens become invalid on restart"
                );
                Ok(Self::ephemeral())
            }
            None => Err(AuthError::configuration(
                "jwt.secret is required (set HORIZON_JWT__SECRET)",
            )),
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        self.bytes.expose_secret()
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("bytes", &"[REDACTED]")
            .field("ephemeral", &self.ephemeral)
            .finish()
    }
}
