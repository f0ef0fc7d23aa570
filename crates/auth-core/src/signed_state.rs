//! 签名 state
//!
//! 格式：`base64url(payload).base64url(HMAC-SHA256(payload))`，无填充。
//! 用于 OAuth 回调等需要经过不可信往返的短期状态，本身无状态、不落库。

use base64::Engine;
use base64::alphabet::URL_SAFE;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE_NO_PAD};
use base64::engine::DecodePaddingMode;
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::fmt;
use subtle::ConstantTimeEq;

use crate::error::{AuthError, AuthResult};

type HmacSha256 = Hmac<Sha256>;

/// 解码时同时接受带填充与不带填充的输入
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// HMAC 签名的 state 编解码器
#[derive(Clone)]
pub struct SignedState {
    mac: HmacSha256,
}

impl SignedState {
    pub fn new(secret: &[u8]) -> AuthResult<Self> {
        if secret.is_empty() {
            return Err(AuthError::configuration("State secret must not be empty"));
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| AuthError::configuration(format!("Invalid state secret: {}", e)))?;
        Ok(Self { mac })
    }

    pub fn encode(&self, payload: &str) -> String {
        let signature = self.sign(payload.as_bytes());
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload.as_bytes()),
            URL_SAFE_NO_PAD.encode(signature)
        )
    }

    /// 签名不匹配或格式错误时返回 `None`，不区分失败原因
    pub fn decode(&self, state: &str) -> Option<String> {
        let (payload_part, signature_part) = state.split_once('.')?;
        if payload_part.is_empty() {
            return None;
        }

        let payload = URL_SAFE_LENIENT.decode(payload_part).ok()?;
        let signature = URL_SAFE_LENIENT.decode(signature_part).ok()?;
        let expected = self.sign(&payload);

        if !bool::from(signature.as_slice().ct_eq(expected.as_slice())) {
            return None;
        }
        String::from_utf8(payload).ok()
    }

    pub fn encode_json<T: Serialize>(&self, value: &T) -> AuthResult<String> {
        let payload = serde_json::to_string(value)
            .map_err(|e| AuthError::validation(format!("State is not serializable: {}", e)))?;
        Ok(self.encode(&payload))
    }

    pub fn decode_json<T: DeserializeOwned>(&self, state: &str) -> Option<T> {
        let payload = self.decode(state)?;
        serde_json::from_str(&payload).ok()
    }

    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }
}

impl fmt::Debug for SignedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SignedState([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn signer() -> SignedState {
        SignedState::new(b"oauth-state-secret").unwrap()
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct OAuthState {
        nonce: String,
        redirect: String,
    }

    #[test]
    fn test_encode_decode() {
        let state = signer().encode(r#"{"nonce":"n1"}"#);
        assert!(!state.contains('='));
        assert_eq!(signer().decode(&state).as_deref(), Some(r#"{"nonce":"n1"}"#));
    }

    #[test]
    fn test_matches_reference_hmac() {
        // HMAC-SHA256("key", "The quick brown fox jumps over the lazy dog")
        let signer = SignedState::new(b"key").unwrap();
        let state = signer.encode("The quick brown fox jumps over the lazy dog");
        let (_, signature) = state.split_once('.').unwrap();
        assert_eq!(
            hex::encode(URL_SAFE_NO_PAD.decode(signature).unwrap()),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn test_rejects_tampering() {
        let signer = signer();
        let state = signer.encode("payload");
        let (_, signature) = state.split_once('.').unwrap();

        let forged = format!("{}.{}", URL_SAFE_NO_PAD.encode("other"), signature);
        assert!(signer.decode(&forged).is_none());

        let other_secret = SignedState::new(b"different-secret").unwrap();
        assert!(other_secret.decode(&state).is_none());
    }

    #[test]
    fn test_rejects_malformed_input() {
        let signer = signer();
        for state in ["", "nodot", ".sig", "!!!.???", "cGF5bG9hZA."] {
            assert!(signer.decode(state).is_none(), "{state}");
        }
    }

    #[test]
    fn test_accepts_padded_segments() {
        let signer = signer();
        let state = signer.encode("ab");
        let (payload, signature) = state.split_once('.').unwrap();
        let padded = format!("{}=.{}=", payload, signature);
        assert_eq!(signer.decode(&padded).as_deref(), Some("ab"));
    }

    #[test]
    fn test_json_helpers() {
        let signer = signer();
        let value = OAuthState {
            nonce: "n-123".to_string(),
            redirect: "/dashboard".to_string(),
        };
        let state = signer.encode_json(&value).unwrap();
        assert_eq!(signer.decode_json::<OAuthState>(&state), Some(value));
        assert!(signer.decode_json::<OAuthState>(&signer.encode("not json")).is_none());
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(SignedState::new(b"").is_err());
    }
}
