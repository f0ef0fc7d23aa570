//! horizon-auth-core - 认证核心库
//!
//! 会话令牌、API Key、授权守卫、认证策略链与签名 state。
//! 所有外部存储通过 `horizon-ports` 中的 trait 注入，调用均带超时并在失败时拒绝认证。

pub mod api_key;
pub mod authenticator;
pub mod claims;
pub mod error;
pub mod guard;
pub mod principal;
pub mod signed_state;
pub mod signing;
pub mod token;

pub use api_key::{
    ApiKeyAuthenticator, ApiKeyContext, ApiKeyPolicy, ApiKeySummary, ApiKeyUpdate,
    CreateApiKeyRequest, CreatedApiKey, PresentedKey, UsagePageRequest, hash_secret,
    looks_like_api_key,
};
pub use authenticator::{
    ApiKeyStrategy, AuthOutcome, AuthenticationChain, Authenticator, Credentials, SessionStrategy,
};
pub use claims::{Claims, TokenType};
pub use error::{AuthError, AuthResult};
pub use guard::{
    ensure_org_role, ensure_same_tenant, ensure_scope, has_admin_privilege, has_edit_privilege,
    parse_org_role,
};
pub use principal::{Principal, SubjectType};
pub use signed_state::SignedState;
pub use signing::SigningKey;
pub use token::{RefreshedSession, TokenPair, TokenService};
