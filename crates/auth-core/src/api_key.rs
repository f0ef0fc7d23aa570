//! API Key 认证
//!
//! 明文格式：`<brand>_<id8>.<secret>`。`<brand>_<id8>` 作为 `key_prefix` 明文存储，
//! 只用于人工识别；`<secret>` 为 32 字节随机数的十六进制，只存 SHA-256 哈希，
//! 查找一律按哈希进行。

use chrono::{DateTime, Utc};
use horizon_common::{ApiKeyId, OrgRole, TenantId, UserId};
use horizon_config::ApiKeyConfig;
use horizon_ports::{
    ApiKeyDetails, ApiKeyRecord, ApiKeyStatus, ApiKeyStore, NewApiKey, OrganizationMembership,
    UsageAuditSink, UsagePage, UsageQuery, UserDirectory,
};
use horizon_telemetry::names;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{AuthError, AuthResult, store_call};

const PREFIX_ID_LEN: usize = 8;
const SECRET_BYTES: usize = 32;
const MAX_DESCRIPTION_LEN: usize = 255;
const DEFAULT_USAGE_PAGE_SIZE: u32 = 20;
const MAX_USAGE_PAGE_SIZE: u32 = 100;

/// API Key 策略
#[derive(Debug, Clone)]
pub struct ApiKeyPolicy {
    pub brand: String,
    /// 为空表示只做格式校验
    pub allowed_scopes: BTreeSet<String>,
    pub store_timeout: Duration,
}

impl ApiKeyPolicy {
    pub fn from_config(config: &ApiKeyConfig) -> Self {
        Self {
            brand: config.brand.clone(),
            allowed_scopes: config.allowed_scopes.iter().cloned().collect(),
            store_timeout: config.store_timeout(),
        }
    }
}

/// 客户端提交的明文凭证
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentedKey<'a> {
    pub prefix: &'a str,
    pub secret: &'a str,
}

impl<'a> PresentedKey<'a> {
    /// 解析 `<prefix>.<secret>`：恰好一个 `.`，两段都非空且不含空白
    pub fn parse(raw: &'a str) -> AuthResult<Self> {
        let raw = raw.trim();
        let (prefix, secret) = raw.split_once('.').ok_or(AuthError::Malformed)?;

        let well_formed = |part: &str| {
            !part.is_empty() && !part.contains('.') && !part.chars().any(char::is_whitespace)
        };
        if !well_formed(prefix) || !well_formed(secret) {
            return Err(AuthError::Malformed);
        }

        Ok(Self { prefix, secret })
    }
}

/// 形如 API Key（JWT 总是包含两个 `.`，因此不会被误判）
pub fn looks_like_api_key(raw: &str) -> bool {
    PresentedKey::parse(raw).is_ok()
}

/// 计算 secret 的 SHA-256 十六进制哈希
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// 校验通过的 API Key 认证上下文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyContext {
    pub api_key_id: ApiKeyId,
    pub key_prefix: String,
    pub owner_user_id: UserId,
    pub tenant_id: Option<TenantId>,
    pub scopes: BTreeSet<String>,
}

impl ApiKeyContext {
    /// 精确、区分大小写的 scope 匹配
    pub fn has_scope(&self, required: &str) -> bool {
        self.scopes.contains(required)
    }
}

/// 对外展示的 API Key 信息（不含哈希）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeySummary {
    pub id: ApiKeyId,
    pub key_prefix: String,
    pub owner_user_id: UserId,
    pub organization_id: Option<TenantId>,
    pub description: Option<String>,
    pub scopes: BTreeSet<String>,
    /// 已过期的 ACTIVE Key 展示为 EXPIRED
    pub status: ApiKeyStatus,
    pub expire_time: Option<DateTime<Utc>>,
    pub last_used_time: Option<DateTime<Utc>>,
    pub last_used_ip: Option<String>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl ApiKeySummary {
    fn from_record(record: ApiKeyRecord, now: DateTime<Utc>) -> Self {
        let status = effective_status(&record, now);
        Self {
            id: record.uuid,
            key_prefix: record.key_prefix,
            owner_user_id: record.owner_user_id,
            organization_id: record.organization_id,
            description: record.description,
            scopes: record.scopes,
            status,
            expire_time: record.expire_time,
            last_used_time: record.last_used_time,
            last_used_ip: record.last_used_ip,
            create_time: record.create_time,
            update_time: record.update_time,
        }
    }
}

/// 创建结果：明文只在这里出现一次
#[derive(Debug, Clone)]
pub struct CreatedApiKey {
    pub key: ApiKeySummary,
    pub plaintext: String,
}

/// 创建请求
#[derive(Debug, Clone, Default)]
pub struct CreateApiKeyRequest {
    pub owner: UserId,
    pub organization_id: Option<TenantId>,
    pub description: Option<String>,
    pub scopes: Vec<String>,
    pub expire_time: Option<DateTime<Utc>>,
}

/// 更新请求；`expire_time: Some(None)` 表示清除过期时间，
/// `scopes: Some(vec![])` 表示清空 scope
#[derive(Debug, Clone, Default)]
pub struct ApiKeyUpdate {
    pub description: Option<Option<String>>,
    pub scopes: Option<Vec<String>>,
    pub expire_time: Option<Option<DateTime<Utc>>>,
}

/// 使用日志分页请求；页码从 1 开始
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct UsagePageRequest {
    pub page: Option<u32>,
    pub size: Option<u32>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl UsagePageRequest {
    /// 每页条数限制在 1..=100，缺省或 0 取 20；页码缺省或 0 取第 1 页
    pub fn limit_and_offset(&self) -> (u32, u64) {
        let limit = match self.size {
            None | Some(0) => DEFAULT_USAGE_PAGE_SIZE,
            Some(size) => size.min(MAX_USAGE_PAGE_SIZE),
        };
        let page = self.page.unwrap_or(1).max(1);
        (limit, u64::from(page - 1) * u64::from(limit))
    }
}

fn effective_status(record: &ApiKeyRecord, now: DateTime<Utc>) -> ApiKeyStatus {
    match record.status {
        ApiKeyStatus::Active if record.expire_time.is_some_and(|t| t <= now) => {
            ApiKeyStatus::Expired
        }
        status => status,
    }
}

/// API Key 认证器
#[derive(Clone)]
pub struct ApiKeyAuthenticator {
    store: Arc<dyn ApiKeyStore>,
    users: Arc<dyn UserDirectory>,
    memberships: Arc<dyn OrganizationMembership>,
    usage_log: Arc<dyn UsageAuditSink>,
    policy: ApiKeyPolicy,
}

impl ApiKeyAuthenticator {
    pub fn new(
        store: Arc<dyn ApiKeyStore>,
        users: Arc<dyn UserDirectory>,
        memberships: Arc<dyn OrganizationMembership>,
        usage_log: Arc<dyn UsageAuditSink>,
        policy: ApiKeyPolicy,
    ) -> Self {
        Self {
            store,
            users,
            memberships,
            usage_log,
            policy,
        }
    }

    pub fn policy(&self) -> &ApiKeyPolicy {
        &self.policy
    }

    /// 创建 API Key
    ///
    /// 调用方负责确认创建者有权签发组织级 Key（组织管理员）。
    pub async fn create_api_key(&self, request: CreateApiKeyRequest) -> AuthResult<CreatedApiKey> {
        let owner = store_call(
            "users.find_by_subject_id",
            self.policy.store_timeout,
            self.users.find_by_subject_id(&request.owner),
        )
        .await?
        .ok_or(AuthError::NotFound)?;

        let now = Utc::now();
        let personal = request.organization_id.is_none();
        let scopes = self.normalize_scopes(&request.scopes, personal)?;
        if scopes.is_empty() {
            return Err(AuthError::validation("At least one scope is required"));
        }
        let description = normalize_description(request.description)?;
        ensure_future(request.expire_time, now)?;

        let key_prefix = self.generate_prefix();
        let secret = generate_secret();

        let record = store_call(
            "api_keys.insert",
            self.policy.store_timeout,
            self.store.insert(NewApiKey {
                uuid: ApiKeyId::new(),
                key_prefix: key_prefix.clone(),
                key_hash: hash_secret(&secret),
                owner_user_id: owner.id.clone(),
                organization_id: request.organization_id.clone(),
                description,
                scopes,
                expire_time: request.expire_time,
                create_time: now,
            }),
        )
        .await?;

        info!(
            user_id = %owner.id,
            tenant_id = ?request.organization_id.as_ref().map(|t| t.to_string()),
            key_prefix = %key_prefix,
            "API key created"
        );

        Ok(CreatedApiKey {
            key: ApiKeySummary::from_record(record, now),
            plaintext: format!("{}.{}", key_prefix, secret),
        })
    }

    /// 校验明文凭证
    ///
    /// 按哈希查找；即使状态仍为 ACTIVE，`expire_time` 已过也返回 `Expired`。
    pub async fn validate_api_key(&self, presented: &str) -> AuthResult<ApiKeyContext> {
        let presented = PresentedKey::parse(presented)?;
        let key_hash = hash_secret(presented.secret);

        let record = store_call(
            "api_keys.find_by_hash",
            self.policy.store_timeout,
            self.store.find_by_hash(&key_hash),
        )
        .await?
        .ok_or(AuthError::NotFound)?;

        if record.key_prefix != presented.prefix {
            return Err(AuthError::NotFound);
        }

        match effective_status(&record, Utc::now()) {
            ApiKeyStatus::Active => {}
            ApiKeyStatus::Revoked => return Err(AuthError::Revoked),
            ApiKeyStatus::Expired => return Err(AuthError::Expired),
        }

        Ok(ApiKeyContext {
            api_key_id: record.uuid,
            key_prefix: record.key_prefix,
            owner_user_id: record.owner_user_id,
            tenant_id: record.organization_id,
            scopes: record.scopes,
        })
    }

    /// 精确、区分大小写的 scope 匹配，没有前缀或层级语义
    pub fn has_scope(context: &ApiKeyContext, required: &str) -> bool {
        context.has_scope(required)
    }

    /// 记录最近使用时间与 IP
    ///
    /// 失败只记录日志和指标，不向调用方传播。
    pub async fn update_last_used(&self, id: &ApiKeyId, ip: Option<&str>) {
        let result = store_call(
            "api_keys.touch_last_used",
            self.policy.store_timeout,
            self.store.touch_last_used(id, ip, Utc::now()),
        )
        .await;

        if let Err(e) = result {
            warn!(api_key_id = %id, error = %e, "Failed to update API key last used info");
            metrics::counter!(names::API_KEY_USAGE_DROPPED_TOTAL, "kind" => "last_used").increment(1);
        }
    }

    /// 撤销 API Key；创建者或所属组织管理员可操作，重复撤销视为成功
    pub async fn revoke_api_key(&self, id: &ApiKeyId, requester: &UserId) -> AuthResult<()> {
        let record = self.find_managed(id, requester).await?;

        if record.status == ApiKeyStatus::Revoked {
            info!(api_key_id = %id, "API key already revoked");
            return Ok(());
        }

        store_call(
            "api_keys.revoke",
            self.policy.store_timeout,
            self.store.revoke(id, Utc::now()),
        )
        .await?;

        info!(api_key_id = %id, user_id = %requester, key_prefix = %record.key_prefix, "API key revoked");
        Ok(())
    }

    /// 修改描述、scope 与过期时间；已撤销的 Key 不可修改
    pub async fn update_api_key(
        &self,
        id: &ApiKeyId,
        requester: &UserId,
        update: ApiKeyUpdate,
    ) -> AuthResult<ApiKeySummary> {
        let mut record = self.find_managed(id, requester).await?;

        if record.status == ApiKeyStatus::Revoked {
            return Err(AuthError::Revoked);
        }

        let now = Utc::now();
        if let Some(description) = update.description {
            record.description = normalize_description(description)?;
        }
        if let Some(scopes) = update.scopes {
            record.scopes = self.normalize_scopes(&scopes, record.organization_id.is_none())?;
        }
        if let Some(expire_time) = update.expire_time {
            ensure_future(expire_time, now)?;
            record.expire_time = expire_time;
        }

        let details = ApiKeyDetails {
            description: record.description.clone(),
            scopes: record.scopes.clone(),
            expire_time: record.expire_time,
        };
        store_call(
            "api_keys.update_details",
            self.policy.store_timeout,
            self.store.update_details(id, &details, now),
        )
        .await?;

        info!(api_key_id = %id, user_id = %requester, "API key updated");
        record.update_time = now;
        Ok(ApiKeySummary::from_record(record, now))
    }

    /// 查看单个 Key；权限规则同撤销
    pub async fn get_api_key(&self, id: &ApiKeyId, requester: &UserId) -> AuthResult<ApiKeySummary> {
        let record = self.find_managed(id, requester).await?;
        Ok(ApiKeySummary::from_record(record, Utc::now()))
    }

    /// 分页查看 Key 的使用日志，按时间倒序；权限规则同撤销
    pub async fn list_usage(
        &self,
        id: &ApiKeyId,
        requester: &UserId,
        request: UsagePageRequest,
    ) -> AuthResult<UsagePage> {
        if let (Some(from), Some(to)) = (request.from, request.to) {
            if from > to {
                return Err(AuthError::validation("Usage window start is after its end"));
            }
        }
        self.find_managed(id, requester).await?;

        let (limit, offset) = request.limit_and_offset();
        store_call(
            "usage.query",
            self.policy.store_timeout,
            self.usage_log.query(&UsageQuery {
                api_key_id: id.clone(),
                from: request.from,
                to: request.to,
                limit,
                offset,
            }),
        )
        .await
    }

    /// 用户自己创建的 Key
    pub async fn list_owned_keys(&self, owner: &UserId) -> AuthResult<Vec<ApiKeySummary>> {
        let records = store_call(
            "api_keys.list_by_owner",
            self.policy.store_timeout,
            self.store.list_by_owner(owner),
        )
        .await?;

        let now = Utc::now();
        Ok(records
            .into_iter()
            .map(|r| ApiKeySummary::from_record(r, now))
            .collect())
    }

    /// 组织下的全部 Key，仅组织管理员可查看
    pub async fn list_organization_keys(
        &self,
        requester: &UserId,
        tenant: &TenantId,
    ) -> AuthResult<Vec<ApiKeySummary>> {
        if !self.is_org_admin(tenant, requester).await? {
            warn!(user_id = %requester, tenant_id = %tenant, "Organization API key listing denied");
            return Err(AuthError::forbidden("Organization admin required"));
        }

        let records = store_call(
            "api_keys.list_by_organization",
            self.policy.store_timeout,
            self.store.list_by_organization(tenant),
        )
        .await?;

        let now = Utc::now();
        Ok(records
            .into_iter()
            .map(|r| ApiKeySummary::from_record(r, now))
            .collect())
    }

    /// 查找并确认请求者有管理权限：创建者，或组织级 Key 所属组织的管理员
    async fn find_managed(&self, id: &ApiKeyId, requester: &UserId) -> AuthResult<ApiKeyRecord> {
        let record = store_call(
            "api_keys.find_by_uuid",
            self.policy.store_timeout,
            self.store.find_by_uuid(id),
        )
        .await?
        .ok_or(AuthError::NotFound)?;

        if &record.owner_user_id == requester {
            return Ok(record);
        }

        if let Some(tenant) = &record.organization_id {
            if self.is_org_admin(tenant, requester).await? {
                return Ok(record);
            }
        }

        warn!(api_key_id = %id, user_id = %requester, "API key management denied");
        Err(AuthError::forbidden("Not the key owner or an organization admin"))
    }

    async fn is_org_admin(&self, tenant: &TenantId, user: &UserId) -> AuthResult<bool> {
        let role = store_call(
            "memberships.role_of",
            self.policy.store_timeout,
            self.memberships.role_of(tenant, user),
        )
        .await?;
        Ok(role.is_some_and(|r| r == OrgRole::Admin))
    }

    /// 规范化 scope：去空白、去重、格式校验、白名单校验；个人 Key 不能持有 `org:*`
    ///
    /// 结果可能为空，创建时由调用方拒绝，更新时表示清空。
    fn normalize_scopes(&self, raw: &[String], personal: bool) -> AuthResult<BTreeSet<String>> {
        let mut scopes = BTreeSet::new();

        for scope in raw.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
            if !scope
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '_' | '.' | '-'))
            {
                return Err(AuthError::validation(format!("Invalid scope: {}", scope)));
            }
            if !self.policy.allowed_scopes.is_empty() && !self.policy.allowed_scopes.contains(scope) {
                return Err(AuthError::validation(format!("Unknown scope: {}", scope)));
            }
            if personal && scope.starts_with("org:") {
                return Err(AuthError::validation(format!(
                    "Scope {} requires an organization key",
                    scope
                )));
            }
            scopes.insert(scope.to_string());
        }

        Ok(scopes)
    }

    fn generate_prefix(&self) -> String {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(PREFIX_ID_LEN)
            .map(char::from)
            .collect();
        format!("{}_{}", self.policy.brand, id)
    }
}

fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn normalize_description(description: Option<String>) -> AuthResult<Option<String>> {
    let description = description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());

    if description
        .as_ref()
        .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN)
    {
        return Err(AuthError::validation(format!(
            "Description must be at most {} characters",
            MAX_DESCRIPTION_LEN
        )));
    }
    Ok(description)
}

fn ensure_future(expire_time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> AuthResult<()> {
    match expire_time {
        Some(t) if t <= now => Err(AuthError::validation("Expire time must be in the future")),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use horizon_adapter_memory::{
        MemoryApiKeyStore, MemoryMembership, MemoryUsageAuditSink, MemoryUserDirectory,
    };
    use horizon_common::Role;
    use horizon_ports::{UsageEvent, UserAccount};

    struct Fixture {
        authenticator: ApiKeyAuthenticator,
        store: Arc<MemoryApiKeyStore>,
        memberships: Arc<MemoryMembership>,
        usage: Arc<MemoryUsageAuditSink>,
        owner: UserId,
    }

    fn fixture(allowed: &[&str]) -> Fixture {
        let store = Arc::new(MemoryApiKeyStore::new());
        let users = Arc::new(MemoryUserDirectory::new());
        let memberships = Arc::new(MemoryMembership::new());
        let usage = Arc::new(MemoryUsageAuditSink::new());
        let owner = UserId::new();
        users.insert(UserAccount {
            id: owner.clone(),
            username: "alice".to_string(),
            role: Role::User,
        });

        let policy = ApiKeyPolicy {
            brand: "cosv".to_string(),
            allowed_scopes: allowed.iter().map(|s| s.to_string()).collect(),
            store_timeout: Duration::from_millis(200),
        };

        Fixture {
            authenticator: ApiKeyAuthenticator::new(
                store.clone(),
                users,
                memberships.clone(),
                usage.clone(),
                policy,
            ),
            store,
            memberships,
            usage,
            owner,
        }
    }

    fn request(owner: &UserId, scopes: &[&str]) -> CreateApiKeyRequest {
        CreateApiKeyRequest {
            owner: owner.clone(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_presented_key() {
        let key = PresentedKey::parse(" cosv_ab12CD34.deadbeef ").unwrap();
        assert_eq!(key.prefix, "cosv_ab12CD34");
        assert_eq!(key.secret, "deadbeef");

        for raw in ["", "nodot", ".secret", "prefix.", "a.b.c", "pre fix.secret"] {
            assert_eq!(PresentedKey::parse(raw).unwrap_err(), AuthError::Malformed, "{raw}");
        }
    }

    #[test]
    fn test_jwt_is_not_api_key_shaped() {
        assert!(!looks_like_api_key("eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiIxIn0.c2ln"));
        assert!(looks_like_api_key("cosv_ab12CD34.deadbeef"));
    }

    #[test]
    fn test_hash_is_sha256_hex() {
        assert_eq!(
            hash_secret("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_created_key_format_and_storage() {
        let f = fixture(&[]);
        let created = f
            .authenticator
            .create_api_key(request(&f.owner, &["read", "write"]))
            .await
            .unwrap();

        let presented = PresentedKey::parse(&created.plaintext).unwrap();
        assert!(presented.prefix.starts_with("cosv_"));
        assert_eq!(presented.prefix.len(), "cosv_".len() + PREFIX_ID_LEN);
        assert_eq!(presented.secret.len(), SECRET_BYTES * 2);
        assert_eq!(created.key.key_prefix, presented.prefix);
        assert_eq!(created.key.status, ApiKeyStatus::Active);

        // 只存哈希，不存明文
        let stored = f.store.get(&created.key.id).unwrap();
        assert_eq!(stored.key_hash, hash_secret(presented.secret));
        assert!(!stored.key_hash.contains(presented.secret));
    }

    #[tokio::test]
    async fn test_unknown_owner_is_not_found() {
        let f = fixture(&[]);
        let err = f
            .authenticator
            .create_api_key(request(&UserId::new(), &["read"]))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::NotFound);
    }

    #[tokio::test]
    async fn test_scope_validation_at_creation() {
        let f = fixture(&["vuln:read", "vuln:write", "org:read"]);

        let created = f
            .authenticator
            .create_api_key(request(&f.owner, &[" vuln:read ", "vuln:read", ""]))
            .await
            .unwrap();
        assert_eq!(created.key.scopes, BTreeSet::from(["vuln:read".to_string()]));

        for scopes in [vec!["admin"], vec!["vuln read"], vec!["org:read"], vec![]] {
            let err = f
                .authenticator
                .create_api_key(request(&f.owner, &scopes))
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::Validation(_)), "{scopes:?}");
        }

        // 组织级 Key 可以持有 org:* scope
        let org_request = CreateApiKeyRequest {
            organization_id: Some(TenantId::new()),
            ..request(&f.owner, &["org:read"])
        };
        assert!(f.authenticator.create_api_key(org_request).await.is_ok());
    }

    #[tokio::test]
    async fn test_past_expiry_rejected_at_creation() {
        let f = fixture(&[]);
        let req = CreateApiKeyRequest {
            expire_time: Some(Utc::now() - ChronoDuration::minutes(1)),
            ..request(&f.owner, &["read"])
        };
        assert!(matches!(
            f.authenticator.create_api_key(req).await.unwrap_err(),
            AuthError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_validate_resolves_context() {
        let f = fixture(&[]);
        let tenant = TenantId::new();
        let created = f
            .authenticator
            .create_api_key(CreateApiKeyRequest {
                organization_id: Some(tenant.clone()),
                ..request(&f.owner, &["read", "write"])
            })
            .await
            .unwrap();

        let ctx = f.authenticator.validate_api_key(&created.plaintext).await.unwrap();
        assert_eq!(ctx.api_key_id, created.key.id);
        assert_eq!(ctx.owner_user_id, f.owner);
        assert_eq!(ctx.tenant_id, Some(tenant));
        assert!(ApiKeyAuthenticator::has_scope(&ctx, "read"));
        assert!(!ApiKeyAuthenticator::has_scope(&ctx, "admin"));
        assert!(!ApiKeyAuthenticator::has_scope(&ctx, "READ"));
    }

    #[tokio::test]
    async fn test_validate_failures() {
        let f = fixture(&[]);
        let created = f
            .authenticator
            .create_api_key(request(&f.owner, &["read"]))
            .await
            .unwrap();
        let presented = PresentedKey::parse(&created.plaintext).unwrap();

        assert_eq!(
            f.authenticator.validate_api_key("garbage").await.unwrap_err(),
            AuthError::Malformed
        );

        let wrong_secret = format!("{}.{}", presented.prefix, "00".repeat(32));
        assert_eq!(
            f.authenticator.validate_api_key(&wrong_secret).await.unwrap_err(),
            AuthError::NotFound
        );

        // 哈希命中但前缀不一致
        let wrong_prefix = format!("cosv_XXXXXXXX.{}", presented.secret);
        assert_eq!(
            f.authenticator.validate_api_key(&wrong_prefix).await.unwrap_err(),
            AuthError::NotFound
        );
    }

    #[tokio::test]
    async fn test_expired_even_when_status_active() {
        let f = fixture(&[]);
        let created = f
            .authenticator
            .create_api_key(CreateApiKeyRequest {
                expire_time: Some(Utc::now() + ChronoDuration::hours(1)),
                ..request(&f.owner, &["read"])
            })
            .await
            .unwrap();

        f.store.set_expire_time(&created.key.id, Some(Utc::now() - ChronoDuration::seconds(1)));

        assert_eq!(f.store.get(&created.key.id).unwrap().status, ApiKeyStatus::Active);
        assert_eq!(
            f.authenticator.validate_api_key(&created.plaintext).await.unwrap_err(),
            AuthError::Expired
        );
    }

    #[tokio::test]
    async fn test_store_outage_fails_closed() {
        let f = fixture(&[]);
        let created = f
            .authenticator
            .create_api_key(request(&f.owner, &["read"]))
            .await
            .unwrap();

        f.store.set_unavailable(true);
        assert!(
            f.authenticator
                .validate_api_key(&created.plaintext)
                .await
                .unwrap_err()
                .is_store_unavailable()
        );
    }

    #[tokio::test]
    async fn test_update_last_used_swallows_failures() {
        let f = fixture(&[]);
        let created = f
            .authenticator
            .create_api_key(request(&f.owner, &["read"]))
            .await
            .unwrap();

        f.authenticator
            .update_last_used(&created.key.id, Some("203.0.113.7"))
            .await;
        let stored = f.store.get(&created.key.id).unwrap();
        assert_eq!(stored.last_used_ip.as_deref(), Some("203.0.113.7"));
        assert!(stored.last_used_time.is_some());

        f.store.set_unavailable(true);
        f.authenticator.update_last_used(&created.key.id, None).await;
    }

    #[tokio::test]
    async fn test_revoke_authority() {
        let f = fixture(&[]);
        let tenant = TenantId::new();
        let created = f
            .authenticator
            .create_api_key(CreateApiKeyRequest {
                organization_id: Some(tenant.clone()),
                ..request(&f.owner, &["read"])
            })
            .await
            .unwrap();

        let stranger = UserId::new();
        let contributor = UserId::new();
        let admin = UserId::new();
        f.memberships.set_role(&tenant, &contributor, OrgRole::Contributor);
        f.memberships.set_role(&tenant, &admin, OrgRole::Admin);

        for user in [&stranger, &contributor] {
            assert!(matches!(
                f.authenticator.revoke_api_key(&created.key.id, user).await.unwrap_err(),
                AuthError::Forbidden(_)
            ));
        }

        f.authenticator.revoke_api_key(&created.key.id, &admin).await.unwrap();
        assert_eq!(f.store.get(&created.key.id).unwrap().status, ApiKeyStatus::Revoked);

        // 重复撤销视为成功
        f.authenticator.revoke_api_key(&created.key.id, &f.owner).await.unwrap();

        assert_eq!(
            f.authenticator
                .revoke_api_key(&ApiKeyId::new(), &f.owner)
                .await
                .unwrap_err(),
            AuthError::NotFound
        );
    }

    #[tokio::test]
    async fn test_personal_key_only_revocable_by_owner() {
        let f = fixture(&[]);
        let created = f
            .authenticator
            .create_api_key(request(&f.owner, &["read"]))
            .await
            .unwrap();

        let other = UserId::new();
        assert!(f.authenticator.revoke_api_key(&created.key.id, &other).await.is_err());
        assert!(f.authenticator.get_api_key(&created.key.id, &other).await.is_err());
        assert!(f.authenticator.get_api_key(&created.key.id, &f.owner).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_api_key() {
        let f = fixture(&[]);
        let created = f
            .authenticator
            .create_api_key(CreateApiKeyRequest {
                description: Some("ci".to_string()),
                expire_time: Some(Utc::now() + ChronoDuration::days(1)),
                ..request(&f.owner, &["read"])
            })
            .await
            .unwrap();

        let updated = f
            .authenticator
            .update_api_key(
                &created.key.id,
                &f.owner,
                ApiKeyUpdate {
                    scopes: Some(vec!["read".to_string(), "write".to_string()]),
                    expire_time: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.description.as_deref(), Some("ci"));
        assert_eq!(updated.scopes.len(), 2);
        assert!(updated.expire_time.is_none());
        assert_eq!(f.store.get(&created.key.id).unwrap().scopes.len(), 2);

        let past = ApiKeyUpdate {
            expire_time: Some(Some(Utc::now() - ChronoDuration::hours(1))),
            ..Default::default()
        };
        assert!(matches!(
            f.authenticator
                .update_api_key(&created.key.id, &f.owner, past)
                .await
                .unwrap_err(),
            AuthError::Validation(_)
        ));

        // 显式传入空列表表示清空 scope
        let cleared = f
            .authenticator
            .update_api_key(
                &created.key.id,
                &f.owner,
                ApiKeyUpdate {
                    scopes: Some(vec![" ".to_string()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(cleared.scopes.is_empty());
        assert!(f.store.get(&created.key.id).unwrap().scopes.is_empty());

        f.authenticator.revoke_api_key(&created.key.id, &f.owner).await.unwrap();
        assert_eq!(
            f.authenticator
                .update_api_key(&created.key.id, &f.owner, ApiKeyUpdate::default())
                .await
                .unwrap_err(),
            AuthError::Revoked
        );
    }

    #[tokio::test]
    async fn test_listings() {
        let f = fixture(&[]);
        let tenant = TenantId::new();
        f.authenticator
            .create_api_key(request(&f.owner, &["read"]))
            .await
            .unwrap();
        f.authenticator
            .create_api_key(CreateApiKeyRequest {
                organization_id: Some(tenant.clone()),
                ..request(&f.owner, &["read"])
            })
            .await
            .unwrap();

        assert_eq!(f.authenticator.list_owned_keys(&f.owner).await.unwrap().len(), 2);

        assert!(matches!(
            f.authenticator
                .list_organization_keys(&f.owner, &tenant)
                .await
                .unwrap_err(),
            AuthError::Forbidden(_)
        ));

        f.memberships.set_role(&tenant, &f.owner, OrgRole::Admin);
        let keys = f
            .authenticator
            .list_organization_keys(&f.owner, &tenant)
            .await
            .unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].organization_id, Some(tenant));
    }

    fn usage_event(id: &ApiKeyId, minutes_ago: i64) -> UsageEvent {
        UsageEvent {
            api_key_id: id.clone(),
            timestamp: Utc::now() - ChronoDuration::minutes(minutes_ago),
            ip: Some("203.0.113.7".to_string()),
            method: "GET".to_string(),
            path: "/api/v1/vulns".to_string(),
            status_code: 200,
            user_agent: None,
        }
    }

    #[test]
    fn test_usage_page_bounds() {
        let page = |page, size| UsagePageRequest {
            page,
            size,
            ..Default::default()
        };

        assert_eq!(page(None, None).limit_and_offset(), (20, 0));
        assert_eq!(page(Some(0), Some(0)).limit_and_offset(), (20, 0));
        assert_eq!(page(Some(3), Some(10)).limit_and_offset(), (10, 20));
        assert_eq!(page(Some(2), Some(500)).limit_and_offset(), (100, 100));
        assert_eq!(page(Some(1), Some(1)).limit_and_offset(), (1, 0));
    }

    #[tokio::test]
    async fn test_list_usage() {
        let f = fixture(&[]);
        let tenant = TenantId::new();
        let created = f
            .authenticator
            .create_api_key(CreateApiKeyRequest {
                organization_id: Some(tenant.clone()),
                ..request(&f.owner, &["read"])
            })
            .await
            .unwrap();
        for minutes_ago in 0..25 {
            f.usage.record(usage_event(&created.key.id, minutes_ago)).await.unwrap();
        }

        let first = f
            .authenticator
            .list_usage(&created.key.id, &f.owner, UsagePageRequest::default())
            .await
            .unwrap();
        assert_eq!(first.total, 25);
        assert_eq!(first.items.len(), 20);
        assert!(first.items[0].timestamp > first.items[19].timestamp);

        let second = f
            .authenticator
            .list_usage(
                &created.key.id,
                &f.owner,
                UsagePageRequest {
                    page: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(second.items.len(), 5);

        let window = f
            .authenticator
            .list_usage(
                &created.key.id,
                &f.owner,
                UsagePageRequest {
                    from: Some(Utc::now() - ChronoDuration::seconds(270)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(window.total, 5);

        let inverted = UsagePageRequest {
            from: Some(Utc::now()),
            to: Some(Utc::now() - ChronoDuration::hours(1)),
            ..Default::default()
        };
        assert!(matches!(
            f.authenticator
                .list_usage(&created.key.id, &f.owner, inverted)
                .await
                .unwrap_err(),
            AuthError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_list_usage_authority() {
        let f = fixture(&[]);
        let tenant = TenantId::new();
        let created = f
            .authenticator
            .create_api_key(CreateApiKeyRequest {
                organization_id: Some(tenant.clone()),
                ..request(&f.owner, &["read"])
            })
            .await
            .unwrap();

        let member = UserId::new();
        let admin = UserId::new();
        f.memberships.set_role(&tenant, &member, OrgRole::Member);
        f.memberships.set_role(&tenant, &admin, OrgRole::Admin);

        assert!(matches!(
            f.authenticator
                .list_usage(&created.key.id, &member, UsagePageRequest::default())
                .await
                .unwrap_err(),
            AuthError::Forbidden(_)
        ));
        assert!(
            f.authenticator
                .list_usage(&created.key.id, &admin, UsagePageRequest::default())
                .await
                .is_ok()
        );
        assert_eq!(
            f.authenticator
                .list_usage(&ApiKeyId::new(), &f.owner, UsagePageRequest::default())
                .await
                .unwrap_err(),
            AuthError::NotFound
        );

        f.usage.set_unavailable(true);
        assert!(
            f.authenticator
                .list_usage(&created.key.id, &f.owner, UsagePageRequest::default())
                .await
                .unwrap_err()
                .is_store_unavailable()
        );
    }
}
