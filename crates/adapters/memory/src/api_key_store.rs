//! 内存版 API Key 存储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use horizon_common::{ApiKeyId, TenantId, UserId};
use horizon_errors::{AppError, AppResult};
use horizon_ports::{ApiKeyDetails, ApiKeyRecord, ApiKeyStatus, ApiKeyStore, NewApiKey};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::outage::Outage;

#[derive(Debug, Default)]
pub struct MemoryApiKeyStore {
    keys: Mutex<HashMap<ApiKeyId, ApiKeyRecord>>,
    next_id: AtomicI64,
    outage: Outage,
}

impl MemoryApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ApiKeyId) -> Option<ApiKeyRecord> {
        let keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        keys.get(id).cloned()
    }

    /// 直接改写过期时间（不改状态），模拟时间流逝
    pub fn set_expire_time(&self, id: &ApiKeyId, expire_time: Option<DateTime<Utc>>) {
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = keys.get_mut(id) {
            record.expire_time = expire_time;
        }
    }

    pub fn len(&self) -> usize {
        self.keys.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.outage.set_unavailable(unavailable);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.outage.set_latency(latency);
    }

    fn sorted(mut records: Vec<ApiKeyRecord>) -> Vec<ApiKeyRecord> {
        records.sort_by(|a, b| b.create_time.cmp(&a.create_time).then(b.id.cmp(&a.id)));
        records
    }
}

#[async_trait]
impl ApiKeyStore for MemoryApiKeyStore {
    async fn insert(&self, key: NewApiKey) -> AppResult<ApiKeyRecord> {
        self.outage.check("api_keys.insert").await?;

        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        if keys.values().any(|r| r.key_hash == key.key_hash) {
            return Err(AppError::conflict("Duplicate API key hash"));
        }

        let record = ApiKeyRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            uuid: key.uuid,
            key_prefix: key.key_prefix,
            key_hash: key.key_hash,
            owner_user_id: key.owner_user_id,
            organization_id: key.organization_id,
            description: key.description,
            scopes: key.scopes,
            status: ApiKeyStatus::Active,
            expire_time: key.expire_time,
            last_used_time: None,
            last_used_ip: None,
            create_time: key.create_time,
            update_time: key.create_time,
        };
        keys.insert(record.uuid.clone(), record.clone());
        Ok(record)
    }

    async fn find_by_hash(&self, key_hash: &str) -> AppResult<Option<ApiKeyRecord>> {
        self.outage.check("api_keys.find_by_hash").await?;
        let keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        Ok(keys.values().find(|r| r.key_hash == key_hash).cloned())
    }

    async fn find_by_uuid(&self, id: &ApiKeyId) -> AppResult<Option<ApiKeyRecord>> {
        self.outage.check("api_keys.find_by_uuid").await?;
        Ok(self.get(id))
    }

    async fn list_by_owner(&self, owner: &UserId) -> AppResult<Vec<ApiKeyRecord>> {
        self.outage.check("api_keys.list_by_owner").await?;
        let keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        Ok(Self::sorted(
            keys.values()
                .filter(|r| &r.owner_user_id == owner)
                .cloned()
                .collect(),
        ))
    }

    async fn list_by_organization(&self, tenant: &TenantId) -> AppResult<Vec<ApiKeyRecord>> {
        self.outage.check("api_keys.list_by_organization").await?;
        let keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        Ok(Self::sorted(
            keys.values()
                .filter(|r| r.organization_id.as_ref() == Some(tenant))
                .cloned()
                .collect(),
        ))
    }

    async fn revoke(&self, id: &ApiKeyId, at: DateTime<Utc>) -> AppResult<()> {
        self.outage.check("api_keys.revoke").await?;
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = keys.get_mut(id) {
            if record.status != ApiKeyStatus::Revoked {
                record.status = ApiKeyStatus::Revoked;
                record.update_time = at;
            }
        }
        Ok(())
    }

    async fn update_details(
        &self,
        id: &ApiKeyId,
        details: &ApiKeyDetails,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        self.outage.check("api_keys.update_details").await?;
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        let record = keys
            .get_mut(id)
            .ok_or_else(|| AppError::not_found(format!("API key {}", id)))?;
        record.description = details.description.clone();
        record.scopes = details.scopes.clone();
        record.expire_time = details.expire_time;
        record.update_time = at;
        Ok(())
    }

    async fn touch_last_used(
        &self,
        id: &ApiKeyId,
        ip: Option<&str>,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        self.outage.check("api_keys.touch_last_used").await?;
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = keys.get_mut(id) {
            record.last_used_time = Some(at);
            record.last_used_ip = ip.map(str::to_string);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn new_key(hash: &str, owner: &UserId) -> NewApiKey {
        NewApiKey {
            uuid: ApiKeyId::new(),
            key_prefix: "cosv_ab12CD34".to_string(),
            key_hash: hash.to_string(),
            owner_user_id: owner.clone(),
            organization_id: None,
            description: None,
            scopes: BTreeSet::from(["vuln:read".to_string()]),
            expire_time: None,
            create_time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_hash_uniqueness() {
        let store = MemoryApiKeyStore::new();
        let owner = UserId::new();

        let first = store.insert(new_key("h1", &owner)).await.unwrap();
        assert_eq!(first.id, 1);
        assert!(matches!(
            store.insert(new_key("h1", &owner)).await,
            Err(AppError::Conflict(_))
        ));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_revoke_is_terminal() {
        let store = MemoryApiKeyStore::new();
        let record = store.insert(new_key("h1", &UserId::new())).await.unwrap();

        store.revoke(&record.uuid, Utc::now()).await.unwrap();
        let revoked = store.get(&record.uuid).unwrap();
        assert_eq!(revoked.status, ApiKeyStatus::Revoked);

        store.revoke(&record.uuid, Utc::now()).await.unwrap();
        assert_eq!(store.get(&record.uuid).unwrap().update_time, revoked.update_time);
    }
}
