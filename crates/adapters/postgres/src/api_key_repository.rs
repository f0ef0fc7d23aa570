//! PostgreSQL API Key 存储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use horizon_common::{ApiKeyId, TenantId, UserId};
use horizon_errors::{AppError, AppResult};
use horizon_ports::{ApiKeyDetails, ApiKeyRecord, ApiKeyStatus, ApiKeyStore, NewApiKey};
use sqlx::PgPool;
use uuid::Uuid;

use crate::usage_log_repository::{IP_MAX_CHARS, truncate_chars};

const SELECT_COLUMNS: &str = r#"
    id, uuid, key_prefix, key_hash, owner_user_id, organization_id, description,
    scopes, status, expire_time, last_used_time, last_used_ip, create_time, update_time
"#;

#[derive(Debug, sqlx::FromRow)]
struct ApiKeyRow {
    id: i64,
    uuid: Uuid,
    key_prefix: String,
    key_hash: String,
    owner_user_id: Uuid,
    organization_id: Option<Uuid>,
    description: Option<String>,
    scopes: Vec<String>,
    status: String,
    expire_time: Option<DateTime<Utc>>,
    last_used_time: Option<DateTime<Utc>>,
    last_used_ip: Option<String>,
    create_time: DateTime<Utc>,
    update_time: DateTime<Utc>,
}

impl TryFrom<ApiKeyRow> for ApiKeyRecord {
    type Error = AppError;

    fn try_from(row: ApiKeyRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<ApiKeyStatus>()
            .map_err(|e| AppError::database(format!("Corrupt api_keys row {}: {}", row.id, e)))?;

        Ok(ApiKeyRecord {
            id: row.id,
            uuid: ApiKeyId::from_uuid(row.uuid),
            key_prefix: row.key_prefix,
            key_hash: row.key_hash,
            owner_user_id: UserId::from_uuid(row.owner_user_id),
            organization_id: row.organization_id.map(TenantId::from_uuid),
            description: row.description,
            scopes: row.scopes.into_iter().collect(),
            status,
            expire_time: row.expire_time,
            last_used_time: row.last_used_time,
            last_used_ip: row.last_used_ip,
            create_time: row.create_time,
            update_time: row.update_time,
        })
    }
}

fn map_insert_error(e: sqlx::Error) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::conflict("API key already exists")
        }
        _ => AppError::database(format!("Failed to insert API key: {}", e)),
    }
}

/// 基于 `api_keys` 表的 API Key 存储
#[derive(Clone)]
pub struct PostgresApiKeyStore {
    pool: PgPool,
}

impl PostgresApiKeyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_list(&self, sql: &str, id: Uuid, what: &str) -> AppResult<Vec<ApiKeyRecord>> {
        sqlx::query_as::<_, ApiKeyRow>(sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to list API keys by {}: {}", what, e)))?
            .into_iter()
            .map(ApiKeyRecord::try_from)
            .collect()
    }
}

#[async_trait]
impl ApiKeyStore for PostgresApiKeyStore {
    async fn insert(&self, key: NewApiKey) -> AppResult<ApiKeyRecord> {
        let sql = format!(
            r#"
            INSERT INTO api_keys (
                uuid, key_prefix, key_hash, owner_user_id, organization_id, description,
                scopes, status, expire_time, create_time, update_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            RETURNING {}
            "#,
            SELECT_COLUMNS
        );

        let scopes: Vec<String> = key.scopes.into_iter().collect();
        let row = sqlx::query_as::<_, ApiKeyRow>(&sql)
            .bind(key.uuid.0)
            .bind(&key.key_prefix)
            .bind(&key.key_hash)
            .bind(key.owner_user_id.0)
            .bind(key.organization_id.map(|t| t.0))
            .bind(&key.description)
            .bind(&scopes)
            .bind(ApiKeyStatus::Active.as_str())
            .bind(key.expire_time)
            .bind(key.create_time)
            .fetch_one(&self.pool)
            .await
            .map_err(map_insert_error)?;

        row.try_into()
    }

    async fn find_by_hash(&self, key_hash: &str) -> AppResult<Option<ApiKeyRecord>> {
        let sql = format!("SELECT {} FROM api_keys WHERE key_hash = $1", SELECT_COLUMNS);
        sqlx::query_as::<_, ApiKeyRow>(&sql)
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to find API key: {}", e)))?
            .map(ApiKeyRecord::try_from)
            .transpose()
    }

    async fn find_by_uuid(&self, id: &ApiKeyId) -> AppResult<Option<ApiKeyRecord>> {
        let sql = format!("SELECT {} FROM api_keys WHERE uuid = $1", SELECT_COLUMNS);
        sqlx::query_as::<_, ApiKeyRow>(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to find API key: {}", e)))?
            .map(ApiKeyRecord::try_from)
            .transpose()
    }

    async fn list_by_owner(&self, owner: &UserId) -> AppResult<Vec<ApiKeyRecord>> {
        let sql = format!(
            "SELECT {} FROM api_keys WHERE owner_user_id = $1 ORDER BY create_time DESC",
            SELECT_COLUMNS
        );
        self.fetch_list(&sql, owner.0, "owner").await
    }

    async fn list_by_organization(&self, tenant: &TenantId) -> AppResult<Vec<ApiKeyRecord>> {
        let sql = format!(
            "SELECT {} FROM api_keys WHERE organization_id = $1 ORDER BY create_time DESC",
            SELECT_COLUMNS
        );
        self.fetch_list(&sql, tenant.0, "organization").await
    }

    async fn revoke(&self, id: &ApiKeyId, at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE api_keys SET status = $2, update_time = $3
            WHERE uuid = $1 AND status <> $2
            "#,
        )
        .bind(id.0)
        .bind(ApiKeyStatus::Revoked.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to revoke API key: {}", e)))?;
        Ok(())
    }

    async fn update_details(
        &self,
        id: &ApiKeyId,
        details: &ApiKeyDetails,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        let scopes: Vec<String> = details.scopes.iter().cloned().collect();
        let result = sqlx::query(
            r#"
            UPDATE api_keys
            SET description = $2, scopes = $3, expire_time = $4, update_time = $5
            WHERE uuid = $1
            "#,
        )
        .bind(id.0)
        .bind(&details.description)
        .bind(&scopes)
        .bind(details.expire_time)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to update API key: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("API key {} not found", id)));
        }
        Ok(())
    }

    async fn touch_last_used(
        &self,
        id: &ApiKeyId,
        ip: Option<&str>,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query("UPDATE api_keys SET last_used_time = $2, last_used_ip = $3 WHERE uuid = $1")
            .bind(id.0)
            .bind(at)
            .bind(ip.map(|ip| truncate_chars(ip, IP_MAX_CHARS)))
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to record API key usage: {}", e)))?;
        Ok(())
    }
}
