//! PostgreSQL API Key 使用日志

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use horizon_common::ApiKeyId;
use horizon_errors::{AppError, AppResult};
use horizon_ports::{UsageAuditSink, UsageEvent, UsagePage, UsageQuery};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

// 与 0002_create_api_key_usage_logs.sql 的列宽一致
pub(crate) const IP_MAX_CHARS: usize = 64;
const METHOD_MAX_CHARS: usize = 16;
const PATH_MAX_CHARS: usize = 2048;
const USER_AGENT_MAX_CHARS: usize = 512;

/// 按字符数截断，VARCHAR(n) 的 n 是字符数
pub(crate) fn truncate_chars(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((end, _)) => &value[..end],
        None => value,
    }
}

#[derive(Debug, FromRow)]
struct UsageLogRow {
    api_key_uuid: Uuid,
    request_time: DateTime<Utc>,
    ip_address: Option<String>,
    http_method: String,
    request_path: String,
    status_code: i16,
    user_agent: Option<String>,
}

impl From<UsageLogRow> for UsageEvent {
    fn from(row: UsageLogRow) -> Self {
        Self {
            api_key_id: ApiKeyId::from_uuid(row.api_key_uuid),
            timestamp: row.request_time,
            ip: row.ip_address,
            method: row.http_method,
            path: row.request_path,
            status_code: u16::try_from(row.status_code).unwrap_or_default(),
            user_agent: row.user_agent,
        }
    }
}

/// 读写 `api_key_usage_logs` 的审计 sink
#[derive(Clone)]
pub struct PostgresUsageAuditSink {
    pool: PgPool,
}

impl PostgresUsageAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageAuditSink for PostgresUsageAuditSink {
    async fn record(&self, event: UsageEvent) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO api_key_usage_logs (
                api_key_uuid, request_time, ip_address, http_method,
                request_path, status_code, user_agent
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.api_key_id.0)
        .bind(event.timestamp)
        .bind(event.ip.as_deref().map(|ip| truncate_chars(ip, IP_MAX_CHARS)))
        .bind(truncate_chars(&event.method, METHOD_MAX_CHARS))
        .bind(truncate_chars(&event.path, PATH_MAX_CHARS))
        .bind(i16::try_from(event.status_code).unwrap_or(i16::MAX))
        .bind(
            event
                .user_agent
                .as_deref()
                .map(|ua| truncate_chars(ua, USER_AGENT_MAX_CHARS)),
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to record API key usage: {}", e)))?;
        Ok(())
    }

    async fn query(&self, query: &UsageQuery) -> AppResult<UsagePage> {
        let offset = i64::try_from(query.offset)
            .map_err(|_| AppError::validation("Usage page offset is out of range"))?;

        let rows = sqlx::query_as::<_, UsageLogRow>(
            r#"
            SELECT api_key_uuid, request_time, ip_address, http_method,
                   request_path, status_code, user_agent
            FROM api_key_usage_logs
            WHERE api_key_uuid = $1
              AND ($2::timestamptz IS NULL OR request_time >= $2)
              AND ($3::timestamptz IS NULL OR request_time <= $3)
            ORDER BY request_time DESC, id DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(query.api_key_id.0)
        .bind(query.from)
        .bind(query.to)
        .bind(i64::from(query.limit))
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to query API key usage: {}", e)))?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM api_key_usage_logs
            WHERE api_key_uuid = $1
              AND ($2::timestamptz IS NULL OR request_time >= $2)
              AND ($3::timestamptz IS NULL OR request_time <= $3)
            "#,
        )
        .bind(query.api_key_id.0)
        .bind(query.from)
        .bind(query.to)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to count API key usage: {}", e)))?;

        Ok(UsagePage {
            items: rows.into_iter().map(UsageEvent::from).collect(),
            total: u64::try_from(total).unwrap_or_default(),
        })
    }
}
