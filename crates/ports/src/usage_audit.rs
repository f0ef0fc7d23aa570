//! API Key 使用审计

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use horizon_common::ApiKeyId;
use horizon_errors::AppResult;
use serde::Serialize;

/// 一次 API Key 认证请求的使用记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    pub api_key_id: ApiKeyId,
    pub timestamp: DateTime<Utc>,
    pub ip: Option<String>,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub user_agent: Option<String>,
}

/// 使用日志查询条件；时间窗口两端都包含
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageQuery {
    pub api_key_id: ApiKeyId,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: u32,
    pub offset: u64,
}

/// 一页使用日志，按时间倒序；`total` 为窗口内的总条数
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsagePage {
    pub items: Vec<UsageEvent>,
    pub total: u64,
}

/// 使用审计 sink
///
/// 请求路径上的 `record` 由调用方异步派发，不等待也不关心结果；
/// `query` 供 Key 管理界面读取历史。
#[async_trait]
pub trait UsageAuditSink: Send + Sync {
    async fn record(&self, event: UsageEvent) -> AppResult<()>;

    async fn query(&self, query: &UsageQuery) -> AppResult<UsagePage>;
}
