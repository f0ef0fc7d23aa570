//! 内存版使用审计

use async_trait::async_trait;
use horizon_errors::AppResult;
use horizon_ports::{UsageAuditSink, UsageEvent, UsagePage, UsageQuery};
use std::sync::Mutex;
use std::time::Duration;

use crate::outage::Outage;

#[derive(Debug, Default)]
pub struct MemoryUsageAuditSink {
    events: Mutex<Vec<UsageEvent>>,
    outage: Outage,
}

impl MemoryUsageAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<UsageEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.outage.set_unavailable(unavailable);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.outage.set_latency(latency);
    }
}

#[async_trait]
impl UsageAuditSink for MemoryUsageAuditSink {
    async fn record(&self, event: UsageEvent) -> AppResult<()> {
        self.outage.check("usage.record").await?;
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
        Ok(())
    }

    async fn query(&self, query: &UsageQuery) -> AppResult<UsagePage> {
        self.outage.check("usage.query").await?;

        let mut matching: Vec<UsageEvent> = self
            .events()
            .into_iter()
            .filter(|e| e.api_key_id == query.api_key_id)
            .filter(|e| query.from.is_none_or(|from| e.timestamp >= from))
            .filter(|e| query.to.is_none_or(|to| e.timestamp <= to))
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(usize::try_from(query.offset).unwrap_or(usize::MAX))
            .take(query.limit as usize)
            .collect();
        Ok(UsagePage { items, total })
    }
}
