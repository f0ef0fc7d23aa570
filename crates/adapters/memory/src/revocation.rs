//! 内存版令牌版本计数器

use async_trait::async_trait;
use horizon_common::UserId;
use horizon_errors::AppResult;
use horizon_ports::RevocationStore;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::outage::Outage;

#[derive(Debug, Default)]
pub struct MemoryRevocationStore {
    versions: Mutex<HashMap<UserId, (i64, Instant)>>,
    cutoffs: Mutex<HashMap<UserId, (i64, Instant)>>,
    outage: Outage,
}

impl MemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 未过期的当前版本
    pub fn version_of(&self, subject: &UserId) -> Option<i64> {
        let versions = self.versions.lock().unwrap_or_else(|e| e.into_inner());
        versions
            .get(subject)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(version, _)| *version)
    }

    /// 未过期的会话截止时间
    pub fn cutoff_of(&self, subject: &UserId) -> Option<i64> {
        let cutoffs = self.cutoffs.lock().unwrap_or_else(|e| e.into_inner());
        cutoffs
            .get(subject)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(at, _)| *at)
    }

    /// 模拟计数器被 TTL 清理
    pub fn forget(&self, subject: &UserId) {
        let mut versions = self.versions.lock().unwrap_or_else(|e| e.into_inner());
        versions.remove(subject);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.outage.set_unavailable(unavailable);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.outage.set_latency(latency);
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn get_or_init(&self, subject: &UserId, ttl: Duration) -> AppResult<i64> {
        self.outage.check("revocation.get_or_init").await?;

        let now = Instant::now();
        let mut versions = self.versions.lock().unwrap_or_else(|e| e.into_inner());
        let entry = versions.entry(subject.clone()).or_insert((1, now + ttl));
        if entry.1 <= now {
            entry.0 = 1;
        }
        entry.1 = now + ttl;
        Ok(entry.0)
    }

    async fn current(&self, subject: &UserId) -> AppResult<Option<i64>> {
        self.outage.check("revocation.current").await?;
        Ok(self.version_of(subject))
    }

    async fn increment(&self, subject: &UserId, ttl: Duration) -> AppResult<i64> {
        self.outage.check("revocation.increment").await?;

        let now = Instant::now();
        let mut versions = self.versions.lock().unwrap_or_else(|e| e.into_inner());
        let entry = versions.entry(subject.clone()).or_insert((1, now + ttl));
        if entry.1 <= now {
            entry.0 = 1;
        }
        entry.0 += 1;
        entry.1 = now + ttl;
        Ok(entry.0)
    }

    async fn set_invalid_after(&self, subject: &UserId, at: i64, ttl: Duration) -> AppResult<()> {
        self.outage.check("revocation.set_invalid_after").await?;

        let mut cutoffs = self.cutoffs.lock().unwrap_or_else(|e| e.into_inner());
        cutoffs.insert(subject.clone(), (at, Instant::now() + ttl));
        Ok(())
    }

    async fn invalid_after(&self, subject: &UserId) -> AppResult<Option<i64>> {
        self.outage.check("revocation.invalid_after").await?;
        Ok(self.cutoff_of(subject))
    }
}
