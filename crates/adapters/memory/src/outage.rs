//! 故障注入

use horizon_errors::{AppError, AppResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// 故障开关
#[derive(Debug, Default)]
pub struct Outage {
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
}

impl Outage {
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// 每次调用前执行：先注入延迟，再检查是否不可用
    pub async fn check(&self, operation: &str) -> AppResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::external_service(format!(
                "{}: store unavailable",
                operation
            )));
        }
        Ok(())
    }
}
