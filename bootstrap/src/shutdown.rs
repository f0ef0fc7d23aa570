//! Graceful Shutdown

use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::runtime::shutdown_signal;

/// Shutdown 控制器
///
/// 触发后所有等待者（包括之后才开始等待的）都会立即返回。
#[derive(Clone)]
pub struct ShutdownController {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// 触发关闭
    pub fn shutdown(&self) {
        if !self.tx.send_replace(true) {
            info!("Triggering shutdown");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    /// 等待关闭
    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            // 发送端随控制器存活，`wait_for` 只会在触发后返回
            let _ = rx.wait_for(|stopped| *stopped).await;
        }
    }

    /// 收到系统信号时触发关闭
    pub fn listen_for_os_signals(&self) {
        let controller = self.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            controller.shutdown();
        });
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_after_shutdown() {
        let controller = ShutdownController::new();
        let waiter = tokio::spawn(controller.wait());

        assert!(!controller.is_shutdown());
        controller.shutdown();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(controller.is_shutdown());
    }

    #[tokio::test]
    async fn test_late_waiter_sees_earlier_shutdown() {
        let controller = ShutdownController::new();
        controller.shutdown();
        controller.shutdown();

        tokio::time::timeout(Duration::from_secs(1), controller.clone().wait())
            .await
            .unwrap();
    }
}
