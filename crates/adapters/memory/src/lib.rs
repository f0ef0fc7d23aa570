//! horizon-adapter-memory - 进程内端口实现
//!
//! 用于测试与本地开发。每个实现都带有故障开关（不可用 / 延迟），
//! 用来验证认证核心在存储异常时拒绝认证。

mod api_key_store;
mod directory;
mod outage;
mod revocation;
mod usage_audit;

pub use api_key_store::MemoryApiKeyStore;
pub use directory::{MemoryMembership, MemoryUserDirectory};
pub use outage::Outage;
pub use revocation::MemoryRevocationStore;
pub use usage_audit::MemoryUsageAuditSink;
