//! horizon-ports - 外部协作方抽象层
//!
//! 认证核心只依赖这里的 trait；Redis / PostgreSQL / 内存实现位于 adapters 下。

mod api_key_store;
mod directory;
mod revocation;
mod usage_audit;

pub use api_key_store::*;
pub use directory::*;
pub use revocation::*;
pub use usage_audit::*;
