//! horizon-adapter-postgres - PostgreSQL 适配器
//!
//! `api_keys` 与 `api_key_usage_logs` 由本 crate 的迁移创建；
//! `users` 与 `user_organization_links` 归用户/组织子系统所有，这里只读。

mod api_key_repository;
mod connection;
mod directory_repository;
mod migration;
mod usage_log_repository;

pub use api_key_repository::*;
pub use connection::*;
pub use directory_repository::*;
pub use migration::*;
pub use usage_log_repository::*;
