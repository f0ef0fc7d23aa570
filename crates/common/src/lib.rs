//! horizon-common - 通用类型
//!
//! 标识符与角色枚举，供所有 crate 共享

pub mod roles;
pub mod types;

pub use roles::*;
pub use types::*;
