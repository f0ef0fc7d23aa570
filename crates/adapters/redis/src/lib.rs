//! horizon-adapter-redis - Redis 适配器

mod connection;
mod revocation;

pub use connection::*;
pub use revocation::*;
