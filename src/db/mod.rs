// SQLite-backed article and cluster storage
mod article;
mod cluster;
pub mod core;
mod schema;
mod store;

pub use self::core::Database;
pub use self::core::DbLockErrorExt;
