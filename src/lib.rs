pub mod batch;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod environment;
pub mod funnel;
pub mod linking;
pub mod logging;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use config::FunnelConfig;
pub use funnel::{Article, Cluster, FunnelError, FunnelStage};
pub use store::ArticleStore;

pub const TARGET_DB: &str = "db_query";
pub const TARGET_LINKING: &str = "funnel_linking";
