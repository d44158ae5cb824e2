use anyhow::{anyhow, Result};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::FunnelConfig;
use crate::TARGET_LINKING;

/// Concurrency and timeout settings for a bulk store operation
#[derive(Clone, Copy, Debug)]
pub struct BatchOptions {
    pub concurrency: usize,
    pub timeout: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions {
            concurrency: 4,
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl From<&FunnelConfig> for BatchOptions {
    fn from(config: &FunnelConfig) -> Self {
        BatchOptions {
            concurrency: config.batch_concurrency,
            timeout: config.store_timeout,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BatchFailure {
    pub item_id: String,
    pub error: String,
}

/// Per-item outcome of a bulk operation, in input order
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn applied(&self) -> usize {
        self.succeeded.len()
    }

    pub fn errors(&self) -> usize {
        self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs `op` over every item with at most `options.concurrency` in flight.
///
/// A failing or timed-out item is recorded and the rest of the batch carries on.
pub async fn run_batch<T, K, F, Fut>(
    label: &str,
    items: Vec<T>,
    options: BatchOptions,
    key: K,
    op: F,
) -> BatchReport
where
    K: Fn(&T) -> String,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let total = items.len();
    let concurrency = options.concurrency.max(1);
    debug!(
        target: TARGET_LINKING,
        "{}: running {} item(s) with concurrency {}", label, total, concurrency
    );

    let mut outcomes: Vec<(usize, String, Result<()>)> =
        stream::iter(items.into_iter().enumerate().map(|(index, item)| {
            let item_id = key(&item);
            let fut = op(item);
            async move {
                let result = match options.timeout {
                    Some(limit) => match tokio::time::timeout(limit, fut).await {
                        Ok(result) => result,
                        Err(_) => Err(anyhow!("timed out after {:?}", limit)),
                    },
                    None => fut.await,
                };
                (index, item_id, result)
            }
        }))
        .buffer_unordered(concurrency)
        .collect()
        .await;

    outcomes.sort_by_key(|(index, _, _)| *index);

    let mut report = BatchReport::default();
    for (_, item_id, result) in outcomes {
        match result {
            Ok(()) => report.succeeded.push(item_id),
            Err(e) => {
                warn!(target: TARGET_LINKING, "{}: item {} failed: {:#}", label, item_id, e);
                report.failed.push(BatchFailure {
                    item_id,
                    error: format!("{:#}", e),
                });
            }
        }
    }

    info!(
        target: TARGET_LINKING,
        "{}: {} of {} succeeded, {} failed",
        label,
        report.applied(),
        total,
        report.errors()
    );

    report
}
