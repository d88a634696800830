//! Sub-operations: the per-asset steps composite operations are built from.
//!
//! Each step runs over a batch of assets or renditions with bounded
//! concurrency and reports one result per item. A step that starts after its
//! operation was cancelled reports [`SubOperationError::NotRun`]; a suspended
//! operation holds new items back until it is resumed.

pub mod compress;
pub mod crypt;
pub mod fetch;
pub mod key;
pub mod server;
pub mod transfer;

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use tripup_db::PhysicalAssetRef;

use crate::context::SyncContext;

/// Why a step did not succeed for one item.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubOperationError {
    /// Skipped: cancelled, or an earlier step failed.
    #[error("not run")]
    NotRun,
    /// Transient; the item may succeed on a later attempt.
    #[error("recoverable failure: {0}")]
    Recoverable(String),
    /// Permanent for this asset; it will never import.
    #[error("fatal failure for asset {0}")]
    Fatal(Uuid),
    /// The pipeline is misconfigured; no asset can succeed until it is fixed.
    #[error("unrecoverable failure: {0}")]
    Unrecoverable(String),
}

impl SubOperationError {
    fn severity(&self) -> u8 {
        match self {
            SubOperationError::NotRun => 1,
            SubOperationError::Recoverable(_) => 2,
            SubOperationError::Fatal(_) => 3,
            SubOperationError::Unrecoverable(_) => 4,
        }
    }
}

impl From<tripup_core::Error> for SubOperationError {
    fn from(e: tripup_core::Error) -> Self {
        match e {
            tripup_core::Error::Config(msg) => SubOperationError::Unrecoverable(msg),
            other => SubOperationError::Recoverable(other.to_string()),
        }
    }
}

pub type SubResult<T> = std::result::Result<T, SubOperationError>;

/// Cancellation and suspension shared by an operation and its steps.
#[derive(Debug, Clone)]
pub struct OperationControl {
    cancel: CancellationToken,
    suspended: Arc<watch::Sender<bool>>,
}

impl Default for OperationControl {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationControl {
    pub fn new() -> Self {
        let (suspended, _) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            suspended: Arc::new(suspended),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn set_suspended(&self, suspended: bool) {
        self.suspended.send_replace(suspended);
    }

    pub fn is_suspended(&self) -> bool {
        *self.suspended.borrow()
    }

    /// Wait while suspended. Returns `false` once cancelled.
    pub async fn ready(&self) -> bool {
        let mut rx = self.suspended.subscribe();
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            if !*rx.borrow_and_update() {
                return true;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return !self.cancel.is_cancelled();
                    }
                }
            }
        }
    }
}

/// Run `step` over every item with bounded concurrency.
pub(crate) async fn run_batch<I, T, F, Fut>(
    items: Vec<I>,
    control: &OperationControl,
    concurrency: usize,
    step: F,
) -> Vec<(I, SubResult<T>)>
where
    I: Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = SubResult<T>>,
{
    stream::iter(items)
        .map(|item| {
            let step = &step;
            async move {
                let result = if control.ready().await {
                    step(item.clone()).await
                } else {
                    Err(SubOperationError::NotRun)
                };
                (item, result)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}

/// Collapse per-rendition results into one result per asset, worst first.
pub(crate) fn by_asset<T>(results: Vec<(PhysicalAssetRef, SubResult<T>)>) -> Vec<(Uuid, SubResult<()>)> {
    let mut order = Vec::new();
    let mut merged: HashMap<Uuid, SubResult<()>> = HashMap::new();
    for (target, result) in results {
        let id = target.uuid();
        let result = result.map(|_| ());
        match merged.get(&id) {
            None => {
                order.push(id);
                merged.insert(id, result);
            }
            Some(Ok(())) => {
                merged.insert(id, result);
            }
            Some(Err(current)) => {
                if let Err(incoming) = &result {
                    if incoming.severity() > current.severity() {
                        merged.insert(id, result);
                    }
                }
            }
        }
    }
    order
        .into_iter()
        .filter_map(|id| merged.remove(&id).map(|r| (id, r)))
        .collect()
}

/// Delete a scratch or local file, logging instead of failing.
pub(crate) async fn discard(ctx: &SyncContext, path: &Path) {
    if let Err(e) = ctx.disk.delete(path).await {
        warn!(
            subsystem = "sync",
            component = "disk",
            path = %path.display(),
            error = %e,
            "Failed to remove file"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_batch_reports_every_item() {
        let control = OperationControl::new();
        let mut results = run_batch(vec![1, 2, 3], &control, 2, |n| async move {
            if n == 2 {
                Err(SubOperationError::Recoverable("flaky".into()))
            } else {
                Ok(n * 10)
            }
        })
        .await;
        results.sort_by_key(|(n, _)| *n);

        assert_eq!(results[0], (1, Ok(10)));
        assert!(matches!(results[1].1, Err(SubOperationError::Recoverable(_))));
        assert_eq!(results[2], (3, Ok(30)));
    }

    #[tokio::test]
    async fn test_cancelled_items_not_run() {
        let control = OperationControl::new();
        control.cancel();
        let results = run_batch(vec![1, 2], &control, 2, |n| async move { Ok(n) }).await;
        assert!(results.iter().all(|(_, r)| *r == Err(SubOperationError::NotRun)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspended_control_waits_for_resume() {
        let control = OperationControl::new();
        control.set_suspended(true);

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.ready().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        control.set_suspended(false);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_releases_suspended_waiter() {
        let control = OperationControl::new();
        control.set_suspended(true);
        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.ready().await })
        };
        tokio::task::yield_now().await;
        control.cancel();
        assert!(!waiter.await.unwrap());
    }

    #[test]
    fn test_severity_order() {
        let fatal = SubOperationError::Fatal(Uuid::nil());
        let recoverable = SubOperationError::Recoverable("x".into());
        assert!(fatal.severity() > recoverable.severity());
        assert!(recoverable.severity() > SubOperationError::NotRun.severity());
        assert!(SubOperationError::Unrecoverable("x".into()).severity() > fatal.severity());
    }

    #[test]
    fn test_config_error_is_unrecoverable() {
        let err: SubOperationError = tripup_core::Error::Config("no key".into()).into();
        assert_eq!(err, SubOperationError::Unrecoverable("no key".into()));

        let err: SubOperationError = tripup_core::Error::Storage("timeout".into()).into();
        assert!(matches!(err, SubOperationError::Recoverable(_)));
    }
}
