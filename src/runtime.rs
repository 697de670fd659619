//! Service lifecycle: startup resync, live watchers, bounded shutdown.

use std::sync::Arc;
use std::time::Duration;

use bazaar_store::Store;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::indexer::Indexer;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct Service<S: Store> {
    indexer: Arc<Indexer<S>>,
    cancel: CancellationToken,
}

impl<S: Store> Service<S> {
    /// Runs the full resync, then launches the marketplace watcher.
    ///
    /// The resync is fatal on failure: serving reads from a half-cleared
    /// dataset would be worse than not starting.
    pub async fn start(indexer: Arc<Indexer<S>>) -> Result<Self> {
        let cancel = indexer.cancellation();
        indexer.resync_orders().await?;
        indexer.spawn_market_watcher();
        tracing::info!(target: "bazaar::runtime", "service started");
        Ok(Self { indexer, cancel })
    }

    pub fn indexer(&self) -> &Arc<Indexer<S>> {
        &self.indexer
    }

    /// Cancels every watcher and waits for them to drain, bounded by a
    /// grace period.
    pub async fn stop(self) {
        self.cancel.cancel();
        let tasks = self.indexer.take_watcher_tasks();
        let drain = futures::future::join_all(tasks);
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            tracing::warn!(
                target: "bazaar::runtime",
                "watchers did not stop within the grace period"
            );
        } else {
            tracing::info!(target: "bazaar::runtime", "service stopped");
        }
    }
}
