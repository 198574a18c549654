//! Bounded group of background remote operations.
//!
//! Deletes and limit updates do not gate later steps of a pass, so they run
//! concurrently with it. The group is always settled before the pass
//! returns; every outcome lands in the [`PassReport`].

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::types::{PassReport, ReconcileAction};

type Outcome = (ReconcileAction, Result<(), String>);

/// Treat "not found" as success for deletes: a cascade may have removed
/// the entity already.
pub(crate) fn tolerate_missing(
    result: ostia_system_client::Result<()>,
) -> ostia_system_client::Result<()> {
    match result {
        Err(e) if e.is_not_found() => {
            debug!(error = %e, "Entity already gone");
            Ok(())
        }
        other => other,
    }
}

/// Background operations of one pass.
#[derive(Debug)]
pub struct TaskGroup {
    tasks: JoinSet<Outcome>,
    permits: Arc<Semaphore>,
}

impl TaskGroup {
    /// Create a group running at most `max_in_flight` operations at once.
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            tasks: JoinSet::new(),
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Dispatch `operation` on behalf of `action`.
    pub fn spawn<F>(&mut self, action: ReconcileAction, operation: F)
    where
        F: Future<Output = ostia_system_client::Result<()>> + Send + 'static,
    {
        debug!(action = %action, "Dispatching background operation");
        let permits = Arc::clone(&self.permits);
        self.tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return (action, Err("task group closed".to_string()));
            };
            let outcome = match AssertUnwindSafe(operation).catch_unwind().await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err("operation panicked".to_string()),
            };
            (action, outcome)
        });
    }

    /// Number of operations not yet settled.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every dispatched operation and record its outcome.
    pub async fn settle(&mut self, report: &mut PassReport) {
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((action, Ok(()))) => {
                    debug!(action = %action, "Background operation applied");
                    report.record_success(action);
                }
                Ok((action, Err(reason))) => {
                    warn!(action = %action, error = %reason, "Background operation failed");
                    report.record_failure(action, reason);
                }
                Err(e) => {
                    error!(error = %e, "Background operation was cancelled");
                    report.interrupted += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn delete_metric(name: &str) -> ReconcileAction {
        ReconcileAction::DeleteMetric {
            metric: name.to_string(),
            id: ostia_system_client::MetricId::new(1),
        }
    }

    #[allow(clippy::panic)]
    async fn explode() -> ostia_system_client::Result<()> {
        panic!("backend exploded")
    }

    #[tokio::test]
    async fn test_settle_records_every_outcome() {
        let mut group = TaskGroup::new(2);
        let mut report = PassReport::new("widgets");

        group.spawn(delete_metric("a"), async { Ok(()) });
        group.spawn(delete_metric("b"), async {
            Err(ostia_system_client::Error::unexpected_status("delete metric", 500, ""))
        });
        assert_eq!(group.len(), 2);

        group.settle(&mut report).await;

        assert!(group.is_empty());
        assert_eq!(report.actions_taken, vec![delete_metric("a")]);
        assert_eq!(report.actions_failed.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let mut group = TaskGroup::new(2);
        let mut report = PassReport::new("widgets");
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for i in 0..8 {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            group.spawn(delete_metric(&i.to_string()), async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }
        group.settle(&mut report).await;

        assert_eq!(report.actions_taken.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panicking_operation_is_a_failure() {
        let mut group = TaskGroup::new(1);
        let mut report = PassReport::new("widgets");

        group.spawn(delete_metric("boom"), explode());
        group.settle(&mut report).await;

        assert_eq!(report.actions_failed.len(), 1);
        assert_eq!(report.interrupted, 0);
    }
}
