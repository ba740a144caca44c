//! Delayed idle checks for medical batches. Handlers never sleep; they
//! schedule a check and return.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// "Prompt if the batch still has exactly this many images."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleCheck {
    pub batch_id: Uuid,
    pub expected_count: i32,
}

pub trait Scheduler: Send + Sync {
    fn schedule_idle_check(&self, check: IdleCheck, after: Duration);
}

#[async_trait]
pub trait IdleCheckHandler: Send + Sync {
    async fn on_idle_check(&self, check: IdleCheck);
}

/// Spawns a timer per check and feeds fired checks into a queue.
#[derive(Clone)]
pub struct TokioScheduler {
    tx: mpsc::UnboundedSender<IdleCheck>,
}

impl TokioScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<IdleCheck>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_idle_check(&self, check: IdleCheck, after: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if tx.send(check).is_err() {
                warn!(batch_id = %check.batch_id, "idle worker gone; check dropped");
            }
        });
    }
}

/// Consumes fired checks until every sender is dropped.
pub async fn run_idle_worker(
    mut rx: mpsc::UnboundedReceiver<IdleCheck>,
    handler: Arc<dyn IdleCheckHandler>,
) {
    while let Some(check) = rx.recv().await {
        debug!(batch_id = %check.batch_id, expected = check.expected_count, "idle check fired");
        let handler = handler.clone();
        // Checks run concurrently; a panic in one must not stop the worker.
        tokio::spawn(async move {
            let task = tokio::spawn(async move { handler.on_idle_check(check).await });
            if let Err(e) = task.await {
                error!(batch_id = %check.batch_id, error = %e, "idle check task panicked");
            }
        });
    }
}

/// Test scheduler: records checks, fires nothing on its own.
#[cfg(test)]
#[derive(Default)]
pub struct ManualScheduler {
    pending: parking_lot::Mutex<Vec<(IdleCheck, Duration)>>,
}

#[cfg(test)]
impl ManualScheduler {
    pub fn take(&self) -> Vec<IdleCheck> {
        self.pending.lock().drain(..).map(|(c, _)| c).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
impl Scheduler for ManualScheduler {
    fn schedule_idle_check(&self, check: IdleCheck, after: Duration) {
        self.pending.lock().push((check, after));
    }
}
