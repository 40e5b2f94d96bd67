//! Progress notifications and worker health.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Snapshot emitted after every scheduler state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
    /// `processed * 100 / total`, or 100 for an empty batch.
    pub percentage: u32,
    pub active_workers: usize,
    pub available_workers: usize,
    pub pending_work: usize,
}

impl Progress {
    pub fn new(
        processed: usize,
        total: usize,
        active_workers: usize,
        max_workers: usize,
        pending_work: usize,
    ) -> Self {
        let percentage = if total == 0 {
            100
        } else {
            (processed * 100 / total) as u32
        };
        Self {
            processed,
            total,
            percentage,
            active_workers,
            available_workers: max_workers.saturating_sub(active_workers),
            pending_work,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.processed >= self.total
    }
}

/// Receives progress snapshots. Called on the scheduler's control flow, so
/// implementations must return quickly.
pub trait ProgressObserver: Send {
    fn on_progress(&self, progress: &Progress);
}

impl<F> ProgressObserver for F
where
    F: Fn(&Progress) + Send,
{
    fn on_progress(&self, progress: &Progress) {
        self(progress)
    }
}

/// Per-slot health, for observability and restart decisions only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerHealth {
    pub tasks_completed: u64,
    pub last_activity: Option<DateTime<Utc>>,
    pub healthy: bool,
    /// How many times this slot position has been replaced.
    pub restarts: u32,
}

impl Default for WorkerHealth {
    fn default() -> Self {
        Self {
            tasks_completed: 0,
            last_activity: None,
            healthy: true,
            restarts: 0,
        }
    }
}

impl WorkerHealth {
    pub(super) fn record(&mut self, success: bool) {
        self.tasks_completed += 1;
        self.last_activity = Some(Utc::now());
        if success {
            self.healthy = true;
        } else {
            self.healthy = false;
            self.restarts += 1;
        }
    }
}

/// Collects every snapshot for inspection in tests.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct ProgressLog(std::sync::Arc<std::sync::Mutex<Vec<Progress>>>);

#[cfg(test)]
impl ProgressLog {
    pub fn events(&self) -> Vec<Progress> {
        self.0.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl ProgressObserver for ProgressLog {
    fn on_progress(&self, progress: &Progress) {
        self.0.lock().unwrap().push(*progress);
    }
}
