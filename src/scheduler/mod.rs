//! Bounded worker pool for chunk analysis.
//!
//! `submit` is the only control flow that touches slot state, health and the
//! pending queue. Slots are tokio tasks; they receive work over their own
//! channel and report back over one shared completion channel.

mod progress;
mod slot;

pub use progress::{Progress, ProgressObserver, WorkerHealth};

#[cfg(test)]
pub(crate) use progress::ProgressLog;

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, WorkerHealthError};
use crate::models::{ChunkAnalysis, ChunkOutcome, ChunkStatus, ChunkTask, MergedAnalysis};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use slot::{QueuedTask, Slot, SlotEvent};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Analyzes one chunk. Shared by every slot.
#[async_trait]
pub trait ChunkProcessor: Send + Sync {
    async fn process(&self, task: &ChunkTask) -> anyhow::Result<ChunkAnalysis>;
}

/// Caller-supplied rules for folding chunk payloads into category sections.
pub trait ResultMerger: Send + Sync {
    /// Fold `payload` into `section` (which starts as `Value::Null`).
    fn merge(&self, section: &mut Value, payload: Value);

    /// Payload used in place of a chunk that could not be analyzed.
    fn fallback(&self, category: &str) -> Value;
}

pub struct ChunkScheduler {
    config: SchedulerConfig,
    processor: Arc<dyn ChunkProcessor>,
    merger: Box<dyn ResultMerger>,
    slots: Vec<Slot>,
    health: Vec<WorkerHealth>,
    pending: VecDeque<QueuedTask>,
    observers: Vec<Box<dyn ProgressObserver>>,
    events_tx: mpsc::UnboundedSender<SlotEvent>,
    events_rx: mpsc::UnboundedReceiver<SlotEvent>,
    generations: u64,
    shut_down: bool,
}

/// Per-batch counters.
struct Batch {
    total: usize,
    processed: usize,
    merged: MergedAnalysis,
}

impl ChunkScheduler {
    pub fn new(
        config: SchedulerConfig,
        processor: Arc<dyn ChunkProcessor>,
        merger: Box<dyn ResultMerger>,
    ) -> Result<Self, SchedulerError> {
        if config.max_workers == 0 {
            return Err(SchedulerError::InvalidConfig(
                "max_workers must be at least 1".to_string(),
            ));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            processor,
            merger,
            slots: Vec::new(),
            health: Vec::new(),
            pending: VecDeque::new(),
            observers: Vec::new(),
            events_tx,
            events_rx,
            generations: 0,
            shut_down: false,
        })
    }

    pub fn add_observer(&mut self, observer: impl ProgressObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn max_workers(&self) -> usize {
        self.config.max_workers
    }

    /// Health of every slot, by position. Empty before the first batch and
    /// after shutdown.
    pub fn health(&self) -> &[WorkerHealth] {
        &self.health
    }

    #[allow(dead_code)] // Status accessor
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Run every task and merge the outcomes.
    ///
    /// Tasks are assigned in order; they may complete in any order. A task
    /// that fails on every attempt contributes its category's fallback
    /// payload and a warning instead of an error.
    pub async fn submit(&mut self, tasks: Vec<ChunkTask>) -> Result<MergedAnalysis, SchedulerError> {
        if self.shut_down {
            return Err(SchedulerError::ShutDown);
        }
        self.prepare();

        let mut intake: VecDeque<QueuedTask> = tasks
            .into_iter()
            .map(|task| QueuedTask { task, attempt: 1 })
            .collect();
        let mut batch = Batch {
            total: intake.len(),
            processed: 0,
            merged: MergedAnalysis::default(),
        };
        let backpressure_delay = Duration::from_millis(self.config.backpressure_delay_ms);

        info!(
            "Scheduling {} chunks on {} workers",
            batch.total, self.config.max_workers
        );

        loop {
            let saturated = self.admit(&mut intake);
            self.assign(&batch);

            if batch.processed == batch.total {
                break;
            }

            let event = tokio::select! {
                event = self.events_rx.recv() => event,
                _ = tokio::time::sleep(backpressure_delay), if saturated => {
                    debug!(
                        "Backpressure: {} chunks pending, delaying admission",
                        self.pending.len()
                    );
                    None
                }
            };

            if let Some(event) = event {
                self.complete(event, &mut batch);
            }
        }

        self.emit(&batch);
        info!(
            "Batch finished: {} resolved, {} fallback",
            batch.merged.resolved_count(),
            batch.merged.fallback_count()
        );
        Ok(batch.merged)
    }

    /// Start the slots on first use, and recover slots left busy by a batch
    /// whose future was dropped.
    fn prepare(&mut self) {
        if self.slots.is_empty() {
            for index in 0..self.config.max_workers {
                let slot = self.spawn_slot(index);
                self.slots.push(slot);
                self.health.push(WorkerHealth::default());
            }
            return;
        }

        for index in 0..self.slots.len() {
            if self.slots[index].busy.is_some() {
                debug!("Replacing slot {} left busy by an abandoned batch", index);
                self.slots[index].abort();
                self.slots[index] = self.spawn_slot(index);
            }
        }
        while self.events_rx.try_recv().is_ok() {}
        self.pending.clear();
    }

    fn spawn_slot(&mut self, index: usize) -> Slot {
        self.generations += 1;
        Slot::spawn(
            index,
            self.generations,
            self.processor.clone(),
            self.events_tx.clone(),
        )
    }

    /// Move tasks from the intake into the pending queue until it holds more
    /// than twice the pool size. Returns whether admission is being held back.
    fn admit(&mut self, intake: &mut VecDeque<QueuedTask>) -> bool {
        let limit = 2 * self.config.max_workers;
        while !intake.is_empty() {
            if self.pending.len() > limit {
                return true;
            }
            if let Some(queued) = intake.pop_front() {
                self.pending.push_back(queued);
            }
        }
        false
    }

    /// Give pending tasks to free slots, in queue order.
    fn assign(&mut self, batch: &Batch) {
        for index in 0..self.slots.len() {
            if self.slots[index].busy.is_some() {
                continue;
            }
            let Some(queued) = self.pending.pop_front() else {
                break;
            };

            debug!(
                "Assigning {} (attempt {}) to slot {}",
                queued.task.id, queued.attempt, index
            );
            if let Err(queued) = self.slots[index].run(queued) {
                warn!("Slot {} exited unexpectedly, restarting it", index);
                self.slots[index] = self.spawn_slot(index);
                if let Err(queued) = self.slots[index].run(queued) {
                    self.pending.push_front(queued);
                    continue;
                }
            }
            self.emit(batch);
        }
    }

    fn complete(&mut self, event: SlotEvent, batch: &mut Batch) {
        let SlotEvent {
            slot,
            generation,
            queued,
            result,
        } = event;
        match self.slots.get_mut(slot) {
            Some(current) if current.generation == generation => current.busy = None,
            _ => {
                debug!("Discarding result of {} from a replaced slot", queued.task.id);
                return;
            }
        }

        match result {
            Ok(analysis) => {
                if let Some(health) = self.health.get_mut(slot) {
                    health.record(true);
                }
                debug!(
                    "{} resolved by {} in {}ms",
                    queued.task.id, analysis.provider, analysis.latency_ms
                );

                let section = batch
                    .merged
                    .sections
                    .entry(queued.task.category.clone())
                    .or_insert(Value::Null);
                self.merger.merge(section, analysis.payload);

                batch.merged.outcomes.push(ChunkOutcome {
                    task_id: queued.task.id,
                    category: queued.task.category,
                    status: ChunkStatus::Resolved,
                    attempts: queued.attempt,
                    provider: Some(analysis.provider),
                    confidence: analysis.confidence,
                    error: None,
                });
                batch.processed += 1;
            }
            Err(reason) => {
                if let Some(health) = self.health.get_mut(slot) {
                    health.record(false);
                }
                let failure = WorkerHealthError {
                    slot,
                    task_id: queued.task.id.clone(),
                    attempt: queued.attempt,
                    reason,
                };
                warn!("[{}] {}", queued.task.category, failure);
                self.restart(slot);

                if queued.attempt <= self.config.task_retries {
                    self.pending.push_front(QueuedTask {
                        task: queued.task,
                        attempt: queued.attempt + 1,
                    });
                } else {
                    self.substitute_fallback(queued, failure.reason, batch);
                    batch.processed += 1;
                }
            }
        }

        self.emit(batch);
    }

    fn substitute_fallback(&self, queued: QueuedTask, reason: String, batch: &mut Batch) {
        let QueuedTask { task, attempt } = queued;

        let section = batch
            .merged
            .sections
            .entry(task.category.clone())
            .or_insert(Value::Null);
        self.merger.merge(section, self.merger.fallback(&task.category));

        batch.merged.warnings.push(format!(
            "Chunk {} ({}) used fallback results after {} attempt(s): {}",
            task.id, task.category, attempt, reason
        ));
        batch.merged.outcomes.push(ChunkOutcome {
            task_id: task.id,
            category: task.category,
            status: ChunkStatus::Fallback,
            attempts: attempt,
            provider: None,
            confidence: None,
            error: Some(reason),
        });
    }

    /// Replace the slot at `index` with a fresh one.
    fn restart(&mut self, index: usize) {
        if self.shut_down || index >= self.slots.len() {
            return;
        }
        self.slots[index].abort();
        self.slots[index] = self.spawn_slot(index);
        debug!("Slot {} restarted", index);
    }

    fn emit(&self, batch: &Batch) {
        let active = self.slots.iter().filter(|s| s.busy.is_some()).count();
        let progress = Progress::new(
            batch.processed,
            batch.total,
            active,
            self.config.max_workers,
            self.pending.len(),
        );
        for observer in &self.observers {
            observer.on_progress(&progress);
        }
    }

    /// Stop every slot, busy or idle, and clear all queued work.
    ///
    /// Each slot gets `shutdown_grace_ms` to acknowledge; unresponsive slots
    /// are aborted. Calling this more than once is a no-op.
    pub async fn shutdown(&mut self) {
        if self.shut_down {
            debug!("Scheduler already shut down");
            return;
        }
        self.shut_down = true;

        let grace = Duration::from_millis(self.config.shutdown_grace_ms);
        let acknowledgements = self
            .slots
            .iter_mut()
            .enumerate()
            .map(|(index, slot)| {
                let acknowledged = slot.terminate();
                async move {
                    let Some(acknowledged) = acknowledged else {
                        return;
                    };
                    if tokio::time::timeout(grace, acknowledged).await.is_err() {
                        warn!("Slot {} did not acknowledge shutdown, aborting", index);
                    }
                }
            })
            .collect::<Vec<_>>();
        join_all(acknowledgements).await;

        for slot in self.slots.drain(..) {
            slot.abort();
        }
        self.pending.clear();
        self.health.clear();
        while self.events_rx.try_recv().is_ok() {}

        info!("Scheduler shut down");
    }
}

impl Drop for ChunkScheduler {
    fn drop(&mut self) {
        for slot in &self.slots {
            slot.abort();
        }
    }
}
