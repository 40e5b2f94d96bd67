//! A single worker slot: one tokio task that runs one chunk at a time.

use super::ChunkProcessor;
use crate::models::{ChunkAnalysis, ChunkTask};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// A task plus the attempt number it is being run for (1-based).
#[derive(Debug, Clone)]
pub(super) struct QueuedTask {
    pub task: ChunkTask,
    pub attempt: u32,
}

/// Reported by a slot after every run.
pub(super) struct SlotEvent {
    pub slot: usize,
    pub generation: u64,
    pub queued: QueuedTask,
    pub result: Result<ChunkAnalysis, String>,
}

type Ack = oneshot::Sender<()>;

pub(super) struct Slot {
    tasks: mpsc::UnboundedSender<QueuedTask>,
    stop: Option<oneshot::Sender<Ack>>,
    join: JoinHandle<()>,
    /// Distinguishes this slot from the ones it replaced at the same index.
    pub generation: u64,
    /// Id of the task currently running, if any.
    pub busy: Option<String>,
}

impl Slot {
    pub fn spawn(
        index: usize,
        generation: u64,
        processor: Arc<dyn ChunkProcessor>,
        events: mpsc::UnboundedSender<SlotEvent>,
    ) -> Self {
        let (tasks, task_rx) = mpsc::unbounded_channel();
        let (stop, stop_rx) = oneshot::channel();
        let join = tokio::spawn(run_slot(
            index, generation, processor, task_rx, stop_rx, events,
        ));
        Self {
            tasks,
            stop: Some(stop),
            join,
            generation,
            busy: None,
        }
    }

    /// Hand a task to the slot. Gives the task back if the slot is gone.
    pub fn run(&mut self, queued: QueuedTask) -> Result<(), QueuedTask> {
        let id = queued.task.id.clone();
        self.tasks.send(queued).map_err(|e| e.0)?;
        self.busy = Some(id);
        Ok(())
    }

    /// Ask the slot to stop. `None` when the slot already exited.
    pub fn terminate(&mut self) -> Option<oneshot::Receiver<()>> {
        let (ack, acknowledged) = oneshot::channel();
        self.stop.take()?.send(ack).ok()?;
        Some(acknowledged)
    }

    pub fn abort(&self) {
        self.join.abort();
    }
}

async fn run_slot(
    index: usize,
    generation: u64,
    processor: Arc<dyn ChunkProcessor>,
    mut tasks: mpsc::UnboundedReceiver<QueuedTask>,
    mut stop: oneshot::Receiver<Ack>,
    events: mpsc::UnboundedSender<SlotEvent>,
) {
    debug!("Slot {} started", index);

    loop {
        let queued = tokio::select! {
            biased;
            request = &mut stop => {
                if let Ok(ack) = request {
                    let _ = ack.send(());
                }
                debug!("Slot {} terminated while idle", index);
                return;
            }
            next = tasks.recv() => match next {
                Some(queued) => queued,
                None => return,
            },
        };

        let result = {
            let work = AssertUnwindSafe(processor.process(&queued.task)).catch_unwind();
            tokio::select! {
                outcome = work => outcome,
                request = &mut stop => {
                    if let Ok(ack) = request {
                        let _ = ack.send(());
                    }
                    debug!("Slot {} terminated while running {}", index, queued.task.id);
                    return;
                }
            }
        };

        let result = match result {
            Ok(Ok(analysis)) => Ok(analysis),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(panic) => Err(format!("worker panicked: {}", panic_message(&*panic))),
        };

        let event = SlotEvent {
            slot: index,
            generation,
            queued,
            result,
        };
        if events.send(event).is_err() {
            return;
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
