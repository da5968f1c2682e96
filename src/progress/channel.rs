//! Multiplexed job event channel.
//!
//! All jobs of a run send into one unbounded queue. A shared backlog counter
//! gives the best-effort half of the contract: ordinary updates and log lines
//! are dropped once `capacity` events are waiting, while terminal updates and
//! results are always enqueued. Sending never blocks a job task.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::mpsc;

use super::{JobResult, LogLine, Reporter, Update};

#[derive(Debug, Clone)]
pub enum JobEvent {
    Update(Update),
    Log(LogLine),
    Result(JobResult),
}

/// Producer side. Cloned into every job of the run.
#[derive(Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<JobEvent>,
    backlog: Arc<AtomicUsize>,
    dropped: Arc<AtomicU64>,
    capacity: usize,
}

/// Consumer side, owned by the pool loop.
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<JobEvent>,
    backlog: Arc<AtomicUsize>,
    dropped: Arc<AtomicU64>,
}

pub fn event_channel(capacity: usize) -> (ChannelReporter, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let backlog = Arc::new(AtomicUsize::new(0));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        ChannelReporter {
            tx,
            backlog: Arc::clone(&backlog),
            dropped: Arc::clone(&dropped),
            capacity: capacity.max(1),
        },
        EventReceiver {
            rx,
            backlog,
            dropped,
        },
    )
}

impl ChannelReporter {
    fn send_lossy(&self, event: JobEvent) {
        if self.backlog.load(Ordering::Acquire) >= self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.send(event);
    }

    fn send(&self, event: JobEvent) {
        self.backlog.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(event).is_err() {
            // Receiver is gone; the run is shutting down.
            self.backlog.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Reporter for ChannelReporter {
    fn update(&self, update: Update) {
        if update.stage.is_terminal() {
            self.send(JobEvent::Update(update));
        } else {
            self.send_lossy(JobEvent::Update(update));
        }
    }

    fn log(&self, line: LogLine) {
        self.send_lossy(JobEvent::Log(line));
    }

    fn result(&self, result: JobResult) {
        self.send(JobEvent::Result(result));
    }
}

impl EventReceiver {
    /// Waits for the next event. `None` once every producer is dropped.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        let event = self.rx.recv().await?;
        self.backlog.fetch_sub(1, Ordering::AcqRel);
        Some(event)
    }

    /// Non-blocking variant used when draining at shutdown.
    pub fn try_recv(&mut self) -> Option<JobEvent> {
        let event = self.rx.try_recv().ok()?;
        self.backlog.fetch_sub(1, Ordering::AcqRel);
        Some(event)
    }

    /// Number of best-effort events discarded under backlog pressure.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
