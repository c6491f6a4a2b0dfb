//! The host timing boundary.
//!
//! A [`FlushSignal`] decides *when* a lane flushes; the queue decides *what*
//! a flush does. Each queue binds itself to its lane's signal on creation
//! and asks it for a flush whenever it has eligible work.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use lanes_core::Lane;

use crate::error::SchedulerError;
use crate::queue::QueueInner;

/// Host-provided timing source for one lane.
pub trait FlushSignal: Send + Sync {
    fn lane(&self) -> Lane;

    /// Attach the queue this signal drives. A signal drives one queue.
    fn bind(&self, target: FlushTarget) -> Result<(), SchedulerError>;

    /// Schedule one future flush of the bound queue. Idempotent while a
    /// request is outstanding. Must not flush synchronously.
    fn request(&self);

    /// Schedule a flush no sooner than `delay` from now, for queued work that
    /// is not due yet. Hosts without timers may flush early; the queue only
    /// runs what is due.
    fn request_after(&self, delay: Duration) {
        let _ = delay;
        self.request();
    }

    /// Revoke an outstanding request if it has not fired. Idempotent.
    fn cancel(&self);
}

/// Weak link from a signal back to the queue it drives.
#[derive(Clone)]
pub struct FlushTarget {
    lane: Lane,
    queue: Weak<QueueInner>,
}

impl FlushTarget {
    pub(crate) fn new(lane: Lane, queue: Weak<QueueInner>) -> Self {
        Self { lane, queue }
    }

    pub fn lane(&self) -> Lane {
        self.lane
    }

    /// Run one flush cycle. Returns `false` once the queue has been dropped.
    pub fn flush(&self) -> bool {
        match self.queue.upgrade() {
            Some(queue) => {
                queue.flush();
                true
            }
            None => false,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.queue.strong_count() > 0
    }
}

impl fmt::Debug for FlushTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlushTarget")
            .field("lane", &self.lane)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// One signal per lane, handed to the scheduler at construction.
#[derive(Clone, Default)]
pub struct SignalRegistry {
    signals: [Option<Arc<dyn FlushSignal>>; Lane::COUNT],
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the signal for its lane. A second signal for the same lane
    /// is rejected.
    pub fn register(&mut self, signal: Arc<dyn FlushSignal>) -> Result<(), SchedulerError> {
        let lane = signal.lane();
        let entry = &mut self.signals[lane.index()];
        if entry.is_some() {
            return Err(SchedulerError::DuplicateSignal(lane));
        }
        *entry = Some(signal);
        Ok(())
    }

    /// Install a signal, replacing whatever its lane held.
    pub(crate) fn replace(&mut self, signal: Arc<dyn FlushSignal>) {
        let lane = signal.lane();
        self.signals[lane.index()] = Some(signal);
    }

    pub fn get(&self, lane: Lane) -> Result<Arc<dyn FlushSignal>, SchedulerError> {
        self.signals[lane.index()]
            .clone()
            .ok_or(SchedulerError::MissingSignal(lane))
    }

    pub fn is_complete(&self) -> bool {
        self.signals.iter().all(Option::is_some)
    }
}

impl fmt::Debug for SignalRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered: Vec<Lane> = Lane::ALL
            .into_iter()
            .filter(|lane| self.signals[lane.index()].is_some())
            .collect();
        f.debug_struct("SignalRegistry")
            .field("registered", &registered)
            .finish()
    }
}
