//! Per-lane priority queue.
//!
//! Split into focused submodules:
//! - `admission`: queueing, pooling, and re-admission of records
//! - `flush`: the flush loop, task execution, and async completion
//! - `removal`: cancel, remove, take, and dispose
//! - `drain`: the memoized `yield` future

mod admission;
mod drain;
mod flush;
mod removal;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::channel::oneshot;
use futures::future::BoxFuture;
use lanes_core::Lane;
use tracing::debug;

use crate::error::{SchedulerError, TaskError};
use crate::handle::TaskHandle;
use crate::host::{Clock, Spawn};
use crate::list::{ListKind, RecordArena, TaskList};
use crate::metrics::QueueStats;
use crate::signal::{FlushSignal, FlushTarget};
use crate::task::{Completer, RawResult, TaskOptions, TaskOutcome};

pub use self::drain::YieldFuture;

/// One lane's queue of deferred work.
///
/// Holds three disjoint intrusive lists (`delayed`, `pending`, `processing`)
/// and a bounded pool of recycled records. Cloning yields another handle to
/// the same queue.
#[derive(Clone)]
pub struct PriorityQueue {
    inner: Arc<QueueInner>,
}

pub(crate) struct QueueInner {
    lane: Lane,
    state: Mutex<QueueState>,
    signal: Arc<dyn FlushSignal>,
    clock: Arc<dyn Clock>,
    spawner: Arc<dyn Spawn>,
}

pub(crate) struct QueueState {
    arena: RecordArena,
    delayed: TaskList,
    pending: TaskList,
    processing: TaskList,
    /// Terminal reusable records available for reassignment.
    task_pool: Vec<usize>,
    pool_capacity: usize,
    next_id: u64,
    flush_requested: bool,
    /// Deadline of the outstanding timed wake, when only delayed work remains.
    wake_at: Option<Duration>,
    flushing: bool,
    disposed: bool,
    /// Deferred callbacks that have not settled yet.
    pending_async: usize,
    /// Non-persistent records linked into any of the three lists.
    finite_queued: usize,
    /// Suspending task whose future holds the lane.
    suspender: Option<usize>,
    yield_waiter: Option<drain::YieldWaiter>,
    /// Bumped each time a new yield waiter opens.
    yield_epoch: u64,
    /// Persistent records that still owe the open waiter a run.
    owed_runs: usize,
    counters: Counters,
}

#[derive(Debug, Default, Clone)]
struct Counters {
    flushes: u64,
    tasks_run: u64,
    tasks_failed: u64,
    tasks_canceled: u64,
    allocations: u64,
    reused: u64,
    last_flush_at: Option<DateTime<Utc>>,
}

/// Side effects collected under the state lock and applied after it is
/// released. Callbacks, completers, the signal, and the spawner never run
/// while the lock is held.
#[derive(Default)]
#[must_use]
pub(crate) struct Effects {
    settlements: Vec<(Completer, RawResult)>,
    spawns: Vec<BoxFuture<'static, ()>>,
    /// Flush to ask the signal for: now (`ZERO`) or after a delay.
    request: Option<Duration>,
    yield_release: Option<oneshot::Sender<()>>,
}

impl Effects {
    fn settle(&mut self, completer: Option<Completer>, result: RawResult) {
        if let Some(completer) = completer {
            self.settlements.push((completer, result));
        }
    }

    pub(crate) fn apply(self, inner: &QueueInner) {
        for (completer, result) in self.settlements {
            completer(result);
        }
        for future in self.spawns {
            inner.spawner.spawn(future);
        }
        match self.request {
            Some(delay) if delay.is_zero() => inner.signal.request(),
            Some(delay) => inner.signal.request_after(delay),
            None => {}
        }
        if let Some(release) = self.yield_release {
            let _ = release.send(());
        }
    }
}

impl PriorityQueue {
    /// Create a queue for `lane` and bind it to its flush signal.
    pub fn new(
        lane: Lane,
        pool_capacity: usize,
        signal: Arc<dyn FlushSignal>,
        clock: Arc<dyn Clock>,
        spawner: Arc<dyn Spawn>,
    ) -> Result<Self, SchedulerError> {
        let inner = Arc::new(QueueInner {
            lane,
            state: Mutex::new(QueueState::new(pool_capacity)),
            signal,
            clock,
            spawner,
        });
        inner
            .signal
            .bind(FlushTarget::new(lane, Arc::downgrade(&inner)))?;
        debug!(lane = %lane, pool_capacity, "priority queue created");
        Ok(Self { inner })
    }

    pub fn lane(&self) -> Lane {
        self.inner.lane
    }

    /// Queue a callback on this lane.
    ///
    /// Zero-delay `preempt` tasks run before this returns when the lane is
    /// mid-flush. Everything else is appended to `pending` (or inserted into
    /// `delayed`) and a flush is requested.
    pub fn queue_task<T, F>(
        &self,
        callback: F,
        options: TaskOptions,
    ) -> Result<TaskHandle<T>, SchedulerError>
    where
        T: Send + 'static,
        F: FnMut(Duration) -> TaskOutcome<T> + Send + 'static,
    {
        self.inner.queue_task(callback, options)
    }

    /// Run one flush cycle now.
    pub fn flush(&self) {
        self.inner.flush();
    }

    /// Revoke this queue's outstanding flush request. Queued tasks stay put.
    pub fn cancel(&self) {
        self.inner.cancel_flush_request();
    }

    /// Ask the signal for a flush unless one is already outstanding.
    pub fn request_flush(&self) {
        let now = self.inner.clock.now();
        let effects = {
            let mut state = self.inner.lock();
            let mut effects = Effects::default();
            state.request_flush(now, &mut effects);
            effects
        };
        effects.apply(&self.inner);
    }

    /// Resolve once no finite work remains on this lane.
    pub fn yield_now(&self) -> YieldFuture {
        self.inner.yield_now()
    }

    /// Detach a queued task held by this queue and abort it.
    pub fn remove<T>(&self, task: &TaskHandle<T>) -> bool {
        let location = task.control().location();
        match location.queue.upgrade() {
            Some(queue) if Arc::ptr_eq(&queue, &self.inner) => {
                self.inner.cancel_task(location.slot, location.id)
            }
            _ => false,
        }
    }

    /// Move a queued task from its current queue into this one.
    ///
    /// The task keeps its eligibility instant. Returns `Ok(false)` when the
    /// task is already here, running, or finished.
    pub fn take<T>(&self, task: &TaskHandle<T>) -> Result<bool, SchedulerError> {
        self.inner.take(task.control())
    }

    /// Abort all queued work and refuse new work.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }

    pub fn is_flushing(&self) -> bool {
        self.inner.lock().flushing
    }

    /// Whether the lane holds no queued or in-flight work.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.lock().stats(self.inner.lane)
    }
}

impl QueueInner {
    pub(crate) fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel_flush_request(&self) {
        let was_requested = {
            let mut state = self.lock();
            state.wake_at = None;
            std::mem::replace(&mut state.flush_requested, false)
        };
        if was_requested {
            debug!(lane = %self.lane, "flush request revoked");
        }
        self.signal.cancel();
    }
}

impl QueueState {
    fn new(pool_capacity: usize) -> Self {
        Self {
            arena: RecordArena::default(),
            delayed: TaskList::new(ListKind::Delayed),
            pending: TaskList::new(ListKind::Pending),
            processing: TaskList::new(ListKind::Processing),
            task_pool: Vec::with_capacity(pool_capacity),
            pool_capacity,
            next_id: 1,
            flush_requested: false,
            wake_at: None,
            flushing: false,
            disposed: false,
            pending_async: 0,
            finite_queued: 0,
            suspender: None,
            yield_waiter: None,
            yield_epoch: 0,
            owed_runs: 0,
            counters: Counters::default(),
        }
    }

    /// Ask the signal for a flush, at most once per outstanding request.
    /// While a flush is running the flush itself re-requests at its end.
    ///
    /// With nothing eligible and only delayed work queued, the request is a
    /// timed wake for the earliest deadline instead.
    fn request_flush(&mut self, now: Duration, effects: &mut Effects) {
        if self.disposed || self.flushing || self.flush_requested {
            return;
        }
        let deadline = match self.delayed.head() {
            Some(head) if self.pending.is_empty() => self.arena[head].queue_time,
            _ => {
                self.flush_requested = true;
                self.wake_at = None;
                effects.request = Some(Duration::ZERO);
                return;
            }
        };
        if deadline <= now {
            self.flush_requested = true;
            self.wake_at = None;
            effects.request = Some(Duration::ZERO);
        } else if self.wake_at.map_or(true, |wake| deadline < wake) {
            self.wake_at = Some(deadline);
            effects.request = Some(deadline - now);
        }
    }

    fn linked(&self) -> usize {
        self.delayed.len() + self.pending.len() + self.processing.len()
    }

    fn is_empty(&self) -> bool {
        self.linked() == 0 && self.pending_async == 0
    }

    /// No non-persistent work is queued or in flight, and every persistent
    /// record registered when the waiter opened has completed a run.
    fn has_drained(&self) -> bool {
        self.finite_queued == 0 && self.pending_async == 0 && self.owed_runs == 0
    }

    fn abort_error(&self, slot: usize, lane: Lane) -> TaskError {
        TaskError::Aborted {
            id: self.arena[slot].id,
            lane,
        }
    }

    fn stats(&self, lane: Lane) -> QueueStats {
        QueueStats {
            lane,
            delayed: self.delayed.len(),
            pending: self.pending.len(),
            processing: self.processing.len(),
            async_in_flight: self.pending_async,
            pooled: self.task_pool.len(),
            live_records: self.arena.len(),
            flush_requested: self.flush_requested || self.wake_at.is_some(),
            suspended: self.suspender.is_some(),
            flushes: self.counters.flushes,
            tasks_run: self.counters.tasks_run,
            tasks_failed: self.counters.tasks_failed,
            tasks_canceled: self.counters.tasks_canceled,
            allocations: self.counters.allocations,
            reused: self.counters.reused,
            last_flush_at: self.counters.last_flush_at,
        }
    }
}
