//! Task records: the unit of deferred work owned by a [`PriorityQueue`].
//!
//! Producers never see a [`TaskRecord`] directly. They hand a callback to
//! `queue_task` and get back a [`TaskHandle`](crate::TaskHandle), which shares
//! a small [`TaskShared`] block with the record for status and location.
//!
//! [`PriorityQueue`]: crate::PriorityQueue

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::BoxFuture;
use futures::FutureExt;
use lanes_core::Lane;

use crate::error::TaskError;
use crate::list::ListKind;
use crate::queue::QueueInner;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskStatus {
    Pending = 0,
    Running = 1,
    Completed = 2,
    Canceled = 3,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Canceled)
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskStatus::Pending,
            1 => TaskStatus::Running,
            2 => TaskStatus::Completed,
            _ => TaskStatus::Canceled,
        }
    }
}

/// What a task callback produced.
///
/// `Deferred` keeps the task `Running` until the future settles, without
/// blocking the rest of the flush.
pub enum TaskOutcome<T> {
    Immediate(Result<T, TaskError>),
    Deferred(BoxFuture<'static, Result<T, TaskError>>),
}

impl<T> TaskOutcome<T> {
    pub fn ready(value: T) -> Self {
        TaskOutcome::Immediate(Ok(value))
    }

    pub fn failed(message: impl Into<String>) -> Self {
        TaskOutcome::Immediate(Err(TaskError::failed(message)))
    }

    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        TaskOutcome::Deferred(future.boxed())
    }
}

impl<T> From<Result<T, TaskError>> for TaskOutcome<T> {
    fn from(result: Result<T, TaskError>) -> Self {
        TaskOutcome::Immediate(result)
    }
}

/// Options recognized by `queue_task`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOptions {
    /// Time from queueing until the task becomes eligible.
    pub delay: Duration,
    /// Run inline when queued while the lane is mid-flush (zero delay only).
    pub preempt: bool,
    /// Re-admit after every successful run until canceled.
    pub persistent: bool,
    /// Return the record to the lane's pool once terminal.
    pub reusable: bool,
    /// When the callback defers, hold the rest of the lane until it settles.
    pub suspend: bool,
    /// Lane to queue on; `None` uses the scheduler's default lane.
    pub priority: Option<Lane>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            preempt: false,
            persistent: false,
            reusable: true,
            suspend: false,
            priority: None,
        }
    }
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn delay_ms(self, millis: u64) -> Self {
        self.with_delay(Duration::from_millis(millis))
    }

    pub fn preempt(mut self) -> Self {
        self.preempt = true;
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn reusable(mut self, reusable: bool) -> Self {
        self.reusable = reusable;
        self
    }

    pub fn suspend(mut self) -> Self {
        self.suspend = true;
        self
    }

    pub fn on(mut self, lane: Lane) -> Self {
        self.priority = Some(lane);
        self
    }
}

// ── Type-erased callbacks ─────────────────────────────────────

pub(crate) type RawResult = Result<(), TaskError>;

pub(crate) enum RawOutcome {
    Immediate(RawResult),
    Deferred(BoxFuture<'static, RawResult>),
}

pub(crate) type TaskCallback = Box<dyn FnMut(Duration) -> RawOutcome + Send>;
pub(crate) type Completer = Box<dyn FnOnce(RawResult) + Send>;

/// A callback with its value type erased, plus the completer that
/// settles the producer's typed result channel.
pub(crate) struct TaskJob {
    pub(crate) callback: TaskCallback,
    pub(crate) completer: Completer,
}

impl TaskJob {
    pub(crate) fn new<T, F>(mut callback: F) -> (Self, oneshot::Receiver<Result<T, TaskError>>)
    where
        T: Send + 'static,
        F: FnMut(Duration) -> TaskOutcome<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let latest: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&latest);
        let callback: TaskCallback = Box::new(move |delta| match callback(delta) {
            TaskOutcome::Immediate(result) => {
                RawOutcome::Immediate(result.map(|value| store(&slot, value)))
            }
            TaskOutcome::Deferred(future) => {
                let slot = Arc::clone(&slot);
                RawOutcome::Deferred(
                    async move { future.await.map(|value| store(&slot, value)) }.boxed(),
                )
            }
        });

        let completer: Completer = Box::new(move |result: RawResult| {
            let settled = result.and_then(|()| {
                latest
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take()
                    .ok_or_else(|| TaskError::failed("task finished without a value"))
            });
            // The producer may have dropped its handle.
            let _ = tx.send(settled);
        });

        (Self { callback, completer }, rx)
    }
}

fn store<T>(slot: &Mutex<Option<T>>, value: T) {
    *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
}

/// Run a callback, turning a panic into a task failure.
pub(crate) fn invoke(mut callback: TaskCallback, delta: Duration) -> (TaskCallback, RawOutcome) {
    let outcome = match catch_unwind(AssertUnwindSafe(|| callback(delta))) {
        Ok(outcome) => outcome,
        Err(payload) => RawOutcome::Immediate(Err(TaskError::Panicked(panic_message(payload)))),
    };
    (callback, outcome)
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ── State shared with the producer's handle ───────────────────

/// Where a task's record currently lives.
#[derive(Clone)]
pub(crate) struct TaskLocation {
    pub(crate) queue: Weak<QueueInner>,
    pub(crate) lane: Lane,
    pub(crate) slot: usize,
    pub(crate) id: u64,
}

pub(crate) struct TaskShared {
    status: AtomicU8,
    run_count: AtomicU64,
    location: Mutex<TaskLocation>,
}

impl TaskShared {
    pub(crate) fn new(lane: Lane) -> Arc<Self> {
        Arc::new(Self {
            status: AtomicU8::new(TaskStatus::Pending as u8),
            run_count: AtomicU64::new(0),
            location: Mutex::new(TaskLocation {
                queue: Weak::new(),
                lane,
                slot: 0,
                id: 0,
            }),
        })
    }

    pub(crate) fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn run_count(&self) -> u64 {
        self.run_count.load(Ordering::Relaxed)
    }

    pub(crate) fn location(&self) -> TaskLocation {
        self.location
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn relocate(&self, location: TaskLocation) {
        *self.location.lock().unwrap_or_else(PoisonError::into_inner) = location;
    }
}

// ── The record itself ─────────────────────────────────────────

/// Flags fixed at queue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TaskFlags {
    pub(crate) preempt: bool,
    pub(crate) persistent: bool,
    pub(crate) reusable: bool,
    pub(crate) suspend: bool,
}

impl From<&TaskOptions> for TaskFlags {
    fn from(options: &TaskOptions) -> Self {
        Self {
            preempt: options.preempt,
            persistent: options.persistent,
            reusable: options.reusable,
            suspend: options.suspend,
        }
    }
}

/// Everything needed to (re)initialise a record.
pub(crate) struct RecordSeed {
    pub(crate) created_time: Duration,
    pub(crate) queue_time: Duration,
    pub(crate) delay: Duration,
    pub(crate) flags: TaskFlags,
    pub(crate) job: TaskJob,
    pub(crate) shared: Arc<TaskShared>,
}

impl RecordSeed {
    pub(crate) fn new(now: Duration, options: &TaskOptions, job: TaskJob, shared: Arc<TaskShared>) -> Self {
        Self {
            created_time: now,
            queue_time: now + options.delay,
            delay: options.delay,
            flags: TaskFlags::from(options),
            job,
            shared,
        }
    }
}

/// A task seed pulled out of one queue on its way to another.
pub(crate) type DetachedTask = RecordSeed;

pub(crate) struct TaskRecord {
    pub(crate) id: u64,
    pub(crate) created_time: Duration,
    pub(crate) queue_time: Duration,
    pub(crate) delay: Duration,
    pub(crate) flags: TaskFlags,
    pub(crate) status: TaskStatus,
    /// Persistent task canceled while running: do not re-admit.
    pub(crate) cancel_pending: bool,
    /// Yield epoch this persistent record still owes a run to, or 0.
    pub(crate) owed_yield: u64,
    pub(crate) location: Option<ListKind>,
    pub(crate) prev: Option<usize>,
    pub(crate) next: Option<usize>,
    pub(crate) callback: Option<TaskCallback>,
    pub(crate) completer: Option<Completer>,
    pub(crate) shared: Arc<TaskShared>,
}

impl TaskRecord {
    pub(crate) fn new(id: u64, seed: RecordSeed) -> Self {
        Self {
            id,
            created_time: seed.created_time,
            queue_time: seed.queue_time,
            delay: seed.delay,
            flags: seed.flags,
            status: TaskStatus::Pending,
            cancel_pending: false,
            owed_yield: 0,
            location: None,
            prev: None,
            next: None,
            callback: Some(seed.job.callback),
            completer: Some(seed.job.completer),
            shared: seed.shared,
        }
    }

    /// Recycle a terminal record for new work without reallocating it.
    pub(crate) fn reset(&mut self, id: u64, seed: RecordSeed) {
        debug_assert!(self.location.is_none(), "pooled record still linked");
        self.id = id;
        self.created_time = seed.created_time;
        self.queue_time = seed.queue_time;
        self.delay = seed.delay;
        self.flags = seed.flags;
        self.cancel_pending = false;
        self.owed_yield = 0;
        self.prev = None;
        self.next = None;
        self.callback = Some(seed.job.callback);
        self.completer = Some(seed.job.completer);
        self.shared = seed.shared;
        self.set_status(TaskStatus::Pending);
    }

    /// Restart the timing of a persistent record after a run.
    pub(crate) fn rearm(&mut self, now: Duration) {
        self.created_time = now;
        self.queue_time = now + self.delay;
        self.set_status(TaskStatus::Pending);
    }

    /// Take the record's contents for transfer to another queue.
    pub(crate) fn detach(&mut self) -> Option<DetachedTask> {
        let callback = self.callback.take()?;
        let completer = self.completer.take()?;
        Some(RecordSeed {
            created_time: self.created_time,
            queue_time: self.queue_time,
            delay: self.delay,
            flags: self.flags,
            job: TaskJob { callback, completer },
            shared: Arc::clone(&self.shared),
        })
    }

    pub(crate) fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.shared.status.store(status as u8, Ordering::Release);
    }

    pub(crate) fn record_run(&self) {
        self.shared.run_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Elapsed time between creation and `now`.
    pub(crate) fn delta(&self, now: Duration) -> Duration {
        now.saturating_sub(self.created_time)
    }

    pub(crate) fn is_persistent(&self) -> bool {
        self.flags.persistent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settle<T: Send + 'static>(
        outcome: impl FnMut(Duration) -> TaskOutcome<T> + Send + 'static,
        drive: impl FnOnce(&mut TaskJob) -> RawResult,
    ) -> Result<T, TaskError> {
        let (mut job, rx) = TaskJob::new(outcome);
        let result = drive(&mut job);
        (job.completer)(result);
        rx.now_or_never().expect("settled").expect("sender alive")
    }

    fn run_immediate(job: &mut TaskJob) -> RawResult {
        match (job.callback)(Duration::ZERO) {
            RawOutcome::Immediate(r) => r,
            RawOutcome::Deferred(_) => panic!("expected immediate outcome"),
        }
    }

    #[test]
    fn status_terminal_states() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Canceled.is_terminal());
    }

    #[test]
    fn options_defaults() {
        let opts = TaskOptions::default();
        assert_eq!(opts.delay, Duration::ZERO);
        assert!(!opts.preempt);
        assert!(!opts.persistent);
        assert!(opts.reusable);
        assert!(!opts.suspend);
        assert_eq!(opts.priority, None);
    }

    #[test]
    fn options_builders_chain() {
        let opts = TaskOptions::new().delay_ms(5).persistent().reusable(false).on(Lane::Idle);
        assert_eq!(opts.delay, Duration::from_millis(5));
        assert!(opts.persistent);
        assert!(!opts.reusable);
        assert_eq!(opts.priority, Some(Lane::Idle));
    }

    #[test]
    fn job_delivers_immediate_value() {
        let result = settle(|_| TaskOutcome::ready(42), run_immediate);
        assert_eq!(result, Ok(42));
    }

    #[test]
    fn job_delivers_failure() {
        let result = settle(|_| TaskOutcome::<u8>::failed("boom"), run_immediate);
        assert_eq!(result, Err(TaskError::Failed("boom".into())));
    }

    #[test]
    fn job_delivers_deferred_value() {
        let result = settle(
            |_| TaskOutcome::deferred(async { Ok("later") }),
            |job| match (job.callback)(Duration::ZERO) {
                RawOutcome::Deferred(fut) => fut.now_or_never().expect("ready future"),
                RawOutcome::Immediate(_) => panic!("expected deferred outcome"),
            },
        );
        assert_eq!(result, Ok("later"));
    }

    #[test]
    fn job_keeps_latest_value_across_runs() {
        let mut n = 0;
        let (mut job, rx) = TaskJob::new(move |_| {
            n += 1;
            TaskOutcome::ready(n)
        });
        for _ in 0..3 {
            assert!(run_immediate(&mut job).is_ok());
        }
        (job.completer)(Ok(()));
        assert_eq!(rx.now_or_never().unwrap().unwrap(), Ok(3));
    }

    #[test]
    fn invoke_catches_panics() {
        let (job, _rx) = TaskJob::new(|_| -> TaskOutcome<()> { panic!("kaboom") });
        let (_cb, outcome) = invoke(job.callback, Duration::ZERO);
        match outcome {
            RawOutcome::Immediate(Err(TaskError::Panicked(msg))) => assert_eq!(msg, "kaboom"),
            _ => panic!("expected panic to be captured"),
        }
    }

    #[test]
    fn callback_receives_delta() {
        let (job, _rx) = TaskJob::new(|delta| TaskOutcome::ready(delta));
        let shared = TaskShared::new(Lane::Render);
        let seed = RecordSeed::new(
            Duration::from_millis(10),
            &TaskOptions::default(),
            job,
            shared,
        );
        let record = TaskRecord::new(1, seed);
        assert_eq!(record.delta(Duration::from_millis(25)), Duration::from_millis(15));
        assert_eq!(record.delta(Duration::from_millis(5)), Duration::ZERO);
    }

    #[test]
    fn rearm_moves_queue_time_forward() {
        let (job, _rx) = TaskJob::new(|_| TaskOutcome::ready(()));
        let seed = RecordSeed::new(
            Duration::ZERO,
            &TaskOptions::new().delay_ms(4).persistent(),
            job,
            TaskShared::new(Lane::Idle),
        );
        let mut record = TaskRecord::new(7, seed);
        record.set_status(TaskStatus::Running);
        record.rearm(Duration::from_millis(10));
        assert_eq!(record.queue_time, Duration::from_millis(14));
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.shared.status(), TaskStatus::Pending);
    }
}
