//! Tokio-backed host: each lane paced by its own timing policy.
//!
//! | lane         | flush fires after                      |
//! |--------------|----------------------------------------|
//! | `microTask`  | one `yield_now`                        |
//! | `render`     | the next frame boundary                |
//! | `macroTask`  | `macro_task_delay` (or one yield)      |
//! | `postRender` | the next frame boundary, then a yield  |
//! | `idle`       | `idle_timeout`                         |
//!
//! Only one [`TokioFlushSignal`] per lane may exist in the process at a time.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use lanes_core::{Lane, SchedulerConfig};
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::SchedulerError;
use crate::signal::{FlushSignal, FlushTarget, SignalRegistry};

use super::{Clock, Host, Spawn};

#[allow(clippy::declare_interior_mutable_const)]
const UNCLAIMED: AtomicBool = AtomicBool::new(false);

/// Lanes that currently have a live tokio signal.
static CLAIMS: [AtomicBool; Lane::COUNT] = [UNCLAIMED; Lane::COUNT];

// ── Clock & spawner ───────────────────────────────────────────

/// Wall clock measured from construction. Reads tokio's clock, so paused
/// test time applies.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Spawns deferred task futures onto a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioSpawner {
    handle: Handle,
}

impl TokioSpawner {
    /// Capture the current runtime.
    pub fn new() -> Result<Self, SchedulerError> {
        let handle = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
        Ok(Self { handle })
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self { handle }
    }
}

impl Spawn for TokioSpawner {
    fn spawn(&self, future: BoxFuture<'static, ()>) {
        drop(self.handle.spawn(future));
    }
}

// ── Pacing ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Pacing {
    Yield,
    Frame(Duration),
    Timer(Duration),
    PostFrame(Duration),
    Idle(Duration),
}

impl Pacing {
    fn for_lane(lane: Lane, config: &SchedulerConfig) -> Self {
        match lane {
            Lane::MicroTask => Pacing::Yield,
            Lane::Render => Pacing::Frame(config.frame_interval()),
            Lane::MacroTask => Pacing::Timer(config.macro_task_delay()),
            Lane::PostRender => Pacing::PostFrame(config.frame_interval()),
            Lane::Idle => Pacing::Idle(config.idle_timeout()),
        }
    }

    async fn wait(self, origin: Instant) {
        match self {
            Pacing::Yield => tokio::task::yield_now().await,
            Pacing::Frame(interval) => next_frame(origin, interval).await,
            Pacing::Timer(delay) if delay.is_zero() => tokio::task::yield_now().await,
            Pacing::Timer(delay) | Pacing::Idle(delay) => tokio::time::sleep(delay).await,
            Pacing::PostFrame(interval) => {
                next_frame(origin, interval).await;
                tokio::task::yield_now().await;
            }
        }
    }
}

/// Sleep until the next multiple of `interval` after `origin`.
async fn next_frame(origin: Instant, interval: Duration) {
    let elapsed = origin.elapsed().as_nanos();
    let period = interval.as_nanos().max(1);
    let frames = elapsed / period + 1;
    let offset = u64::try_from(frames * period).unwrap_or(u64::MAX);
    tokio::time::sleep_until(origin + Duration::from_nanos(offset)).await;
}

// ── Flush signal ──────────────────────────────────────────────

struct SignalState {
    lane: Lane,
    pacing: Pacing,
    origin: Instant,
    requested: AtomicBool,
    /// Bumped on cancel so stale scheduled flushes and wakes do nothing.
    generation: AtomicU64,
    target: Mutex<Option<FlushTarget>>,
}

impl SignalState {
    fn target(&self) -> Option<FlushTarget> {
        self.target
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn request(self: &Arc<Self>, handle: &Handle) {
        if self.requested.swap(true, Ordering::AcqRel) {
            return;
        }
        let generation = self.generation.load(Ordering::Acquire);
        drop(handle.spawn(Arc::clone(self).fire_after_pacing(generation)));
    }

    async fn fire_after_pacing(self: Arc<Self>, generation: u64) {
        self.pacing.wait(self.origin).await;
        if self.generation.load(Ordering::Acquire) != generation {
            trace!(lane = %self.lane, "stale flush request dropped");
            return;
        }
        if !self.requested.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(target) = self.target() {
            target.flush();
        }
    }
}

/// Process-wide flush signal for one lane, running on tokio.
pub struct TokioFlushSignal {
    state: Arc<SignalState>,
    handle: Handle,
}

impl TokioFlushSignal {
    /// Claim `lane` for this process. Fails with `DuplicateSignal` while
    /// another tokio signal for the lane is alive, and with `NoRuntime`
    /// outside a tokio runtime.
    pub fn new(lane: Lane, config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        let handle = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
        if CLAIMS[lane.index()]
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SchedulerError::DuplicateSignal(lane));
        }
        let pacing = Pacing::for_lane(lane, config);
        debug!(lane = %lane, ?pacing, "flush signal claimed");
        Ok(Self {
            state: Arc::new(SignalState {
                lane,
                pacing,
                origin: Instant::now(),
                requested: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                target: Mutex::new(None),
            }),
            handle,
        })
    }

    /// Whether a tokio signal for `lane` is currently alive.
    pub fn is_claimed(lane: Lane) -> bool {
        CLAIMS[lane.index()].load(Ordering::Acquire)
    }
}

impl FlushSignal for TokioFlushSignal {
    fn lane(&self) -> Lane {
        self.state.lane
    }

    fn bind(&self, target: FlushTarget) -> Result<(), SchedulerError> {
        let mut slot = self
            .state
            .target
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(FlushTarget::is_alive) {
            return Err(SchedulerError::SignalAlreadyBound(self.state.lane));
        }
        *slot = Some(target);
        Ok(())
    }

    fn request(&self) {
        self.state.request(&self.handle);
    }

    fn request_after(&self, delay: Duration) {
        let generation = self.state.generation.load(Ordering::Acquire);
        let state = Arc::clone(&self.state);
        let handle = self.handle.clone();
        drop(self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if state.generation.load(Ordering::Acquire) == generation {
                trace!(lane = %state.lane, ?delay, "timed wake");
                state.request(&handle);
            }
        }));
    }

    fn cancel(&self) {
        self.state.requested.store(false, Ordering::Release);
        self.state.generation.fetch_add(1, Ordering::AcqRel);
    }
}

impl Drop for TokioFlushSignal {
    fn drop(&mut self) {
        self.cancel();
        CLAIMS[self.state.lane.index()].store(false, Ordering::Release);
        debug!(lane = %self.state.lane, "flush signal released");
    }
}

// ── Host ──────────────────────────────────────────────────────

impl Host {
    /// A host on the current tokio runtime with one claimed signal per lane.
    ///
    /// Signals claimed before a failure are released again.
    pub fn tokio(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        let mut signals = SignalRegistry::new();
        for lane in Lane::ALL {
            signals.register(Arc::new(TokioFlushSignal::new(lane, config)?))?;
        }
        Ok(Host::new(
            Arc::new(SystemClock::new()),
            Arc::new(TokioSpawner::new()?),
            signals,
        ))
    }
}
