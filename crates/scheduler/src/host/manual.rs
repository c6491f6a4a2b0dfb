//! A host whose time, flushes, and async work advance only when told to.
//!
//! Every lane can be stepped independently and deterministically, which is
//! what the property tests rely on.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::task::noop_waker_ref;
use futures::FutureExt;
use lanes_core::Lane;

use crate::error::SchedulerError;
use crate::signal::{FlushSignal, FlushTarget, SignalRegistry};

use super::{Clock, Host, Spawn};

// ── Clock ─────────────────────────────────────────────────────

/// Clock that only moves when advanced.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) += by;
    }

    pub fn set(&self, to: Duration) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Spawner ───────────────────────────────────────────────────

/// Holds spawned futures until [`run_until_stalled`](Self::run_until_stalled).
#[derive(Default)]
pub struct ManualSpawner {
    tasks: Mutex<Vec<BoxFuture<'static, ()>>>,
}

impl ManualSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of spawned futures that have not completed.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Poll spawned futures until a full pass completes none of them and
    /// spawns nothing new. Returns how many completed.
    pub fn run_until_stalled(&self) -> usize {
        let mut cx = Context::from_waker(noop_waker_ref());
        let mut completed = 0;
        loop {
            let batch = std::mem::take(&mut *self.lock());
            if batch.is_empty() {
                break;
            }
            let mut parked = Vec::with_capacity(batch.len());
            let before = completed;
            for mut future in batch {
                match future.poll_unpin(&mut cx) {
                    Poll::Ready(()) => completed += 1,
                    Poll::Pending => parked.push(future),
                }
            }
            let mut tasks = self.lock();
            let spawned_more = !tasks.is_empty();
            // Keep spawn order: survivors first, then anything spawned meanwhile.
            parked.append(&mut tasks);
            *tasks = parked;
            if completed == before && !spawned_more {
                break;
            }
        }
        completed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<BoxFuture<'static, ()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Spawn for ManualSpawner {
    fn spawn(&self, future: BoxFuture<'static, ()>) {
        self.lock().push(future);
    }
}

// ── Flush signal ──────────────────────────────────────────────

/// Flush signal that records requests and flushes only on [`fire`](Self::fire).
pub struct ManualFlushSignal {
    lane: Lane,
    target: Mutex<Option<FlushTarget>>,
    requested: AtomicBool,
    requests: AtomicU64,
}

impl ManualFlushSignal {
    pub fn new(lane: Lane) -> Self {
        Self {
            lane,
            target: Mutex::new(None),
            requested: AtomicBool::new(false),
            requests: AtomicU64::new(0),
        }
    }

    /// Whether a flush request is outstanding.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Total `request` calls seen.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Flush the bound queue if a request is outstanding. Returns whether a
    /// flush ran.
    pub fn fire(&self) -> bool {
        if !self.requested.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.flush_now()
    }

    /// Flush the bound queue whether or not a flush was requested.
    pub fn flush_now(&self) -> bool {
        self.requested.store(false, Ordering::Release);
        let target = self
            .target
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        target.is_some_and(|target| target.flush())
    }
}

impl FlushSignal for ManualFlushSignal {
    fn lane(&self) -> Lane {
        self.lane
    }

    fn bind(&self, target: FlushTarget) -> Result<(), SchedulerError> {
        let mut slot = self.target.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(FlushTarget::is_alive) {
            return Err(SchedulerError::SignalAlreadyBound(self.lane));
        }
        *slot = Some(target);
        Ok(())
    }

    fn request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.requested.store(true, Ordering::Release);
    }

    fn cancel(&self) {
        self.requested.store(false, Ordering::Release);
    }
}

// ── Host bundle ───────────────────────────────────────────────

/// A clock, a spawner, and five manual signals.
pub struct ManualHost {
    pub clock: Arc<ManualClock>,
    pub spawner: Arc<ManualSpawner>,
    signals: [Arc<ManualFlushSignal>; Lane::COUNT],
}

impl Default for ManualHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualHost {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(ManualClock::new()),
            spawner: Arc::new(ManualSpawner::new()),
            signals: Lane::ALL.map(|lane| Arc::new(ManualFlushSignal::new(lane))),
        }
    }

    /// A [`Host`] sharing this bundle's clock, spawner, and signals.
    pub fn host(&self) -> Host {
        let mut registry = SignalRegistry::new();
        for signal in &self.signals {
            registry.replace(Arc::clone(signal) as Arc<dyn FlushSignal>);
        }
        Host::new(
            Arc::clone(&self.clock) as Arc<dyn Clock>,
            Arc::clone(&self.spawner) as Arc<dyn Spawn>,
            registry,
        )
    }

    pub fn signal(&self, lane: Lane) -> &Arc<ManualFlushSignal> {
        &self.signals[lane.index()]
    }

    /// Fire one lane's signal.
    pub fn fire(&self, lane: Lane) -> bool {
        self.signal(lane).fire()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub fn run_until_stalled(&self) -> usize {
        self.spawner.run_until_stalled()
    }

    /// Fire every requested lane once, in lane order, then drive async work.
    /// Returns how many lanes flushed.
    pub fn tick(&self) -> usize {
        let flushed = Lane::ALL.into_iter().filter(|&lane| self.fire(lane)).count();
        self.run_until_stalled();
        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::oneshot;

    #[test]
    fn clock_advances_only_when_told() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);
        clock.advance(Duration::from_millis(5));
        clock.advance(Duration::from_millis(5));
        assert_eq!(clock.now(), Duration::from_millis(10));
        clock.set(Duration::from_secs(1));
        assert_eq!(clock.now(), Duration::from_secs(1));
    }

    #[test]
    fn spawner_parks_futures_until_woken_by_progress() {
        let spawner = ManualSpawner::new();
        let (tx, rx) = oneshot::channel::<u32>();
        let (done_tx, mut done_rx) = oneshot::channel::<u32>();
        spawner.spawn(
            async move {
                let value = rx.await.unwrap_or(0);
                let _ = done_tx.send(value + 1);
            }
            .boxed(),
        );

        assert_eq!(spawner.run_until_stalled(), 0);
        assert_eq!(spawner.pending(), 1);

        tx.send(41).unwrap();
        assert_eq!(spawner.run_until_stalled(), 1);
        assert_eq!(spawner.pending(), 0);
        assert_eq!(done_rx.try_recv().unwrap(), Some(42));
    }

    #[test]
    fn signal_fires_only_when_requested() {
        let signal = ManualFlushSignal::new(Lane::Idle);
        assert!(!signal.fire());
        signal.request();
        signal.request();
        assert!(signal.is_requested());
        assert_eq!(signal.request_count(), 2);
        signal.cancel();
        assert!(!signal.is_requested());
        // Unbound: nothing to flush even when requested.
        signal.request();
        assert!(!signal.fire());
        assert!(!signal.is_requested());
    }

    #[test]
    fn host_registers_every_lane() {
        let manual = ManualHost::new();
        let host = manual.host();
        assert!(host.signals.is_complete());
        for lane in Lane::ALL {
            assert_eq!(host.signals.get(lane).unwrap().lane(), lane);
        }
    }
}
