//! The `yield` primitive: await drainage of a lane's finite work.
//!
//! Finite work is every non-persistent record (queued or in flight) plus one
//! more completed run of each persistent record alive when the waiter opened.
//! Those records are stamped with the waiter's epoch and unstamped when a run
//! finishes or they leave the lane. The waiter is checked at the end of each
//! flush and whenever a deferred task settles, so a persistent task that keeps
//! re-queueing itself never holds a caller forever.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::future::Shared;
use futures::FutureExt;

use crate::task::TaskStatus;

use super::{Effects, QueueInner, QueueState};

/// Memoized waiter: concurrent `yield` calls share one receiver.
pub(crate) struct YieldWaiter {
    sender: oneshot::Sender<()>,
    shared: Shared<oneshot::Receiver<()>>,
}

/// Future returned by `yield`. Resolves once the lane has drained its finite
/// work, or immediately when the lane was already empty.
#[must_use = "futures do nothing unless polled"]
pub struct YieldFuture {
    inner: Option<Shared<oneshot::Receiver<()>>>,
}

impl YieldFuture {
    fn ready() -> Self {
        Self { inner: None }
    }

    /// Whether this future shares its waiter with `other`.
    pub fn shares_waiter_with(&self, other: &YieldFuture) -> bool {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Future for YieldFuture {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match self.inner.as_mut() {
            None => Poll::Ready(()),
            // A dropped sender means the queue went away: nothing left to wait for.
            Some(shared) => shared.poll_unpin(cx).map(|_| ()),
        }
    }
}

impl QueueInner {
    pub(crate) fn yield_now(self: &Arc<Self>) -> YieldFuture {
        let mut state = self.lock();
        if state.is_empty() {
            return YieldFuture::ready();
        }
        let shared = match &state.yield_waiter {
            Some(waiter) => waiter.shared.clone(),
            None => state.open_yield(),
        };
        YieldFuture {
            inner: Some(shared),
        }
    }
}

impl QueueState {
    /// Install a new waiter. Every live persistent record now owes it one
    /// completed run.
    fn open_yield(&mut self) -> Shared<oneshot::Receiver<()>> {
        self.yield_epoch += 1;
        let epoch = self.yield_epoch;
        let mut owed = 0;
        for record in self.arena.iter_mut() {
            let live = matches!(record.status, TaskStatus::Pending | TaskStatus::Running);
            if live && record.is_persistent() {
                record.owed_yield = epoch;
                owed += 1;
            }
        }
        self.owed_runs = owed;

        let (sender, receiver) = oneshot::channel();
        let shared = receiver.shared();
        self.yield_waiter = Some(YieldWaiter {
            sender,
            shared: shared.clone(),
        });
        shared
    }

    /// The record at `slot` finished a run or is leaving the lane.
    pub(super) fn discharge_yield(&mut self, slot: usize) {
        let epoch = self.yield_epoch;
        let open = self.yield_waiter.is_some();
        let Some(record) = self.arena.get_mut(slot) else {
            return;
        };
        if record.owed_yield == 0 {
            return;
        }
        if open && record.owed_yield == epoch {
            self.owed_runs -= 1;
        }
        record.owed_yield = 0;
    }

    /// Release the waiter when the lane has drained.
    pub(super) fn check_yield(&mut self, effects: &mut Effects) {
        if self.yield_waiter.is_some() && self.has_drained() {
            self.release_yield(effects);
        }
    }

    /// Re-check after work left the lane through cancel or transfer. Inside
    /// a flush the running job is unlinked, so the check waits for the end
    /// of the flush.
    pub(super) fn recheck_yield(&mut self, effects: &mut Effects) {
        if !self.flushing {
            self.check_yield(effects);
        }
    }

    pub(super) fn release_yield(&mut self, effects: &mut Effects) {
        if let Some(waiter) = self.yield_waiter.take() {
            self.owed_runs = 0;
            effects.yield_release = Some(waiter.sender);
        }
    }
}
