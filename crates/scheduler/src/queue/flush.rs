use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use lanes_core::Lane;
use tracing::{debug, trace, warn};

use crate::error::TaskError;
use crate::task::{invoke, panic_message, RawOutcome, RawResult, TaskCallback, TaskStatus};

use super::{Effects, QueueInner, QueueState};

/// A record popped for execution, with its callback taken out so it can
/// run without the state lock.
pub(crate) struct RunJob {
    slot: usize,
    id: u64,
    callback: TaskCallback,
    delta: Duration,
}

impl QueueInner {
    /// One flush cycle: promote due delayed work, take the pending batch,
    /// and run it head to tail. Work queued meanwhile waits for the next cycle.
    pub(crate) fn flush(self: &Arc<Self>) {
        let now = self.clock.now();
        let batch = {
            let mut state = self.lock();
            if state.disposed || state.flushing {
                return;
            }
            state.flush_requested = false;
            state.wake_at = None;
            if state.suspender.is_some() {
                trace!(lane = %self.lane, "lane suspended, flush skipped");
                return;
            }
            state.flushing = true;
            state.counters.flushes += 1;
            state.counters.last_flush_at = Some(Utc::now());
            state.promote_due(now);
            state.take_batch()
        };
        debug!(lane = %self.lane, batch, "flush started");

        loop {
            let job = self.lock().next_job(now);
            let Some(job) = job else {
                break;
            };
            self.execute(job, now);
        }

        let finished = self.clock.now();
        let effects = {
            let mut state = self.lock();
            let mut effects = Effects::default();
            state.end_flush(finished, &mut effects);
            effects
        };
        effects.apply(self);
        debug!(lane = %self.lane, "flush finished");
    }

    /// Run a job outside the lock and record its outcome.
    pub(crate) fn execute(self: &Arc<Self>, job: RunJob, now: Duration) {
        let RunJob {
            slot,
            id,
            callback,
            delta,
        } = job;
        trace!(lane = %self.lane, id, ?delta, "running task");
        let (callback, outcome) = invoke(callback, delta);
        let effects = self
            .lock()
            .finish_run(Arc::downgrade(self), self.lane, slot, id, callback, outcome, now);
        effects.apply(self);
    }

    /// Called when a deferred callback's future settles.
    pub(crate) fn complete_async_task(&self, slot: usize, id: u64, result: RawResult) {
        let now = self.clock.now();
        let effects = self.lock().complete_async(self.lane, slot, id, result, now);
        effects.apply(self);
    }
}

impl QueueState {
    /// Move every delayed record whose eligibility instant has passed into
    /// `pending`, keeping their order.
    pub(super) fn promote_due(&mut self, now: Duration) {
        while let Some(head) = self.delayed.head() {
            if self.arena[head].queue_time > now {
                break;
            }
            self.delayed.unlink(&mut self.arena, head);
            self.pending.push_back(&mut self.arena, head);
        }
    }

    /// Swap `pending` into `processing`, leaving `pending` empty for
    /// anything queued during this flush.
    fn take_batch(&mut self) -> usize {
        self.processing.append(&mut self.pending, &mut self.arena);
        self.processing.len()
    }

    fn next_job(&mut self, now: Duration) -> Option<RunJob> {
        while let Some(slot) = self.processing.head() {
            self.unlink(slot);
            if let Some(job) = self.begin_run(slot, now) {
                return Some(job);
            }
        }
        None
    }

    /// Mark an unlinked record running and hand out its callback.
    pub(super) fn begin_run(&mut self, slot: usize, now: Duration) -> Option<RunJob> {
        let record = &mut self.arena[slot];
        let callback = record.callback.take()?;
        record.set_status(TaskStatus::Running);
        Some(RunJob {
            slot,
            id: record.id,
            callback,
            delta: record.delta(now),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_run(
        &mut self,
        queue: Weak<QueueInner>,
        lane: Lane,
        slot: usize,
        id: u64,
        callback: TaskCallback,
        outcome: RawOutcome,
        now: Duration,
    ) -> Effects {
        let mut effects = Effects::default();
        let Some(record) = self.arena.get_mut(slot).filter(|r| r.id == id) else {
            return effects;
        };
        record.callback = Some(callback);
        record.record_run();
        let suspend = record.flags.suspend;
        self.counters.tasks_run += 1;

        match outcome {
            RawOutcome::Immediate(result) => self.settle_run(lane, slot, result, now, &mut effects),
            RawOutcome::Deferred(future) => {
                self.pending_async += 1;
                if suspend {
                    trace!(lane = %lane, id, "lane suspended by task");
                    self.suspender = Some(slot);
                    self.pending.prepend(&mut self.processing, &mut self.arena);
                }
                effects.spawns.push(completion(queue, slot, id, future));
            }
        }
        effects
    }

    fn complete_async(
        &mut self,
        lane: Lane,
        slot: usize,
        id: u64,
        result: RawResult,
        now: Duration,
    ) -> Effects {
        let mut effects = Effects::default();
        match self.arena.get(slot) {
            Some(record) if record.id == id && record.status == TaskStatus::Running => {}
            _ => return effects,
        }
        self.pending_async -= 1;
        if self.suspender == Some(slot) {
            self.suspender = None;
            if !self.pending.is_empty() || !self.delayed.is_empty() {
                self.request_flush(now, &mut effects);
            }
        }
        self.settle_run(lane, slot, result, now, &mut effects);
        self.check_yield(&mut effects);
        effects
    }

    /// Resolve a finished run: re-admit persistent work, otherwise settle
    /// the result channel and release the record.
    fn settle_run(
        &mut self,
        lane: Lane,
        slot: usize,
        result: RawResult,
        now: Duration,
        effects: &mut Effects,
    ) {
        let disposed = self.disposed;
        let record = &mut self.arena[slot];
        match result {
            Err(error) => {
                warn!(lane = %lane, id = record.id, error = %error, "task failed");
                record.set_status(TaskStatus::Completed);
                effects.settle(record.completer.take(), Err(error));
                self.counters.tasks_failed += 1;
                self.release(slot);
            }
            Ok(()) if record.is_persistent() && !record.cancel_pending && !disposed => {
                record.rearm(now);
                self.discharge_yield(slot);
                self.admit(slot, now);
                self.request_flush(now, effects);
            }
            Ok(()) => {
                record.set_status(TaskStatus::Completed);
                effects.settle(record.completer.take(), Ok(()));
                self.release(slot);
            }
        }
    }

    fn end_flush(&mut self, now: Duration, effects: &mut Effects) {
        self.flushing = false;
        if self.suspender.is_none() && (!self.pending.is_empty() || !self.delayed.is_empty()) {
            self.request_flush(now, effects);
        }
        self.check_yield(effects);
    }
}

/// Drive a deferred callback and report back to its queue when it settles.
fn completion(
    queue: Weak<QueueInner>,
    slot: usize,
    id: u64,
    future: BoxFuture<'static, RawResult>,
) -> BoxFuture<'static, ()> {
    async move {
        let result = match AssertUnwindSafe(future).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(TaskError::Panicked(panic_message(payload))),
        };
        if let Some(queue) = queue.upgrade() {
            queue.complete_async_task(slot, id, result);
        }
    }
    .boxed()
}
