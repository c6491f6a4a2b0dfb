use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use crate::error::SchedulerError;
use crate::handle::TaskHandle;
use crate::list::ListKind;
use crate::task::{
    RecordSeed, TaskJob, TaskLocation, TaskOptions, TaskOutcome, TaskRecord, TaskShared, TaskStatus,
};

use super::{Effects, QueueInner, QueueState};

impl QueueInner {
    pub(crate) fn queue_task<T, F>(
        self: &Arc<Self>,
        callback: F,
        options: TaskOptions,
    ) -> Result<TaskHandle<T>, SchedulerError>
    where
        T: Send + 'static,
        F: FnMut(Duration) -> TaskOutcome<T> + Send + 'static,
    {
        let (job, receiver) = TaskJob::new(callback);
        let shared = TaskShared::new(self.lane);
        let now = self.clock.now();
        let mut effects = Effects::default();

        let inline = {
            let mut state = self.lock();
            if state.disposed {
                return Err(SchedulerError::Disposed(self.lane));
            }
            let seed = RecordSeed::new(now, &options, job, Arc::clone(&shared));
            let slot = state.allocate(seed);
            shared.relocate(self.location(slot, state.arena[slot].id));

            if options.delay.is_zero() && options.preempt && state.flushing {
                trace!(lane = %self.lane, id = state.arena[slot].id, "preempting flush");
                state.begin_run(slot, now)
            } else {
                state.admit(slot, now);
                state.request_flush(now, &mut effects);
                None
            }
        };
        effects.apply(self);

        if let Some(job) = inline {
            self.execute(job, now);
        }

        Ok(TaskHandle::new(shared, receiver))
    }

    pub(crate) fn location(self: &Arc<Self>, slot: usize, id: u64) -> TaskLocation {
        TaskLocation {
            queue: Arc::downgrade(self),
            lane: self.lane,
            slot,
            id,
        }
    }
}

impl QueueState {
    /// Place a seed in a recycled record when the pool has one, else allocate.
    pub(super) fn allocate(&mut self, seed: RecordSeed) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        match self.task_pool.pop() {
            Some(slot) => {
                self.arena[slot].reset(id, seed);
                self.counters.reused += 1;
                slot
            }
            None => {
                self.counters.allocations += 1;
                self.arena.insert(TaskRecord::new(id, seed))
            }
        }
    }

    /// Link a pending record into `delayed` or `pending` depending on
    /// whether its eligibility instant has passed.
    pub(super) fn admit(&mut self, slot: usize, now: Duration) {
        let record = &self.arena[slot];
        debug_assert_eq!(record.status, TaskStatus::Pending);
        let persistent = record.is_persistent();
        if record.queue_time > now {
            self.delayed.insert_by_queue_time(&mut self.arena, slot);
        } else {
            self.pending.push_back(&mut self.arena, slot);
        }
        if !persistent {
            self.finite_queued += 1;
        }
    }

    /// Unlink a record from whichever list holds it.
    pub(super) fn unlink(&mut self, slot: usize) {
        let Some(kind) = self.arena[slot].location else {
            return;
        };
        match kind {
            ListKind::Delayed => self.delayed.unlink(&mut self.arena, slot),
            ListKind::Pending => self.pending.unlink(&mut self.arena, slot),
            ListKind::Processing => self.processing.unlink(&mut self.arena, slot),
        }
        if !self.arena[slot].is_persistent() {
            self.finite_queued -= 1;
        }
    }

    /// Return a terminal record to the pool, or drop it.
    pub(super) fn release(&mut self, slot: usize) {
        self.discharge_yield(slot);
        let record = &mut self.arena[slot];
        debug_assert!(record.location.is_none());
        record.callback = None;
        record.completer = None;
        if record.flags.reusable && self.task_pool.len() < self.pool_capacity {
            self.task_pool.push(slot);
        } else {
            self.arena.remove(slot);
        }
    }
}
