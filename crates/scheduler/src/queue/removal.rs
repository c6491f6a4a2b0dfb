use std::sync::Arc;

use lanes_core::Lane;
use tracing::{debug, info};

use crate::error::{SchedulerError, TaskError};
use crate::handle::TaskControl;
use crate::task::{DetachedTask, TaskStatus};

use super::{Effects, QueueInner, QueueState};

impl QueueInner {
    /// Cancel the record at `slot` if it still belongs to task `id`.
    ///
    /// Queued records are unlinked and aborted. A running persistent record
    /// is marked so it is not re-admitted; any other running or finished
    /// record is left alone.
    pub(crate) fn cancel_task(&self, slot: usize, id: u64) -> bool {
        let (canceled, effects) = self.lock().cancel_record(self.lane, slot, id);
        effects.apply(self);
        if canceled {
            debug!(lane = %self.lane, id, "task canceled");
        }
        canceled
    }

    pub(crate) fn take(self: &Arc<Self>, task: &TaskControl) -> Result<bool, SchedulerError> {
        if self.lock().disposed {
            return Err(SchedulerError::Disposed(self.lane));
        }
        let location = task.location();
        let Some(source) = location.queue.upgrade() else {
            return Ok(false);
        };
        if Arc::ptr_eq(&source, self) {
            return Ok(false);
        }

        let (detached, source_effects) = source.lock().extract(location.slot, location.id);
        source_effects.apply(&source);
        let Some(detached) = detached else {
            return Ok(false);
        };

        let now = self.clock.now();
        let shared = Arc::clone(&detached.shared);
        let mut effects = Effects::default();
        let adopted = {
            let mut state = self.lock();
            if state.disposed {
                // Disposed between the check above and now: the task is dropped.
                effects.settle(
                    Some(detached.job.completer),
                    Err(TaskError::Aborted {
                        id: location.id,
                        lane: self.lane,
                    }),
                );
                false
            } else {
                let slot = state.allocate(detached);
                shared.relocate(self.location(slot, state.arena[slot].id));
                state.admit(slot, now);
                state.request_flush(now, &mut effects);
                true
            }
        };
        effects.apply(self);

        if !adopted {
            return Err(SchedulerError::Disposed(self.lane));
        }
        debug!(from = %source.lane, to = %self.lane, "task transferred");
        Ok(true)
    }

    pub(crate) fn dispose(&self) {
        let effects = self.lock().dispose(self.lane);
        effects.apply(self);
        self.signal.cancel();
        info!(lane = %self.lane, "lane disposed");
    }
}

impl QueueState {
    fn cancel_record(&mut self, lane: Lane, slot: usize, id: u64) -> (bool, Effects) {
        let mut effects = Effects::default();
        let Some(record) = self.arena.get(slot).filter(|r| r.id == id) else {
            return (false, effects);
        };
        let queued = record.status == TaskStatus::Pending && record.location.is_some();
        let running_persistent = record.status == TaskStatus::Running
            && record.is_persistent()
            && !record.cancel_pending;

        if queued {
            self.abort(lane, slot, &mut effects);
            self.recheck_yield(&mut effects);
            (true, effects)
        } else if running_persistent {
            self.arena[slot].cancel_pending = true;
            (true, effects)
        } else {
            (false, effects)
        }
    }

    /// Unlink a queued record, reject it with an abort error, and release it.
    fn abort(&mut self, lane: Lane, slot: usize, effects: &mut Effects) {
        self.unlink(slot);
        let error = self.abort_error(slot, lane);
        let record = &mut self.arena[slot];
        record.set_status(TaskStatus::Canceled);
        effects.settle(record.completer.take(), Err(error));
        self.counters.tasks_canceled += 1;
        self.release(slot);
    }

    /// Pull a queued record out for transfer. The record slot is recycled
    /// here; the task continues life in the destination queue.
    fn extract(&mut self, slot: usize, id: u64) -> (Option<DetachedTask>, Effects) {
        let mut effects = Effects::default();
        let queued = self
            .arena
            .get(slot)
            .is_some_and(|r| r.id == id && r.status == TaskStatus::Pending && r.location.is_some());
        if !queued {
            return (None, effects);
        }
        self.unlink(slot);
        let detached = self.arena[slot].detach();
        // The handle now tracks the destination record; mark the vacated
        // record without touching the shared status.
        self.arena[slot].status = TaskStatus::Canceled;
        self.release(slot);
        self.recheck_yield(&mut effects);
        (detached, effects)
    }

    fn dispose(&mut self, lane: Lane) -> Effects {
        let mut effects = Effects::default();
        self.disposed = true;
        self.flush_requested = false;
        self.wake_at = None;
        let queued: Vec<usize> = [&self.processing, &self.pending, &self.delayed]
            .into_iter()
            .flat_map(|list| list.slots(&self.arena))
            .collect();
        for slot in queued {
            self.abort(lane, slot, &mut effects);
        }
        self.release_yield(&mut effects);
        effects
    }
}
