//! Producer-facing task handles.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::FutureExt;
use lanes_core::Lane;

use crate::error::TaskError;
use crate::task::{TaskLocation, TaskShared, TaskStatus};

/// Handle to a queued task.
///
/// Awaiting the handle yields the task's result: its value, the failure it
/// reported, or [`TaskError::Aborted`] when it was canceled or its queue
/// went away. Dropping the handle does not cancel the task.
#[must_use = "dropping a handle discards the task's result"]
pub struct TaskHandle<T> {
    control: TaskControl,
    result: oneshot::Receiver<Result<T, TaskError>>,
}

/// Clonable control half of a [`TaskHandle`]: status, cancel, and location.
#[derive(Clone)]
pub struct TaskControl {
    shared: Arc<TaskShared>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(
        shared: Arc<TaskShared>,
        result: oneshot::Receiver<Result<T, TaskError>>,
    ) -> Self {
        Self {
            control: TaskControl { shared },
            result,
        }
    }

    pub fn control(&self) -> &TaskControl {
        &self.control
    }

    /// Queue-scoped id of the record currently holding the task. Changes when
    /// the task is transferred to another lane.
    pub fn id(&self) -> u64 {
        self.control.id()
    }

    pub fn lane(&self) -> Lane {
        self.control.lane()
    }

    pub fn status(&self) -> TaskStatus {
        self.control.status()
    }

    pub fn run_count(&self) -> u64 {
        self.control.run_count()
    }

    /// See [`TaskControl::cancel`].
    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }

    /// The result if the task has already settled, without waiting.
    pub fn try_result(&mut self) -> Option<Result<T, TaskError>> {
        match self.result.try_recv() {
            Ok(Some(result)) => Some(result),
            Ok(None) => None,
            Err(oneshot::Canceled) => Some(Err(self.control.abort_error())),
        }
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.result.poll_unpin(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // The record was dropped without settling: its queue is gone.
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(self.control.abort_error())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.control.fmt(f)
    }
}

impl TaskControl {
    pub fn id(&self) -> u64 {
        self.shared.location().id
    }

    pub fn lane(&self) -> Lane {
        self.shared.location().lane
    }

    pub fn status(&self) -> TaskStatus {
        self.shared.status()
    }

    pub fn run_count(&self) -> u64 {
        self.shared.run_count()
    }

    /// Cancel the task.
    ///
    /// A queued task is unlinked and its result rejected with an abort
    /// error. A persistent task that is running finishes its current run and
    /// is not queued again. Returns `false` when nothing was canceled: the
    /// task is running (and not persistent), already finished, or already
    /// canceled.
    pub fn cancel(&self) -> bool {
        let location = self.location();
        match location.queue.upgrade() {
            Some(queue) => queue.cancel_task(location.slot, location.id),
            None => false,
        }
    }

    pub(crate) fn location(&self) -> TaskLocation {
        self.shared.location()
    }

    fn abort_error(&self) -> TaskError {
        let location = self.location();
        TaskError::Aborted {
            id: location.id,
            lane: location.lane,
        }
    }
}

impl std::fmt::Debug for TaskControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let location = self.location();
        f.debug_struct("TaskControl")
            .field("id", &location.id)
            .field("lane", &location.lane)
            .field("status", &self.status())
            .field("run_count", &self.run_count())
            .finish()
    }
}
