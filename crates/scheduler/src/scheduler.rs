use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use lanes_core::{Lane, SchedulerConfig};
use tracing::info;

use crate::error::SchedulerError;
use crate::handle::TaskHandle;
use crate::host::Host;
use crate::metrics::SchedulerStats;
use crate::queue::{PriorityQueue, YieldFuture};
use crate::task::{TaskOptions, TaskOutcome};

/// Five independent lanes behind one API.
///
/// Each lane is a [`PriorityQueue`] bound to the host's flush signal for
/// that lane. The scheduler itself holds no task state; it routes calls to
/// the right queue and guards against use after [`dispose`](Self::dispose).
pub struct Scheduler {
    config: SchedulerConfig,
    queues: Vec<PriorityQueue>,
    disposed: AtomicBool,
}

impl Scheduler {
    /// Build one queue per lane, binding each to its host signal.
    pub fn new(config: SchedulerConfig, host: Host) -> Result<Self, SchedulerError> {
        config.validate()?;
        let queues = Lane::ALL
            .into_iter()
            .map(|lane| {
                PriorityQueue::new(
                    lane,
                    config.pool_capacity,
                    host.signals.get(lane)?,
                    Arc::clone(&host.clock),
                    Arc::clone(&host.spawner),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        info!(
            "Scheduler ready: {} lanes, pool capacity {}, default lane {}",
            queues.len(),
            config.pool_capacity,
            config.default_lane
        );
        Ok(Self {
            config,
            queues,
            disposed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The queue backing `lane`.
    pub fn task_queue(&self, lane: Lane) -> &PriorityQueue {
        &self.queues[lane.index()]
    }

    /// Queue a callback on `lane`. The lane given here wins over
    /// `options.priority`.
    pub fn queue_task<T, F>(
        &self,
        lane: Lane,
        callback: F,
        options: TaskOptions,
    ) -> Result<TaskHandle<T>, SchedulerError>
    where
        T: Send + 'static,
        F: FnMut(Duration) -> TaskOutcome<T> + Send + 'static,
    {
        self.ensure_live(lane)?;
        self.task_queue(lane).queue_task(callback, options)
    }

    /// Queue a callback on `options.priority`, or the configured default lane.
    pub fn queue<T, F>(&self, callback: F, options: TaskOptions) -> Result<TaskHandle<T>, SchedulerError>
    where
        T: Send + 'static,
        F: FnMut(Duration) -> TaskOutcome<T> + Send + 'static,
    {
        let lane = options.priority.unwrap_or(self.config.default_lane);
        self.queue_task(lane, callback, options)
    }

    pub fn queue_micro_task<T, F>(&self, callback: F, options: TaskOptions) -> Result<TaskHandle<T>, SchedulerError>
    where
        T: Send + 'static,
        F: FnMut(Duration) -> TaskOutcome<T> + Send + 'static,
    {
        self.queue_task(Lane::MicroTask, callback, options)
    }

    pub fn queue_render_task<T, F>(&self, callback: F, options: TaskOptions) -> Result<TaskHandle<T>, SchedulerError>
    where
        T: Send + 'static,
        F: FnMut(Duration) -> TaskOutcome<T> + Send + 'static,
    {
        self.queue_task(Lane::Render, callback, options)
    }

    pub fn queue_macro_task<T, F>(&self, callback: F, options: TaskOptions) -> Result<TaskHandle<T>, SchedulerError>
    where
        T: Send + 'static,
        F: FnMut(Duration) -> TaskOutcome<T> + Send + 'static,
    {
        self.queue_task(Lane::MacroTask, callback, options)
    }

    pub fn queue_post_render_task<T, F>(
        &self,
        callback: F,
        options: TaskOptions,
    ) -> Result<TaskHandle<T>, SchedulerError>
    where
        T: Send + 'static,
        F: FnMut(Duration) -> TaskOutcome<T> + Send + 'static,
    {
        self.queue_task(Lane::PostRender, callback, options)
    }

    pub fn queue_idle_task<T, F>(&self, callback: F, options: TaskOptions) -> Result<TaskHandle<T>, SchedulerError>
    where
        T: Send + 'static,
        F: FnMut(Duration) -> TaskOutcome<T> + Send + 'static,
    {
        self.queue_task(Lane::Idle, callback, options)
    }

    /// Resolve once `lane` has no finite work left.
    pub fn yield_lane(&self, lane: Lane) -> YieldFuture {
        self.task_queue(lane).yield_now()
    }

    /// Resolve once every lane has no finite work left.
    pub async fn yield_all(&self) {
        join_all(Lane::ALL.map(|lane| self.yield_lane(lane))).await;
    }

    /// Move a queued task onto `lane`, keeping its eligibility instant.
    pub fn take<T>(&self, lane: Lane, task: &TaskHandle<T>) -> Result<bool, SchedulerError> {
        self.ensure_live(lane)?;
        self.task_queue(lane).take(task)
    }

    /// Abort all queued work on every lane. Later `queue_task` calls fail
    /// with [`SchedulerError::Disposed`].
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        for queue in &self.queues {
            queue.dispose();
        }
        info!("Scheduler disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            disposed: self.is_disposed(),
            lanes: self.queues.iter().map(PriorityQueue::stats).collect(),
        }
    }

    fn ensure_live(&self, lane: Lane) -> Result<(), SchedulerError> {
        if self.is_disposed() {
            return Err(SchedulerError::Disposed(lane));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ManualHost;
    use crate::signal::SignalRegistry;

    #[test]
    fn new_requires_a_signal_per_lane() {
        let manual = ManualHost::new();
        let host = Host::new(
            Arc::clone(&manual.clock) as _,
            Arc::clone(&manual.spawner) as _,
            SignalRegistry::new(),
        );
        let err = Scheduler::new(SchedulerConfig::default(), host).err();
        assert!(matches!(err, Some(SchedulerError::MissingSignal(Lane::MicroTask))));
    }

    #[test]
    fn new_rejects_invalid_config() {
        let manual = ManualHost::new();
        let config = SchedulerConfig {
            frame_interval_ms: 0,
            ..SchedulerConfig::default()
        };
        let err = Scheduler::new(config, manual.host()).err();
        assert!(matches!(err, Some(SchedulerError::Config(_))));
    }

    #[test]
    fn signals_bind_to_one_scheduler_at_a_time() {
        let manual = ManualHost::new();
        let first = Scheduler::new(SchedulerConfig::default(), manual.host()).unwrap();
        let err = Scheduler::new(SchedulerConfig::default(), manual.host()).err();
        assert!(matches!(err, Some(SchedulerError::SignalAlreadyBound(Lane::MicroTask))));

        drop(first);
        assert!(Scheduler::new(SchedulerConfig::default(), manual.host()).is_ok());
    }

    #[test]
    fn queue_uses_priority_then_default_lane() {
        let manual = ManualHost::new();
        let config = SchedulerConfig {
            default_lane: Lane::Idle,
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::new(config, manual.host()).unwrap();

        let a = scheduler.queue(|_| TaskOutcome::ready(1), TaskOptions::new()).unwrap();
        let b = scheduler
            .queue(|_| TaskOutcome::ready(2), TaskOptions::new().on(Lane::MicroTask))
            .unwrap();
        assert_eq!(a.lane(), Lane::Idle);
        assert_eq!(b.lane(), Lane::MicroTask);
        assert!(manual.signal(Lane::Idle).is_requested());
        assert!(manual.signal(Lane::MicroTask).is_requested());
        assert!(!manual.signal(Lane::Render).is_requested());
    }

    #[test]
    fn lane_wrappers_route_to_their_lane() {
        let manual = ManualHost::new();
        let scheduler = Scheduler::new(SchedulerConfig::default(), manual.host()).unwrap();
        let opts = TaskOptions::new;
        let lanes = [
            scheduler.queue_micro_task(|_| TaskOutcome::ready(()), opts()).unwrap().lane(),
            scheduler.queue_render_task(|_| TaskOutcome::ready(()), opts()).unwrap().lane(),
            scheduler.queue_macro_task(|_| TaskOutcome::ready(()), opts()).unwrap().lane(),
            scheduler.queue_post_render_task(|_| TaskOutcome::ready(()), opts()).unwrap().lane(),
            scheduler.queue_idle_task(|_| TaskOutcome::ready(()), opts()).unwrap().lane(),
        ];
        assert_eq!(lanes, Lane::ALL);
        assert_eq!(scheduler.stats().outstanding(), 5);
    }

    #[test]
    fn dispose_refuses_new_work() {
        let manual = ManualHost::new();
        let scheduler = Scheduler::new(SchedulerConfig::default(), manual.host()).unwrap();
        scheduler.dispose();
        scheduler.dispose();
        assert!(scheduler.is_disposed());
        assert!(scheduler.stats().disposed);
        let err = scheduler
            .queue_render_task(|_| TaskOutcome::ready(()), TaskOptions::new())
            .err();
        assert!(matches!(err, Some(SchedulerError::Disposed(Lane::Render))));
    }
}
