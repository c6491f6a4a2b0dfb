//! Demo workload: a batch of one-shot tasks across the lanes plus one
//! persistent idle task that is canceled after a few runs.

use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use lanes_core::Lane;
use lanes_scheduler::{Scheduler, TaskError, TaskHandle, TaskOptions, TaskOutcome};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

/// What to queue.
#[derive(Debug, Clone)]
pub struct WorkloadPlan {
    pub lane: Option<Lane>,
    pub tasks: usize,
    pub delay: Duration,
    pub defer_every: usize,
    pub fail_every: usize,
    pub persistent_runs: u64,
}

/// Outcome tallies for one workload run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct WorkloadReport {
    pub queued: usize,
    pub completed: usize,
    pub failed: usize,
    pub aborted: usize,
    pub persistent_runs: u64,
    pub elapsed_ms: u128,
}

impl WorkloadReport {
    fn tally<T>(&mut self, result: &Result<T, TaskError>) {
        match result {
            Ok(_) => self.completed += 1,
            Err(e) if e.is_abort() => self.aborted += 1,
            Err(e) => {
                warn!(error = %e, "Task failed");
                self.failed += 1;
            }
        }
    }
}

fn every(n: usize, i: usize) -> bool {
    n > 0 && (i + 1) % n == 0
}

fn one_shot(i: usize, plan: &WorkloadPlan) -> impl FnMut(Duration) -> TaskOutcome<usize> + Send + 'static {
    let fail = every(plan.fail_every, i);
    let defer = every(plan.defer_every, i);
    move |_| {
        if fail {
            TaskOutcome::failed(format!("synthetic failure in task {i}"))
        } else if defer {
            TaskOutcome::deferred(async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                Ok(i)
            })
        } else {
            TaskOutcome::ready(i)
        }
    }
}

/// Queue the plan, wait for everything to settle, and report.
pub async fn run(scheduler: &Scheduler, plan: &WorkloadPlan) -> Result<WorkloadReport> {
    let start = Instant::now();
    let mut report = WorkloadReport::default();

    let mut handles: Vec<TaskHandle<usize>> = Vec::with_capacity(plan.tasks);
    for i in 0..plan.tasks {
        let lane = plan.lane.unwrap_or(Lane::ALL[i % Lane::COUNT]);
        let options = TaskOptions::new().with_delay(plan.delay);
        handles.push(scheduler.queue_task(lane, one_shot(i, plan), options)?);
    }
    report.queued = handles.len();
    info!("Queued {} tasks", report.queued);

    let persistent = if plan.persistent_runs > 0 {
        Some(scheduler.queue_idle_task(|_| TaskOutcome::ready(()), TaskOptions::new().persistent())?)
    } else {
        None
    };

    for result in join_all(handles).await {
        report.tally(&result);
    }

    if let Some(task) = persistent {
        let poll = scheduler.config().frame_interval();
        while task.run_count() < plan.persistent_runs {
            tokio::time::sleep(poll).await;
        }
        task.cancel();
        report.persistent_runs = task.run_count();
        // A canceled persistent task settles as aborted; that is expected here.
        let _ = task.await;
    }

    scheduler.yield_all().await;
    report.elapsed_ms = start.elapsed().as_millis();
    info!(
        "Workload finished: {} completed, {} failed, {} aborted in {}ms",
        report.completed, report.failed, report.aborted, report.elapsed_ms
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_nth() {
        assert!(!every(0, 0));
        assert!(!every(3, 0));
        assert!(every(3, 2));
        assert!(every(1, 0));
    }

    #[test]
    fn tally_distinguishes_aborts_from_failures() {
        let mut report = WorkloadReport::default();
        report.tally(&Ok::<_, TaskError>(1));
        report.tally(&Err::<u8, _>(TaskError::failed("x")));
        report.tally(&Err::<u8, _>(TaskError::Aborted { id: 1, lane: Lane::Idle }));
        assert_eq!((report.completed, report.failed, report.aborted), (1, 1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn runs_plan_to_completion() {
        use lanes_scheduler::{Host, SchedulerConfig};

        let config = SchedulerConfig::default();
        let scheduler = Scheduler::new(config.clone(), Host::tokio(&config).unwrap()).unwrap();
        let plan = WorkloadPlan {
            lane: None,
            tasks: 10,
            delay: Duration::from_millis(2),
            defer_every: 3,
            fail_every: 5,
            persistent_runs: 2,
        };

        let report = run(&scheduler, &plan).await.unwrap();
        assert_eq!(report.queued, 10);
        assert_eq!(report.completed, 8);
        assert_eq!(report.failed, 2);
        assert_eq!(report.aborted, 0);
        assert!(report.persistent_runs >= 2);
        assert_eq!(scheduler.stats().outstanding(), 0);
    }
}
