//! The tokio host under paused time.
//!
//! Lane signals are claimed process-wide, so every test that builds one
//! holds `CLAIMS` for its duration.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lanes_scheduler::host::TokioFlushSignal;
use lanes_scheduler::{
    Host, Lane, Scheduler, SchedulerConfig, SchedulerError, TaskOptions, TaskOutcome, TaskStatus,
};
use tokio::sync::Mutex;
use tokio::time::Instant;

static CLAIMS: Mutex<()> = Mutex::const_new(());

fn scheduler(config: SchedulerConfig) -> Scheduler {
    let host = Host::tokio(&config).unwrap();
    Scheduler::new(config, host).unwrap()
}

#[test]
fn signal_needs_a_runtime() {
    let err = TokioFlushSignal::new(Lane::Render, &SchedulerConfig::default()).err();
    assert!(matches!(err, Some(SchedulerError::NoRuntime)));
}

#[tokio::test(start_paused = true)]
async fn second_signal_for_a_lane_is_rejected_until_the_first_drops() {
    let _guard = CLAIMS.lock().await;
    let config = SchedulerConfig::default();

    let first = TokioFlushSignal::new(Lane::Render, &config).unwrap();
    assert!(TokioFlushSignal::is_claimed(Lane::Render));
    let err = TokioFlushSignal::new(Lane::Render, &config).err();
    assert!(matches!(err, Some(SchedulerError::DuplicateSignal(Lane::Render))));

    // Other lanes are unaffected.
    let idle = TokioFlushSignal::new(Lane::Idle, &config).unwrap();

    drop(first);
    drop(idle);
    assert!(!TokioFlushSignal::is_claimed(Lane::Render));
    assert!(TokioFlushSignal::new(Lane::Render, &config).is_ok());
}

#[tokio::test(start_paused = true)]
async fn only_one_tokio_host_at_a_time() {
    let _guard = CLAIMS.lock().await;
    let config = SchedulerConfig::default();

    let first = scheduler(config.clone());
    let err = Host::tokio(&config).err();
    assert!(matches!(err, Some(SchedulerError::DuplicateSignal(Lane::MicroTask))));
    // The failed install leaves the first host's claims in place.
    assert!(Lane::ALL.into_iter().all(TokioFlushSignal::is_claimed));

    drop(first);
    assert!(!Lane::ALL.into_iter().any(TokioFlushSignal::is_claimed));
    assert!(Host::tokio(&config).is_ok());
}

#[tokio::test(start_paused = true)]
async fn render_lane_flushes_on_the_next_frame() {
    let _guard = CLAIMS.lock().await;
    let scheduler = scheduler(SchedulerConfig::default());
    let start = Instant::now();

    let task = scheduler
        .queue_render_task(|_| TaskOutcome::ready("frame"), TaskOptions::new())
        .unwrap();
    assert_eq!(task.await, Ok("frame"));

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(16), "flushed after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(32), "flushed after {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn idle_and_macro_lanes_honor_their_timers() {
    let _guard = CLAIMS.lock().await;
    let config = SchedulerConfig {
        idle_timeout_ms: 40,
        macro_task_delay_ms: 5,
        ..SchedulerConfig::default()
    };
    let scheduler = scheduler(config);
    let start = Instant::now();

    let macro_task = scheduler
        .queue_macro_task(move |_| TaskOutcome::ready(start.elapsed()), TaskOptions::new())
        .unwrap();
    let idle_task = scheduler
        .queue_idle_task(move |_| TaskOutcome::ready(start.elapsed()), TaskOptions::new())
        .unwrap();

    assert!(macro_task.await.unwrap() >= Duration::from_millis(5));
    assert!(idle_task.await.unwrap() >= Duration::from_millis(40));
}

#[tokio::test(start_paused = true)]
async fn micro_tasks_run_before_any_timer_fires() {
    let _guard = CLAIMS.lock().await;
    let scheduler = scheduler(SchedulerConfig::default());
    let start = Instant::now();

    let task = scheduler
        .queue_micro_task(|_| TaskOutcome::ready(()), TaskOptions::new())
        .unwrap();
    task.await.unwrap();
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn deferred_tasks_run_on_the_runtime() {
    let _guard = CLAIMS.lock().await;
    let scheduler = scheduler(SchedulerConfig::default());

    let task = scheduler
        .queue_micro_task(
            |_| {
                TaskOutcome::deferred(async {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok(99)
                })
            },
            TaskOptions::new(),
        )
        .unwrap();
    assert_eq!(task.await, Ok(99));
}

#[tokio::test(start_paused = true)]
async fn yield_all_waits_for_every_lane() {
    let _guard = CLAIMS.lock().await;
    let scheduler = scheduler(SchedulerConfig::default());

    let handles: Vec<_> = Lane::ALL
        .into_iter()
        .map(|lane| {
            scheduler
                .queue_task(lane, |_| TaskOutcome::ready(()), TaskOptions::new().delay_ms(3))
                .unwrap()
        })
        .collect();

    scheduler.yield_all().await;
    for handle in &handles {
        assert_eq!(handle.status(), TaskStatus::Completed);
    }
    assert_eq!(scheduler.stats().outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn persistent_render_task_stops_after_cancel() {
    let _guard = CLAIMS.lock().await;
    let scheduler = scheduler(SchedulerConfig::default());
    let runs = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&runs);

    let task = scheduler
        .queue_render_task(
            move |_| TaskOutcome::ready(counter.fetch_add(1, Ordering::SeqCst) + 1),
            TaskOptions::new().persistent(),
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let before = runs.load(Ordering::SeqCst);
    assert!(before >= 5, "only {before} runs in 100ms");

    assert!(task.cancel());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(runs.load(Ordering::SeqCst), before);
    assert!(task.await.unwrap_err().is_abort());
}
