//! Cooperative priority-lane task scheduler.
//!
//! Work is queued onto one of five [`Lane`]s. Each lane is a
//! [`PriorityQueue`] flushed whenever its host [`FlushSignal`] fires; a flush
//! runs exactly the batch that was eligible when it began. See
//! [`Scheduler`] for the combined API and [`host`] for the timing sources.

pub mod error;
pub mod handle;
pub mod host;
mod list;
pub mod metrics;
pub mod queue;
pub mod scheduler;
pub mod signal;
pub mod task;

pub use error::{SchedulerError, TaskError};
pub use handle::{TaskControl, TaskHandle};
pub use host::{Clock, Host, Spawn};
pub use lanes_core::{Lane, SchedulerConfig};
pub use metrics::{QueueStats, SchedulerStats};
pub use queue::{PriorityQueue, YieldFuture};
pub use scheduler::Scheduler;
pub use signal::{FlushSignal, FlushTarget, SignalRegistry};
pub use task::{TaskOptions, TaskOutcome, TaskStatus};
