//! Host services a scheduler depends on: a clock, a spawner for deferred
//! task futures, and one flush signal per lane.
//!
//! Two hosts ship with the crate. [`manual`] steps every lane by hand and is
//! what the tests use; [`tokio_host`] paces each lane on a tokio runtime.

pub mod manual;
pub mod tokio_host;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::signal::SignalRegistry;

pub use manual::{ManualClock, ManualFlushSignal, ManualHost, ManualSpawner};
pub use tokio_host::{SystemClock, TokioFlushSignal, TokioSpawner};

/// Monotonic time source. Only differences between readings matter.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Drives the futures of deferred task callbacks to completion.
pub trait Spawn: Send + Sync {
    fn spawn(&self, future: BoxFuture<'static, ()>);
}

/// Everything a [`Scheduler`](crate::Scheduler) needs from its environment.
pub struct Host {
    pub clock: Arc<dyn Clock>,
    pub spawner: Arc<dyn Spawn>,
    pub signals: SignalRegistry,
}

impl Host {
    pub fn new(clock: Arc<dyn Clock>, spawner: Arc<dyn Spawn>, signals: SignalRegistry) -> Self {
        Self {
            clock,
            spawner,
            signals,
        }
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("now", &self.clock.now())
            .field("signals", &self.signals)
            .finish()
    }
}
