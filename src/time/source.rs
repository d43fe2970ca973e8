use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::Timestamp;

/// Wall-clock source consumed by the station runtime
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch
    fn now(&self) -> Timestamp;
}

/// System clock in UTC
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp().max(0) as Timestamp
    }
}

/// Manually driven clock for tests and simulations. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        ManualClock {
            now: Arc::new(AtomicU64::new(start)),
        }
    }

    /// Moves the clock forward by `secs`
    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    /// Sets an absolute time
    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Wall time that follows tokio's timer: a fixed epoch plus the runtime time
/// elapsed since creation. Under a paused runtime it advances with the
/// virtual clock.
#[derive(Debug, Clone)]
pub struct InstantClock {
    epoch: Timestamp,
    start: tokio::time::Instant,
}

impl InstantClock {
    pub fn new(epoch: Timestamp) -> Self {
        InstantClock {
            epoch,
            start: tokio::time::Instant::now(),
        }
    }
}

impl Clock for InstantClock {
    fn now(&self) -> Timestamp {
        self.epoch + self.start.elapsed().as_secs()
    }
}

/// Wraps a clock so it never runs backwards
pub struct MonotonicClock<C> {
    inner: C,
    last: AtomicU64,
}

impl<C: Clock> MonotonicClock<C> {
    pub fn new(inner: C) -> Self {
        MonotonicClock {
            inner,
            last: AtomicU64::new(0),
        }
    }
}

impl<C: Clock> Clock for MonotonicClock<C> {
    fn now(&self) -> Timestamp {
        let now = self.inner.now();
        let previous = self.last.fetch_max(now, Ordering::SeqCst);
        now.max(previous)
    }
}
