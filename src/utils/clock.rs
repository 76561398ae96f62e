use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Source of wall-clock timestamps for presences, share links and saves.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

pub type SharedClock = Arc<dyn Clock>;

/// Wall clock backed by `Utc::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that advances with the tokio timer instead of the system clock.
///
/// Timestamps are `base + elapsed(tokio::time::Instant)`, so a runtime with
/// paused time moves presences and saves forward together with heartbeats and
/// debounce deadlines.
#[derive(Debug, Clone)]
pub struct TokioClock {
    base: DateTime<Utc>,
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new(base: DateTime<Utc>) -> Self {
        Self {
            base,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now().saturating_duration_since(self.origin);
        let elapsed = Duration::from_std(elapsed).unwrap_or(Duration::zero());
        self.base + elapsed
    }
}

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
