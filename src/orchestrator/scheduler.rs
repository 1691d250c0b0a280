//! Tick sources for the poll loop.
//!
//! The controller never sleeps on its own; it asks a `Scheduler` for a `Ticker` and awaits it.
//! Production code uses tokio timers, tests fire ticks by hand.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

#[async_trait]
pub trait Ticker: Send {
    /// Resolve at the next scheduled tick.
    async fn tick(&mut self);
}

pub trait Scheduler: Send + Sync + 'static {
    /// Create a ticker whose first tick fires one `period` from now.
    fn ticker(&self, period: Duration) -> Box<dyn Ticker>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

struct IntervalTicker(tokio::time::Interval);

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.0.tick().await;
    }
}

impl Scheduler for TokioScheduler {
    fn ticker(&self, period: Duration) -> Box<dyn Ticker> {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        // A slow status response delays the next poll instead of causing a burst.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Box::new(IntervalTicker(interval))
    }
}
