//! Clustering job orchestration.
//!
//! This module owns the job lifecycle (start, poll, terminal handling, resume after restart),
//! the progress model it maintains, and the tick sources that drive polling. UI/CLI layers
//! subscribe to the emitted `JobEvent`s and never mutate job state directly.

mod controller;
mod progress;
mod scheduler;

pub use controller::{JobController, ResultsRefresher};
pub use progress::{JobStatus, RunningProgress};
pub use scheduler::TokioScheduler;
