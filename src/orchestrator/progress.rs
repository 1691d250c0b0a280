//! Progress model for the clustering job.
//!
//! `transition` is the only place where a job state changes. It is pure so the state machine can
//! be exercised without a controller, a timer, or a renderer.

use crate::model::{ClusterSummary, StatusResponse, WireStatus};
use serde::Serialize;

/// Detail line shown when the server gives no status text.
pub const PROCESSING_DETAIL: &str = "Processing...";
const STARTING_DETAIL: &str = "Starting...";
const UNKNOWN_ERROR: &str = "Unknown error";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunningProgress {
    pub phase_name: String,
    /// 1-based, never above `total_phases`.
    pub phase_index: u32,
    pub total_phases: u32,
    pub elapsed_seconds: f64,
    /// Always within 0..=100.
    pub overall_progress: u8,
    pub detail: Option<String>,
}

impl RunningProgress {
    fn starting() -> Self {
        Self {
            phase_name: String::new(),
            phase_index: 1,
            total_phases: 1,
            elapsed_seconds: 0.0,
            overall_progress: 0,
            detail: Some(STARTING_DETAIL.to_string()),
        }
    }

    /// Status text to display: the reported detail, else a generic line.
    pub fn display_detail(&self) -> &str {
        self.detail.as_deref().unwrap_or(PROCESSING_DETAIL)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Idle,
    Running(RunningProgress),
    Completed { result: ClusterSummary },
    Error { message: String },
}

/// A status report normalised from the wire. Missing values stay `None` so the transition can
/// decide what to carry over from the previous state.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusReport {
    Idle,
    Running {
        phase_name: Option<String>,
        phase_index: Option<i64>,
        total_phases: Option<i64>,
        elapsed_seconds: Option<f64>,
        overall_progress: Option<f64>,
        detail: Option<String>,
    },
    Completed(Option<ClusterSummary>),
    Error(Option<String>),
    Unknown,
}

impl From<StatusResponse> for StatusReport {
    fn from(r: StatusResponse) -> Self {
        match r.status {
            WireStatus::Idle => StatusReport::Idle,
            WireStatus::Running => {
                let legacy = r
                    .progress
                    .as_ref()
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                StatusReport::Running {
                    phase_name: r.phase_name.filter(|s| !s.trim().is_empty()),
                    phase_index: r.phase_index,
                    total_phases: r.total_phases,
                    elapsed_seconds: r.elapsed_seconds,
                    overall_progress: r.overall_progress,
                    detail: non_blank(r.detail).or_else(|| non_blank(legacy)),
                }
            }
            WireStatus::Completed => StatusReport::Completed(r.result),
            WireStatus::Error => StatusReport::Error(non_blank(r.error)),
            WireStatus::Unknown => StatusReport::Unknown,
        }
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// The server accepted a start request.
    StartAccepted,
    Reported(StatusReport),
}

/// Clamp a reported percentage into 0..=100. Non-finite values count as 0.
pub fn clamp_progress(value: f64) -> u8 {
    if !value.is_finite() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}

fn normalize_phases(index: Option<i64>, total: Option<i64>) -> (u32, u32) {
    let total = total.unwrap_or(1).clamp(1, u32::MAX as i64) as u32;
    let index = index.unwrap_or(1).clamp(1, total as i64) as u32;
    (index, total)
}

/// Apply an event to the current job state and return the next state.
pub fn transition(current: &JobStatus, event: StatusEvent) -> JobStatus {
    let report = match event {
        StatusEvent::StartAccepted => return JobStatus::Running(RunningProgress::starting()),
        StatusEvent::Reported(report) => report,
    };

    match report {
        StatusReport::Idle => JobStatus::Idle,
        StatusReport::Running {
            phase_name,
            phase_index,
            total_phases,
            elapsed_seconds,
            overall_progress,
            detail,
        } => {
            let previous_phase = match current {
                JobStatus::Running(p) => Some(p.phase_name.clone()),
                _ => None,
            };
            let (phase_index, total_phases) = normalize_phases(phase_index, total_phases);
            let elapsed_seconds = elapsed_seconds
                .filter(|s| s.is_finite())
                .unwrap_or(0.0)
                .max(0.0);
            JobStatus::Running(RunningProgress {
                phase_name: phase_name.or(previous_phase).unwrap_or_default(),
                phase_index,
                total_phases,
                elapsed_seconds,
                overall_progress: overall_progress.map(clamp_progress).unwrap_or(0),
                detail,
            })
        }
        StatusReport::Completed(result) => {
            let result = result.unwrap_or_else(|| match current {
                JobStatus::Completed { result } => *result,
                _ => ClusterSummary {
                    total_clusters: 0,
                    noise_count: 0,
                    threshold: 0.0,
                },
            });
            JobStatus::Completed { result }
        }
        StatusReport::Error(message) => JobStatus::Error {
            message: message.unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
        },
        StatusReport::Unknown => current.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report(v: serde_json::Value) -> StatusEvent {
        let r: StatusResponse = serde_json::from_value(v).unwrap();
        StatusEvent::Reported(r.into())
    }

    fn running(status: &JobStatus) -> &RunningProgress {
        match status {
            JobStatus::Running(p) => p,
            other => panic!("expected running, got {other:?}"),
        }
    }

    #[test]
    fn progress_is_clamped() {
        assert_eq!(clamp_progress(-5.0), 0);
        assert_eq!(clamp_progress(150.0), 100);
        assert_eq!(clamp_progress(42.4), 42);
        assert_eq!(clamp_progress(f64::NAN), 0);

        let next = transition(
            &JobStatus::Idle,
            report(json!({"status": "running", "overall_progress": 150})),
        );
        assert_eq!(running(&next).overall_progress, 100);
        let next = transition(
            &JobStatus::Idle,
            report(json!({"status": "running", "overall_progress": -5})),
        );
        assert_eq!(running(&next).overall_progress, 0);
    }

    #[test]
    fn running_report_fills_phase_fields() {
        let next = transition(
            &JobStatus::Idle,
            report(json!({
                "status": "running",
                "phase_name": "Computing embeddings",
                "phase_index": 2,
                "total_phases": 4,
                "elapsed_seconds": 12.5,
                "overall_progress": 40,
                "detail": "batch 3/10"
            })),
        );
        let p = running(&next);
        assert_eq!(p.phase_name, "Computing embeddings");
        assert_eq!((p.phase_index, p.total_phases), (2, 4));
        assert_eq!(p.elapsed_seconds, 12.5);
        assert_eq!(p.display_detail(), "batch 3/10");
    }

    #[test]
    fn phase_index_is_kept_within_total() {
        let next = transition(
            &JobStatus::Idle,
            report(json!({"status": "running", "phase_index": 9, "total_phases": 3, "elapsed_seconds": -2.0})),
        );
        let p = running(&next);
        assert_eq!((p.phase_index, p.total_phases), (3, 3));
        assert_eq!(p.elapsed_seconds, 0.0);

        let next = transition(
            &JobStatus::Idle,
            report(json!({"status": "running", "phase_index": 0, "total_phases": 0})),
        );
        let p = running(&next);
        assert_eq!((p.phase_index, p.total_phases), (1, 1));
    }

    #[test]
    fn detail_falls_back_to_legacy_progress_then_generic_text() {
        let next = transition(
            &JobStatus::Idle,
            report(json!({"status": "running", "detail": "", "progress": "Loading embedding model..."})),
        );
        assert_eq!(running(&next).display_detail(), "Loading embedding model...");

        let next = transition(&JobStatus::Idle, report(json!({"status": "running"})));
        assert_eq!(running(&next).display_detail(), PROCESSING_DETAIL);
    }

    #[test]
    fn running_report_without_phase_keeps_previous_phase_name() {
        let first = transition(
            &JobStatus::Idle,
            report(json!({"status": "running", "phase_name": "Grouping"})),
        );
        let second = transition(
            &first,
            report(json!({"status": "running", "overall_progress": 80})),
        );
        assert_eq!(running(&second).phase_name, "Grouping");
    }

    #[test]
    fn terminal_reports_replace_running_state() {
        let start = transition(&JobStatus::Idle, StatusEvent::StartAccepted);
        assert_eq!(running(&start).display_detail(), "Starting...");

        let done = transition(
            &start,
            report(json!({"status": "completed", "result": {"total_clusters": 14, "noise_count": 3, "threshold": 0.8}})),
        );
        assert_eq!(
            done,
            JobStatus::Completed {
                result: ClusterSummary {
                    total_clusters: 14,
                    noise_count: 3,
                    threshold: 0.8
                }
            }
        );

        // a bare "completed" keeps the result we already know about
        let again = transition(&done, report(json!({"status": "completed"})));
        assert_eq!(again, done);

        let failed = transition(&start, report(json!({"status": "error", "error": "No test steps found"})));
        assert_eq!(
            failed,
            JobStatus::Error {
                message: "No test steps found".into()
            }
        );
        let failed = transition(&start, report(json!({"status": "error"})));
        assert_eq!(
            failed,
            JobStatus::Error {
                message: "Unknown error".into()
            }
        );
    }

    #[test]
    fn unknown_status_leaves_state_untouched() {
        let start = transition(&JobStatus::Idle, StatusEvent::StartAccepted);
        let next = transition(&start, report(json!({"status": "paused"})));
        assert_eq!(next, start);
    }
}
