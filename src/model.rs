use crate::orchestrator::RunningProgress;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Server-side job state as reported by `GET /api/cluster/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireStatus {
    Idle,
    Running,
    Completed,
    Error,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: WireStatus,
    #[serde(default)]
    pub phase_name: Option<String>,
    #[serde(default)]
    pub phase_index: Option<i64>,
    #[serde(default)]
    pub total_phases: Option<i64>,
    #[serde(default)]
    pub elapsed_seconds: Option<f64>,
    #[serde(default)]
    pub overall_progress: Option<f64>,
    #[serde(default)]
    pub detail: Option<String>,
    // Older servers only send a free-text `progress` line.
    #[serde(default)]
    pub progress: Option<serde_json::Value>,
    #[serde(default)]
    pub result: Option<ClusterSummary>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    #[serde(default)]
    pub total_clusters: u64,
    #[serde(default)]
    pub noise_count: u64,
    #[serde(default)]
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartRequest {
    pub similarity_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub cluster_id: i64,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub step_count: u64,
    #[serde(default)]
    pub case_count: u64,
}

/// One step assigned to a cluster, with the case it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterStep {
    #[serde(default)]
    pub step_id: i64,
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub step_no: i64,
    #[serde(default, deserialize_with = "string_or_number")]
    pub case_id: String,
    #[serde(default)]
    pub case_title: String,
}

/// Body of `GET /api/cluster/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterDetail {
    pub cluster: ClusterInfo,
    #[serde(default)]
    pub steps: Vec<ClusterStep>,
}

/// Case ids come from spreadsheet cells and may arrive as numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ClusterListResponse {
    #[serde(default)]
    pub clusters: Vec<ClusterInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    #[serde(default)]
    pub run_time: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub model_type: Option<String>,
    #[serde(default)]
    pub similarity_threshold: Option<f64>,
    #[serde(default)]
    pub total_clusters: u64,
    #[serde(default)]
    pub noise_count: u64,
    #[serde(default)]
    pub total_steps: u64,
    #[serde(default)]
    pub elapsed_seconds: Option<f64>,
    #[serde(default, deserialize_with = "bool_or_int")]
    pub is_current: bool,
}

impl HistoryRecord {
    /// Model label shown to users: the configured name, else the model type.
    pub fn model_label(&self) -> &str {
        self.model_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.model_type.as_deref())
            .unwrap_or("-")
    }
}

/// SQLite-backed servers emit `is_current` as 0/1.
fn bool_or_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Null(()),
    }
    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
        Flag::Null(()) => false,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct HistoryListResponse {
    #[serde(default)]
    pub records: Vec<HistoryRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareResponse {
    pub record1: HistoryRecord,
    pub record2: HistoryRecord,
    #[serde(default)]
    pub new_labels: Vec<String>,
    #[serde(default)]
    pub disappeared_labels: Vec<String>,
    #[serde(default)]
    pub common_labels: Vec<String>,
}

/// Body of `POST /api/import/upload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub mapping: BTreeMap<String, usize>,
    #[serde(default)]
    pub unmatched: Vec<String>,
    #[serde(default)]
    pub extra_columns: BTreeMap<String, usize>,
    #[serde(default)]
    pub auto_confirmed: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Required field to column index, in the order the server expects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FinalMapping {
    pub id: usize,
    pub title: usize,
    pub step_no: usize,
    pub operation: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfirmRequest {
    pub mapping: FinalMapping,
    pub extra_columns: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportReport {
    #[serde(default)]
    pub cases_imported: u64,
    #[serde(default)]
    pub steps_imported: u64,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportStatus {
    #[serde(default)]
    pub case_count: u64,
    #[serde(default)]
    pub step_count: u64,
    #[serde(default)]
    pub last_import_time: Option<String>,
}

/// What the job view shows on entry, before any poll has happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum InitialView {
    Running(RunningProgress),
    Available {
        cluster_count: usize,
        last_result: Option<ClusterSummary>,
    },
    NotYetRun,
    Failed {
        message: String,
    },
}

/// State changes emitted by the job controller and consumed by presentation layers.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    StartControl { enabled: bool },
    DisplayCleared,
    PollingStarted,
    PollingStopped,
    Progress(RunningProgress),
    Completed(ClusterSummary),
    StartRejected { message: String },
    JobFailed { message: String },
    Initial(InitialView),
    RefreshFailed { message: String },
}

impl JobEvent {
    /// True once the job reached a state that ends observation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEvent::Completed(_) | JobEvent::JobFailed { .. } | JobEvent::StartRejected { .. }
        )
    }

    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> Option<String> {
        match self {
            JobEvent::StartControl { .. } | JobEvent::DisplayCleared => None,
            JobEvent::PollingStarted => Some("Watching clustering job…".to_string()),
            JobEvent::PollingStopped => None,
            JobEvent::Progress(p) => Some(crate::text_summary::progress_line(p)),
            JobEvent::Completed(r) => Some(crate::text_summary::summary_line(r)),
            JobEvent::StartRejected { message } => Some(message.clone()),
            JobEvent::JobFailed { message } => Some(format!("Clustering error: {message}")),
            JobEvent::Initial(view) => Some(crate::text_summary::initial_view_line(view)),
            JobEvent::RefreshFailed { message } => {
                Some(format!("Could not refresh cluster results: {message}"))
            }
        }
    }
}
