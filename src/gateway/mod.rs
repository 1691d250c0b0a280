//! Remote API seam.
//!
//! The client-side engines only talk to the backend through these traits. `HttpGateway` is the
//! real implementation; tests substitute a scripted fake.

mod http;

#[cfg(test)]
pub(crate) mod fake;

pub use http::HttpGateway;

use crate::error::Result;
use crate::model::{
    ClusterDetail, ClusterInfo, CompareResponse, ConfirmRequest, HistoryRecord, ImportReport,
    ImportStatus, StatusResponse, UploadResponse,
};
use async_trait::async_trait;
use bytes::Bytes;

#[async_trait]
pub trait ClusterGateway: Send + Sync {
    async fn status(&self) -> Result<StatusResponse>;

    async fn start(&self, similarity_threshold: f64) -> Result<()>;

    /// Saved clusters of the current run, or of `history_id` when given.
    async fn list_clusters(&self, history_id: Option<i64>) -> Result<Vec<ClusterInfo>>;

    /// One cluster of the current result with all its steps.
    async fn cluster_detail(&self, cluster_id: i64) -> Result<ClusterDetail>;

    /// Zip archive of the current result's workbooks.
    async fn export_results(&self) -> Result<Bytes>;

    async fn list_history(&self) -> Result<Vec<HistoryRecord>>;

    async fn activate_history(&self, id: i64) -> Result<()>;

    async fn delete_history(&self, id: i64) -> Result<()>;

    async fn compare_history(&self, id1: i64, id2: i64) -> Result<CompareResponse>;
}

#[async_trait]
pub trait ImportGateway: Send + Sync {
    async fn upload(&self, file_name: &str, contents: Bytes) -> Result<UploadResponse>;

    async fn confirm(&self, request: &ConfirmRequest) -> Result<ImportReport>;

    async fn import_status(&self) -> Result<ImportStatus>;
}
