//! Scripted in-memory gateway for unit tests.

use super::{ClusterGateway, ImportGateway};
use crate::error::{ClientError, Result};
use crate::model::{
    ClusterDetail, ClusterInfo, CompareResponse, ConfirmRequest, HistoryRecord, ImportReport,
    ImportStatus, StatusResponse, UploadResponse,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub(crate) fn status(v: serde_json::Value) -> StatusResponse {
    serde_json::from_value(v).expect("status fixture")
}

pub(crate) fn transport_failure() -> ClientError {
    ClientError::Transport(Box::new(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        "connection refused",
    )))
}

#[derive(Default)]
pub(crate) struct FakeGateway {
    statuses: Mutex<VecDeque<Result<StatusResponse>>>,
    start_error: Mutex<Option<String>>,
    clusters: Mutex<Vec<ClusterInfo>>,
    history: Mutex<Vec<HistoryRecord>>,
    compare: Mutex<Option<CompareResponse>>,
    confirm_error: Mutex<Option<String>>,
    pub confirmed: Mutex<Vec<ConfirmRequest>>,
    pub status_calls: AtomicUsize,
    pub start_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub compare_calls: AtomicUsize,
    pub upload_calls: AtomicUsize,
}

impl FakeGateway {
    pub(crate) fn push_status(&self, response: StatusResponse) {
        self.statuses.lock().unwrap().push_back(Ok(response));
    }

    pub(crate) fn push_status_error(&self, error: ClientError) {
        self.statuses.lock().unwrap().push_back(Err(error));
    }

    pub(crate) fn reject_start(&self, message: &str) {
        *self.start_error.lock().unwrap() = Some(message.to_string());
    }

    pub(crate) fn set_clusters(&self, clusters: Vec<ClusterInfo>) {
        *self.clusters.lock().unwrap() = clusters;
    }

    pub(crate) fn set_history(&self, records: Vec<HistoryRecord>) {
        *self.history.lock().unwrap() = records;
    }

    pub(crate) fn set_compare(&self, response: CompareResponse) {
        *self.compare.lock().unwrap() = Some(response);
    }

    pub(crate) fn reject_confirm(&self, message: &str) {
        *self.confirm_error.lock().unwrap() = Some(message.to_string());
    }

    fn calls(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

fn remote(message: &str) -> ClientError {
    ClientError::Remote {
        status: Some(400),
        message: message.to_string(),
    }
}

#[async_trait]
impl ClusterGateway for FakeGateway {
    async fn status(&self) -> Result<StatusResponse> {
        Self::calls(&self.status_calls);
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(transport_failure()))
    }

    async fn start(&self, _similarity_threshold: f64) -> Result<()> {
        Self::calls(&self.start_calls);
        match self.start_error.lock().unwrap().as_deref() {
            Some(message) => Err(remote(message)),
            None => Ok(()),
        }
    }

    async fn list_clusters(&self, _history_id: Option<i64>) -> Result<Vec<ClusterInfo>> {
        Self::calls(&self.list_calls);
        Ok(self.clusters.lock().unwrap().clone())
    }

    async fn cluster_detail(&self, cluster_id: i64) -> Result<ClusterDetail> {
        let clusters = self.clusters.lock().unwrap();
        let cluster = clusters
            .iter()
            .find(|c| c.cluster_id == cluster_id)
            .cloned()
            .ok_or_else(|| remote("Cluster not found"))?;
        Ok(ClusterDetail {
            cluster,
            steps: Vec::new(),
        })
    }

    async fn export_results(&self) -> Result<Bytes> {
        if self.clusters.lock().unwrap().is_empty() {
            return Err(remote("No clustering results to export"));
        }
        Ok(Bytes::from_static(b"PK\x03\x04"))
    }

    async fn list_history(&self) -> Result<Vec<HistoryRecord>> {
        Ok(self.history.lock().unwrap().clone())
    }

    async fn activate_history(&self, _id: i64) -> Result<()> {
        Ok(())
    }

    async fn delete_history(&self, _id: i64) -> Result<()> {
        Ok(())
    }

    async fn compare_history(&self, _id1: i64, _id2: i64) -> Result<CompareResponse> {
        Self::calls(&self.compare_calls);
        self.compare
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| remote("History record not found"))
    }
}

#[async_trait]
impl ImportGateway for FakeGateway {
    async fn upload(&self, _file_name: &str, _contents: Bytes) -> Result<UploadResponse> {
        Self::calls(&self.upload_calls);
        Err(remote("uploads are not scripted"))
    }

    async fn confirm(&self, request: &ConfirmRequest) -> Result<ImportReport> {
        self.confirmed.lock().unwrap().push(request.clone());
        match self.confirm_error.lock().unwrap().as_deref() {
            Some(message) => Err(remote(message)),
            None => Ok(ImportReport {
                cases_imported: 3,
                steps_imported: 12,
                warnings: Vec::new(),
            }),
        }
    }

    async fn import_status(&self) -> Result<ImportStatus> {
        Ok(ImportStatus {
            case_count: 0,
            step_count: 0,
            last_import_time: None,
        })
    }
}
