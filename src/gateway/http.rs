use super::{ClusterGateway, ImportGateway};
use crate::config::Settings;
use crate::error::{ClientError, Result};
use crate::model::{
    ClusterDetail, ClusterInfo, ClusterListResponse, CompareResponse, ConfirmRequest,
    HistoryListResponse, HistoryRecord, ImportReport, ImportStatus, StartRequest, StatusResponse,
    UploadResponse,
};
use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use std::time::Instant;

const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// JSON-over-HTTP client for the clustering service.
#[derive(Clone)]
pub struct HttpGateway {
    base_url: String,
    http: reqwest::Client,
}

impl HttpGateway {
    pub fn new(settings: &Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(format!("casecluster/{}", env!("CARGO_PKG_VERSION")))
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder, what: &str) -> Result<T> {
        let start = Instant::now();
        let response = req.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        debug!(
            "[GATEWAY] {} -> {} ({} bytes) in {:?}",
            what,
            status,
            body.len(),
            start.elapsed()
        );
        decode_body(status.as_u16(), &body)
    }
}

/// Apply the service's error convention: a non-2xx status or `"success": false` is a remote
/// failure carrying the body's `error` text.
fn decode_body<T: DeserializeOwned>(status: u16, body: &[u8]) -> Result<T> {
    let ok = (200..300).contains(&status);
    let value: serde_json::Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) if ok => return Err(ClientError::Decode(e)),
        Err(_) => {
            return Err(ClientError::Remote {
                status: Some(status),
                message: format!("HTTP {status}"),
            })
        }
    };

    let declared_failure = value.get("success").and_then(|v| v.as_bool()) == Some(false);
    if !ok || declared_failure {
        let message = value
            .get("error")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| error_list(&value))
            .unwrap_or_else(|| format!("HTTP {status}"));
        return Err(ClientError::Remote {
            status: Some(status),
            message,
        });
    }

    Ok(serde_json::from_value(value)?)
}

/// Import validation failures carry an `errors` list instead of a single `error`.
fn error_list(value: &serde_json::Value) -> Option<String> {
    let errors: Vec<&str> = value
        .get("errors")?
        .as_array()?
        .iter()
        .filter_map(|e| e.as_str())
        .filter(|e| !e.is_empty())
        .collect();
    (!errors.is_empty()).then(|| errors.join("\n"))
}

/// The export endpoint answers with a zip on success and the usual JSON error otherwise.
fn export_body(status: u16, body: Bytes) -> Result<Bytes> {
    if (200..300).contains(&status) {
        return Ok(body);
    }
    match decode_body::<serde_json::Value>(status, &body) {
        Err(e) => Err(e),
        Ok(_) => Err(ClientError::Remote {
            status: Some(status),
            message: format!("HTTP {status}"),
        }),
    }
}

#[async_trait]
impl ClusterGateway for HttpGateway {
    async fn status(&self) -> Result<StatusResponse> {
        self.send(self.http.get(self.url("/api/cluster/status")), "GET status")
            .await
    }

    async fn start(&self, similarity_threshold: f64) -> Result<()> {
        let body = StartRequest {
            similarity_threshold,
        };
        let _ack: serde_json::Value = self
            .send(
                self.http.post(self.url("/api/cluster/run")).json(&body),
                "POST run",
            )
            .await?;
        Ok(())
    }

    async fn list_clusters(&self, history_id: Option<i64>) -> Result<Vec<ClusterInfo>> {
        let mut req = self.http.get(self.url("/api/cluster/list"));
        if let Some(id) = history_id {
            req = req.query(&[("history_id", id)]);
        }
        let list: ClusterListResponse = self.send(req, "GET cluster list").await?;
        Ok(list.clusters)
    }

    async fn cluster_detail(&self, cluster_id: i64) -> Result<ClusterDetail> {
        self.send(
            self.http.get(self.url(&format!("/api/cluster/{cluster_id}"))),
            "GET cluster detail",
        )
        .await
    }

    async fn export_results(&self) -> Result<Bytes> {
        let start = Instant::now();
        let response = self
            .http
            .post(self.url("/api/export/"))
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        debug!(
            "[GATEWAY] POST export -> {} ({} bytes) in {:?}",
            status,
            body.len(),
            start.elapsed()
        );
        export_body(status.as_u16(), body)
    }

    async fn list_history(&self) -> Result<Vec<HistoryRecord>> {
        let list: HistoryListResponse = self
            .send(self.http.get(self.url("/api/cluster/history")), "GET history")
            .await?;
        Ok(list.records)
    }

    async fn activate_history(&self, id: i64) -> Result<()> {
        let _ack: serde_json::Value = self
            .send(
                self.http
                    .post(self.url(&format!("/api/cluster/history/{id}/activate"))),
                "POST history activate",
            )
            .await?;
        Ok(())
    }

    async fn delete_history(&self, id: i64) -> Result<()> {
        let _ack: serde_json::Value = self
            .send(
                self.http
                    .delete(self.url(&format!("/api/cluster/history/{id}"))),
                "DELETE history",
            )
            .await?;
        Ok(())
    }

    async fn compare_history(&self, id1: i64, id2: i64) -> Result<CompareResponse> {
        self.send(
            self.http
                .get(self.url("/api/cluster/history/compare"))
                .query(&[("id1", id1), ("id2", id2)]),
            "GET history compare",
        )
        .await
    }
}

#[async_trait]
impl ImportGateway for HttpGateway {
    async fn upload(&self, file_name: &str, contents: Bytes) -> Result<UploadResponse> {
        let part = Part::stream(contents)
            .file_name(file_name.to_string())
            .mime_str(XLSX_MIME)?;
        let form = Form::new().part("file", part);
        self.send(
            self.http.post(self.url("/api/import/upload")).multipart(form),
            "POST import upload",
        )
        .await
    }

    async fn confirm(&self, request: &ConfirmRequest) -> Result<ImportReport> {
        self.send(
            self.http.post(self.url("/api/import/confirm")).json(request),
            "POST import confirm",
        )
        .await
    }

    async fn import_status(&self) -> Result<ImportStatus> {
        self.send(self.http.get(self.url("/api/import/status")), "GET import status")
            .await
    }
}
