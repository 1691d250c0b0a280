//! Workbook import: upload, column reconciliation and confirmation.

mod fields;
mod reconcile;

pub use fields::RequiredField;
pub use reconcile::{ColumnReconciler, FieldResolution, FieldRow, MappingPresentation};

use crate::error::{ClientError, Result};
use crate::gateway::ImportGateway;
use bytes::Bytes;
use log::debug;
use std::path::Path;

const UPLOAD_EXTENSION: &str = "xlsx";

/// Read a workbook from disk, returning the file name to send along with its bytes.
pub async fn read_upload(path: &Path) -> Result<(String, Bytes)> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| ClientError::InvalidUpload {
            reason: format!("{} is not a file", path.display()),
        })?;

    let is_xlsx = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(UPLOAD_EXTENSION));
    if !is_xlsx {
        return Err(ClientError::InvalidUpload {
            reason: format!("only .{UPLOAD_EXTENSION} files can be imported: {file_name}"),
        });
    }

    let contents = match tokio::fs::read(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ClientError::InvalidUpload {
                reason: format!("file not found: {}", path.display()),
            })
        }
        Err(e) => return Err(e.into()),
    };
    debug!("[IMPORT] read {} bytes from {}", contents.len(), path.display());
    Ok((file_name, Bytes::from(contents)))
}

/// Upload `path` and open a mapping session for it.
pub async fn upload(
    gateway: &dyn ImportGateway,
    reconciler: &mut ColumnReconciler,
    path: &Path,
) -> Result<MappingPresentation> {
    let (file_name, contents) = read_upload(path).await?;
    let response = gateway.upload(&file_name, contents).await?;
    Ok(reconciler.ingest(response))
}
