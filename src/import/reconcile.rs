//! Column mapping reconciliation for a single upload.
//!
//! The server auto-detects which column holds each required field. Whatever it could not
//! place, the user picks by hand; `confirm` merges both and hands the result back.

use super::fields::RequiredField;
use crate::error::{ClientError, Result};
use crate::gateway::ImportGateway;
use crate::model::{ConfirmRequest, FinalMapping, ImportReport, UploadResponse};
use log::{debug, info};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
struct MappingSession {
    headers: Vec<String>,
    auto_mapping: BTreeMap<RequiredField, usize>,
    unmatched: BTreeSet<RequiredField>,
    manual: BTreeMap<RequiredField, usize>,
    extra_columns: BTreeMap<String, usize>,
    auto_confirmed: bool,
}

impl MappingSession {
    fn from_upload(upload: UploadResponse) -> Self {
        let auto_mapping = upload
            .mapping
            .into_iter()
            .filter_map(|(name, index)| match name.parse::<RequiredField>() {
                Ok(field) => Some((field, index)),
                Err(_) => {
                    debug!("[IMPORT] ignoring mapping for unknown field {name:?}");
                    None
                }
            })
            .collect();
        let unmatched: BTreeSet<RequiredField> = upload
            .unmatched
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect();
        let auto_confirmed = upload.auto_confirmed.unwrap_or(unmatched.is_empty());
        Self {
            headers: upload.headers,
            auto_mapping,
            unmatched,
            manual: BTreeMap::new(),
            extra_columns: upload.extra_columns,
            auto_confirmed,
        }
    }

    fn valid(&self, index: usize) -> Option<usize> {
        (index < self.headers.len()).then_some(index)
    }

    fn resolve(&self, field: RequiredField) -> Option<usize> {
        self.manual
            .get(&field)
            .or_else(|| self.auto_mapping.get(&field))
            .and_then(|&i| self.valid(i))
    }

    fn final_mapping(&self) -> Result<FinalMapping> {
        let mut resolved = [0usize; 4];
        for (slot, field) in resolved.iter_mut().zip(RequiredField::ALL) {
            *slot = self
                .resolve(field)
                .ok_or(ClientError::IncompleteMapping { field })?;
        }
        let [id, title, step_no, operation] = resolved;
        Ok(FinalMapping {
            id,
            title,
            step_no,
            operation,
        })
    }

    fn presentation(&self) -> MappingPresentation {
        let rows = RequiredField::ALL
            .into_iter()
            .map(|field| {
                let resolution = if self.unmatched.contains(&field) {
                    FieldResolution::Prompt {
                        selected: self.manual.get(&field).copied(),
                    }
                } else {
                    match self.auto_mapping.get(&field).and_then(|&i| self.valid(i)) {
                        Some(index) => FieldResolution::Resolved {
                            index,
                            column: self.headers[index].clone(),
                        },
                        None => FieldResolution::Missing,
                    }
                };
                FieldRow { field, resolution }
            })
            .collect();

        let mut extra: Vec<(&String, &usize)> = self.extra_columns.iter().collect();
        extra.sort_by_key(|&(_, &index)| index);

        MappingPresentation {
            rows,
            headers: self.headers.clone(),
            extra_columns: extra.into_iter().map(|(name, _)| name.clone()).collect(),
            auto_confirmed: self.auto_confirmed,
        }
    }
}

/// How one required field is shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldResolution {
    /// Detected by the server.
    Resolved { index: usize, column: String },
    /// The user has to choose a column.
    Prompt { selected: Option<usize> },
    /// Neither detected nor offered for selection.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldRow {
    pub field: RequiredField,
    pub resolution: FieldResolution,
}

/// Read-only view of the current mapping session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingPresentation {
    pub rows: Vec<FieldRow>,
    pub headers: Vec<String>,
    pub extra_columns: Vec<String>,
    pub auto_confirmed: bool,
}

/// Holds at most one mapping session at a time.
#[derive(Debug, Default)]
pub struct ColumnReconciler {
    session: Option<MappingSession>,
}

impl ColumnReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Start a session from an upload response, discarding any previous one.
    pub fn ingest(&mut self, upload: UploadResponse) -> MappingPresentation {
        if self.session.is_some() {
            debug!("[IMPORT] replacing previous mapping session");
        }
        let session = MappingSession::from_upload(upload);
        let presentation = session.presentation();
        self.session = Some(session);
        presentation
    }

    pub fn presentation(&self) -> Result<MappingPresentation> {
        Ok(self.session()?.presentation())
    }

    fn session(&self) -> Result<&MappingSession> {
        self.session.as_ref().ok_or(ClientError::NoMappingSession)
    }

    /// Record the user's column for `field`.
    ///
    /// Only fields the server could not match accept a manual choice; for any other field this is
    /// a no-op and returns `Ok(false)`.
    pub fn select(&mut self, field: RequiredField, index: usize) -> Result<bool> {
        let session = self.session.as_mut().ok_or(ClientError::NoMappingSession)?;
        if index >= session.headers.len() {
            return Err(ClientError::ColumnOutOfRange {
                index,
                columns: session.headers.len(),
            });
        }
        if !session.unmatched.contains(&field) {
            debug!("[IMPORT] {field} was matched automatically, ignoring manual selection");
            return Ok(false);
        }
        session.manual.insert(field, index);
        Ok(true)
    }

    /// Go back to "no column selected" for `field`.
    pub fn deselect(&mut self, field: RequiredField) -> Result<()> {
        let session = self.session.as_mut().ok_or(ClientError::NoMappingSession)?;
        session.manual.remove(&field);
        Ok(())
    }

    /// Index of the header called `name`, ignoring case and surrounding whitespace.
    pub fn column_index(&self, name: &str) -> Result<Option<usize>> {
        let wanted = name.trim().to_lowercase();
        Ok(self
            .session()?
            .headers
            .iter()
            .position(|h| h.trim().to_lowercase() == wanted))
    }

    /// Resolve a user-typed column: a header name first, then a 0-based index.
    pub fn column_for(&self, choice: &str) -> Result<Option<usize>> {
        if let Some(index) = self.column_index(choice)? {
            return Ok(Some(index));
        }
        Ok(choice.trim().parse::<usize>().ok())
    }

    pub fn final_mapping(&self) -> Result<FinalMapping> {
        self.session()?.final_mapping()
    }

    /// Validate the mapping and submit it.
    ///
    /// An incomplete mapping is rejected locally and the session stays open for corrections.
    /// Once submitted, the session is gone whatever the server answers.
    pub async fn confirm(&mut self, gateway: &dyn ImportGateway) -> Result<ImportReport> {
        let session = self.session()?;
        let request = ConfirmRequest {
            mapping: session.final_mapping()?,
            extra_columns: session.extra_columns.clone(),
        };
        self.session = None;

        let report = gateway.confirm(&request).await?;
        info!(
            "Imported {} cases with {} steps ({} warnings)",
            report.cases_imported,
            report.steps_imported,
            report.warnings.len()
        );
        Ok(report)
    }

    pub fn cancel(&mut self) {
        self.session = None;
    }
}
