//! Error types shared by the gateway and the client-side engines.

use crate::import::RequiredField;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The request never produced a usable HTTP response.
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),

    /// The server answered with a failure. `message` is shown to the user as is.
    #[error("{message}")]
    Remote {
        status: Option<u16>,
        message: String,
    },

    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("select exactly two history records to compare ({selected} selected)")]
    InvalidSelection { selected: usize },

    #[error("field \"{field}\" is not mapped, select a column for it")]
    IncompleteMapping { field: RequiredField },

    #[error("column {index} does not exist (file has {columns} columns)")]
    ColumnOutOfRange { index: usize, columns: usize },

    #[error("no uploaded file is awaiting confirmation, upload first")]
    NoMappingSession,

    #[error("{reason}")]
    InvalidUpload { reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// True for validation failures that are raised before any request is sent.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ClientError::InvalidSelection { .. }
                | ClientError::IncompleteMapping { .. }
                | ClientError::ColumnOutOfRange { .. }
                | ClientError::NoMappingSession
                | ClientError::InvalidUpload { .. }
        )
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => ClientError::Remote {
                status: Some(status.as_u16()),
                message: format!("HTTP {}", status.as_u16()),
            },
            None => ClientError::Transport(Box::new(e)),
        }
    }
}
