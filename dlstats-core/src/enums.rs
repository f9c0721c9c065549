//! Enum types for download events

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome of a download attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// File was served
    #[default]
    Success,
    /// Caller was not allowed to download
    Denied,
    /// Download was attempted but the file could not be served
    Failed,
}

impl DownloadStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            DownloadStatus::Success => "success",
            DownloadStatus::Denied => "denied",
            DownloadStatus::Failed => "failed",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, DownloadStatusParseError> {
        match s.to_lowercase().as_str() {
            "success" => Ok(DownloadStatus::Success),
            "denied" => Ok(DownloadStatus::Denied),
            "failed" => Ok(DownloadStatus::Failed),
            _ => Err(DownloadStatusParseError(s.to_string())),
        }
    }

    /// Whether this outcome counts towards the product's download counter.
    pub fn is_countable(&self) -> bool {
        matches!(self, DownloadStatus::Success)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for DownloadStatus {
    type Err = DownloadStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid download status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadStatusParseError(pub String);

impl fmt::Display for DownloadStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid download status: {}", self.0)
    }
}

impl std::error::Error for DownloadStatusParseError {}

/// Result of a role-gated administrative operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminOutcome {
    /// The operation ran; carries the rows affected (0 for DDL).
    Completed(u64),
    /// The caller lacked the administrator capability. Nothing was changed.
    Denied,
}

impl AdminOutcome {
    pub fn is_denied(&self) -> bool {
        matches!(self, AdminOutcome::Denied)
    }

    /// Rows affected, or `None` when the operation was denied.
    pub fn rows_affected(&self) -> Option<u64> {
        match self {
            AdminOutcome::Completed(rows) => Some(*rows),
            AdminOutcome::Denied => None,
        }
    }
}
