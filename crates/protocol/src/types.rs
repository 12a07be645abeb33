use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classified error surfaced by the control or data plane.
///
/// `retryable` is the contract with callers: `true` means the failure is
/// transient (timeout, connection drop, server overload) and the operation
/// may be reattempted; `false` means the server rejected the operation
/// (validation, auth, not-found, conflict) and retrying as-is cannot
/// succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{message} (code {code})")]
pub struct ApiError {
    pub code: i32,
    pub message: String,
    pub retryable: bool,
}

impl ApiError {
    /// Builds a transient (retryable) error.
    pub fn transient(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: true,
        }
    }

    /// Builds a permanent (non-retryable) error.
    pub fn permanent(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: false,
        }
    }
}

/// Server-side metadata for one stored file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub file_id: String,
    pub file_name: String,
    /// Declared length in bytes.
    pub length: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub public: bool,
}

/// A short-lived, time-bounded location for data-plane streaming.
///
/// A location past `expires_at` is invalid and must be re-resolved through
/// the control plane, never retried as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedLocation {
    pub url: String,
    /// Headers the data plane must send along with every request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
    pub expires_at: DateTime<Utc>,
}

impl ResolvedLocation {
    /// Returns `true` if the location has expired as of now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Returns `true` if the location has expired as of `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A point-in-time snapshot of one record mutation, as queued for replay.
///
/// This is the versioned unit the save queue persists and replays: the
/// record body is an opaque JSON value so the queue format stays stable
/// regardless of the application's model types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSnapshot {
    pub collection: String,
    pub record_id: String,
    pub body: serde_json::Value,
    /// Time of the most recent local write captured by this snapshot.
    pub saved_at: DateTime<Utc>,
}
