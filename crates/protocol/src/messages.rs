//! Typed payloads for each control-plane operation.

use serde::{Deserialize, Serialize};

use crate::types::{FileMetadata, RecordSnapshot, ResolvedLocation};

/// Replays one queued record mutation against the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRecordRequest {
    pub snapshot: RecordSnapshot,
}

/// The server's acknowledgement of a replayed mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRecordResponse {
    pub record_id: String,
}

/// Allocates an upload location for a new or existing file.
///
/// When `file_id` is absent the server assigns one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveUploadRequest {
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
    pub length: u64,
    #[serde(default)]
    pub public: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveUploadResponse {
    pub metadata: FileMetadata,
    pub location: ResolvedLocation,
}

/// Resolves a download location by file id or by name.
///
/// Exactly one of `file_id` / `file_name` must be set; when resolving by
/// name and several files match, the server picks the first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveDownloadRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl ResolveDownloadRequest {
    pub fn by_id(file_id: impl Into<String>) -> Self {
        Self {
            file_id: Some(file_id.into()),
            file_name: None,
        }
    }

    pub fn by_name(file_name: impl Into<String>) -> Self {
        Self {
            file_id: None,
            file_name: Some(file_name.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveDownloadResponse {
    pub metadata: FileMetadata,
    pub location: ResolvedLocation,
}

/// Metadata filter for file queries. Empty filters match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFilesRequest {
    pub query: FileQuery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFilesResponse {
    pub files: Vec<FileMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFileRequest {
    pub file_id: String,
}

/// Deletion result: zero or one records removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFileResponse {
    pub count: u32,
}
