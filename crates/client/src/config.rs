use std::path::PathBuf;

use outpost_protocol::messages::FileQuery;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the backend, e.g. `https://api.example.com/v1`.
    pub base_url: String,
    /// Application key sent with every control-plane call.
    pub app_key: String,
    /// Bearer token for the current session.
    pub auth_token: String,
    /// Root directory for durable state and default download destinations.
    pub data_dir: PathBuf,
    /// Device-local namespace separating queues of different client
    /// instances sharing one data directory.
    pub namespace: String,
    /// Transfer chunk size in bytes; 0 selects the engine default.
    pub chunk_size: usize,
}

impl ClientConfig {
    pub fn new(
        base_url: impl Into<String>,
        app_key: impl Into<String>,
        auth_token: impl Into<String>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            app_key: app_key.into(),
            auth_token: auth_token.into(),
            data_dir: data_dir.into(),
            namespace: "default".into(),
            chunk_size: 0,
        }
    }
}

/// Upload options.
///
/// The original SDK took these as a loose options dictionary; here every
/// recognized option is a field, so unrecognized options are
/// unrepresentable rather than silently passed through.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Destination file name; defaults to the source file's name.
    pub file_name: Option<String>,
    /// Resource identity override; absent means the server assigns one.
    pub file_id: Option<String>,
    /// Mime type override; inferred from the file extension otherwise.
    pub mime_type: Option<String>,
    /// Make the file publicly readable.
    pub public: bool,
}

/// Download options.
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// Destination name overrides. When non-empty, the count must match
    /// the number of requested files.
    pub dest_names: Vec<String>,
    /// Skip the transfer when the server copy is not newer than the local
    /// file.
    pub only_if_newer: bool,
    /// Continue a partial download from the bytes already on disk.
    pub resume: bool,
}

/// What to download: explicit ids, names, or a metadata query.
#[derive(Debug, Clone)]
pub enum FileSelector {
    Ids(Vec<String>),
    Names(Vec<String>),
    Query(FileQuery),
}

impl FileSelector {
    /// Selects a single file by id.
    pub fn id(file_id: impl Into<String>) -> Self {
        Self::Ids(vec![file_id.into()])
    }

    /// Selects a single file by name.
    pub fn name(file_name: impl Into<String>) -> Self {
        Self::Names(vec![file_name.into()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = ClientConfig::new("https://api.example.com/v1", "key", "token", "/data");
        assert_eq!(config.namespace, "default");
        assert_eq!(config.chunk_size, 0);
    }

    #[test]
    fn options_default_to_no_overrides() {
        let upload = UploadOptions::default();
        assert!(upload.file_name.is_none());
        assert!(upload.file_id.is_none());
        assert!(upload.mime_type.is_none());
        assert!(!upload.public);

        let download = DownloadOptions::default();
        assert!(download.dest_names.is_empty());
        assert!(!download.only_if_newer);
        assert!(!download.resume);
    }

    #[test]
    fn selector_shorthands() {
        assert!(matches!(FileSelector::id("f1"), FileSelector::Ids(ids) if ids == ["f1"]));
        assert!(
            matches!(FileSelector::name("a.bin"), FileSelector::Names(names) if names == ["a.bin"])
        );
    }
}
