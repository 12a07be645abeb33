use std::path::Path;

/// Fallback mime type for unknown extensions and raw byte uploads.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Infers a mime type from a file extension.
pub fn mime_for_path(path: &Path) -> &'static str {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return OCTET_STREAM;
    };
    match ext.to_ascii_lowercase().as_str() {
        "txt" | "log" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        _ => OCTET_STREAM,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_extensions() {
        assert_eq!(mime_for_path(Path::new("a/movie.mp4")), "video/mp4");
        assert_eq!(mime_for_path(Path::new("report.PDF")), "application/pdf");
        assert_eq!(mime_for_path(Path::new("photo.jpeg")), "image/jpeg");
        assert_eq!(mime_for_path(Path::new("data.json")), "application/json");
    }

    #[test]
    fn unknown_or_missing_extension_falls_back() {
        assert_eq!(mime_for_path(Path::new("blob.xyz123")), OCTET_STREAM);
        assert_eq!(mime_for_path(Path::new("no_extension")), OCTET_STREAM);
    }
}
