//! MIME types for the objects the pipeline writes.

use std::path::Path;

pub const HLS_PLAYLIST: &str = "application/vnd.apple.mpegurl";
pub const MPEG_TS: &str = "video/mp2t";
pub const JPEG: &str = "image/jpeg";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Guess a content type from a file name's extension.
pub fn for_path(path: impl AsRef<Path>) -> &'static str {
    let ext = path
        .as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("m3u8") => HLS_PLAYLIST,
        Some("ts") => MPEG_TS,
        Some("jpg") | Some("jpeg") => JPEG,
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        _ => OCTET_STREAM,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions() {
        assert_eq!(for_path("720p/index.m3u8"), HLS_PLAYLIST);
        assert_eq!(for_path("segment_000.ts"), MPEG_TS);
        assert_eq!(for_path("thumb.JPG"), JPEG);
        assert_eq!(for_path("demo.mp4"), "video/mp4");
        assert_eq!(for_path("noext"), OCTET_STREAM);
    }
}
