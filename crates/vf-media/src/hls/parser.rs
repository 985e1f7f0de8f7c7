//! Minimal reader for the VOD media playlists the transcoder writes.

use super::types::{MediaPlaylist, Segment};

/// Parse a media playlist into its segments and header values.
///
/// Unknown tags are ignored. Segment durations come from the preceding
/// `#EXTINF` tag (0.0 when absent).
pub fn parse_media_playlist(text: &str) -> MediaPlaylist {
    let mut playlist = MediaPlaylist::default();
    let mut pending_duration: Option<f64> = None;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            let value = rest.split(',').next().unwrap_or_default();
            pending_duration = value.trim().parse().ok();
        } else if let Some(rest) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            playlist.target_duration = rest.trim().parse().unwrap_or_default();
        } else if line == "#EXT-X-ENDLIST" {
            playlist.ended = true;
        } else if !line.starts_with('#') {
            playlist.segments.push(Segment {
                duration: pending_duration.take().unwrap_or(0.0),
                uri: line.to_string(),
            });
        }
    }

    playlist
}

/// List the segment URIs of a media playlist, in playback order.
pub fn parse_media_segments(text: &str) -> Vec<String> {
    parse_media_playlist(text)
        .segments
        .into_iter()
        .map(|s| s.uri)
        .collect()
}
