//! HLS playlist types.

/// A single segment in a media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Segment duration in seconds.
    pub duration: f64,
    /// URI for this segment, relative to the playlist.
    pub uri: String,
}

/// A parsed HLS media playlist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaPlaylist {
    /// Maximum segment duration in integer seconds.
    pub target_duration: u32,
    /// Ordered list of segments.
    pub segments: Vec<Segment>,
    /// Whether `#EXT-X-ENDLIST` was present.
    pub ended: bool,
}

impl MediaPlaylist {
    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }
}
