//! vf-media: HLS playlist generation and parsing.
//!
//! # Modules
//!
//! - [`hls`] - master playlist generation and media playlist parsing (M3U8)

pub mod hls;

// Re-export commonly used items at the crate root.
pub use hls::{
    build_master_playlist, parse_media_playlist, parse_media_segments, variant_for_rung,
    MediaPlaylist, Segment,
};
