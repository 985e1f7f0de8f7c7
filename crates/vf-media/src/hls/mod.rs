//! HLS playlist handling.
//!
//! Builds the master playlist that ties the quality ladder together and
//! reads back the per-rung media playlists the transcoder produces.

mod generator;
mod parser;
mod types;

pub use generator::{build_master_playlist, variant_for_rung, VARIANT_PLAYLIST_NAME};
pub use parser::{parse_media_playlist, parse_media_segments};
pub use types::{MediaPlaylist, Segment};
