//! ffmpeg actions: HLS rendition encoding and thumbnail extraction.

mod hls_variant;
mod thumbnail;

pub use hls_variant::{
    encode_hls_variant, hls_variant_args, ProgressParser, PLAYLIST_NAME, SEGMENT_PATTERN,
};
pub use thumbnail::extract_thumbnail;
