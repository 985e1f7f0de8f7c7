//! HLS master playlist generation.

use vf_core::{QualityRung, Variant};

/// File name every rung's media playlist is written under.
pub const VARIANT_PLAYLIST_NAME: &str = "index.m3u8";

/// Generate an HLS master playlist (M3U8) from encoded variants.
///
/// Output is `#EXTM3U`, `#EXT-X-VERSION:3`, then for each variant in input
/// order one `#EXT-X-STREAM-INF` line immediately followed by the variant's
/// playlist path relative to the master (`<quality>/index.m3u8`).
pub fn build_master_playlist(variants: &[Variant]) -> String {
    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");

    for variant in variants {
        out.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}\n",
            variant.bandwidth, variant.resolution
        ));
        out.push_str(&format!("{}/{VARIANT_PLAYLIST_NAME}\n", variant.quality));
    }

    out
}

/// Describe an uploaded rung as a manifest [`Variant`].
pub fn variant_for_rung(rung: &QualityRung, playlist_key: impl Into<String>) -> Variant {
    Variant {
        quality: rung.quality.to_string(),
        playlist_key: playlist_key.into(),
        bandwidth: rung.bitrate,
        resolution: rung.resolution(),
    }
}
