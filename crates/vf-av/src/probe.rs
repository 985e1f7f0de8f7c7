//! Source probing through the `ffprobe` CLI.
//!
//! Shells out to `ffprobe -v quiet -print_format json -show_format -show_streams`
//! and maps the first video stream plus the container duration into
//! [`ProbedMedia`].

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use vf_core::MediaMetadata;

use crate::command::ToolCommand;
use crate::tools::ToolRegistry;

/// Duration and technical metadata of a source file.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbedMedia {
    pub duration_secs: f64,
    pub metadata: MediaMetadata,
}

/// Probe `path` with ffprobe.
pub async fn probe_media(tools: &ToolRegistry, path: &Path) -> vf_core::Result<ProbedMedia> {
    let ffprobe = tools.require("ffprobe")?;

    let mut cmd = ToolCommand::new(ffprobe.path.clone());
    cmd.timeout(Duration::from_secs(120));
    cmd.args([
        "-v",
        "quiet",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
    ]);
    cmd.arg(path.to_string_lossy().as_ref());

    let output = cmd.execute().await?;
    parse_ffprobe_json(&output.stdout)
}

/// Map ffprobe JSON output to [`ProbedMedia`].
pub fn parse_ffprobe_json(json: &str) -> vf_core::Result<ProbedMedia> {
    let ff: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| vf_core::Error::Probe(format!("ffprobe JSON parse error: {e}")))?;

    let video = ff
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| vf_core::Error::Probe("no video stream found".into()))?;

    let duration_secs = ff
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .or_else(|| video.duration.as_deref().and_then(|d| d.parse().ok()))
        .filter(|d| *d > 0.0)
        .ok_or_else(|| vf_core::Error::Probe("source has no usable duration".into()))?;

    let bitrate = ff
        .format
        .bit_rate
        .as_deref()
        .or(video.bit_rate.as_deref())
        .and_then(|b| b.parse::<u64>().ok())
        .unwrap_or(0);

    let fps = video
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .filter(|f| *f > 0.0)
        .or_else(|| video.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(0.0);

    Ok(ProbedMedia {
        duration_secs,
        metadata: MediaMetadata {
            width: video.width.unwrap_or(0),
            height: video.height.unwrap_or(0),
            fps,
            codec: video.codec_name.clone().unwrap_or_else(|| "unknown".into()),
            bitrate,
        },
    })
}

// ---------------------------------------------------------------------------
// JSON structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
}

/// Parse `"24000/1001"` or `"25"` into frames per second.
fn parse_frame_rate(rate_str: &str) -> Option<f64> {
    match rate_str.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => rate_str.parse().ok(),
    }
}
