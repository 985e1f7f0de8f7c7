//! One quality rung encoded straight to an HLS VOD rendition with ffmpeg.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use vf_core::config::TranscodeConfig;
use vf_core::QualityRung;

use crate::command::ToolCommand;
use crate::tools::ToolRegistry;

/// Segment file name pattern handed to ffmpeg.
pub const SEGMENT_PATTERN: &str = "segment_%03d.ts";
/// Media playlist written next to the segments.
pub const PLAYLIST_NAME: &str = "index.m3u8";

/// Minimum spacing between progress callbacks (the final one is always sent).
const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// Encode timeout when none is configured.
const DEFAULT_ENCODE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Incremental parser for ffmpeg `-progress` key/value blocks.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    duration_secs: f64,
    out_time_us: Option<i64>,
}

impl ProgressParser {
    pub fn new(duration_secs: f64) -> Self {
        Self {
            duration_secs,
            out_time_us: None,
        }
    }

    /// Feed one line. Returns the rung fraction (0.0..=1.0) when the line
    /// closes a progress block.
    pub fn feed(&mut self, line: &str) -> Option<f64> {
        let line = line.trim();
        if let Some(val) = line.strip_prefix("out_time_us=") {
            self.out_time_us = val.parse::<i64>().ok();
            None
        } else if let Some(val) = line.strip_prefix("progress=") {
            if val == "end" {
                return Some(1.0);
            }
            let out_us = self.out_time_us?;
            if self.duration_secs <= 0.0 {
                return None;
            }
            let elapsed = out_us.max(0) as f64 / 1_000_000.0;
            Some((elapsed / self.duration_secs).clamp(0.0, 1.0))
        } else {
            None
        }
    }
}

/// Build the ffmpeg argument list for one rung.
pub fn hls_variant_args(
    input: &Path,
    out_dir: &Path,
    rung: &QualityRung,
    config: &TranscodeConfig,
) -> Vec<String> {
    let segment_secs = config.segment_secs.max(1);
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-progress".into(),
        "pipe:2".into(),
        "-nostats".into(),
        "-i".into(),
        input.to_string_lossy().to_string(),
        "-map".into(),
        "0:v:0".into(),
        "-map".into(),
        "0:a:0?".into(),
        "-vf".into(),
        format!(
            "scale=w={}:h={}:force_original_aspect_ratio=decrease:force_divisible_by=2",
            rung.width, rung.height
        ),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        config.video_preset.clone(),
        "-profile:v".into(),
        "main".into(),
        "-b:v".into(),
        rung.bitrate.to_string(),
        "-maxrate".into(),
        rung.maxrate().to_string(),
        "-bufsize".into(),
        rung.bufsize().to_string(),
        "-force_key_frames".into(),
        format!("expr:gte(t,n_forced*{segment_secs})"),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        config.audio_bitrate.clone(),
        "-ac".into(),
        "2".into(),
        "-f".into(),
        "hls".into(),
        "-hls_time".into(),
        segment_secs.to_string(),
        "-hls_playlist_type".into(),
        "vod".into(),
        "-hls_segment_filename".into(),
    ];
    args.push(out_dir.join(SEGMENT_PATTERN).to_string_lossy().to_string());
    args.push(out_dir.join(PLAYLIST_NAME).to_string_lossy().to_string());
    args
}

/// Encode `input` into `out_dir/index.m3u8` plus segments for one rung.
///
/// `progress` receives the rung fraction, throttled to one call every two
/// seconds plus a final `1.0`. Returns the playlist path.
pub async fn encode_hls_variant(
    tools: &ToolRegistry,
    input: &Path,
    out_dir: &Path,
    rung: &QualityRung,
    config: &TranscodeConfig,
    duration_secs: f64,
    mut progress: impl FnMut(f64),
) -> vf_core::Result<PathBuf> {
    let ffmpeg = tools.require("ffmpeg")?;
    std::fs::create_dir_all(out_dir)?;

    tracing::info!(
        quality = rung.quality,
        bitrate = rung.bitrate,
        "HLS encode: {} -> {}",
        input.display(),
        out_dir.display()
    );

    let mut cmd = ToolCommand::new(ffmpeg.path.clone());
    cmd.timeout(
        config
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_ENCODE_TIMEOUT),
    );
    cmd.args(hls_variant_args(input, out_dir, rung, config));

    let mut parser = ProgressParser::new(duration_secs);
    let mut last_emit: Option<Instant> = None;

    cmd.execute_with_stderr_callback(|line| {
        let Some(fraction) = parser.feed(line) else {
            return;
        };
        let due = last_emit.map_or(true, |t| t.elapsed() >= PROGRESS_INTERVAL);
        if due || fraction >= 1.0 {
            progress(fraction);
            last_emit = Some(Instant::now());
        }
    })
    .await?;

    let playlist = out_dir.join(PLAYLIST_NAME);
    if !playlist.exists() {
        return Err(vf_core::Error::transcode(
            "encode",
            format!("ffmpeg produced no playlist for {}", rung.quality),
        ));
    }
    Ok(playlist)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_fraction_from_out_time() {
        let mut parser = ProgressParser::new(100.0);
        assert_eq!(parser.feed("frame=120"), None);
        assert_eq!(parser.feed("out_time_us=25000000"), None);
        assert_eq!(parser.feed("progress=continue"), Some(0.25));
        parser.feed("out_time_us=150000000");
        assert_eq!(parser.feed("progress=continue"), Some(1.0));
        assert_eq!(parser.feed("progress=end"), Some(1.0));
    }

    #[test]
    fn progress_ignores_unknown_time() {
        let mut parser = ProgressParser::new(100.0);
        parser.feed("out_time_us=N/A");
        assert_eq!(parser.feed("progress=continue"), None);

        let mut zero = ProgressParser::new(0.0);
        zero.feed("out_time_us=1000");
        assert_eq!(zero.feed("progress=continue"), None);
    }

    #[test]
    fn args_carry_rung_rate_control() {
        let rung = QualityRung::find("720p").unwrap();
        let config = TranscodeConfig::default();
        let args = hls_variant_args(
            Path::new("/scratch/source.mp4"),
            Path::new("/scratch/720p"),
            rung,
            &config,
        );

        let value_after = |flag: &str| {
            let i = args.iter().position(|a| a == flag).unwrap();
            args[i + 1].clone()
        };
        assert_eq!(value_after("-b:v"), "2800000");
        assert_eq!(value_after("-maxrate"), "2996000");
        assert_eq!(value_after("-bufsize"), "4200000");
        assert_eq!(value_after("-hls_time"), "10");
        assert_eq!(value_after("-hls_playlist_type"), "vod");
        assert_eq!(value_after("-progress"), "pipe:2");
        assert_eq!(value_after("-preset"), "veryfast");
        assert_eq!(
            value_after("-hls_segment_filename"),
            "/scratch/720p/segment_%03d.ts"
        );
        assert_eq!(args.last().unwrap(), "/scratch/720p/index.m3u8");
        assert!(value_after("-vf").contains("w=1280:h=720"));
    }
}
