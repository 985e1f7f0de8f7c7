//! Single-frame JPEG thumbnail extraction.

use std::path::Path;
use std::time::Duration;

use crate::command::ToolCommand;
use crate::tools::ToolRegistry;

/// Grab the frame at `at_secs` and write it to `output` as a JPEG.
pub async fn extract_thumbnail(
    tools: &ToolRegistry,
    input: &Path,
    at_secs: f64,
    output: &Path,
) -> vf_core::Result<()> {
    let ffmpeg = tools.require("ffmpeg")?;
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut cmd = ToolCommand::new(ffmpeg.path.clone());
    cmd.timeout(Duration::from_secs(120));
    cmd.args(thumbnail_args(input, at_secs, output));
    cmd.execute().await?;

    if !output.exists() {
        return Err(vf_core::Error::transcode(
            "thumbnail",
            "ffmpeg did not write a thumbnail",
        ));
    }
    Ok(())
}

fn thumbnail_args(input: &Path, at_secs: f64, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-hide_banner".into(),
        // Input seeking: fast and frame-accurate enough for a poster.
        "-ss".into(),
        format!("{:.3}", at_secs.max(0.0)),
        "-i".into(),
        input.to_string_lossy().to_string(),
        "-frames:v".into(),
        "1".into(),
        "-vf".into(),
        "scale=640:-2".into(),
        "-q:v".into(),
        "3".into(),
        output.to_string_lossy().to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeks_before_input() {
        let args = thumbnail_args(Path::new("in.mp4"), 12.5, Path::new("out.jpg"));
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < i);
        assert_eq!(args[ss + 1], "12.500");
        assert_eq!(args.last().unwrap(), "out.jpg");
    }

    #[test]
    fn negative_offset_clamped() {
        let args = thumbnail_args(Path::new("in.mp4"), -1.0, Path::new("out.jpg"));
        assert_eq!(args[3], "0.000");
    }

    #[tokio::test]
    async fn missing_ffmpeg_is_tool_error() {
        let tools = ToolRegistry::default();
        let err = extract_thumbnail(&tools, Path::new("in.mp4"), 1.0, Path::new("/tmp/x.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, vf_core::Error::Tool { .. }));
    }
}
