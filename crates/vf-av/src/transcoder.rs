//! The transcoder seam used by the processing worker.
//!
//! [`Transcoder`] abstracts the three operations the pipeline needs from an
//! encoder. [`FfmpegTranscoder`] implements them by shelling out to
//! ffprobe/ffmpeg; tests substitute their own implementation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use vf_core::config::TranscodeConfig;
use vf_core::QualityRung;

use crate::actions;
use crate::probe::{probe_media, ProbedMedia};
use crate::tools::ToolRegistry;

/// Progress sink for one rung; receives the rung fraction in `0.0..=1.0`.
pub type ProgressFn<'a> = &'a (dyn Fn(f64) + Send + Sync);

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Read duration and technical metadata of the source.
    async fn probe(&self, input: &Path) -> vf_core::Result<ProbedMedia>;

    /// Write a JPEG of the frame at `at_secs` to `output`.
    async fn extract_thumbnail(
        &self,
        input: &Path,
        at_secs: f64,
        output: &Path,
    ) -> vf_core::Result<()>;

    /// Produce an HLS VOD rendition of `input` for `rung` inside `out_dir`.
    ///
    /// Returns the path of the rung's media playlist.
    async fn encode_variant(
        &self,
        input: &Path,
        out_dir: &Path,
        rung: &QualityRung,
        duration_secs: f64,
        progress: ProgressFn<'_>,
    ) -> vf_core::Result<PathBuf>;
}

/// [`Transcoder`] backed by the ffmpeg/ffprobe CLIs.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    tools: ToolRegistry,
    config: TranscodeConfig,
}

impl FfmpegTranscoder {
    pub fn new(tools: ToolRegistry, config: TranscodeConfig) -> Self {
        Self { tools, config }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe(&self, input: &Path) -> vf_core::Result<ProbedMedia> {
        probe_media(&self.tools, input).await
    }

    async fn extract_thumbnail(
        &self,
        input: &Path,
        at_secs: f64,
        output: &Path,
    ) -> vf_core::Result<()> {
        actions::extract_thumbnail(&self.tools, input, at_secs, output).await
    }

    async fn encode_variant(
        &self,
        input: &Path,
        out_dir: &Path,
        rung: &QualityRung,
        duration_secs: f64,
        progress: ProgressFn<'_>,
    ) -> vf_core::Result<PathBuf> {
        actions::encode_hls_variant(
            &self.tools,
            input,
            out_dir,
            rung,
            &self.config,
            duration_secs,
            |fraction| progress(fraction),
        )
        .await
    }
}
