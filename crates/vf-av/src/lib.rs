//! # vf-av
//!
//! Audio/video processing, probing, scratch space and external tool
//! management for the vodforge pipeline.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to ffmpeg
//!   and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout,
//!   stderr streaming and kill-on-drop for external processes.
//! - **Scratch space** ([`Workspace`], [`cleanup`]) -- per-job temporary
//!   directories and best-effort removal.
//! - **Probing** ([`probe`]) -- ffprobe JSON mapped to source metadata.
//! - **Actions** ([`actions`]) -- HLS rendition encoding and thumbnails.
//! - **Transcoder seam** ([`Transcoder`], [`FfmpegTranscoder`]).

pub mod actions;
pub mod cleanup;
pub mod command;
pub mod probe;
pub mod tools;
pub mod transcoder;
pub mod workspace;

// ---- Re-exports for convenience ----

pub use cleanup::{cleanup, CleanupReport};
pub use command::{ToolCommand, ToolOutput};
pub use probe::{probe_media, ProbedMedia};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
pub use transcoder::{FfmpegTranscoder, ProgressFn, Transcoder};
pub use workspace::Workspace;
