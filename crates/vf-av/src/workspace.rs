//! Per-job scratch workspace.
//!
//! A [`Workspace`] is a private temporary directory holding the downloaded
//! source, the thumbnail and one output directory per quality rung. It is
//! released through [`crate::cleanup`] so failures are logged rather than
//! raised; the underlying `TempDir` drop is the fallback if `release` is
//! never reached.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::cleanup::{cleanup, CleanupReport};

/// Scratch directory for one processing job.
pub struct Workspace {
    temp_dir: TempDir,
}

impl Workspace {
    /// Create a workspace under `root` (the system temp dir when `None`).
    pub fn new(root: Option<&Path>, label: &str) -> vf_core::Result<Self> {
        let prefix = format!("vf-{label}-");
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);

        let temp_dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| vf_core::Error::Internal(format!("failed to create scratch dir: {e}")))?;

        tracing::debug!(path = %temp_dir.path().display(), "scratch workspace created");
        Ok(Self { temp_dir })
    }

    /// Path to the workspace directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Where the downloaded source is stored.
    pub fn source_path(&self, file_name: &str) -> PathBuf {
        self.temp_dir.path().join(format!("source-{file_name}"))
    }

    pub fn thumbnail_path(&self) -> PathBuf {
        self.temp_dir.path().join("thumbnail.jpg")
    }

    /// Output directory for one quality rung, created on demand.
    pub fn variant_dir(&self, quality: &str) -> vf_core::Result<PathBuf> {
        let dir = self.temp_dir.path().join(quality);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Remove the workspace and everything in it.
    pub fn release(self) -> CleanupReport {
        let report = cleanup(&[self.temp_dir.path()]);
        tracing::debug!(
            removed = report.removed,
            failed = report.failed,
            "scratch workspace released"
        );
        // Anything cleanup could not remove is retried by TempDir's drop.
        drop(self.temp_dir);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn layout_inside_workspace() {
        let ws = Workspace::new(None, "test").unwrap();
        assert!(ws.source_path("demo.mp4").starts_with(ws.path()));
        assert!(ws.thumbnail_path().ends_with("thumbnail.jpg"));
        let dir = ws.variant_dir("720p").unwrap();
        assert!(dir.is_dir());
        assert!(dir.starts_with(ws.path()));
    }

    #[test]
    fn created_under_configured_root() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("scratch");
        let ws = Workspace::new(Some(&nested), "job").unwrap();
        assert!(ws.path().starts_with(&nested));
        let name = ws.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("vf-job-"));
    }

    #[test]
    fn release_removes_everything() {
        let ws = Workspace::new(None, "test").unwrap();
        let path = ws.path().to_path_buf();
        let dir = ws.variant_dir("360p").unwrap();
        fs::write(dir.join("segment_000.ts"), b"ts").unwrap();
        fs::write(ws.source_path("demo.mp4"), b"mp4").unwrap();

        let report = ws.release();

        assert!(!path.exists());
        assert!(report.is_clean());
        assert_eq!(report.removed, 4);
    }

    #[test]
    fn drop_also_removes() {
        let ws = Workspace::new(None, "test").unwrap();
        let path = ws.path().to_path_buf();
        drop(ws);
        assert!(!path.exists());
    }
}
