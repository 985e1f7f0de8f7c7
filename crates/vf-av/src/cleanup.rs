//! Best-effort removal of scratch files and directories.
//!
//! [`cleanup`] never fails: every error is logged and counted in the
//! returned [`CleanupReport`], and later paths are still attempted.

use std::path::Path;

/// Outcome of a [`cleanup`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Files and directories actually removed.
    pub removed: usize,
    /// Removals that failed (logged at warn).
    pub failed: usize,
    /// Top-level paths that did not exist.
    pub skipped: usize,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Remove every path in `paths`.
///
/// Directories are emptied child-first and then removed; files are removed
/// directly. Symlinks are removed, never followed.
pub fn cleanup<P: AsRef<Path>>(paths: &[P]) -> CleanupReport {
    let mut report = CleanupReport::default();

    for path in paths {
        let path = path.as_ref();
        match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => remove_dir(path, &mut report),
            Ok(_) => remove_file(path, &mut report),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "cleanup: path already gone");
                report.skipped += 1;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cleanup: cannot stat path");
                report.failed += 1;
            }
        }
    }

    if report.failed > 0 {
        tracing::warn!(
            removed = report.removed,
            failed = report.failed,
            "cleanup finished with failures"
        );
    }
    report
}

fn remove_dir(dir: &Path, report: &mut CleanupReport) {
    // contents_first yields every child before its parent, `dir` last.
    for entry in walkdir::WalkDir::new(dir).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(dir).display().to_string();
                tracing::warn!(path = %path, error = %e, "cleanup: cannot read entry");
                report.failed += 1;
                continue;
            }
        };

        if entry.file_type().is_dir() {
            match std::fs::remove_dir(entry.path()) {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    tracing::warn!(
                        path = %entry.path().display(),
                        error = %e,
                        "cleanup: failed to remove directory"
                    );
                    report.failed += 1;
                }
            }
        } else {
            remove_file(entry.path(), report);
        }
    }
}

fn remove_file(path: &Path, report: &mut CleanupReport) {
    match std::fs::remove_file(path) {
        Ok(()) => report.removed += 1,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cleanup: failed to remove file");
            report.failed += 1;
        }
    }
}
