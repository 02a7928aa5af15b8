use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Extensions of finished or partial downloads that a failed run may leave behind.
pub const CLEANUP_EXTENSIONS: &[&str] = &["mp4", "webm", "mkv", "part", "ytdl"];

/// Per-file outcome of a cleanup pass.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, io::Error)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub fn is_cleanup_target(file_name: &str, prefix: &str, extensions: &[&str]) -> bool {
    file_name.starts_with(prefix)
        && extensions
            .iter()
            .any(|ext| file_name.ends_with(&format!(".{}", ext)))
}

/// Removes every file in `dir` named `<prefix>*.<ext>`.
///
/// A failure on one file is recorded and the pass moves on to the next.
pub fn remove_partial_artifacts(dir: &Path, prefix: &str, extensions: &[&str]) -> CleanupReport {
    let mut report = CleanupReport::default();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot scan {:?} for cleanup: {}", dir, e);
            report.failed.push((dir.to_path_buf(), e));
            return report;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| is_cleanup_target(name, prefix, extensions))
            .unwrap_or(false);
        if !matches || !path.is_file() {
            continue;
        }

        match std::fs::remove_file(&path) {
            Ok(()) => {
                println!("Cleaning up: {}", path.display());
                report.removed.push(path);
            }
            Err(e) => {
                warn!("Could not delete {:?}: {}", path, e);
                report.failed.push((path, e));
            }
        }
    }

    report
}
