use crate::drive::validate_chunk_size;
use crate::error::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration management for the application.
///
/// Every tunable that the pipeline components need lives here so that
/// tests can swap filenames, thresholds and intervals without touching
/// global state:
/// - Artifact naming and the working directory
/// - Fetch constraints (resolution ceiling, binaries location)
/// - Google Drive credentials and upload parameters
/// - Availability polling budget

/// Configuration for the download-and-publish pipeline.
///
/// # Examples
///
/// ```
/// use yt2drive::Config;
///
/// let config = Config::default();
/// assert_eq!(config.target_filename, "video.mp4");
/// assert!(config.max_poll_attempts > 0);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub working_dir: PathBuf,
    pub target_filename: String,
    pub libraries_dir: PathBuf,
    pub max_height: u32,
    pub min_size_mb: f64,
    pub client_secret_file: PathBuf,
    pub token_file: PathBuf,
    pub scopes: Vec<String>,
    pub mime_type: String,
    pub chunk_size: usize,
    pub share_base_url: String,
    pub max_poll_attempts: u32,
    #[serde(with = "secs")]
    pub poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            target_filename: String::from("video.mp4"),
            libraries_dir: PathBuf::from("libs"),
            max_height: 720,
            min_size_mb: 0.1,
            client_secret_file: PathBuf::from("credentials.json"),
            token_file: PathBuf::from("token.json"),
            scopes: vec![String::from("https://www.googleapis.com/auth/drive")],
            mime_type: String::from("video/mp4"),
            chunk_size: 1024 * 1024,
            share_base_url: String::from("https://drive.google.com"),
            max_poll_attempts: 10,
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Loads a configuration from a JSON file. Missing keys keep their defaults.
    ///
    /// # Errors
    /// * If the file cannot be read or parsed
    /// * If `chunk_size` is not a positive multiple of 256 KiB
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        validate_chunk_size(config.chunk_size)?;
        Ok(config)
    }

    /// Absolute-or-relative path of the canonical local artifact.
    pub fn target_path(&self) -> PathBuf {
        self.working_dir.join(&self.target_filename)
    }

    /// Filename prefix shared by the artifact and every transient file
    /// the fetch engine may leave behind (`video` for `video.mp4`).
    pub fn artifact_prefix(&self) -> &str {
        Path::new(&self.target_filename)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(&self.target_filename)
    }

    /// Smallest acceptable artifact size, in bytes.
    pub fn min_size_bytes(&self) -> u64 {
        (self.min_size_mb * 1024.0 * 1024.0).ceil() as u64
    }
}

mod secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn prefix_is_derived_from_target_filename() {
        let config = Config::default();
        assert_eq!(config.artifact_prefix(), "video");

        let config = Config {
            target_filename: "clip.webm".into(),
            ..Config::default()
        };
        assert_eq!(config.artifact_prefix(), "clip");
    }

    #[test]
    fn min_size_is_a_tenth_of_a_mebibyte() {
        assert_eq!(Config::default().min_size_bytes(), 104_858);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"max_height": 480, "poll_interval": 0.5}"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.max_height, 480);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.target_filename, "video.mp4");
        assert_eq!(config.max_poll_attempts, 10);
    }

    #[test]
    fn unusable_chunk_sizes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        for chunk_size in [0, 1000, 262_145] {
            std::fs::write(&path, format!(r#"{{"chunk_size": {}}}"#, chunk_size)).unwrap();
            assert!(matches!(Config::from_file(&path), Err(AppError::Config(_))));
        }

        std::fs::write(&path, r#"{"chunk_size": 524288}"#).unwrap();
        assert_eq!(Config::from_file(&path).unwrap().chunk_size, 524_288);
    }
}
