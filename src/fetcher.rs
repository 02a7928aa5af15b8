use crate::{config::Config, error::AppError, error::Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};
use yt_dlp::fetcher::deps::Libraries;
use yt_dlp::Youtube;

/// Extensions the fetch engine may produce for a finished video.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mkv"];

/// Format selection handed to a [`FetchEngine`].
///
/// `merge_output` and `recode` are only set for the primary strategy; the
/// fallback asks for a single ready-made stream and skips post-processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatRequest {
    pub selector: String,
    pub merge_output: Option<String>,
    pub recode: Option<String>,
}

impl FormatRequest {
    /// Best video+audio not exceeding `max_height`, merged and converted to mp4.
    pub fn primary(max_height: u32) -> Self {
        Self {
            selector: format!(
                "bestvideo[height<={h}][ext=mp4]+bestaudio[ext=m4a]/best[height<={h}][ext=mp4]/best[ext=mp4]",
                h = max_height
            ),
            merge_output: Some(String::from("mp4")),
            recode: Some(String::from("mp4")),
        }
    }

    /// Lowest quality mp4 stream, no merge or convert.
    pub fn fallback() -> Self {
        Self {
            selector: String::from("worst[ext=mp4]"),
            merge_output: None,
            recode: None,
        }
    }
}

/// Something that turns a source URL into a file on disk.
#[async_trait]
pub trait FetchEngine: Send + Sync {
    /// Downloads `url` to `output` and returns the path the engine actually wrote.
    async fn fetch(&self, url: &str, request: &FormatRequest, output: &Path) -> Result<PathBuf>;
}

/// Finds a stray video file that can be adopted as the artifact when the
/// engine did not write the exact target filename.
pub trait CandidateLocator: Send + Sync {
    fn find_candidate(&self, dir: &Path, exclude: &Path) -> Result<Option<PathBuf>>;
}

/// Scans a directory for files with a recognized video extension.
///
/// Candidates are returned in name order so repeated runs pick the same file.
#[derive(Debug, Clone)]
pub struct DirectoryLocator {
    extensions: Vec<String>,
}

impl DirectoryLocator {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extensions: extensions.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for DirectoryLocator {
    fn default() -> Self {
        Self::new(VIDEO_EXTENSIONS.iter().copied())
    }
}

impl CandidateLocator for DirectoryLocator {
    fn find_candidate(&self, dir: &Path, exclude: &Path) -> Result<Option<PathBuf>> {
        let excluded = exclude.file_name();
        let mut candidates = Vec::new();

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() || path.file_name() == excluded {
                continue;
            }
            let recognized = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| self.extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
                .unwrap_or(false);
            if recognized {
                candidates.push(path);
            }
        }

        candidates.sort();
        Ok(candidates.into_iter().next())
    }
}

/// Production [`FetchEngine`] backed by the yt-dlp and ffmpeg binaries.
pub struct YtDlpEngine {
    yt_dlp: PathBuf,
    ffmpeg: PathBuf,
}

impl YtDlpEngine {
    /// Creates the engine, provisioning the binaries into `libraries_dir`.
    ///
    /// # Errors
    /// * If the libraries directory cannot be created
    /// * If the binaries cannot be downloaded or updated
    #[instrument(skip(config))]
    pub async fn new(config: &Config) -> Result<Self> {
        tokio::fs::create_dir_all(&config.libraries_dir).await?;
        Self::initialize_binaries(config).await?;

        Ok(Self {
            yt_dlp: config.libraries_dir.join("yt-dlp"),
            ffmpeg: config.libraries_dir.join("ffmpeg"),
        })
    }

    /// Uses explicit binary paths without provisioning anything.
    pub fn with_binaries(yt_dlp: impl Into<PathBuf>, ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            yt_dlp: yt_dlp.into(),
            ffmpeg: ffmpeg.into(),
        }
    }

    /// Downloads yt-dlp and ffmpeg when either is missing, otherwise
    /// keeps the existing pair and updates yt-dlp in place.
    async fn initialize_binaries(config: &Config) -> Result<()> {
        let yt_dlp = config.libraries_dir.join("yt-dlp");
        let ffmpeg = config.libraries_dir.join("ffmpeg");

        if !yt_dlp.exists() || !ffmpeg.exists() {
            info!("Provisioning yt-dlp and ffmpeg into {:?}", config.libraries_dir);
            Youtube::with_new_binaries(config.libraries_dir.clone(), config.working_dir.clone())
                .await?;
            return Ok(());
        }

        let libraries = Libraries::new(yt_dlp, ffmpeg);
        let youtube = Youtube::new(libraries, config.working_dir.clone())?;
        youtube.update_downloader().await?;

        Ok(())
    }

    fn build_args(&self, url: &str, request: &FormatRequest, output_name: &str) -> Vec<String> {
        let mut args = vec![
            String::from("--no-playlist"),
            String::from("-f"),
            request.selector.clone(),
            String::from("-o"),
            output_name.to_string(),
            String::from("--ffmpeg-location"),
            self.ffmpeg.display().to_string(),
        ];
        if let Some(format) = &request.merge_output {
            args.push(String::from("--merge-output-format"));
            args.push(format.clone());
        }
        if let Some(format) = &request.recode {
            args.push(String::from("--recode-video"));
            args.push(format.clone());
        }
        // --print silences yt-dlp, so progress is requested explicitly on stderr.
        args.extend([
            String::from("--progress"),
            String::from("--newline"),
            String::from("--no-simulate"),
            String::from("--print"),
            String::from("after_move:filepath"),
            url.to_string(),
        ]);
        args
    }
}

#[async_trait]
impl FetchEngine for YtDlpEngine {
    async fn fetch(&self, url: &str, request: &FormatRequest, output: &Path) -> Result<PathBuf> {
        let dir = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let output_name = output
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| AppError::Fetch(format!("invalid output path {:?}", output)))?;

        let args = self.build_args(url, request, output_name);
        debug!("Running {:?} {:?}", self.yt_dlp, args);

        let result = Command::new(&self.yt_dlp)
            .args(&args)
            .current_dir(&dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .output()
            .await?;

        if !result.status.success() {
            return Err(AppError::Fetch(format!("yt-dlp exited with {}", result.status)));
        }

        let stdout = String::from_utf8_lossy(&result.stdout);
        let written = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .map(|line| dir.join(line))
            .unwrap_or_else(|| output.to_path_buf());

        Ok(written)
    }
}

/// Retrieves a video into the canonical local artifact.
///
/// # Fields
/// * `engine` - Performs the actual download
/// * `locator` - Last-resort search for a stray video file
/// * `config` - Target filename, working directory and resolution ceiling
pub struct Fetcher {
    engine: Box<dyn FetchEngine>,
    locator: Box<dyn CandidateLocator>,
    config: Arc<Config>,
}

impl Fetcher {
    pub fn new(
        engine: Box<dyn FetchEngine>,
        locator: Box<dyn CandidateLocator>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            engine,
            locator,
            config,
        }
    }

    /// Downloads `url` into the target file, falling back to a degraded
    /// stream when the primary strategy fails for any reason.
    ///
    /// # Returns
    /// * `Result<PathBuf>` - Path of the artifact, always the configured target
    #[instrument(skip(self))]
    pub async fn fetch(&self, url: &str) -> Result<PathBuf> {
        let target = self.config.target_path();

        println!("Starting video download...");
        match self.fetch_primary(url, &target).await {
            Ok(path) => {
                println!("Download complete: {}", path.display());
                Ok(path)
            }
            Err(e) => {
                warn!("Primary download failed: {}", e);
                println!("Download error: {}", e);
                self.fetch_fallback(url, &target).await.map_err(|e| {
                    println!("Fallback also failed: {}", e);
                    e
                })
            }
        }
    }

    async fn fetch_primary(&self, url: &str, target: &Path) -> Result<PathBuf> {
        let request = FormatRequest::primary(self.config.max_height);
        let written = self.engine.fetch(url, &request, target).await?;

        if written != target && written.exists() {
            debug!("Renaming {:?} to {:?}", written, target);
            std::fs::rename(&written, target)?;
        }
        if !target.exists() {
            return Err(AppError::Fetch(format!(
                "engine reported success but {} is missing",
                target.display()
            )));
        }

        Ok(target.to_path_buf())
    }

    async fn fetch_fallback(&self, url: &str, target: &Path) -> Result<PathBuf> {
        println!("Trying fallback method...");
        let written = self
            .engine
            .fetch(url, &FormatRequest::fallback(), target)
            .await?;

        if written != target && written.is_file() {
            std::fs::rename(&written, target)?;
        }
        if target.exists() {
            println!("Fallback download complete: {}", target.display());
            return Ok(target.to_path_buf());
        }

        match self.locator.find_candidate(&self.config.working_dir, target)? {
            Some(candidate) => {
                std::fs::rename(&candidate, target)?;
                println!("Renamed {} to {}", candidate.display(), target.display());
                Ok(target.to_path_buf())
            }
            None => Err(AppError::NoVideoProduced(self.config.working_dir.clone())),
        }
    }
}
