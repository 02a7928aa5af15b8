use crate::auth::SessionProvider;
use crate::cleanup::{remove_partial_artifacts, CleanupReport, CLEANUP_EXTENSIONS};
use crate::fetcher::Fetcher;
use crate::progress::to_mb;
use crate::publisher::{file_id_from_link, publish};
use crate::waiter::wait_for_processing;
use crate::{config::Config, error::AppError, error::Result};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Steps of a single download-and-publish run, in order, plus the
/// `Failed` state any of them can fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetching,
    Validating,
    Authenticating,
    Publishing,
    Waiting,
    Cleaning,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetching => "fetching",
            Stage::Validating => "validating",
            Stage::Authenticating => "authenticating",
            Stage::Publishing => "publishing",
            Stage::Waiting => "waiting",
            Stage::Cleaning => "cleaning",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A run that ended in [`Stage::Failed`], with the cleanup it triggered.
///
/// `stage` is the step the run was in when it failed.
#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    pub source: AppError,
    pub cleanup: CleanupReport,
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub link: String,
    pub file_id: String,
    pub processed: bool,
    pub artifact_removed: bool,
}

/// Sequences fetch, validation, authentication, publishing and cleanup.
///
/// # Fields
/// * `fetcher` - Produces the local artifact
/// * `sessions` - Hands out an authorized Drive session
/// * `config` - Shared configuration
pub struct Pipeline {
    fetcher: Fetcher,
    sessions: Box<dyn SessionProvider>,
    config: Arc<Config>,
}

impl Pipeline {
    pub fn new(fetcher: Fetcher, sessions: Box<dyn SessionProvider>, config: Arc<Config>) -> Self {
        Self {
            fetcher,
            sessions,
            config,
        }
    }

    /// Runs every stage for `url`.
    ///
    /// On failure the working directory is swept for partial artifacts
    /// before the error is returned.
    #[instrument(skip(self))]
    pub async fn run(&self, url: &str) -> std::result::Result<Published, PipelineError> {
        let mut stage = Stage::Fetching;

        match self.execute(url, &mut stage).await {
            Ok(published) => Ok(published),
            Err(source) => {
                debug!("{} -> {}", stage, Stage::Failed);
                println!("Error in process: {}", source);
                let cleanup = remove_partial_artifacts(
                    &self.config.working_dir,
                    self.config.artifact_prefix(),
                    CLEANUP_EXTENSIONS,
                );
                Err(PipelineError {
                    stage,
                    source,
                    cleanup,
                })
            }
        }
    }

    async fn execute(&self, url: &str, stage: &mut Stage) -> Result<Published> {
        println!("Processing: {}", url);

        *stage = Stage::Fetching;
        let artifact = self.fetcher.fetch(url).await?;

        *stage = Stage::Validating;
        validate_artifact(&artifact, self.config.min_size_bytes())?;

        *stage = Stage::Authenticating;
        println!("Authenticating with Google Drive...");
        let drive = self.sessions.authorize().await?;

        *stage = Stage::Publishing;
        let link = publish(drive.as_ref(), &artifact, &self.config).await?;
        let file_id = file_id_from_link(&link)
            .ok_or_else(|| AppError::Publish(format!("cannot read file id from {}", link)))?
            .to_string();

        *stage = Stage::Waiting;
        let report = wait_for_processing(
            drive.as_ref(),
            &file_id,
            self.config.max_poll_attempts,
            self.config.poll_interval,
        )
        .await;
        if !report.is_ready() {
            info!(
                "Processing not observed after {} attempts, continuing",
                report.attempts.len()
            );
        }

        // The file is already public; a stuck local copy only earns a warning.
        *stage = Stage::Cleaning;
        let artifact_removed = match std::fs::remove_file(&artifact) {
            Ok(()) => {
                println!("Local file removed");
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!("Could not remove local file {:?}: {}", artifact, e);
                false
            }
        };

        *stage = Stage::Done;
        println!("\nAll done!");
        println!("Public video link: {}", link);
        println!("It may take a few minutes for the video to be fully available for playback");

        Ok(Published {
            link,
            file_id,
            processed: report.is_ready(),
            artifact_removed,
        })
    }
}

/// Checks the artifact exists and is at least `min_bytes` long.
pub fn validate_artifact(path: &Path, min_bytes: u64) -> Result<u64> {
    let size = match std::fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(_) => {
            return Err(AppError::Validation(format!(
                "{} does not exist after download",
                path.display()
            )))
        }
    };

    println!("File size: {:.2} MB", to_mb(size));
    if size < min_bytes {
        return Err(AppError::Validation(
            "file too small - download may have failed".into(),
        ));
    }
    Ok(size)
}
