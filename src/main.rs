use std::io::{self, Write};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use yt2drive::error::{AppError, Result};
use yt2drive::{Authenticator, Config, DirectoryLocator, Fetcher, Pipeline, YtDlpEngine};

/// Main entry point for the application.
///
/// # Steps
/// 1. Initializes logging (level from `RUST_LOG`, `info` by default)
/// 2. Loads the configuration from `YT2DRIVE_CONFIG` or the defaults
/// 3. Reads the video URL from the first argument or standard input
/// 4. Runs the download-and-publish pipeline
///
/// Exits with status 1 when any stage fails.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting application...");

    if let Err(e) = run_application().await {
        error!("Application error: {}", e);
        std::process::exit(1);
    }

    info!("Application completed successfully");
    Ok(())
}

/// Builds the pipeline components and runs them for one URL.
///
/// # Errors
/// Returns error if:
/// - The configuration file cannot be read
/// - No URL was provided
/// - yt-dlp or ffmpeg cannot be provisioned
/// - Any pipeline stage fails
async fn run_application() -> Result<()> {
    let config = Arc::new(load_config()?);
    let url = read_url()?;

    let engine = YtDlpEngine::new(&config).await?;
    let fetcher = Fetcher::new(
        Box::new(engine),
        Box::new(DirectoryLocator::default()),
        Arc::clone(&config),
    );
    let sessions = Authenticator::new(Arc::clone(&config));
    let pipeline = Pipeline::new(fetcher, Box::new(sessions), config);

    match pipeline.run(&url).await {
        Ok(published) => {
            info!(file_id = %published.file_id, processed = published.processed, "Published");
            Ok(())
        }
        Err(e) => {
            for (path, cause) in &e.cleanup.failed {
                warn!("Left behind {:?}: {}", path, cause);
            }
            Err(AppError::Custom(e.to_string()))
        }
    }
}

fn load_config() -> Result<Config> {
    match std::env::var("YT2DRIVE_CONFIG") {
        Ok(path) => {
            info!("Loading configuration from {}", path);
            Config::from_file(path)
        }
        Err(_) => Ok(Config::default()),
    }
}

/// Takes the URL from the first argument, or prompts for it on stdin.
fn read_url() -> Result<String> {
    if let Some(arg) = std::env::args().nth(1) {
        return parse_url(&arg);
    }

    print!("Paste the YouTube link: ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    parse_url(&line)
}

/// Trims the user's input and rejects an empty URL.
fn parse_url(raw: &str) -> Result<String> {
    let url = raw.trim();
    if url.is_empty() {
        return Err("no URL provided".into());
    }
    Ok(url.to_string())
}
