use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Error types for the application.
///
/// Covers every stage of the pipeline:
/// - Authentication against Google
/// - Video fetching and its fallback
/// - Artifact validation
/// - Publishing to Google Drive
/// - The underlying IO, HTTP and parsing failures

/// Represents all possible errors that can occur in the application.
///
/// # Error Categories
///
/// - Config: values the providers would reject
/// - Auth: client secret, consent and token exchange
/// - Fetch: yt-dlp failures after the fallback is exhausted
/// - Validation: missing or implausibly small artifacts
/// - Publish: Drive upload and permission failures
/// - Wrapped: IO, HTTP, JSON, URL and yt-dlp provisioning errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("no video file produced in {}", .0.display())]
    NoVideoProduced(PathBuf),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("file {} not found for upload", .0.display())]
    FileNotFound(PathBuf),

    #[error("Drive API error ({status}): {message}")]
    Drive { status: u16, message: String },

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Youtube error: {0}")]
    Youtube(#[from] yt_dlp::error::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("{0}")]
    Custom(String),
}

impl From<&str> for AppError {
    fn from(error: &str) -> Self {
        AppError::Custom(error.to_string())
    }
}

impl From<String> for AppError {
    fn from(error: String) -> Self {
        AppError::Custom(error)
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
