//! Downloads a video and republishes it on Google Drive.
//!
//! This library fetches a single video with yt-dlp, uploads it to Google
//! Drive through a resumable session, shares it with anyone holding the
//! link, and cleans up local artifacts whether or not the run succeeds.
//!
//! # Architecture
//!
//! The pipeline is assembled from a few narrow components:
//! - `Authenticator`: OAuth2 credential reuse, refresh and consent flow
//! - `Fetcher`: primary and fallback download strategies
//! - `publish`: upload, public permission and shareable link
//! - `wait_for_processing`: advisory polling for Drive media processing
//! - `Pipeline`: sequencing, validation and cleanup
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use yt2drive::{Authenticator, Config, DirectoryLocator, Fetcher, Pipeline, YtDlpEngine};
//!
//! async fn example() {
//!     let config = Arc::new(Config::default());
//!     let engine = YtDlpEngine::new(&config).await.unwrap();
//!     let fetcher = Fetcher::new(Box::new(engine), Box::new(DirectoryLocator::default()), Arc::clone(&config));
//!     let sessions = Authenticator::new(Arc::clone(&config));
//!     let pipeline = Pipeline::new(fetcher, Box::new(sessions), config);
//!     let _published = pipeline.run("https://www.youtube.com/watch?v=dQw4w9WgXcQ").await;
//! }
//! ```

pub mod auth;
pub mod cleanup;
pub mod config;
pub mod drive;
pub mod error;
pub mod fetcher;
pub mod pipeline;
pub mod progress;
pub mod publisher;
pub mod waiter;

// Re-export commonly used items
pub use auth::{Authenticator, Credential, SessionProvider};
pub use config::Config;
pub use drive::{DriveApi, DriveClient};
pub use error::AppError;
pub use fetcher::{CandidateLocator, DirectoryLocator, FetchEngine, Fetcher, YtDlpEngine};
pub use pipeline::{Pipeline, PipelineError, Published, Stage};
pub use progress::UploadProgress;
