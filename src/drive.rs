use crate::error::{AppError, Result};
use crate::progress::UploadProgress;
use async_trait::async_trait;
use reqwest::header::{CONTENT_RANGE, LOCATION, RANGE};
use reqwest::{redirect, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, instrument};

pub const DRIVE_API_BASE: &str = "https://www.googleapis.com";

/// Resumable uploads accept intermediate chunks only in multiples of this size.
pub const CHUNK_GRANULARITY: usize = 256 * 1024;

/// Rejects chunk sizes Drive would refuse, or that would never make progress.
pub fn validate_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 || chunk_size % CHUNK_GRANULARITY != 0 {
        return Err(AppError::Config(format!(
            "chunk size {} is not a positive multiple of {} bytes",
            chunk_size, CHUNK_GRANULARITY
        )));
    }
    Ok(())
}

/// Metadata sent with a new Drive file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub name: String,
    pub mime_type: String,
}

/// Media processing details Drive attaches to a video once it has been transcoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMediaMetadata {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_millis: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResource {
    id: Option<String>,
    video_media_metadata: Option<VideoMediaMetadata>,
}

/// The operations the pipeline needs from the storage provider.
#[async_trait]
pub trait DriveApi: Send + Sync {
    /// Uploads `path` with a resumable session and returns the new file id.
    async fn upload(&self, path: &Path, metadata: &FileMetadata, chunk_size: usize) -> Result<String>;

    /// Grants read access to anyone holding the link.
    async fn grant_public_read(&self, file_id: &str) -> Result<()>;

    /// Returns the media metadata if Drive has finished processing the video.
    async fn video_media_metadata(&self, file_id: &str) -> Result<Option<VideoMediaMetadata>>;
}

/// Authorized Google Drive v3 session.
pub struct DriveClient {
    http: reqwest::Client,
    access_token: String,
    base_url: String,
}

impl DriveClient {
    pub fn new(access_token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(access_token, DRIVE_API_BASE)
    }

    /// Points the client at another host, used by tests.
    pub fn with_base_url(access_token: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        // Resumable sessions answer intermediate chunks with 308 and no Location.
        let http = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .build()?;
        Ok(Self {
            http,
            access_token: access_token.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn start_session(&self, metadata: &FileMetadata, total: u64) -> Result<String> {
        let url = format!(
            "{}/upload/drive/v3/files?uploadType=resumable&fields=id",
            self.base_url
        );
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .header("X-Upload-Content-Type", metadata.mime_type.as_str())
            .header("X-Upload-Content-Length", total.to_string())
            .json(metadata)
            .send()
            .await?;
        let response = check_status(response).await?;

        response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| AppError::Publish("no Location header for upload session".into()))
    }

    async fn send_chunk(&self, session: &str, chunk: Vec<u8>, start: u64, total: u64) -> Result<Response> {
        let range = if chunk.is_empty() {
            format!("bytes */{}", total)
        } else {
            format!("bytes {}-{}/{}", start, start + chunk.len() as u64 - 1, total)
        };
        Ok(self
            .http
            .put(session)
            .bearer_auth(&self.access_token)
            .header(CONTENT_RANGE, range)
            .body(chunk)
            .send()
            .await?)
    }
}

#[async_trait]
impl DriveApi for DriveClient {
    #[instrument(skip(self, metadata))]
    async fn upload(&self, path: &Path, metadata: &FileMetadata, chunk_size: usize) -> Result<String> {
        validate_chunk_size(chunk_size)?;
        let total = tokio::fs::metadata(path).await?.len();
        let session = self.start_session(metadata, total).await?;
        debug!("Resumable session opened for {} bytes", total);

        let mut file = tokio::fs::File::open(path).await?;
        let mut progress = UploadProgress::new(total);
        let mut offset = 0u64;

        loop {
            let len = (total - offset).min(chunk_size as u64) as usize;
            let mut chunk = vec![0u8; len];
            file.seek(std::io::SeekFrom::Start(offset)).await?;
            file.read_exact(&mut chunk).await?;

            let response = self.send_chunk(&session, chunk, offset, total).await?;
            if response.status() == StatusCode::PERMANENT_REDIRECT {
                // No Range header means nothing has been persisted yet.
                offset = acknowledged_bytes(&response).unwrap_or(0);
                if offset > total {
                    return Err(AppError::Publish(format!(
                        "server acknowledged {} bytes of a {} byte upload",
                        offset, total
                    )));
                }
                progress.update(offset);
                progress.print_progress();
                continue;
            }

            let response = check_status(response).await?;
            progress.update(total);
            progress.print_progress();

            let resource: FileResource = response.json().await?;
            return resource
                .id
                .ok_or_else(|| AppError::Publish("upload response carried no file id".into()));
        }
    }

    #[instrument(skip(self))]
    async fn grant_public_read(&self, file_id: &str) -> Result<()> {
        let url = format!("{}/drive/v3/files/{}/permissions", self.base_url, file_id);
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({ "role": "reader", "type": "anyone" }))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn video_media_metadata(&self, file_id: &str) -> Result<Option<VideoMediaMetadata>> {
        let url = format!(
            "{}/drive/v3/files/{}?fields=videoMediaMetadata",
            self.base_url, file_id
        );
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let resource: FileResource = check_status(response).await?.json().await?;
        Ok(resource.video_media_metadata)
    }
}

/// Parses the `Range: bytes=0-N` header of a 308 reply into the next offset.
fn acknowledged_bytes(response: &Response) -> Option<u64> {
    let range = response.headers().get(RANGE)?.to_str().ok()?;
    let last = range.rsplit('-').next()?.trim().parse::<u64>().ok()?;
    Some(last + 1)
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(AppError::Drive {
        status: status.as_u16(),
        message,
    })
}
