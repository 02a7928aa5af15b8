use crate::drive::{DriveApi, FileMetadata};
use crate::{config::Config, error::AppError, error::Result};
use std::path::Path;
use tracing::instrument;

/// Uploads a local file and makes it readable by anyone with the link.
///
/// # Errors
/// * `FileNotFound` before any network call when `path` does not exist
/// * Any upload or permission failure, unretried
#[instrument(skip(drive, config))]
pub async fn publish(drive: &dyn DriveApi, path: &Path, config: &Config) -> Result<String> {
    if !path.exists() {
        return Err(AppError::FileNotFound(path.to_path_buf()));
    }

    println!("Starting upload to Google Drive...");
    let metadata = FileMetadata {
        name: path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| config.target_filename.clone()),
        mime_type: config.mime_type.clone(),
    };
    let file_id = drive.upload(path, &metadata, config.chunk_size).await?;
    println!("File created on Drive: {}", file_id);

    println!("Making file public...");
    drive.grant_public_read(&file_id).await?;

    let link = share_link(&config.share_base_url, &file_id);
    println!("Upload complete! Public link: {}", link);
    Ok(link)
}

pub fn share_link(base_url: &str, file_id: &str) -> String {
    format!("{}/file/d/{}/view", base_url.trim_end_matches('/'), file_id)
}

/// Recovers the object id from a link built by [`share_link`].
pub fn file_id_from_link(link: &str) -> Option<&str> {
    let (_, rest) = link.split_once("/d/")?;
    let id = rest.split('/').next()?;
    (!id.is_empty()).then_some(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::VideoMediaMetadata;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDrive {
        calls: Mutex<Vec<String>>,
        deny_permission: bool,
    }

    #[async_trait]
    impl DriveApi for RecordingDrive {
        async fn upload(&self, _path: &Path, metadata: &FileMetadata, chunk_size: usize) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("upload {} {} {}", metadata.name, metadata.mime_type, chunk_size));
            Ok("abc123".into())
        }

        async fn grant_public_read(&self, file_id: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("permission {}", file_id));
            if self.deny_permission {
                return Err(AppError::Drive {
                    status: 403,
                    message: "forbidden".into(),
                });
            }
            Ok(())
        }

        async fn video_media_metadata(&self, _file_id: &str) -> Result<Option<VideoMediaMetadata>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn missing_file_fails_before_upload() {
        let drive = RecordingDrive::default();
        let err = publish(&drive, Path::new("/nonexistent/video.mp4"), &Config::default())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::FileNotFound(_)));
        assert!(drive.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_then_permission_then_link() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.mp4");
        std::fs::write(&path, b"data").unwrap();
        let drive = RecordingDrive::default();

        let link = publish(&drive, &path, &Config::default()).await.unwrap();

        assert_eq!(link, "https://drive.google.com/file/d/abc123/view");
        assert_eq!(
            *drive.calls.lock().unwrap(),
            vec!["upload video.mp4 video/mp4 1048576", "permission abc123"]
        );
    }

    #[tokio::test]
    async fn permission_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.mp4");
        std::fs::write(&path, b"data").unwrap();
        let drive = RecordingDrive {
            deny_permission: true,
            ..RecordingDrive::default()
        };

        let err = publish(&drive, &path, &Config::default()).await.unwrap_err();
        assert!(matches!(err, AppError::Drive { status: 403, .. }));
    }

    #[test]
    fn file_id_round_trips_through_link() {
        let link = share_link("https://drive.google.com/", "abc123");
        assert_eq!(file_id_from_link(&link), Some("abc123"));
        assert_eq!(file_id_from_link("https://drive.google.com/file/d//view"), None);
        assert_eq!(file_id_from_link("https://example.com/"), None);
    }
}
