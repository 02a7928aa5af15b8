use std::time::{Duration, Instant};

/// Progress tracking and reporting for chunked uploads.
///
/// Provides byte counts, completion rate and a time estimate
/// derived from the average throughput so far.

/// Tracks how much of a file has been sent to the storage provider.
///
/// # Examples
///
/// ```
/// use yt2drive::UploadProgress;
///
/// let mut progress = UploadProgress::new(4 * 1024 * 1024);
/// progress.update(1024 * 1024);
/// assert_eq!(progress.percent(), 25.0);
/// ```
pub struct UploadProgress {
    pub total_bytes: u64,
    pub uploaded: u64,
    pub start_time: Instant,
    pub chunks: usize,
}

impl UploadProgress {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            uploaded: 0,
            start_time: Instant::now(),
            chunks: 0,
        }
    }

    /// Records that the provider has acknowledged bytes up to `uploaded`.
    pub fn update(&mut self, uploaded: u64) {
        self.uploaded = uploaded.min(self.total_bytes);
        self.chunks += 1;
    }

    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        (self.uploaded as f64 / self.total_bytes as f64) * 100.0
    }

    pub fn estimated_remaining(&self) -> Duration {
        if self.uploaded == 0 {
            return Duration::from_secs(0);
        }
        let elapsed = self.start_time.elapsed();
        let remaining = self.total_bytes - self.uploaded;
        elapsed.mul_f64(remaining as f64 / self.uploaded as f64)
    }

    pub fn print_progress(&self) {
        println!(
            "Uploaded {:.2}/{:.2} MB ({:.1}%) - elapsed {:.1}s, remaining ~{:.1}s",
            to_mb(self.uploaded),
            to_mb(self.total_bytes),
            self.percent(),
            self.start_time.elapsed().as_secs_f64(),
            self.estimated_remaining().as_secs_f64()
        );
    }
}

/// Converts a byte count to mebibytes.
pub fn to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_upload_is_complete() {
        let progress = UploadProgress::new(0);
        assert_eq!(progress.percent(), 100.0);
        assert_eq!(progress.estimated_remaining(), Duration::from_secs(0));
    }

    #[test]
    fn update_clamps_to_total() {
        let mut progress = UploadProgress::new(10);
        progress.update(25);
        assert_eq!(progress.uploaded, 10);
        assert_eq!(progress.chunks, 1);
        assert_eq!(progress.percent(), 100.0);
    }
}
