use crate::drive::DriveApi;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// What a single metadata poll observed.
#[derive(Debug)]
pub enum PollOutcome {
    Ready,
    Pending,
    Failed(String),
}

/// Record of an availability wait, one outcome per attempt made.
#[derive(Debug, Default)]
pub struct WaitReport {
    pub attempts: Vec<PollOutcome>,
}

impl WaitReport {
    pub fn is_ready(&self) -> bool {
        matches!(self.attempts.last(), Some(PollOutcome::Ready))
    }

    pub fn failures(&self) -> usize {
        self.attempts
            .iter()
            .filter(|outcome| matches!(outcome, PollOutcome::Failed(_)))
            .count()
    }
}

/// Polls Drive until video processing metadata appears.
///
/// Poll errors count as "not yet" and use up an attempt. The interval is
/// slept between attempts only, never after the last one.
#[instrument(skip(drive))]
pub async fn wait_for_processing(
    drive: &dyn DriveApi,
    file_id: &str,
    max_attempts: u32,
    interval: Duration,
) -> WaitReport {
    println!("Waiting for Drive to process the video...");
    let mut report = WaitReport::default();

    for attempt in 1..=max_attempts {
        let outcome = match drive.video_media_metadata(file_id).await {
            Ok(Some(metadata)) => {
                debug!("Media metadata: {:?}", metadata);
                PollOutcome::Ready
            }
            Ok(None) => PollOutcome::Pending,
            Err(e) => {
                warn!("Polling attempt {} failed: {}", attempt, e);
                PollOutcome::Failed(e.to_string())
            }
        };

        let ready = matches!(outcome, PollOutcome::Ready);
        report.attempts.push(outcome);
        if ready {
            println!("Video processed by Drive");
            return report;
        }

        println!("Attempt {}/{} - waiting...", attempt, max_attempts);
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }

    println!("Timed out waiting for video processing");
    report
}
