use serde::Serialize;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{GenerationEvent, OnEventCallback, VideoSubmission};
use crate::api::types::{JobState, JobStatusResponse};
use crate::api::GenerationApi;
use crate::db::{SharedDb, VideoData, VideoSource};
use crate::store::GenerationStore;

const POLL_INTERVAL: Duration = Duration::from_secs(3);
/// A fresh job may not be visible to the status route yet.
const MAX_NOT_FOUND_RETRIES: u32 = 10;
const MAX_ERROR_RETRIES: u32 = 5;

#[derive(Debug, Clone)]
pub struct VideoWatch {
    pub interval: Duration,
    pub max_not_found: u32,
    pub max_errors: u32,
}

impl Default for VideoWatch {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            max_not_found: MAX_NOT_FOUND_RETRIES,
            max_errors: MAX_ERROR_RETRIES,
        }
    }
}

/// Terminal states of the polling loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VideoWatchOutcome {
    Completed { url: String },
    Failed { message: String },
    Exhausted { message: String },
    Cancelled,
}

/// Consecutive-error bookkeeping for one job.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    pub not_found: u32,
    pub errors: u32,
}

impl RetryBudget {
    /// Any answer other than 404 means the job is visible.
    fn on_success(&mut self) {
        self.not_found = 0;
        self.errors = 0;
    }

    fn on_not_found(&mut self, config: &VideoWatch) -> bool {
        self.not_found += 1;
        self.not_found >= config.max_not_found
    }

    fn on_error(&mut self, config: &VideoWatch) -> bool {
        self.not_found = 0;
        self.errors += 1;
        self.errors >= config.max_errors
    }
}

/// Poll a video job until it completes, fails, or the retry budget runs out.
pub async fn watch_job(
    api: Arc<dyn GenerationApi>,
    db: SharedDb,
    store: GenerationStore,
    job: VideoSubmission,
    config: VideoWatch,
    on_event: Option<OnEventCallback>,
    cancel: CancellationToken,
) -> VideoWatchOutcome {
    let emit = |event: GenerationEvent| {
        if let Some(ref cb) = on_event {
            cb(event);
        }
    };
    let job_id = job.job_id.as_str();
    let mut budget = RetryBudget::default();

    info!(job_id = %job_id, post_id = ?job.post_id, "polling video job");

    let outcome = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(job_id = %job_id, "video watch cancelled");
                return VideoWatchOutcome::Cancelled;
            }
            _ = sleep(config.interval) => {}
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                info!(job_id = %job_id, "video watch cancelled");
                return VideoWatchOutcome::Cancelled;
            }
            result = api.job_status(job_id) => result,
        };

        match result {
            Ok(status) => {
                budget.on_success();
                match status.status {
                    JobState::Completed => match status.video_url() {
                        Some(url) => {
                            let url = url.to_string();
                            persist_video(&db, &job, &url);
                            emit(GenerationEvent::VideoReady {
                                job_id: job_id.to_string(),
                                post_id: job.post_id.clone(),
                                url: url.clone(),
                            });
                            break VideoWatchOutcome::Completed { url };
                        }
                        None => {
                            break VideoWatchOutcome::Failed {
                                message: "Video finished but no media URL was returned.".into(),
                            };
                        }
                    },
                    JobState::Failed => {
                        break VideoWatchOutcome::Failed {
                            message: failure_message(&status),
                        };
                    }
                    state => {
                        info!(job_id = %job_id, status = ?state, "polling video job...");
                    }
                }
            }
            Err(e) if e.is_not_found() => {
                if budget.on_not_found(&config) {
                    break VideoWatchOutcome::Exhausted {
                        message: "Video job could not be found. Please try again.".into(),
                    };
                }
                info!(job_id = %job_id, attempt = budget.not_found, "video job not visible yet");
            }
            Err(e) => {
                if budget.on_error(&config) {
                    break VideoWatchOutcome::Exhausted {
                        message: "Unable to check video status. Please try again later.".into(),
                    };
                }
                warn!(job_id = %job_id, attempt = budget.errors, "video status request failed: {e}");
            }
        }
    };

    store.stop();
    match &outcome {
        VideoWatchOutcome::Completed { url } => {
            info!(job_id = %job_id, %url, "video job completed");
        }
        VideoWatchOutcome::Failed { message } | VideoWatchOutcome::Exhausted { message } => {
            error!(job_id = %job_id, "video job ended: {message}");
            emit(GenerationEvent::error(message.clone()));
        }
        VideoWatchOutcome::Cancelled => {}
    }
    outcome
}

fn failure_message(status: &JobStatusResponse) -> String {
    match status.error.as_deref().filter(|e| !e.is_empty()) {
        Some(err) => format!("Video generation failed: {err}"),
        None => "Video generation failed. Please try again.".to_string(),
    }
}

/// Record the finished media on the post, by post id when known.
fn persist_video(db: &SharedDb, job: &VideoSubmission, url: &str) {
    let video = VideoData::Many(vec![VideoSource::from_url(url)]);
    let guard = match db.lock() {
        Ok(g) => g,
        Err(e) => {
            error!(job_id = %job.job_id, "db lock poisoned: {e}");
            return;
        }
    };
    let updated = match job.post_id.as_deref() {
        Some(post_id) => guard.set_video_data(post_id, &video),
        None => guard.set_video_data_for_job(&job.job_id, &video),
    };
    match updated {
        Ok(true) => {}
        Ok(false) => warn!(job_id = %job.job_id, post_id = ?job.post_id, "no post row to attach video to"),
        Err(e) => error!(job_id = %job.job_id, "failed to store video data: {e:#}"),
    }
}
