pub mod image;
pub mod video;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::types::{GenerationInputs, GenerationRequest};
use crate::api::GenerationApi;
use crate::db::SharedDb;
use crate::error::{ApiError, SubmitError};
use crate::store::GenerationStore;

pub use image::{ImageWatch, ImageWatchOutcome};
pub use video::{VideoWatch, VideoWatchOutcome};

/// Callback for everything the user should see: notices, readiness,
/// navigation targets.
pub type OnEventCallback = Arc<dyn Fn(GenerationEvent) + Send + Sync>;

// ---------------------------------------------------------------------------
// Limits shared by the CLI and the MCP tools
// ---------------------------------------------------------------------------

pub const MAX_PROMPT_CHARS: usize = 1000;
pub const DEFAULT_IMAGE_COUNT: u32 = 4;
pub const MIN_IMAGE_COUNT: u32 = 1;
pub const MAX_IMAGE_COUNT: u32 = 10;
pub const VIDEO_COUNT: u32 = 1;
pub const CATEGORY: &str = "ai-generated";
/// Retries after the first failed image submission.
pub const IMAGE_SUBMIT_RETRIES: u32 = 2;

/// Backoff between image submission attempts. The delay doubles after each
/// failure, up to `max_delay`.
#[derive(Debug, Clone)]
pub struct SubmitRetry {
    pub retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for SubmitRetry {
    fn default() -> Self {
        Self {
            retries: IMAGE_SUBMIT_RETRIES,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image => f.write_str("image"),
            Self::Video => f.write_str("video"),
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GenerationEvent {
    /// A message to surface to the user.
    Notice { level: NoticeLevel, message: String },
    /// Cached listings for this author are stale.
    ListingInvalidated { author: String },
    /// A new post is ready; clients navigate to it.
    #[serde(rename_all = "camelCase")]
    PostReady { post_id: String, media_type: MediaType },
    /// Video media is available for the post.
    #[serde(rename_all = "camelCase")]
    VideoReady {
        job_id: String,
        post_id: Option<String>,
        url: String,
    },
}

impl GenerationEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Notice {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::Notice {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Submit parameters (validation + defaults)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    pub prompt: String,
    pub media_type: MediaType,
    /// Images only; ignored for video.
    pub image_count: Option<u32>,
}

impl GenerationParams {
    pub fn image(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            media_type: MediaType::Image,
            image_count: None,
        }
    }

    pub fn video(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            media_type: MediaType::Video,
            image_count: None,
        }
    }

    /// Validate and build the wire request. Never touches the network.
    pub fn to_request(&self, author: Option<&str>) -> Result<GenerationRequest, SubmitError> {
        let prompt = self.prompt.trim();
        if prompt.is_empty() {
            return Err(SubmitError::EmptyPrompt);
        }
        let len = self.prompt.chars().count();
        if len > MAX_PROMPT_CHARS {
            return Err(SubmitError::PromptTooLong {
                len,
                max: MAX_PROMPT_CHARS,
            });
        }
        let author = author
            .filter(|a| !a.trim().is_empty())
            .ok_or(SubmitError::NotSignedIn)?;

        let n = match self.media_type {
            MediaType::Image => self
                .image_count
                .unwrap_or(DEFAULT_IMAGE_COUNT)
                .clamp(MIN_IMAGE_COUNT, MAX_IMAGE_COUNT),
            MediaType::Video => VIDEO_COUNT,
        };

        Ok(GenerationRequest {
            inputs: GenerationInputs {
                prompt: prompt.to_string(),
                seed: rand::random::<u32>(),
                n,
            },
            author: author.to_string(),
            category: CATEGORY.to_string(),
        })
    }
}

/// Identifiers returned once a video job has been accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSubmission {
    pub job_id: String,
    pub post_id: Option<String>,
}

/// A running watcher. Dropping the handle leaves it running; call
/// [`WatchHandle::cancel`] to stop it.
pub struct WatchHandle<T> {
    cancel: CancellationToken,
    task: JoinHandle<T>,
}

impl<T> WatchHandle<T> {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn join(self) -> anyhow::Result<T> {
        Ok(self.task.await?)
    }
}

// ---------------------------------------------------------------------------
// Generator: submit, then start the matching watcher
// ---------------------------------------------------------------------------

pub struct Generator {
    api: Arc<dyn GenerationApi>,
    db: SharedDb,
    store: GenerationStore,
    author: Option<String>,
    on_event: Option<OnEventCallback>,
    image_watch: ImageWatch,
    video_watch: VideoWatch,
    submit_retry: SubmitRetry,
}

impl Generator {
    pub fn new(
        api: Arc<dyn GenerationApi>,
        db: SharedDb,
        store: GenerationStore,
        author: Option<String>,
    ) -> Self {
        Self {
            api,
            db,
            store,
            author,
            on_event: None,
            image_watch: ImageWatch::default(),
            video_watch: VideoWatch::default(),
            submit_retry: SubmitRetry::default(),
        }
    }

    /// Register a callback for notices and readiness events.
    pub fn set_on_event(&mut self, cb: OnEventCallback) {
        self.on_event = Some(cb);
    }

    /// Override polling cadence and budgets.
    pub fn set_watch_config(&mut self, image: ImageWatch, video: VideoWatch) {
        self.image_watch = image;
        self.video_watch = video;
    }

    pub fn set_submit_retry(&mut self, retry: SubmitRetry) {
        self.submit_retry = retry;
    }

    pub fn store(&self) -> &GenerationStore {
        &self.store
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn api(&self) -> Arc<dyn GenerationApi> {
        Arc::clone(&self.api)
    }

    pub fn db(&self) -> SharedDb {
        Arc::clone(&self.db)
    }

    fn emit(&self, event: GenerationEvent) {
        if let Some(ref cb) = self.on_event {
            cb(event);
        }
    }

    /// Validate, or clear the flag and surface the rejection.
    fn prepare(&self, params: &GenerationParams) -> Result<GenerationRequest, SubmitError> {
        match params.to_request(self.author.as_deref()) {
            Ok(req) => Ok(req),
            Err(e) => {
                warn!(media_type = %params.media_type, "generation rejected: {e}");
                self.store.stop();
                self.emit(GenerationEvent::error(e.user_message()));
                Err(e)
            }
        }
    }

    /// Submit an image generation without waiting for it. Only a validation
    /// failure is returned; request failures arrive as error notices.
    pub fn submit_image(&self, params: &GenerationParams) -> Result<(), SubmitError> {
        let req = self.prepare(params)?;
        self.store.start(MediaType::Image);
        self.spawn_image_request(req);
        Ok(())
    }

    /// Submit a video generation and wait for the backend to accept it.
    pub async fn submit_video(&self, params: &GenerationParams) -> Result<VideoSubmission, SubmitError> {
        let req = self.prepare(params)?;
        self.store.start(MediaType::Video);

        let accepted = self.api.submit_video(&req).await.and_then(|resp| {
            match resp.data.job_id.filter(|id| !id.trim().is_empty()) {
                Some(job_id) => Ok(VideoSubmission {
                    job_id,
                    post_id: resp.data.post_id,
                }),
                None => Err(ApiError::Decode("no jobId in video submit response".into())),
            }
        });

        match accepted {
            Ok(submission) => {
                info!(job_id = %submission.job_id, post_id = ?submission.post_id, "video job accepted");
                Ok(submission)
            }
            Err(e) => {
                error!("video submission failed: {e}");
                self.store.stop();
                self.emit(GenerationEvent::error(e.user_message()));
                Err(SubmitError::Api(e))
            }
        }
    }

    /// Submit an image and watch for the author's next post.
    pub fn generate_image(
        &self,
        params: &GenerationParams,
    ) -> Result<WatchHandle<ImageWatchOutcome>, SubmitError> {
        let req = self.prepare(params)?;
        let author = req.author.clone();

        // Baseline before submitting so a fast worker is not mistaken for old data.
        let baseline = match self.db.lock() {
            Ok(db) => db.latest_post_id(&author).unwrap_or_else(|e| {
                warn!(author = %author, "baseline query failed: {e:#}");
                None
            }),
            Err(e) => {
                warn!("db lock poisoned: {e}");
                None
            }
        };

        self.store.start(MediaType::Image);
        self.spawn_image_request(req);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(image::watch_for_new_post(
            Arc::clone(&self.db),
            self.store.clone(),
            author,
            baseline,
            self.image_watch.clone(),
            self.on_event.clone(),
            cancel.clone(),
        ));
        Ok(WatchHandle { cancel, task })
    }

    /// Submit a video and poll its job until it reaches a terminal state.
    pub async fn generate_video(
        &self,
        params: &GenerationParams,
    ) -> Result<(VideoSubmission, WatchHandle<VideoWatchOutcome>), SubmitError> {
        let submission = self.submit_video(params).await?;
        self.emit(GenerationEvent::info(
            "Video generation started. This can take a few minutes.",
        ));
        let handle = self.watch_video(submission.clone());
        Ok((submission, handle))
    }

    /// Start polling an already-submitted video job.
    pub fn watch_video(&self, submission: VideoSubmission) -> WatchHandle<VideoWatchOutcome> {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(video::watch_job(
            Arc::clone(&self.api),
            Arc::clone(&self.db),
            self.store.clone(),
            submission,
            self.video_watch.clone(),
            self.on_event.clone(),
            cancel.clone(),
        ));
        WatchHandle { cancel, task }
    }

    fn spawn_image_request(&self, req: GenerationRequest) {
        let api = Arc::clone(&self.api);
        let store = self.store.clone();
        let on_event = self.on_event.clone();
        let retry = self.submit_retry.clone();

        tokio::spawn(async move {
            match send_image_with_retry(api.as_ref(), &req, &retry).await {
                Ok(()) => info!(author = %req.author, n = req.inputs.n, "image generation request accepted"),
                Err(e) => {
                    error!(author = %req.author, "image generation request failed: {e}");
                    store.stop();
                    if let Some(ref cb) = on_event {
                        cb(GenerationEvent::error(e.user_message()));
                    }
                }
            }
        });
    }
}

/// Send an image request, retrying anything but a server-side validation
/// rejection.
async fn send_image_with_retry(
    api: &dyn GenerationApi,
    req: &GenerationRequest,
    retry: &SubmitRetry,
) -> Result<(), ApiError> {
    let mut attempt = 0u32;
    let mut delay = retry.initial_delay;
    loop {
        match api.submit_image(req).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && attempt < retry.retries => {
                attempt += 1;
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "image generation request failed, retrying: {e}"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(retry.max_delay);
            }
            Err(e) => return Err(e),
        }
    }
}
