use serde::Serialize;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{GenerationEvent, MediaType, OnEventCallback};
use crate::db::SharedDb;
use crate::store::GenerationStore;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ImageWatch {
    pub interval: Duration,
}

impl Default for ImageWatch {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ImageWatchOutcome {
    /// The author's newest post changed.
    #[serde(rename_all = "camelCase")]
    NewPost { post_id: String },
    /// Someone else cleared the in-flight flag.
    Stopped,
    Cancelled,
}

/// Poll the author's newest post until it differs from `baseline`.
///
/// There is no failure state: query errors are logged and the next tick
/// tries again. Each query completes before the next sleep starts.
pub async fn watch_for_new_post(
    db: SharedDb,
    store: GenerationStore,
    author: String,
    baseline: Option<String>,
    config: ImageWatch,
    on_event: Option<OnEventCallback>,
    cancel: CancellationToken,
) -> ImageWatchOutcome {
    let emit = |event: GenerationEvent| {
        if let Some(ref cb) = on_event {
            cb(event);
        }
    };

    info!(author = %author, baseline = ?baseline, "watching for new image post");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(author = %author, "image watch cancelled");
                return ImageWatchOutcome::Cancelled;
            }
            _ = sleep(config.interval) => {}
        }

        if !store.is_active() {
            debug!(author = %author, "in-flight flag cleared, image watch stopping");
            return ImageWatchOutcome::Stopped;
        }

        let latest = match db.lock() {
            Ok(guard) => guard.latest_post_id(&author),
            Err(e) => Err(anyhow::anyhow!("db lock: {e}")),
        };

        match latest {
            Ok(Some(post_id)) if baseline.as_deref() != Some(post_id.as_str()) => {
                info!(author = %author, post_id = %post_id, "new image post detected");
                store.stop();
                emit(GenerationEvent::ListingInvalidated {
                    author: author.clone(),
                });
                emit(GenerationEvent::PostReady {
                    post_id: post_id.clone(),
                    media_type: MediaType::Image,
                });
                return ImageWatchOutcome::NewPost { post_id };
            }
            Ok(_) => {}
            Err(e) => warn!(author = %author, "latest post query failed: {e:#}"),
        }
    }
}
