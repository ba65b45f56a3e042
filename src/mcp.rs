use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router, ErrorData, ServerHandler,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::SubmitError;
use crate::jobs::{
    GenerationParams, Generator, MediaType, DEFAULT_IMAGE_COUNT, MAX_IMAGE_COUNT, MIN_IMAGE_COUNT,
};
use crate::media::MediaResolver;

const DEFAULT_POST_LIMIT: u32 = 10;
const MAX_POST_LIMIT: u32 = 50;

// ---------------------------------------------------------------------------
// Tool parameter schemas (derive JsonSchema for rmcp auto-schema)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GenerateImageParams {
    /// Text prompt describing the images to generate (max 1000 characters).
    pub prompt: String,
    /// Number of images, 1-10. Defaults to 4.
    #[serde(default)]
    pub image_count: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GenerateVideoParams {
    /// Text prompt describing the video to generate (max 1000 characters).
    pub prompt: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct JobStatusParams {
    /// The job ID returned by generate_video.
    pub job_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RecentPostsParams {
    /// Maximum number of posts, newest first. Defaults to 10, capped at 50.
    #[serde(default)]
    pub limit: Option<u32>,
}

// ---------------------------------------------------------------------------
// MCP Server
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct GenpostMcp {
    generator: Arc<Generator>,
    resolver: MediaResolver,
    tool_router: ToolRouter<Self>,
}

impl GenpostMcp {
    pub fn new(generator: Arc<Generator>, resolver: MediaResolver) -> Self {
        Self {
            generator,
            resolver,
            tool_router: Self::tool_router(),
        }
    }

    /// Claim the in-flight flag; one generation at a time per user. A
    /// rejected or failed submission clears it again.
    fn claim(&self, media_type: MediaType) -> Option<CallToolResult> {
        let store = self.generator.store();
        if store.try_start(media_type) {
            return None;
        }
        Some(CallToolResult::error(vec![Content::text(format!(
            "A {} generation is already in progress. Check generation_state and try again once it finishes.",
            store.snapshot().media_type
        ))]))
    }
}

fn json_result(value: &impl Serialize) -> Result<CallToolResult, ErrorData> {
    let text = serde_json::to_string(value)
        .map_err(|e| ErrorData::internal_error(format!("Failed to serialize result: {e}"), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn rejected(e: &SubmitError) -> CallToolResult {
    if !e.is_validation() {
        warn!("generation request failed: {e}");
    }
    CallToolResult::error(vec![Content::text(e.user_message())])
}

#[tool_router]
impl GenpostMcp {
    #[tool(description = "Generate AI images for the signed-in user. \
        Returns immediately; the images appear as a new post once the worker finishes \
        (typically 10-30s). Poll generation_state until isActive is false, then call recent_posts.")]
    async fn generate_image(
        &self,
        Parameters(params): Parameters<GenerateImageParams>,
    ) -> Result<CallToolResult, ErrorData> {
        if let Some(busy) = self.claim(MediaType::Image) {
            return Ok(busy);
        }
        let mut request = GenerationParams::image(params.prompt);
        request.image_count = params.image_count;

        match self.generator.generate_image(&request) {
            Ok(_watch) => {
                let count = params
                    .image_count
                    .unwrap_or(DEFAULT_IMAGE_COUNT)
                    .clamp(MIN_IMAGE_COUNT, MAX_IMAGE_COUNT);
                info!(count, "image generation submitted via MCP");
                json_result(&serde_json::json!({
                    "status": "submitted",
                    "mediaType": "image",
                    "imageCount": count,
                    "message": "Image generation submitted. Poll generation_state, then call recent_posts.",
                }))
            }
            Err(e) => Ok(rejected(&e)),
        }
    }

    #[tool(description = "Generate an AI video for the signed-in user. \
        Returns a job ID once the backend accepts the request. The server keeps polling \
        the job and attaches the video to its post when done (typically 1-5 min). \
        Use job_status to check progress.")]
    async fn generate_video(
        &self,
        Parameters(params): Parameters<GenerateVideoParams>,
    ) -> Result<CallToolResult, ErrorData> {
        if let Some(busy) = self.claim(MediaType::Video) {
            return Ok(busy);
        }
        match self
            .generator
            .generate_video(&GenerationParams::video(params.prompt))
            .await
        {
            Ok((submission, _watch)) => {
                info!(job_id = %submission.job_id, "video generation submitted via MCP");
                json_result(&serde_json::json!({
                    "status": "submitted",
                    "mediaType": "video",
                    "jobId": submission.job_id,
                    "postId": submission.post_id,
                    "message": "Video generation submitted. Use job_status to check progress.",
                }))
            }
            Err(e) => Ok(rejected(&e)),
        }
    }

    #[tool(description = "Check the status of a video generation job. \
        Returns status (queued/processing/completed/failed), the video URL on completion, \
        or the error on failure. A not-found result shortly after submission is normal.")]
    async fn job_status(
        &self,
        Parameters(params): Parameters<JobStatusParams>,
    ) -> Result<CallToolResult, ErrorData> {
        match self.generator.api().job_status(&params.job_id).await {
            Ok(status) => json_result(&serde_json::json!({
                "jobId": status.job_id,
                "status": status.status,
                "done": status.status.is_terminal(),
                "videoUrl": status.video_url(),
                "error": status.error,
                "createdAt": status.created_at,
                "updatedAt": status.updated_at,
            })),
            Err(e) if e.is_not_found() => Ok(CallToolResult::error(vec![Content::text(format!(
                "Job '{}' not found yet. It may still be registering; try again shortly.",
                params.job_id
            ))])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.user_message())])),
        }
    }

    #[tool(description = "Report whether a generation is in flight and of which media type.")]
    async fn generation_state(&self) -> Result<CallToolResult, ErrorData> {
        json_result(&self.generator.store().snapshot())
    }

    #[tool(description = "List the signed-in user's most recent posts with resolved media URLs. \
        Posts marked pending are still waiting for their media.")]
    async fn recent_posts(
        &self,
        Parameters(params): Parameters<RecentPostsParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let Some(author) = self.generator.author() else {
            return Ok(rejected(&SubmitError::NotSignedIn));
        };
        let limit = params.limit.unwrap_or(DEFAULT_POST_LIMIT).clamp(1, MAX_POST_LIMIT);

        let shared = self.generator.db();
        let db = shared
            .lock()
            .map_err(|e| ErrorData::internal_error(format!("db lock: {e}"), None))?;
        let (posts, stats) = match db
            .list_posts_by_author(author, limit as usize, 0)
            .and_then(|posts| Ok((posts, db.get_post_stats(author)?)))
        {
            Ok(found) => found,
            Err(e) => {
                return Ok(CallToolResult::error(vec![Content::text(format!(
                    "Failed to query posts: {e:#}"
                ))]))
            }
        };
        drop(db);

        let views: Vec<_> = posts.iter().map(|p| self.resolver.view(p)).collect();
        json_result(&serde_json::json!({
            "posts": views,
            "stats": stats,
        }))
    }
}

#[tool_handler]
impl ServerHandler for GenpostMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(SERVER_INSTRUCTIONS.into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Server instructions
// ---------------------------------------------------------------------------

const SERVER_INSTRUCTIONS: &str = "\
Genpost MCP server: AI-generated image and video posts for the signed-in user.

# Workflow

1. **Check first**: call generation_state. Only one generation runs at a time.
2. **Generate**: generate_image (1-10 images, default 4) or generate_video (one clip).
3. **Wait**:
   - Images: poll generation_state until isActive is false (usually 10-30s), then call recent_posts.
   - Video: poll job_status with the returned jobId every few seconds (usually 1-5 min).
     A not-found answer right after submission is normal while the job registers.
4. **Show**: recent_posts returns resolved media URLs; primaryUrl is the thumbnail.

# Prompts

- Prompts must be non-empty and at most 1000 characters.
- Lead with the subject, then setting, style and lighting. Specific beats vague.
";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::post;
    use crate::db::Db;
    use crate::jobs::tests::{fast_retry, fast_watch, FakeApi};
    use crate::error::ApiError;
    use crate::store::GenerationStore;

    fn server(api: Arc<FakeApi>, author: Option<&str>) -> GenpostMcp {
        let db = Db::open_in_memory().unwrap().into_shared();
        let mut generator = Generator::new(api, db, GenerationStore::new(), author.map(String::from));
        let (image, video) = fast_watch();
        generator.set_watch_config(image, video);
        generator.set_submit_retry(fast_retry());
        GenpostMcp::new(Arc::new(generator), MediaResolver::new("https://gw.example/ipfs", None))
    }

    fn text(result: &CallToolResult) -> String {
        result.content[0]
            .as_text()
            .map(|t| t.text.clone())
            .unwrap_or_default()
    }

    #[test]
    fn image_params_count_is_optional() {
        let p: GenerateImageParams = serde_json::from_str(r#"{"prompt":"fox"}"#).unwrap();
        assert!(p.image_count.is_none());
        let p: GenerateImageParams =
            serde_json::from_str(r#"{"prompt":"fox","image_count":6}"#).unwrap();
        assert_eq!(p.image_count, Some(6));
    }

    #[test]
    fn job_status_params_require_job_id() {
        assert!(serde_json::from_str::<JobStatusParams>("{}").is_err());
        let p: JobStatusParams = serde_json::from_str(r#"{"job_id":"j1"}"#).unwrap();
        assert_eq!(p.job_id, "j1");
    }

    #[tokio::test]
    async fn generate_image_rejects_empty_prompt() {
        let api = Arc::new(FakeApi::default());
        let mcp = server(Arc::clone(&api), Some("alice"));
        let result = mcp
            .generate_image(Parameters(GenerateImageParams {
                prompt: "  ".into(),
                image_count: None,
            }))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
        assert_eq!(text(&result), "Please enter a prompt.");
        assert!(!mcp.generator.store().is_active());
    }

    #[tokio::test]
    async fn second_generation_is_refused_while_busy() {
        let api = Arc::new(FakeApi::default());
        let mcp = server(Arc::clone(&api), Some("alice"));
        mcp.generator.store().start(MediaType::Image);

        let result = mcp
            .generate_video(Parameters(GenerateVideoParams {
                prompt: "a red fox in snow".into(),
            }))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
        assert!(text(&result).contains("image generation is already in progress"));
        assert_eq!(api.video_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_generations_have_one_winner() {
        let api = Arc::new(FakeApi::default());
        let mcp = server(Arc::clone(&api), Some("alice"));
        let call = |mcp: GenpostMcp| async move {
            mcp.generate_video(Parameters(GenerateVideoParams {
                prompt: "a red fox in snow".into(),
            }))
            .await
            .unwrap()
        };

        let (a, b) = tokio::join!(
            tokio::spawn(call(mcp.clone())),
            tokio::spawn(call(mcp.clone()))
        );
        let refused = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|r| r.is_error == Some(true))
            .count();
        assert_eq!(refused, 1);
        assert_eq!(api.video_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn generate_video_returns_job_id() {
        let api = Arc::new(FakeApi::default());
        let mcp = server(Arc::clone(&api), Some("alice"));
        let result = mcp
            .generate_video(Parameters(GenerateVideoParams {
                prompt: "a red fox in snow".into(),
            }))
            .await
            .unwrap();
        let v: serde_json::Value = serde_json::from_str(&text(&result)).unwrap();
        assert_eq!(v["jobId"], "job-1");
        assert_eq!(v["postId"], "post-1");
        assert!(mcp.generator.store().is_active());
    }

    #[tokio::test]
    async fn job_status_not_found_is_soft_error() {
        let api = Arc::new(FakeApi::default());
        api.status_results.lock().unwrap().push_back(Err(ApiError::NotFound));
        let mcp = server(api, Some("alice"));
        let result = mcp
            .job_status(Parameters(JobStatusParams { job_id: "j9".into() }))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
        assert!(text(&result).contains("'j9' not found yet"));
    }

    #[tokio::test]
    async fn job_status_reports_video_url() {
        let api = Arc::new(FakeApi::default());
        api.status_results.lock().unwrap().push_back(Ok(serde_json::from_value(
            serde_json::json!({
                "jobId": "j1",
                "status": "completed",
                "video": { "url": null, "s3": "https://bucket.example/j1.mp4" }
            }),
        )
        .unwrap()));
        let mcp = server(api, Some("alice"));
        let result = mcp
            .job_status(Parameters(JobStatusParams { job_id: "j1".into() }))
            .await
            .unwrap();
        let v: serde_json::Value = serde_json::from_str(&text(&result)).unwrap();
        assert_eq!(v["status"], "completed");
        assert_eq!(v["done"], true);
        assert_eq!(v["videoUrl"], "https://bucket.example/j1.mp4");
    }

    #[tokio::test]
    async fn recent_posts_resolves_urls_and_requires_author() {
        let mcp = server(Arc::new(FakeApi::default()), Some("alice"));
        {
            let db = mcp.generator.db();
            let db = db.lock().unwrap();
            db.insert_post(&post("p1", "alice", "2026-01-01T00:00:00Z")).unwrap();
            db.insert_post(&post("p2", "alice", "2026-01-02T00:00:00Z")).unwrap();
            db.insert_post(&post("b1", "bob", "2026-01-03T00:00:00Z")).unwrap();
        }
        let result = mcp
            .recent_posts(Parameters(RecentPostsParams { limit: Some(1) }))
            .await
            .unwrap();
        let v: serde_json::Value = serde_json::from_str(&text(&result)).unwrap();
        assert_eq!(v["posts"].as_array().unwrap().len(), 1);
        assert_eq!(v["posts"][0]["id"], "p2");
        assert_eq!(v["posts"][0]["primaryUrl"], "https://gw.example/ipfs/Qmabc/0.png");
        assert_eq!(v["stats"]["total"], 2);

        let signed_out = server(Arc::new(FakeApi::default()), None);
        let result = signed_out
            .recent_posts(Parameters(RecentPostsParams { limit: None }))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn generation_state_reports_snapshot() {
        let mcp = server(Arc::new(FakeApi::default()), Some("alice"));
        mcp.generator.store().start(MediaType::Video);
        let result = mcp.generation_state().await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&text(&result)).unwrap();
        assert_eq!(v["isActive"], true);
        assert_eq!(v["mediaType"], "video");
    }
}
