pub mod types;

use async_trait::async_trait;
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::debug;
use types::{GenerationRequest, JobStatusResponse, VideoSubmitResponse};

use crate::error::ApiError;

/// The backend routes the submitter and pollers depend on.
#[async_trait]
pub trait GenerationApi: Send + Sync {
    /// Fire an image generation; the backend worker creates the post later.
    async fn submit_image(&self, req: &GenerationRequest) -> Result<(), ApiError>;

    /// Start a video job and return its identifiers.
    async fn submit_video(&self, req: &GenerationRequest) -> Result<VideoSubmitResponse, ApiError>;

    /// Current status of a video job.
    async fn job_status(&self, job_id: &str) -> Result<JobStatusResponse, ApiError>;
}

pub struct GenerationClient {
    base_url: String,
    token: Option<String>,
    http: Client,
}

impl GenerationClient {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self, ApiError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn post(&self, path: &str, body: &GenerationRequest) -> Result<Response, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, n = body.inputs.n, "posting generation request");
        let resp = self.authorize(self.http.post(&url)).json(body).send().await?;
        check(resp).await
    }
}

/// Turn non-2xx responses into a classified error carrying the body text.
async fn check(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ApiError::from_status(status.as_u16(), body))
}

#[async_trait]
impl GenerationApi for GenerationClient {
    /// POST /api/images/generations. The response body is not needed.
    async fn submit_image(&self, req: &GenerationRequest) -> Result<(), ApiError> {
        self.post("/api/images/generations", req).await?;
        Ok(())
    }

    /// POST /api/videos/generations. Returns the job id, plus the post id once created.
    async fn submit_video(&self, req: &GenerationRequest) -> Result<VideoSubmitResponse, ApiError> {
        let resp = self.post("/api/videos/generations", req).await?;
        let body = resp
            .json::<VideoSubmitResponse>()
            .await
            .map_err(|e| ApiError::Decode(format!("video submit response: {e}")))?;
        if body.data.job_id.as_deref().map_or(true, str::is_empty) {
            return Err(ApiError::Decode("no jobId in video submit response".into()));
        }
        Ok(body)
    }

    /// GET /api/videos/status/{job_id}
    async fn job_status(&self, job_id: &str) -> Result<JobStatusResponse, ApiError> {
        let url = format!("{}/api/videos/status/{}", self.base_url, job_id);
        let resp = self.authorize(self.http.get(&url)).send().await?;
        check(resp)
            .await?
            .json::<JobStatusResponse>()
            .await
            .map_err(|e| ApiError::Decode(format!("job status response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{GenerationInputs, JobState};

    fn request(n: u32) -> GenerationRequest {
        GenerationRequest {
            inputs: GenerationInputs {
                prompt: "a red fox in snow".into(),
                seed: 7,
                n,
            },
            author: "user-1".into(),
            category: "ai-generated".into(),
        }
    }

    fn client(server: &mockito::Server) -> GenerationClient {
        GenerationClient::new(&server.url(), Some("tok".into()), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn submit_image_posts_payload_with_bearer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/images/generations")
            .match_header("authorization", "Bearer tok")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "inputs": {"Prompt": "a red fox in snow", "n": 4},
                "author": "user-1"
            })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        client(&server).submit_image(&request(4)).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn submit_video_returns_job_id() {
        let mut server = mockito::Server::new_async().await;
        let _m0 = server
            .mock("POST", "/api/videos/generations")
            .with_status(200)
            .with_body(r#"{"status":"success","data":{"jobId":"job-1","postId":"post-1"}}"#)
            .create_async()
            .await;

        let resp = client(&server).submit_video(&request(1)).await.unwrap();
        assert_eq!(resp.data.job_id.as_deref(), Some("job-1"));
        assert_eq!(resp.data.post_id.as_deref(), Some("post-1"));
    }

    #[tokio::test]
    async fn submit_video_without_job_id_is_decode_error() {
        let mut server = mockito::Server::new_async().await;
        let _m1 = server
            .mock("POST", "/api/videos/generations")
            .with_status(200)
            .with_body(r#"{"status":"success","data":{}}"#)
            .create_async()
            .await;

        let err = client(&server).submit_video(&request(1)).await.unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[tokio::test]
    async fn error_statuses_are_classified() {
        let mut server = mockito::Server::new_async().await;
        let _m2 = server
            .mock("POST", "/api/videos/generations")
            .with_status(401)
            .with_body("expired")
            .create_async()
            .await;
        let _m3 = server
            .mock("GET", "/api/videos/status/missing")
            .with_status(404)
            .create_async()
            .await;
        let _m4 = server
            .mock("GET", "/api/videos/status/broken")
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let c = client(&server);
        let err = c.submit_video(&request(1)).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(ref body) if body == "expired"));
        assert!(c.job_status("missing").await.unwrap_err().is_not_found());
        assert!(matches!(
            c.job_status("broken").await.unwrap_err(),
            ApiError::Server { status: 502, .. }
        ));
    }

    #[tokio::test]
    async fn job_status_parses_body() {
        let mut server = mockito::Server::new_async().await;
        let _m5 = server
            .mock("GET", "/api/videos/status/job-1")
            .with_status(200)
            .with_body(r#"{"jobId":"job-1","status":"processing","createdAt":"t0","updatedAt":"t1"}"#)
            .create_async()
            .await;

        let status = client(&server).job_status("job-1").await.unwrap();
        assert_eq!(status.job_id, "job-1");
        assert_eq!(status.status, JobState::Processing);
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let c = GenerationClient::new("http://localhost:3000/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(c.base_url(), "http://localhost:3000");
    }
}
