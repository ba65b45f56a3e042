use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Generation request
// POST {baseURL}/api/images/generations
// POST {baseURL}/api/videos/generations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationRequest {
    pub inputs: GenerationInputs,
    pub author: String,
    pub category: String,
}

/// Field names are capitalised on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationInputs {
    #[serde(rename = "Prompt")]
    pub prompt: String,
    #[serde(rename = "Seed")]
    pub seed: u32,
    pub n: u32,
}

#[derive(Debug, Deserialize)]
pub struct VideoSubmitResponse {
    pub status: Option<String>,
    pub data: VideoSubmitData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSubmitData {
    pub job_id: Option<String>,
    /// Absent until the backend has created the post row.
    pub post_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Job status
// GET {baseURL}/api/videos/status/{jobId}
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
    /// Anything the backend adds later; treated as still running.
    #[serde(other)]
    Unknown,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobState,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub video: Option<JobVideo>,
    pub error: Option<String>,
}

impl JobStatusResponse {
    /// Playable URL of the finished video, preferring the public URL over the
    /// storage location.
    pub fn video_url(&self) -> Option<&str> {
        let video = self.video.as_ref()?;
        video
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
            .or_else(|| video.s3.as_ref().and_then(|s3| s3.as_str()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobVideo {
    pub url: Option<String>,
    /// Storage descriptor; either a plain URL string or an object.
    pub s3: Option<serde_json::Value>,
}
