use thiserror::Error;

/// Failure talking to the backend routes, classified by HTTP status.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("unauthorized (HTTP 401): {0}")]
    Unauthorized(String),
    #[error("bad request (HTTP 400): {0}")]
    BadRequest(String),
    #[error("not found (HTTP 404)")]
    NotFound,
    #[error("server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },
    #[error("unexpected response (HTTP {status}): {body}")]
    Status { status: u16, body: String },
    #[error("request timed out")]
    Timeout,
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            400 => Self::BadRequest(body),
            401 => Self::Unauthorized(body),
            404 => Self::NotFound,
            500..=599 => Self::Server { status, body },
            _ => Self::Status { status, body },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Validation rejections from the server are final; everything else may
    /// succeed on another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::BadRequest(_))
    }

    /// Message suitable for showing to the person who submitted the prompt.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "Your session has expired. Please sign in again.",
            Self::BadRequest(_) => "Invalid request. Please check your prompt and try again.",
            Self::Server { .. } => "Server error. Please try again later.",
            Self::Timeout => "The request timed out. Please try again.",
            Self::NotFound | Self::Status { .. } | Self::Transport(_) | Self::Decode(_) => {
                "Something went wrong. Please try again."
            }
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e)
        }
    }
}

/// Why a generation could not be submitted.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("prompt must not be empty")]
    EmptyPrompt,
    #[error("prompt is {len} characters, the limit is {max}")]
    PromptTooLong { len: usize, max: usize },
    #[error("no signed-in author")]
    NotSignedIn,
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl SubmitError {
    /// Validation errors are raised before any request is made.
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::Api(_))
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyPrompt => "Please enter a prompt.".to_string(),
            Self::PromptTooLong { max, .. } => {
                format!("Prompt is too long. Please keep it under {max} characters.")
            }
            Self::NotSignedIn => "Please sign in to start creating.".to_string(),
            Self::Api(e) => e.user_message().to_string(),
        }
    }
}
