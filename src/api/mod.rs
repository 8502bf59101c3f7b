// Remote interview service: upload, the two analyses, and question generation.

pub mod http;
pub mod types;

pub use http::HttpInterviewApi;
pub use types::{QuestionRequest, UploadResponse};

use crate::analysis::types::{AudioAnalysisResult, VideoAnalysisResult};
use crate::media::VideoBlob;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout")]
    Timeout,

    #[error("HTTP {status}: {}", message.as_deref().unwrap_or("no message"))]
    Status { status: u16, message: Option<String> },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// The server's own `message` when it sent one, otherwise `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            ApiError::Status {
                message: Some(message),
                ..
            } if !message.trim().is_empty() => message.clone(),
            _ => fallback.to_string(),
        }
    }
}

#[async_trait]
pub trait InterviewApi: Send + Sync {
    /// `POST /ai/upload`, multipart field `file`.
    async fn upload_video(&self, video: &VideoBlob) -> Result<UploadResponse, ApiError>;

    /// `POST /ai/video`
    async fn analyze_video(&self, link: &str) -> Result<VideoAnalysisResult, ApiError>;

    /// `POST /ai/voice`
    async fn analyze_voice(
        &self,
        link: &str,
        question: &str,
    ) -> Result<AudioAnalysisResult, ApiError>;

    /// Returns the generated question text; may be empty.
    async fn fetch_question(&self, request: &QuestionRequest) -> Result<String, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_prefers_server_text() {
        let err = ApiError::Status {
            status: 400,
            message: Some("Unsupported codec".to_string()),
        };
        assert_eq!(err.user_message("Upload failed"), "Unsupported codec");

        let err = ApiError::Status {
            status: 500,
            message: Some("  ".to_string()),
        };
        assert_eq!(err.user_message("Upload failed"), "Upload failed");
        assert_eq!(ApiError::Timeout.user_message("Upload failed"), "Upload failed");
    }
}
