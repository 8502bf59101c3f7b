// reqwest client for the interview service.

use super::types::{
    ErrorBody, QuestionRequest, QuestionResponse, UploadResponse, VideoAnalysisRequest,
    VoiceAnalysisRequest,
};
use super::{ApiError, InterviewApi};
use crate::analysis::types::{AudioAnalysisResult, VideoAnalysisResult};
use crate::config::AppConfig;
use crate::media::VideoBlob;
use async_trait::async_trait;
use reqwest::multipart;
use serde::de::DeserializeOwned;
use serde::Serialize;

const UPLOAD_PATH: &str = "/ai/upload";
const VIDEO_PATH: &str = "/ai/video";
const VOICE_PATH: &str = "/ai/voice";

pub struct HttpInterviewApi {
    base_url: String,
    question_path: String,
    client: reqwest::Client,
}

impl HttpInterviewApi {
    pub fn new(config: &AppConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ApiError::InvalidRequest(format!("HTTP client: {}", e)))?;

        tracing::info!("Interview API client initialized for {}", config.api_base_url);

        Ok(Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            question_path: config.question_path.clone(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(map_transport)?;
        read_json(response).await
    }
}

/// Multipart file name. The extension is fixed regardless of the container.
pub fn upload_file_name(epoch_ms: i64) -> String {
    format!("interview-{}.mp4", epoch_ms)
}

fn map_transport(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Network(e.to_string())
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.text().await.map_err(map_transport)?;

    if !status.is_success() {
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.message);
        tracing::warn!("Interview API returned HTTP {}", status);
        return Err(ApiError::Status {
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_str(&body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl InterviewApi for HttpInterviewApi {
    async fn upload_video(&self, video: &VideoBlob) -> Result<UploadResponse, ApiError> {
        let file_name = upload_file_name(chrono::Utc::now().timestamp_millis());
        // Parameters such as `codecs=avc1,mp4a.40.2` are not valid in a part header.
        let essence = video
            .mime_type()
            .split(';')
            .next()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or("video/mp4");

        tracing::info!(
            "Uploading {} ({} bytes, {})",
            file_name,
            video.size(),
            essence
        );

        let part = multipart::Part::bytes(video.bytes().to_vec())
            .file_name(file_name)
            .mime_str(essence)
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(self.url(UPLOAD_PATH))
            .multipart(form)
            .send()
            .await
            .map_err(map_transport)?;
        read_json(response).await
    }

    async fn analyze_video(&self, link: &str) -> Result<VideoAnalysisResult, ApiError> {
        self.post_json(VIDEO_PATH, &VideoAnalysisRequest { link })
            .await
    }

    async fn analyze_voice(
        &self,
        link: &str,
        question: &str,
    ) -> Result<AudioAnalysisResult, ApiError> {
        self.post_json(VOICE_PATH, &VoiceAnalysisRequest { link, question })
            .await
    }

    async fn fetch_question(&self, request: &QuestionRequest) -> Result<String, ApiError> {
        let response: QuestionResponse = self.post_json(&self.question_path, request).await?;
        Ok(response.question.unwrap_or_default())
    }
}
