use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(rename = "fileName", default)]
    pub file_name: Option<String>,
}

impl UploadResponse {
    /// Server-side reference to pass as `link`, if the server returned a usable one.
    pub fn link(&self) -> Option<&str> {
        self.file_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoAnalysisRequest<'a> {
    pub link: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoiceAnalysisRequest<'a> {
    pub link: &'a str,
    pub question: &'a str,
}

/// Job posting the question is generated for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRequest {
    pub posting_organ: String,
    pub posting_part: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuestionResponse {
    #[serde(default)]
    pub question: Option<String>,
}

/// Body of a non-2xx response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}
