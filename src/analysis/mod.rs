pub mod report;
pub mod state;
pub mod store;
pub mod types;

pub use report::{Grade, Headline, ScoreReport};
pub use state::{Action, AnalysisSession, AnalysisStatus};
pub use store::{AnalysisStore, SessionObserver, SessionPersistence, ANALYSIS_STORAGE_KEY};
pub use types::{AudioAnalysisResult, SentimentAnalysis, VideoAnalysisResult};

use crate::api::InterviewApi;
use crate::media::VideoBlob;
use crate::notify::{Notification, Notifier};
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

const UPLOAD_FAILED: &str = "An error occurred while uploading the video.";
const MISSING_LINK: &str = "The upload response did not include a file reference.";
const VIDEO_FAILED: &str = "An error occurred during video analysis.";
const AUDIO_FAILED: &str = "An error occurred during voice analysis.";

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Upload first, then video and voice analysis side by side. Every outcome
/// lands in the store as an [`Action`]; nothing here holds session state.
#[derive(Clone)]
pub struct AnalysisOrchestrator {
    api: Arc<dyn InterviewApi>,
    store: Arc<AnalysisStore>,
    notifier: Arc<dyn Notifier>,
}

impl AnalysisOrchestrator {
    pub fn new(
        api: Arc<dyn InterviewApi>,
        store: Arc<AnalysisStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            api,
            store,
            notifier,
        }
    }

    pub fn store(&self) -> &Arc<AnalysisStore> {
        &self.store
    }

    /// Marks both sides analyzing right away and runs the pipeline in the
    /// background. The handle resolves with the final session; dropping it
    /// does not cancel anything.
    pub fn start_analysis(
        &self,
        video: VideoBlob,
        question: impl Into<String>,
    ) -> JoinHandle<AnalysisSession> {
        let question = question.into();
        let session_id = Uuid::new_v4();
        self.store.dispatch(Action::Start {
            session_id,
            question: question.clone(),
            started_at: now_ms(),
        });
        tracing::info!(
            "Analysis {} started ({} bytes, {})",
            session_id,
            video.size(),
            video.mime_type()
        );

        let this = self.clone();
        tokio::spawn(async move { this.run(session_id, video, question).await })
    }

    pub fn reset_analysis(&self) {
        self.store.dispatch(Action::Reset);
    }

    async fn run(&self, session_id: Uuid, video: VideoBlob, question: String) -> AnalysisSession {
        let link = match self.api.upload_video(&video).await {
            Ok(resp) => match resp.link() {
                Some(link) => link.to_string(),
                None => return self.fail_upload(session_id, MISSING_LINK.to_string()),
            },
            Err(e) => {
                tracing::warn!("Video upload failed: {}", e);
                return self.fail_upload(session_id, e.user_message(UPLOAD_FAILED));
            }
        };
        tracing::info!("Video uploaded as {}", link);

        tokio::join!(
            self.run_video(session_id, &link),
            self.run_audio(session_id, &link, &question)
        );
        let session = self.store.snapshot();
        tracing::info!(
            "Analysis {} finished: {:?}",
            session_id,
            session.analysis_status
        );
        session
    }

    fn fail_upload(&self, session_id: Uuid, message: String) -> AnalysisSession {
        self.notifier
            .notify(Notification::error("Upload failed", message.clone()));
        self.store.dispatch(Action::UploadFailed {
            session_id,
            message,
        })
    }

    async fn run_video(&self, session_id: Uuid, link: &str) {
        let action = match self.api.analyze_video(link).await {
            Ok(result) => Action::VideoSucceeded {
                session_id,
                result,
                finished_at: now_ms(),
            },
            Err(e) => {
                tracing::warn!("Video analysis failed: {}", e);
                let message = e.user_message(VIDEO_FAILED);
                self.notifier
                    .notify(Notification::warning("Video analysis failed", message.clone()));
                Action::VideoFailed {
                    session_id,
                    message,
                    finished_at: now_ms(),
                }
            }
        };
        self.store.dispatch(action);
    }

    async fn run_audio(&self, session_id: Uuid, link: &str, question: &str) {
        let action = match self.api.analyze_voice(link, question).await {
            Ok(result) => Action::AudioSucceeded {
                session_id,
                result,
                finished_at: now_ms(),
            },
            Err(e) => {
                tracing::warn!("Voice analysis failed: {}", e);
                let message = e.user_message(AUDIO_FAILED);
                self.notifier
                    .notify(Notification::warning("Voice analysis failed", message.clone()));
                Action::AudioFailed {
                    session_id,
                    message,
                    finished_at: now_ms(),
                }
            }
        };
        self.store.dispatch(action);
    }
}
