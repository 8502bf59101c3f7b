use super::types::{AudioAnalysisResult, VideoAnalysisResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    #[default]
    Idle,
    Analyzing,
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndividualStatus {
    pub video: AnalysisStatus,
    pub audio: AnalysisStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisResults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoAnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioAnalysisResult>,
}

/// Epoch milliseconds. Both start times are the moment the upload began.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalysisTiming {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_end_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_end_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_duration: Option<i64>,
}

/// Everything the report view needs; persisted verbatim under `analysisData`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalysisSession {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    pub is_analyzing: bool,
    pub analysis_status: AnalysisStatus,
    pub individual_status: IndividualStatus,
    pub analysis_results: AnalysisResults,
    pub analysis_timing: AnalysisTiming,
    pub interview_question: String,
    pub analysis_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Video,
    Audio,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Start {
        session_id: Uuid,
        question: String,
        started_at: i64,
    },
    UploadFailed {
        session_id: Uuid,
        message: String,
    },
    VideoSucceeded {
        session_id: Uuid,
        result: VideoAnalysisResult,
        finished_at: i64,
    },
    VideoFailed {
        session_id: Uuid,
        message: String,
        finished_at: i64,
    },
    AudioSucceeded {
        session_id: Uuid,
        result: AudioAnalysisResult,
        finished_at: i64,
    },
    AudioFailed {
        session_id: Uuid,
        message: String,
        finished_at: i64,
    },
    Reset,
}

impl Action {
    fn session_id(&self) -> Option<Uuid> {
        match self {
            Action::Start { session_id, .. }
            | Action::UploadFailed { session_id, .. }
            | Action::VideoSucceeded { session_id, .. }
            | Action::VideoFailed { session_id, .. }
            | Action::AudioSucceeded { session_id, .. }
            | Action::AudioFailed { session_id, .. } => Some(*session_id),
            Action::Reset => None,
        }
    }
}

/// Pure transition function. Completions for a superseded session, or for a
/// side that is no longer analyzing, leave the state untouched.
pub fn reduce(state: &AnalysisSession, action: Action) -> AnalysisSession {
    let is_current = action.session_id() == state.session_id;

    let mut next = match action {
        Action::Reset => return AnalysisSession::default(),
        Action::Start {
            session_id,
            question,
            started_at,
        } => {
            return AnalysisSession {
                session_id: Some(session_id),
                is_analyzing: true,
                analysis_status: AnalysisStatus::Analyzing,
                individual_status: IndividualStatus {
                    video: AnalysisStatus::Analyzing,
                    audio: AnalysisStatus::Analyzing,
                },
                analysis_results: AnalysisResults::default(),
                analysis_timing: AnalysisTiming {
                    video_start_time: Some(started_at),
                    audio_start_time: Some(started_at),
                    ..AnalysisTiming::default()
                },
                interview_question: question,
                analysis_error: None,
            }
        }
        _ if !is_current => return state.clone(),
        Action::UploadFailed { message, .. } => {
            if state.individual_status.video != AnalysisStatus::Analyzing
                && state.individual_status.audio != AnalysisStatus::Analyzing
            {
                return state.clone();
            }
            let mut next = state.clone();
            next.individual_status = IndividualStatus {
                video: AnalysisStatus::Error,
                audio: AnalysisStatus::Error,
            };
            next.analysis_error = Some(message);
            next
        }
        Action::VideoSucceeded {
            result,
            finished_at,
            ..
        } => {
            if state.individual_status.video != AnalysisStatus::Analyzing {
                return state.clone();
            }
            let mut next = state.clone();
            next.analysis_results.video = Some(result);
            next.individual_status.video = AnalysisStatus::Completed;
            stamp_end(&mut next.analysis_timing, Modality::Video, finished_at);
            next
        }
        Action::VideoFailed {
            message,
            finished_at,
            ..
        } => {
            if state.individual_status.video != AnalysisStatus::Analyzing {
                return state.clone();
            }
            let mut next = state.clone();
            next.individual_status.video = AnalysisStatus::Error;
            append_error(&mut next.analysis_error, &message);
            stamp_end(&mut next.analysis_timing, Modality::Video, finished_at);
            next
        }
        Action::AudioSucceeded {
            result,
            finished_at,
            ..
        } => {
            if state.individual_status.audio != AnalysisStatus::Analyzing {
                return state.clone();
            }
            let mut next = state.clone();
            next.analysis_results.audio = Some(result);
            next.individual_status.audio = AnalysisStatus::Completed;
            stamp_end(&mut next.analysis_timing, Modality::Audio, finished_at);
            next
        }
        Action::AudioFailed {
            message,
            finished_at,
            ..
        } => {
            if state.individual_status.audio != AnalysisStatus::Analyzing {
                return state.clone();
            }
            let mut next = state.clone();
            next.individual_status.audio = AnalysisStatus::Error;
            append_error(&mut next.analysis_error, &message);
            stamp_end(&mut next.analysis_timing, Modality::Audio, finished_at);
            next
        }
    };

    reconcile_overall(&mut next);
    next
}

/// Completed once both sides completed; Error only once neither side is
/// still pending and something failed.
fn reconcile_overall(session: &mut AnalysisSession) {
    if session.analysis_status != AnalysisStatus::Analyzing {
        return;
    }
    let IndividualStatus { video, audio } = session.individual_status;

    if video == AnalysisStatus::Completed && audio == AnalysisStatus::Completed {
        session.analysis_status = AnalysisStatus::Completed;
    } else if video != AnalysisStatus::Analyzing
        && audio != AnalysisStatus::Analyzing
        && session.analysis_error.is_some()
    {
        session.analysis_status = AnalysisStatus::Error;
    }
    session.is_analyzing = session.analysis_status == AnalysisStatus::Analyzing;
}

fn append_error(slot: &mut Option<String>, message: &str) {
    *slot = Some(match slot.take() {
        Some(prev) if !prev.is_empty() => format!("{}, {}", prev, message),
        _ => message.to_string(),
    });
}

fn stamp_end(timing: &mut AnalysisTiming, modality: Modality, finished_at: i64) {
    let (start, end, duration) = match modality {
        Modality::Video => (
            timing.video_start_time,
            &mut timing.video_end_time,
            &mut timing.video_duration,
        ),
        Modality::Audio => (
            timing.audio_start_time,
            &mut timing.audio_end_time,
            &mut timing.audio_duration,
        ),
    };
    *end = Some(finished_at);
    *duration = start.map(|s| (finished_at - s).max(0));
}
