// One mock-interview take, end to end: readiness, question, record, auto-stop,
// local backup and submission for analysis.

use crate::analysis::{AnalysisOrchestrator, AnalysisSession, AnalysisStore};
use crate::api::{InterviewApi, QuestionRequest};
use crate::config::AppConfig;
use crate::media::{
    AudioAnalyserFactory, DevicePermissionManager, MediaDevices, MediaStream,
    MediaStreamController, MicLevelMeter, PermissionProbe, PermissionState, PermissionStatus,
    RecorderBackend, RecordingController, RecordingError, RecordingState, TrackKind, VideoBlob,
};
use crate::notify::{Notification, Notifier};
use crate::storage::{ObjectUrlRegistry, SessionStorage, VideoLocalPersistence};
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const DEFAULT_INTERVIEW_QUESTION: &str =
    "The interviewer asks about the applicant's experience and competencies.";
pub const ACCEPTED_UPLOAD_MIME: &str = "video/mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CannotStartReason {
    CameraPermission,
    MicrophonePermission,
    NoStream,
    NoVideoTrack,
    NoAudioTrack,
    VideoNotLive,
    AudioNotLive,
}

impl fmt::Display for CannotStartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::CameraPermission => "Camera permission is required.",
            Self::MicrophonePermission => "Microphone permission is required.",
            Self::NoStream => "The media stream is not active.",
            Self::NoVideoTrack => "No video track was found.",
            Self::NoAudioTrack => "No audio track was found.",
            Self::VideoNotLive => "The video is not active.",
            Self::AudioNotLive => "The audio is not active.",
        };
        f.write_str(message)
    }
}

/// First reason a take cannot start yet, in the order the user should fix them.
pub fn cannot_start_reason(
    permissions: &PermissionState,
    stream: Option<&MediaStream>,
) -> Option<CannotStartReason> {
    if permissions.camera != PermissionStatus::Granted {
        return Some(CannotStartReason::CameraPermission);
    }
    if permissions.microphone != PermissionStatus::Granted {
        return Some(CannotStartReason::MicrophonePermission);
    }
    let Some(stream) = stream else {
        return Some(CannotStartReason::NoStream);
    };
    if stream.video_tracks().next().is_none() {
        return Some(CannotStartReason::NoVideoTrack);
    }
    if stream.audio_tracks().next().is_none() {
        return Some(CannotStartReason::NoAudioTrack);
    }
    if !stream.has_live(TrackKind::Video) {
        return Some(CannotStartReason::VideoNotLive);
    }
    if !stream.has_live(TrackKind::Audio) {
        return Some(CannotStartReason::AudioNotLive);
    }
    None
}

#[derive(Debug, Error)]
pub enum TakeError {
    #[error("Interview cannot start: {0}")]
    NotReady(CannotStartReason),

    #[error(transparent)]
    Recording(#[from] RecordingError),

    #[error("No recording in progress")]
    NotRecording,

    #[error("Video file is too large ({size} bytes, limit {limit})")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Unsupported video type: {0}")]
    UnsupportedFileType(String),

    #[error("Video file is empty")]
    EmptyFile,

    #[error("Job posting organization and part are required")]
    MissingPosting,
}

/// Platform capabilities an interview needs.
pub struct Platform {
    pub devices: Arc<dyn MediaDevices>,
    pub permission_probe: Option<Arc<dyn PermissionProbe>>,
    pub analysers: Arc<dyn AudioAnalyserFactory>,
    pub recorder: Arc<dyn RecorderBackend>,
}

/// A finished take that has been handed to analysis.
pub struct SubmittedTake {
    pub video: VideoBlob,
    pub playback_url: String,
    pub analysis: JoinHandle<AnalysisSession>,
}

pub struct InterviewSession {
    config: AppConfig,
    permissions: Arc<DevicePermissionManager>,
    streams: Arc<MediaStreamController>,
    meter: MicLevelMeter,
    recorder: RecordingController,
    analysis: AnalysisOrchestrator,
    videos: VideoLocalPersistence,
    api: Arc<dyn InterviewApi>,
    notifier: Arc<dyn Notifier>,
    question: Mutex<String>,
    active_take: Mutex<Option<VideoBlob>>,
    auto_stop: Mutex<Option<JoinHandle<()>>>,
}

impl InterviewSession {
    pub fn new(
        config: AppConfig,
        platform: Platform,
        api: Arc<dyn InterviewApi>,
        storage: Arc<dyn SessionStorage>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let permissions = Arc::new(DevicePermissionManager::new(
            platform.devices.clone(),
            platform.permission_probe,
            config.permission_settle_delay(),
        ));
        let streams = Arc::new(MediaStreamController::new(
            platform.devices,
            permissions.clone(),
            notifier.clone(),
        ));
        let store = Arc::new(AnalysisStore::with_session_storage(storage.clone()));
        let videos = VideoLocalPersistence::new(
            storage,
            Arc::new(ObjectUrlRegistry::new()),
            config.snapshot_limit_bytes,
            config.download_dir.clone(),
        );

        Self {
            meter: MicLevelMeter::new(platform.analysers, config.mic_poll_interval()),
            recorder: RecordingController::new(platform.recorder, notifier.clone()),
            analysis: AnalysisOrchestrator::new(api.clone(), store, notifier.clone()),
            config,
            permissions,
            streams,
            videos,
            api,
            notifier,
            question: Mutex::new(String::new()),
            active_take: Mutex::new(None),
            auto_stop: Mutex::new(None),
        }
    }

    pub fn permissions(&self) -> &Arc<DevicePermissionManager> {
        &self.permissions
    }

    pub fn streams(&self) -> &Arc<MediaStreamController> {
        &self.streams
    }

    pub fn recorder(&self) -> &RecordingController {
        &self.recorder
    }

    pub fn meter(&self) -> &MicLevelMeter {
        &self.meter
    }

    pub fn analysis(&self) -> &AnalysisOrchestrator {
        &self.analysis
    }

    pub fn videos(&self) -> &VideoLocalPersistence {
        &self.videos
    }

    pub fn question(&self) -> String {
        self.question.lock().map(|q| q.clone()).unwrap_or_default()
    }

    pub fn active_take(&self) -> Option<VideoBlob> {
        self.active_take.lock().ok()?.clone()
    }

    /// Permissions, devices, then the preview stream. Call from a user gesture
    /// so the permission prompt may be shown.
    pub async fn prepare(&self) -> bool {
        let state = self.permissions.query_permissions().await;
        if !state.is_fully_granted() && !self.permissions.request_permissions().await {
            self.notifier.notify(
                Notification::error(
                    "Camera and microphone access denied",
                    "Allow camera and microphone access in the browser settings to start the interview.",
                )
                .persistent(),
            );
            return false;
        }

        if let Err(e) = self.streams.refresh_devices().await {
            warn!("{}", e);
        }
        match self.streams.start_stream(None, None).await {
            Ok(stream) => {
                info!("Interview environment ready ({} tracks)", stream.tracks().len());
                true
            }
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    pub fn cannot_start_reason(&self) -> Option<CannotStartReason> {
        cannot_start_reason(
            &self.permissions.state(),
            self.streams.current_stream().as_ref(),
        )
    }

    pub fn can_start(&self) -> bool {
        self.cannot_start_reason().is_none()
    }

    /// Fetches the question for a posting, falling back to a generic one.
    pub async fn load_question(
        &self,
        posting_organ: &str,
        posting_part: &str,
    ) -> Result<String, TakeError> {
        let (organ, part) = (posting_organ.trim(), posting_part.trim());
        if organ.is_empty() || part.is_empty() {
            return Err(TakeError::MissingPosting);
        }

        let request = QuestionRequest {
            posting_organ: organ.to_string(),
            posting_part: part.to_string(),
        };
        let question = match self.api.fetch_question(&request).await {
            Ok(q) if !q.trim().is_empty() => q.trim().to_string(),
            Ok(_) => self.fallback_question("The service returned an empty question."),
            Err(e) => {
                warn!("Question fetch failed: {}", e);
                self.fallback_question("The question could not be loaded.")
            }
        };

        if let Ok(mut slot) = self.question.lock() {
            *slot = question.clone();
        }
        Ok(question)
    }

    fn fallback_question(&self, reason: &str) -> String {
        self.notifier.notify(Notification::warning(
            "Using the default question",
            reason,
        ));
        DEFAULT_INTERVIEW_QUESTION.to_string()
    }

    pub fn start_mic_test(&self) {
        if let Some(stream) = self.streams.current_stream() {
            self.meter.start(&stream);
        }
    }

    pub fn stop_mic_test(&self) {
        self.meter.stop();
    }

    /// Starts recording. Once the time limit is reached the take is finished
    /// and submitted exactly as a manual stop would.
    pub fn start_take(self: &Arc<Self>) -> Result<(), TakeError> {
        if let Some(reason) = self.cannot_start_reason() {
            return Err(TakeError::NotReady(reason));
        }
        let stream = self
            .streams
            .current_stream()
            .ok_or(TakeError::NotReady(CannotStartReason::NoStream))?;

        match self.recorder.state() {
            RecordingState::Recording => {
                return Err(RecordingError::NotIdle(RecordingState::Recording).into())
            }
            RecordingState::Stopped => self.recorder.reset(),
            RecordingState::Idle => {}
        }
        self.recorder.start(&stream)?;
        self.meter.stop();
        self.analysis.reset_analysis();

        let limit = self.config.interview_time_limit_secs;
        let mut elapsed = self.recorder.subscribe_elapsed();
        let this = Arc::clone(self);
        let watcher = tokio::spawn(async move {
            while elapsed.changed().await.is_ok() {
                if *elapsed.borrow() >= limit {
                    info!("Interview time limit of {} s reached", limit);
                    this.notifier.notify(Notification::warning(
                        "Time is up",
                        "The recording was stopped and submitted automatically.",
                    ));
                    if let Err(e) = this.finish(false).await {
                        warn!("Automatic stop failed: {}", e);
                    }
                    return;
                }
            }
        });
        if let Ok(mut slot) = self.auto_stop.lock() {
            if let Some(previous) = slot.replace(watcher) {
                previous.abort();
            }
        }
        Ok(())
    }

    /// Manual stop: finishes the take and submits it for analysis.
    pub async fn finish_take(&self) -> Result<SubmittedTake, TakeError> {
        self.finish(true).await
    }

    async fn finish(&self, cancel_watcher: bool) -> Result<SubmittedTake, TakeError> {
        let watcher = self.auto_stop.lock().ok().and_then(|mut w| w.take());
        if let (true, Some(watcher)) = (cancel_watcher, watcher) {
            watcher.abort();
        }

        let video = self.recorder.stop().await.ok_or(TakeError::NotRecording)?;
        Ok(self.submit_take(video))
    }

    /// Keeps a local copy of `video` and starts analysis with the current question.
    pub fn submit_take(&self, video: VideoBlob) -> SubmittedTake {
        let playback_url = self.videos.save_locally(&video);
        if let Ok(mut slot) = self.active_take.lock() {
            *slot = Some(video.clone());
        }

        let mut question = self.question();
        if question.trim().is_empty() {
            question = DEFAULT_INTERVIEW_QUESTION.to_string();
        }
        let analysis = self.analysis.start_analysis(video.clone(), question);

        SubmittedTake {
            video,
            playback_url,
            analysis,
        }
    }

    /// Validates a user-picked replacement file before it becomes the active take.
    pub fn accept_uploaded_file(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<VideoBlob, TakeError> {
        let size = bytes.len() as u64;
        let rejection = if mime_type.trim() != ACCEPTED_UPLOAD_MIME {
            Some(TakeError::UnsupportedFileType(mime_type.to_string()))
        } else if size > self.config.max_upload_bytes {
            Some(TakeError::FileTooLarge {
                size,
                limit: self.config.max_upload_bytes,
            })
        } else if size == 0 {
            Some(TakeError::EmptyFile)
        } else {
            None
        };

        if let Some(err) = rejection {
            self.notifier
                .notify(Notification::error("Video file rejected", err.to_string()));
            return Err(err);
        }

        let video = VideoBlob::new(bytes, ACCEPTED_UPLOAD_MIME);
        self.videos.save_locally(&video);
        if let Ok(mut slot) = self.active_take.lock() {
            *slot = Some(video.clone());
        }
        info!("Uploaded file accepted as the active take ({} bytes)", size);
        Ok(video)
    }

    /// Discards the current take, its backups and analysis, ready to record again.
    pub fn retake(&self) {
        if let Some(watcher) = self.auto_stop.lock().ok().and_then(|mut w| w.take()) {
            watcher.abort();
        }
        self.recorder.reset();
        self.analysis.reset_analysis();
        self.videos.clear();
        if let Ok(mut slot) = self.active_take.lock() {
            *slot = None;
        }
    }

    /// Leaving the interview page: stop every tap and release the devices.
    pub fn shutdown(&self) {
        if let Some(watcher) = self.auto_stop.lock().ok().and_then(|mut w| w.take()) {
            watcher.abort();
        }
        self.meter.stop();
        self.recorder.reset();
        self.streams.unbind_preview();
        self.streams.release();
    }
}
