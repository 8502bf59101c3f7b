// In-memory stand-ins for platform capture and the remote service.

use crate::analysis::types::{AudioAnalysisResult, VideoAnalysisResult};
use crate::api::{ApiError, InterviewApi, QuestionRequest, UploadResponse};
use crate::media::{
    AudioAnalyser, AudioAnalyserFactory, DeviceInfo, DeviceKind, MediaDevices, MediaError,
    MediaStream, MediaTrack, PermissionKind, PermissionProbe, PermissionStatus, PreviewSurface,
    RecorderBackend, RecorderEvent, RecorderHandle, StreamConstraints, TrackKind, TrackState,
    VideoBlob,
};
use crate::notify::{Notification, Notifier};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug)]
pub struct FakeTrack {
    kind: TrackKind,
    label: String,
    ended: AtomicBool,
}

impl FakeTrack {
    pub fn new(kind: TrackKind, label: &str) -> Arc<Self> {
        Arc::new(Self {
            kind,
            label: label.to_string(),
            ended: AtomicBool::new(false),
        })
    }
}

impl MediaTrack for FakeTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn ready_state(&self) -> TrackState {
        if self.ended.load(Ordering::SeqCst) {
            TrackState::Ended
        } else {
            TrackState::Live
        }
    }

    fn stop(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }
}

pub fn stream_with(video: bool, audio: bool) -> MediaStream {
    let mut tracks: Vec<Arc<dyn MediaTrack>> = Vec::new();
    if video {
        tracks.push(FakeTrack::new(TrackKind::Video, "FaceTime HD Camera"));
    }
    if audio {
        tracks.push(FakeTrack::new(TrackKind::Audio, "Built-in Microphone"));
    }
    MediaStream::new(tracks)
}

enum Outcome {
    Success { video: bool, audio: bool },
    Failure(MediaError),
}

#[derive(Default)]
pub struct FakeMediaDevices {
    devices: Mutex<Vec<DeviceInfo>>,
    outcomes: Mutex<VecDeque<Outcome>>,
    requests: Mutex<Vec<StreamConstraints>>,
    issued: Mutex<Vec<MediaStream>>,
    enumerate_error: Mutex<Option<MediaError>>,
}

impl FakeMediaDevices {
    pub fn with_default_devices() -> Self {
        let fake = Self::default();
        fake.set_devices(vec![
            device("cam-1", "FaceTime HD Camera", DeviceKind::VideoInput),
            device("cam-2", "USB Camera", DeviceKind::VideoInput),
            device("mic-1", "Built-in Microphone", DeviceKind::AudioInput),
            device("mic-2", "USB Headset", DeviceKind::AudioInput),
            device("spk-1", "Speakers", DeviceKind::AudioOutput),
        ]);
        fake
    }

    pub fn set_devices(&self, devices: Vec<DeviceInfo>) {
        *self.devices.lock().unwrap() = devices;
    }

    pub fn fail_enumeration(&self, name: &str) {
        *self.enumerate_error.lock().unwrap() = Some(MediaError::new(name, "enumeration failed"));
    }

    pub fn push_failure(&self, name: &str) {
        self.outcomes
            .lock()
            .unwrap()
            .push_back(Outcome::Failure(MediaError::new(name, "getUserMedia rejected")));
    }

    pub fn push_success(&self, video: bool, audio: bool) {
        self.outcomes
            .lock()
            .unwrap()
            .push_back(Outcome::Success { video, audio });
    }

    pub fn requests(&self) -> Vec<StreamConstraints> {
        self.requests.lock().unwrap().clone()
    }

    pub fn issued(&self) -> Vec<MediaStream> {
        self.issued.lock().unwrap().clone()
    }

    pub fn live_stream_count(&self) -> usize {
        self.issued
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.is_live())
            .count()
    }
}

pub fn device(id: &str, label: &str, kind: DeviceKind) -> DeviceInfo {
    DeviceInfo {
        id: id.to_string(),
        label: label.to_string(),
        kind,
    }
}

#[async_trait]
impl MediaDevices for FakeMediaDevices {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, MediaError> {
        if let Some(err) = self.enumerate_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn get_user_media(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<MediaStream, MediaError> {
        self.requests.lock().unwrap().push(constraints.clone());
        let outcome = self.outcomes.lock().unwrap().pop_front();
        let (video, audio) = match outcome {
            Some(Outcome::Failure(err)) => return Err(err),
            Some(Outcome::Success { video, audio }) => (video, audio),
            None => (constraints.video.is_some(), constraints.audio.is_some()),
        };
        let stream = stream_with(video, audio);
        self.issued.lock().unwrap().push(stream.clone());
        Ok(stream)
    }
}

pub struct FakePermissionProbe {
    camera: PermissionStatus,
    microphone: PermissionStatus,
    fail: bool,
    queries: AtomicUsize,
}

impl FakePermissionProbe {
    pub fn new(camera: PermissionStatus, microphone: PermissionStatus) -> Self {
        Self {
            camera,
            microphone,
            fail: false,
            queries: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(PermissionStatus::Prompt, PermissionStatus::Prompt)
        }
    }

    /// Number of full camera+microphone queries.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst) / 2
    }
}

#[async_trait]
impl PermissionProbe for FakePermissionProbe {
    async fn query(&self, kind: PermissionKind) -> Result<PermissionStatus, MediaError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MediaError::new("TypeError", "camera is not a valid permission name"));
        }
        Ok(match kind {
            PermissionKind::Camera => self.camera,
            PermissionKind::Microphone => self.microphone,
        })
    }
}

pub struct FakeAnalyser {
    fft_size: usize,
    pattern: Vec<u8>,
    closed: Arc<AtomicBool>,
}

impl AudioAnalyser for FakeAnalyser {
    fn fft_size(&self) -> usize {
        self.fft_size
    }

    fn byte_time_domain_data(&mut self, buf: &mut [u8]) {
        for (i, sample) in buf.iter_mut().enumerate() {
            *sample = self.pattern[i % self.pattern.len()];
        }
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct FakeAnalyserFactory {
    pattern: Vec<u8>,
    fail: bool,
    pub created: Mutex<Vec<(usize, f32)>>,
    pub closed: Arc<AtomicBool>,
}

impl FakeAnalyserFactory {
    pub fn new(pattern: Vec<u8>) -> Self {
        Self {
            pattern,
            fail: false,
            created: Mutex::new(Vec::new()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(vec![128])
        }
    }
}

impl AudioAnalyserFactory for FakeAnalyserFactory {
    fn create(
        &self,
        _stream: &MediaStream,
        fft_size: usize,
        smoothing: f32,
    ) -> Result<Box<dyn AudioAnalyser>, MediaError> {
        if self.fail {
            return Err(MediaError::new("InvalidStateError", "audio context unavailable"));
        }
        self.created.lock().unwrap().push((fft_size, smoothing));
        Ok(Box::new(FakeAnalyser {
            fft_size,
            pattern: self.pattern.clone(),
            closed: self.closed.clone(),
        }))
    }
}

type EventSender = Arc<Mutex<Option<mpsc::UnboundedSender<RecorderEvent>>>>;

struct FakeRecorderHandle {
    mime_type: Option<String>,
    sender: EventSender,
    tail: Vec<u8>,
}

impl RecorderHandle for FakeRecorderHandle {
    fn mime_type(&self) -> Option<String> {
        self.mime_type.clone()
    }

    fn stop(&self) {
        if let Some(sender) = self.sender.lock().unwrap().take() {
            if !self.tail.is_empty() {
                let _ = sender.send(RecorderEvent::Data(self.tail.clone()));
            }
            let _ = sender.send(RecorderEvent::Stopped);
        }
    }
}

pub struct FakeRecorderBackend {
    supported: Vec<String>,
    fail_start: bool,
    sender: EventSender,
    pub started_with: Mutex<Vec<Option<String>>>,
}

impl FakeRecorderBackend {
    pub fn supporting(types: &[&str]) -> Self {
        Self {
            supported: types.iter().map(|t| t.to_string()).collect(),
            fail_start: false,
            sender: Arc::new(Mutex::new(None)),
            started_with: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_start: true,
            ..Self::supporting(&["video/webm"])
        }
    }

    /// Simulates a `dataavailable` event on the active recorder.
    pub fn emit_chunk(&self, chunk: &[u8]) {
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            let _ = sender.send(RecorderEvent::Data(chunk.to_vec()));
        }
    }
}

impl RecorderBackend for FakeRecorderBackend {
    fn is_type_supported(&self, mime_type: &str) -> bool {
        self.supported.iter().any(|t| t == mime_type)
    }

    fn start(
        &self,
        _stream: &MediaStream,
        mime_type: Option<&str>,
    ) -> Result<(Box<dyn RecorderHandle>, mpsc::UnboundedReceiver<RecorderEvent>), MediaError>
    {
        if self.fail_start {
            return Err(MediaError::new("NotSupportedError", "recorder unavailable"));
        }
        self.started_with
            .lock()
            .unwrap()
            .push(mime_type.map(str::to_string));
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap() = Some(tx);
        let handle = FakeRecorderHandle {
            mime_type: mime_type.map(str::to_string),
            sender: self.sender.clone(),
            tail: b"tail".to_vec(),
        };
        Ok((Box::new(handle), rx))
    }
}

#[derive(Default)]
pub struct FakePreview {
    pub attached: Mutex<Vec<Uuid>>,
    pub detached: AtomicUsize,
}

impl PreviewSurface for FakePreview {
    fn attach(&self, stream: &MediaStream) {
        self.attached.lock().unwrap().push(stream.id());
    }

    fn detach(&self) {
        self.detached.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn titles(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.title.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.seen.lock().unwrap().push(notification);
    }
}

/// Scripted remote service. Each endpoint answers after its configured delay.
pub struct FakeApi {
    pub upload: Mutex<Result<UploadResponse, ApiError>>,
    pub video: Mutex<Result<VideoAnalysisResult, ApiError>>,
    pub audio: Mutex<Result<AudioAnalysisResult, ApiError>>,
    pub question: Mutex<Result<String, ApiError>>,
    pub video_delay: Duration,
    pub audio_delay: Duration,
    pub upload_calls: AtomicUsize,
    pub video_calls: AtomicUsize,
    pub audio_calls: AtomicUsize,
    pub seen_links: Mutex<Vec<String>>,
    pub seen_questions: Mutex<Vec<String>>,
    pub uploaded: Mutex<Vec<(String, u64)>>,
}

impl FakeApi {
    pub fn succeeding() -> Self {
        Self {
            upload: Mutex::new(Ok(UploadResponse {
                file_name: Some("uploads/interview-1.mp4".to_string()),
            })),
            video: Mutex::new(Ok(sample_video_result(42.0))),
            audio: Mutex::new(Ok(sample_audio_result(38.0))),
            question: Mutex::new(Ok("Tell us about a conflict you resolved.".to_string())),
            video_delay: Duration::from_millis(10),
            audio_delay: Duration::from_millis(20),
            upload_calls: AtomicUsize::new(0),
            video_calls: AtomicUsize::new(0),
            audio_calls: AtomicUsize::new(0),
            seen_links: Mutex::new(Vec::new()),
            seen_questions: Mutex::new(Vec::new()),
            uploaded: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delays(mut self, video: Duration, audio: Duration) -> Self {
        self.video_delay = video;
        self.audio_delay = audio;
        self
    }
}

fn clone_result<T: Clone>(slot: &Mutex<Result<T, ApiError>>) -> Result<T, ApiError> {
    match &*slot.lock().unwrap() {
        Ok(value) => Ok(value.clone()),
        Err(e) => Err(e.clone()),
    }
}

#[async_trait]
impl InterviewApi for FakeApi {
    async fn upload_video(&self, video: &VideoBlob) -> Result<UploadResponse, ApiError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        self.uploaded
            .lock()
            .unwrap()
            .push((video.mime_type().to_string(), video.size()));
        clone_result(&self.upload)
    }

    async fn analyze_video(&self, link: &str) -> Result<VideoAnalysisResult, ApiError> {
        self.video_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_links.lock().unwrap().push(link.to_string());
        tokio::time::sleep(self.video_delay).await;
        clone_result(&self.video)
    }

    async fn analyze_voice(
        &self,
        link: &str,
        question: &str,
    ) -> Result<AudioAnalysisResult, ApiError> {
        self.audio_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_links.lock().unwrap().push(link.to_string());
        self.seen_questions.lock().unwrap().push(question.to_string());
        tokio::time::sleep(self.audio_delay).await;
        clone_result(&self.audio)
    }

    async fn fetch_question(&self, _request: &QuestionRequest) -> Result<String, ApiError> {
        clone_result(&self.question)
    }
}

pub fn sample_video_result(score: f64) -> VideoAnalysisResult {
    serde_json::from_value(serde_json::json!({
        "Posture": "Upright and steady",
        "FacialExpressions": "Calm, occasional smile",
        "Gestures": "Natural hand movement",
        "SentimentAnalysis": {
            "confidence_level": "80%",
            "emotional_stability": "75%",
            "sentiment_score": "0%",
            "stress_level": "unknown"
        },
        "DetailedFeedback": "Keep eye contact a little longer.",
        "Score": score
    }))
    .unwrap()
}

pub fn sample_audio_result(score: f64) -> AudioAnalysisResult {
    serde_json::from_value(serde_json::json!({
        "Clarity": "Clear pronunciation",
        "Logicality": "Well structured",
        "Expertise": "Good domain vocabulary",
        "FrequentlyUsedWords": ["actually", "project", "team", "so", "basically"],
        "Score": score.to_string()
    }))
    .unwrap()
}
