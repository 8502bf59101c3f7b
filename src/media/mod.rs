// Capture seams: the platform (browser bridge or native backend) implements
// these traits; the controllers in this module own the interview logic.

pub mod meter;
#[cfg(feature = "native-audio")]
pub mod native;
pub mod permissions;
pub mod recorder;
pub mod stream;

pub use meter::MicLevelMeter;
pub use permissions::{DevicePermissionManager, PermissionPatch, PermissionState, PermissionStatus};
pub use recorder::{RecordingController, RecordingError, RecordingState};
pub use stream::{MediaStreamController, StreamError, StreamFailure, StreamPhase};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    Live,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    VideoInput,
    AudioInput,
    AudioOutput,
}

/// One entry of a device enumeration. Some platforms return placeholder
/// entries with an empty `id` before permission is granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub label: String,
    pub kind: DeviceKind,
}

/// Platform failure, carrying the DOMException-style `name` used for classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{name}: {message}")]
pub struct MediaError {
    pub name: String,
    pub message: String,
}

impl MediaError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new("NotSupportedError", message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

pub const PREVIEW_RESOLUTION: Resolution = Resolution {
    width: 1280,
    height: 720,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoConstraints {
    pub exact_device_id: Option<String>,
    pub ideal_resolution: Option<Resolution>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioConstraints {
    pub exact_device_id: Option<String>,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub ideal_sample_rate: Option<u32>,
    pub ideal_channel_count: Option<u16>,
}

impl AudioConstraints {
    /// Voice-quality capture used when eliciting the permission prompt.
    pub fn voice() -> Self {
        Self {
            exact_device_id: None,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            ideal_sample_rate: Some(48_000),
            ideal_channel_count: Some(1),
        }
    }
}

/// `None` for a kind means that kind is not requested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamConstraints {
    pub video: Option<VideoConstraints>,
    pub audio: Option<AudioConstraints>,
}

impl StreamConstraints {
    /// `{ video: true, audio: true }`
    pub fn any() -> Self {
        Self {
            video: Some(VideoConstraints::default()),
            audio: Some(AudioConstraints::default()),
        }
    }
}

pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn kind(&self) -> TrackKind;

    fn label(&self) -> String;

    fn ready_state(&self) -> TrackState;

    /// Releases the underlying device. Idempotent.
    fn stop(&self);

    /// Capture feeding this track when the backend taps it in-process.
    fn source_id(&self) -> Option<String> {
        None
    }
}

/// Handle to a platform media stream. Clones share the same tracks.
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: Uuid,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaStream {
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tracks,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &Arc<dyn MediaTrack>> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &Arc<dyn MediaTrack>> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn has_live(&self, kind: TrackKind) -> bool {
        self.tracks
            .iter()
            .any(|t| t.kind() == kind && t.ready_state() == TrackState::Live)
    }

    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(|t| t.ready_state() == TrackState::Live)
    }

    pub(crate) fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

impl PartialEq for MediaStream {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// `navigator.mediaDevices`.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, MediaError>;

    async fn get_user_media(&self, constraints: &StreamConstraints)
        -> Result<MediaStream, MediaError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionKind {
    Camera,
    Microphone,
}

/// The Permissions API. Platforms without it simply have no probe.
#[async_trait]
pub trait PermissionProbe: Send + Sync {
    async fn query(&self, kind: PermissionKind) -> Result<PermissionStatus, MediaError>;
}

/// An analyser node tapped onto a stream's audio source.
pub trait AudioAnalyser: Send {
    fn fft_size(&self) -> usize;

    /// Fills `buf` with 128-centered unsigned time-domain samples.
    fn byte_time_domain_data(&mut self, buf: &mut [u8]);

    /// Disconnects the node and closes its audio context.
    fn close(&mut self);
}

pub trait AudioAnalyserFactory: Send + Sync {
    fn create(
        &self,
        stream: &MediaStream,
        fft_size: usize,
        smoothing: f32,
    ) -> Result<Box<dyn AudioAnalyser>, MediaError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    Data(Vec<u8>),
    Stopped,
}

pub trait RecorderHandle: Send + Sync {
    /// Mime type the platform actually records with, if it reports one.
    fn mime_type(&self) -> Option<String>;

    /// Requests a stop; the final data and `Stopped` arrive on the event channel.
    fn stop(&self);
}

/// `MediaRecorder`.
pub trait RecorderBackend: Send + Sync {
    fn is_type_supported(&self, mime_type: &str) -> bool;

    fn start(
        &self,
        stream: &MediaStream,
        mime_type: Option<&str>,
    ) -> Result<(Box<dyn RecorderHandle>, mpsc::UnboundedReceiver<RecorderEvent>), MediaError>;
}

/// The view's playback element. Signalled ready by the view once mounted.
pub trait PreviewSurface: Send + Sync {
    fn attach(&self, stream: &MediaStream);

    fn detach(&self);
}

/// Immutable recorded or uploaded video payload.
#[derive(Clone, PartialEq, Eq)]
pub struct VideoBlob {
    data: Arc<[u8]>,
    mime_type: String,
}

impl VideoBlob {
    pub fn new(data: impl Into<Arc<[u8]>>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn from_chunks(chunks: &[Vec<u8>], mime_type: impl Into<String>) -> Self {
        let data: Vec<u8> = chunks.concat();
        Self::new(data, mime_type)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for VideoBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoBlob")
            .field("size", &self.data.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}
