use super::{
    AudioConstraints, DeviceInfo, DeviceKind, DevicePermissionManager, MediaDevices, MediaError,
    MediaStream, PermissionPatch, PermissionStatus, PreviewSurface, StreamConstraints, TrackKind,
    VideoConstraints, PREVIEW_RESOLUTION,
};
use crate::notify::{Notification, Notifier};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    NoStream,
    Acquiring,
    Live,
    Released,
}

/// User-facing cause of a failed acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFailure {
    PermissionDenied,
    DeviceUnavailable,
    DeviceBusy,
    Unknown,
}

impl StreamFailure {
    pub fn classify(error: &MediaError) -> Self {
        match error.name.as_str() {
            "NotAllowedError" | "SecurityError" => Self::PermissionDenied,
            "NotFoundError" | "OverconstrainedError" => Self::DeviceUnavailable,
            "NotReadableError" => Self::DeviceBusy,
            _ => Self::Unknown,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::PermissionDenied => {
                "Camera and microphone access was denied. Allow access in the browser settings and try again."
            }
            Self::DeviceUnavailable => {
                "The selected camera or microphone could not be found. Pick another device."
            }
            Self::DeviceBusy => {
                "The camera or microphone is in use by another application. Close it or pick another device."
            }
            Self::Unknown => "The camera or microphone could not be started.",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    #[error("Failed to enumerate devices: {0}")]
    Enumerate(#[source] MediaError),

    #[error("Failed to acquire media stream ({failure:?}): {source}")]
    Acquire {
        failure: StreamFailure,
        #[source]
        source: MediaError,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSelection {
    pub video_devices: Vec<DeviceInfo>,
    pub audio_devices: Vec<DeviceInfo>,
    pub selected_video: Option<String>,
    pub selected_audio: Option<String>,
}

/// Sole owner of the live camera/microphone stream.
pub struct MediaStreamController {
    devices: Arc<dyn MediaDevices>,
    permissions: Arc<DevicePermissionManager>,
    notifier: Arc<dyn Notifier>,
    acquire_lock: tokio::sync::Mutex<()>,
    stream: watch::Sender<Option<MediaStream>>,
    phase: watch::Sender<StreamPhase>,
    selection: Mutex<DeviceSelection>,
    preview: Mutex<Option<Arc<dyn PreviewSurface>>>,
}

impl MediaStreamController {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        permissions: Arc<DevicePermissionManager>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (stream, _) = watch::channel(None);
        let (phase, _) = watch::channel(StreamPhase::NoStream);
        Self {
            devices,
            permissions,
            notifier,
            acquire_lock: tokio::sync::Mutex::new(()),
            stream,
            phase,
            selection: Mutex::new(DeviceSelection::default()),
            preview: Mutex::new(None),
        }
    }

    pub fn current_stream(&self) -> Option<MediaStream> {
        self.stream.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<MediaStream>> {
        self.stream.subscribe()
    }

    pub fn phase(&self) -> StreamPhase {
        *self.phase.borrow()
    }

    pub fn selection(&self) -> DeviceSelection {
        self.selection
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Re-enumerates input devices and reconciles the current selection.
    pub async fn refresh_devices(&self) -> Result<DeviceSelection, StreamError> {
        let all = self
            .devices
            .enumerate_devices()
            .await
            .map_err(StreamError::Enumerate)?;

        let usable = |kind: DeviceKind| -> Vec<DeviceInfo> {
            all.iter()
                .filter(|d| d.kind == kind && !d.id.is_empty())
                .cloned()
                .collect()
        };
        let video_devices = usable(DeviceKind::VideoInput);
        let audio_devices = usable(DeviceKind::AudioInput);

        let mut guard = self.selection.lock().unwrap_or_else(|e| e.into_inner());
        guard.selected_video = reconcile(guard.selected_video.take(), &video_devices);
        guard.selected_audio = reconcile(guard.selected_audio.take(), &audio_devices);
        guard.video_devices = video_devices;
        guard.audio_devices = audio_devices;
        debug!(
            "Devices refreshed: {} cameras, {} microphones",
            guard.video_devices.len(),
            guard.audio_devices.len()
        );
        Ok(guard.clone())
    }

    /// Acquires a stream for the given devices, falling back to the current
    /// selection for any id not supplied. Any previous stream is stopped first.
    pub async fn start_stream(
        &self,
        video_id: Option<&str>,
        audio_id: Option<&str>,
    ) -> Result<MediaStream, StreamError> {
        let _guard = self.acquire_lock.lock().await;

        let (video_id, audio_id) = {
            let mut selection = self.selection.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(id) = video_id {
                selection.selected_video = Some(id.to_string());
            }
            if let Some(id) = audio_id {
                selection.selected_audio = Some(id.to_string());
            }
            (
                selection.selected_video.clone(),
                selection.selected_audio.clone(),
            )
        };

        self.stop_current();
        self.phase.send_replace(StreamPhase::Acquiring);

        let mut last_error = None;
        for constraints in fallback_constraints(video_id.as_deref(), audio_id.as_deref()) {
            match self.devices.get_user_media(&constraints).await {
                Ok(stream) => {
                    self.install(stream.clone());
                    return Ok(stream);
                }
                Err(e) => {
                    warn!("getUserMedia attempt failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        let source =
            last_error.unwrap_or_else(|| MediaError::unsupported("no constraints to try"));
        let failure = StreamFailure::classify(&source);
        self.phase.send_replace(StreamPhase::NoStream);

        let mut notification = Notification::error("Camera/microphone error", failure.description());
        if failure == StreamFailure::PermissionDenied {
            self.permissions.set_permissions_directly(PermissionPatch {
                camera: Some(PermissionStatus::Denied),
                microphone: Some(PermissionStatus::Denied),
            });
            notification = notification.persistent();
        }
        self.notifier.notify(notification);

        Err(StreamError::Acquire { failure, source })
    }

    /// Switches the camera and re-acquires.
    pub async fn select_video_device(&self, id: &str) -> Result<MediaStream, StreamError> {
        self.start_stream(Some(id), None).await
    }

    /// Switches the microphone and re-acquires.
    pub async fn select_audio_device(&self, id: &str) -> Result<MediaStream, StreamError> {
        self.start_stream(None, Some(id)).await
    }

    /// "Reset permissions": tears everything down, forces the permission UI
    /// to reappear with a throwaway capture, then starts over.
    pub async fn restart_stream(&self) -> bool {
        self.release();

        match self.devices.get_user_media(&StreamConstraints::any()).await {
            Ok(probe) => probe.stop_all(),
            Err(e) => {
                warn!("Permission re-request failed: {}", e);
                self.notifier.notify(
                    Notification::error(
                        "Permission request failed",
                        "Allow camera and microphone access in the browser settings, then try again.",
                    )
                    .persistent(),
                );
                return false;
            }
        }

        if let Err(e) = self.refresh_devices().await {
            warn!("{}", e);
        }
        self.start_stream(None, None).await.is_ok()
    }

    /// The view calls this once its playback surface is mounted.
    pub fn bind_preview(&self, surface: Arc<dyn PreviewSurface>) {
        if let Some(stream) = self.current_stream() {
            surface.attach(&stream);
        }
        if let Ok(mut guard) = self.preview.lock() {
            *guard = Some(surface);
        }
    }

    pub fn unbind_preview(&self) {
        let surface = self.preview.lock().ok().and_then(|mut g| g.take());
        if let Some(surface) = surface {
            surface.detach();
        }
    }

    /// Stops all tracks. Terminal until the next `start_stream`.
    pub fn release(&self) {
        self.stop_current();
        self.phase.send_replace(StreamPhase::Released);
        info!("Media stream released");
    }

    fn stop_current(&self) {
        if let Some(old) = self.stream.send_replace(None) {
            old.stop_all();
            if let Some(surface) = self.preview_surface() {
                surface.detach();
            }
        }
    }

    fn install(&self, stream: MediaStream) {
        let has_video = stream.has_live(TrackKind::Video);
        let has_audio = stream.has_live(TrackKind::Audio);
        info!(
            "Media stream live: video={}, audio={}",
            has_video, has_audio
        );

        // An actual live track is stronger evidence than the Permissions API.
        let derived = |live: bool| {
            Some(if live {
                PermissionStatus::Granted
            } else {
                PermissionStatus::Denied
            })
        };
        self.permissions.set_permissions_directly(PermissionPatch {
            camera: derived(has_video),
            microphone: derived(has_audio),
        });

        if let Some(surface) = self.preview_surface() {
            surface.attach(&stream);
        }
        self.stream.send_replace(Some(stream));
        self.phase.send_replace(StreamPhase::Live);
    }

    fn preview_surface(&self) -> Option<Arc<dyn PreviewSurface>> {
        self.preview.lock().ok().and_then(|g| g.clone())
    }
}

impl Drop for MediaStreamController {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.borrow().as_ref() {
            stream.stop_all();
        }
    }
}

fn reconcile(selected: Option<String>, available: &[DeviceInfo]) -> Option<String> {
    match selected {
        Some(id) if available.iter().any(|d| d.id == id) => Some(id),
        _ => available.first().map(|d| d.id.clone()),
    }
}

/// Pinned video + pinned audio first; some drivers reject an exact audio id
/// right after a grant, so the second try leaves audio to the default.
fn fallback_constraints(video_id: Option<&str>, audio_id: Option<&str>) -> Vec<StreamConstraints> {
    let video = VideoConstraints {
        exact_device_id: video_id.map(str::to_string),
        ideal_resolution: Some(PREVIEW_RESOLUTION),
    };
    vec![
        StreamConstraints {
            video: Some(video.clone()),
            audio: Some(AudioConstraints {
                exact_device_id: audio_id.map(str::to_string),
                ..AudioConstraints::default()
            }),
        },
        StreamConstraints {
            video: Some(VideoConstraints {
                ideal_resolution: None,
                ..video
            }),
            audio: Some(AudioConstraints::default()),
        },
    ]
}
