use super::{MediaError, MediaStream, RecorderBackend, RecorderEvent, RecorderHandle, VideoBlob};
use crate::notify::{Notification, Notifier};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// H.264/AAC MP4 first: the analysis service and most players handle it best.
pub const MIME_PREFERENCES: [&str; 7] = [
    "video/mp4;codecs=avc1,mp4a.40.2",
    "video/mp4;codecs=h264,aac",
    "video/mp4;codecs=avc1",
    "video/mp4",
    "video/webm;codecs=h264,opus",
    "video/webm;codecs=vp8,opus",
    "video/webm",
];

pub const FALLBACK_MIME_TYPE: &str = "video/mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
    Stopped,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RecordingError {
    #[error("Stream has no audio track")]
    NoAudioTrack,

    #[error("Recorder is not idle (state: {0:?})")]
    NotIdle(RecordingState),

    #[error("Recorder failed to start: {0}")]
    Backend(#[from] MediaError),
}

struct ActiveRecording {
    handle: Box<dyn RecorderHandle>,
    mime_type: String,
    collector: JoinHandle<Vec<Vec<u8>>>,
    ticker: JoinHandle<()>,
}

/// One take at a time. `reset` returns a stopped controller to `Idle`.
pub struct RecordingController {
    backend: Arc<dyn RecorderBackend>,
    notifier: Arc<dyn Notifier>,
    state: watch::Sender<RecordingState>,
    elapsed: Arc<watch::Sender<u32>>,
    active: Mutex<Option<ActiveRecording>>,
}

impl RecordingController {
    pub fn new(backend: Arc<dyn RecorderBackend>, notifier: Arc<dyn Notifier>) -> Self {
        let (state, _) = watch::channel(RecordingState::Idle);
        let (elapsed, _) = watch::channel(0);
        Self {
            backend,
            notifier,
            state,
            elapsed: Arc::new(elapsed),
            active: Mutex::new(None),
        }
    }

    pub fn state(&self) -> RecordingState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RecordingState> {
        self.state.subscribe()
    }

    /// Elapsed whole seconds of the current take.
    pub fn elapsed_secs(&self) -> u32 {
        *self.elapsed.borrow()
    }

    pub fn subscribe_elapsed(&self) -> watch::Receiver<u32> {
        self.elapsed.subscribe()
    }

    /// First supported entry of [`MIME_PREFERENCES`], or empty for the platform default.
    pub fn get_supported_mime_type(&self) -> String {
        let found = MIME_PREFERENCES
            .iter()
            .find(|mime| self.backend.is_type_supported(mime));
        debug!("Recorder mime negotiation: {:?}", found);
        found.map(|m| m.to_string()).unwrap_or_default()
    }

    pub fn start(&self, stream: &MediaStream) -> Result<(), RecordingError> {
        let current = self.state();
        if current != RecordingState::Idle {
            return Err(RecordingError::NotIdle(current));
        }

        if stream.audio_tracks().next().is_none() {
            warn!("Refusing to record: no audio track");
            self.notifier.notify(Notification::error(
                "Recording failed",
                "No microphone track is available. Check the microphone and try again.",
            ));
            return Err(RecordingError::NoAudioTrack);
        }

        let preferred = self.get_supported_mime_type();
        let requested = (!preferred.is_empty()).then_some(preferred.as_str());
        let (handle, events) = match self.backend.start(stream, requested) {
            Ok(started) => started,
            Err(e) => {
                warn!("Recorder construction failed: {}", e);
                self.notifier.notify(Notification::error(
                    "Recording failed",
                    "The recorder could not be started on this device.",
                ));
                return Err(e.into());
            }
        };

        let mime_type = requested
            .map(str::to_string)
            .or_else(|| handle.mime_type())
            .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string());

        self.elapsed.send_replace(0);
        let active = ActiveRecording {
            handle,
            mime_type: mime_type.clone(),
            collector: tokio::spawn(collect_chunks(events)),
            ticker: tokio::spawn(tick_elapsed(self.elapsed.clone())),
        };
        if let Ok(mut guard) = self.active.lock() {
            *guard = Some(active);
        }
        self.state.send_replace(RecordingState::Recording);
        info!("Recording started ({})", mime_type);
        Ok(())
    }

    /// Resolves with the recorded take, or `None` when nothing was recording.
    pub async fn stop(&self) -> Option<VideoBlob> {
        let active = self.active.lock().ok().and_then(|mut g| g.take())?;

        // The timer stops with the button, before the recorder flushes.
        active.ticker.abort();
        self.state.send_replace(RecordingState::Stopped);
        active.handle.stop();

        match active.collector.await {
            Ok(chunks) => {
                let blob = VideoBlob::from_chunks(&chunks, active.mime_type);
                info!(
                    "Recording stopped: {} chunks, {} bytes, {} s",
                    chunks.len(),
                    blob.size(),
                    self.elapsed_secs()
                );
                Some(blob)
            }
            Err(e) => {
                warn!("Recorder collector failed: {}", e);
                None
            }
        }
    }

    /// Prepares for the next take.
    pub fn reset(&self) {
        if let Some(active) = self.active.lock().ok().and_then(|mut g| g.take()) {
            active.ticker.abort();
            active.collector.abort();
            active.handle.stop();
        }
        self.elapsed.send_replace(0);
        self.state.send_replace(RecordingState::Idle);
    }
}

impl Drop for RecordingController {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.active.lock() {
            if let Some(active) = guard.take() {
                active.ticker.abort();
                active.collector.abort();
                active.handle.stop();
            }
        }
    }
}

async fn collect_chunks(mut events: mpsc::UnboundedReceiver<RecorderEvent>) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    while let Some(event) = events.recv().await {
        match event {
            RecorderEvent::Data(chunk) if chunk.is_empty() => {}
            RecorderEvent::Data(chunk) => chunks.push(chunk),
            RecorderEvent::Stopped => break,
        }
    }
    chunks
}

async fn tick_elapsed(elapsed: Arc<watch::Sender<u32>>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.tick().await;
    loop {
        ticker.tick().await;
        elapsed.send_modify(|secs| *secs += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{stream_with, FakeRecorderBackend, RecordingNotifier};

    fn controller(backend: Arc<FakeRecorderBackend>) -> (RecordingController, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        (RecordingController::new(backend, notifier.clone()), notifier)
    }

    #[test]
    fn prefers_mp4_then_webm() {
        let (rec, _) = controller(Arc::new(FakeRecorderBackend::supporting(&[
            "video/webm",
            "video/webm;codecs=vp8,opus",
        ])));
        assert_eq!(rec.get_supported_mime_type(), "video/webm;codecs=vp8,opus");

        let (rec, _) = controller(Arc::new(FakeRecorderBackend::supporting(&[
            "video/mp4",
            "video/mp4;codecs=avc1",
        ])));
        assert_eq!(rec.get_supported_mime_type(), "video/mp4;codecs=avc1");

        let (rec, _) = controller(Arc::new(FakeRecorderBackend::supporting(&[])));
        assert_eq!(rec.get_supported_mime_type(), "");
    }

    #[tokio::test]
    async fn refuses_stream_without_audio() {
        let backend = Arc::new(FakeRecorderBackend::supporting(&["video/mp4"]));
        let (rec, notifier) = controller(backend.clone());

        let err = rec.start(&stream_with(true, false)).unwrap_err();

        assert!(matches!(err, RecordingError::NoAudioTrack));
        assert_eq!(rec.state(), RecordingState::Idle);
        assert!(backend.started_with.lock().unwrap().is_empty());
        assert_eq!(notifier.titles(), vec!["Recording failed"]);
    }

    #[tokio::test]
    async fn backend_failure_leaves_idle() {
        let (rec, notifier) = controller(Arc::new(FakeRecorderBackend::failing()));

        assert!(matches!(
            rec.start(&stream_with(true, true)),
            Err(RecordingError::Backend(_))
        ));
        assert_eq!(rec.state(), RecordingState::Idle);
        assert_eq!(notifier.titles().len(), 1);
        assert!(rec.stop().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn collects_chunks_and_counts_seconds() {
        let backend = Arc::new(FakeRecorderBackend::supporting(&["video/mp4"]));
        let (rec, _) = controller(backend.clone());
        let stream = stream_with(true, true);

        rec.start(&stream).unwrap();
        assert_eq!(rec.state(), RecordingState::Recording);
        backend.emit_chunk(b"head-");
        backend.emit_chunk(b"");
        backend.emit_chunk(b"body-");
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(rec.elapsed_secs(), 3);

        let blob = rec.stop().await.unwrap();

        assert_eq!(blob.bytes(), b"head-body-tail");
        assert_eq!(blob.mime_type(), "video/mp4");
        assert_eq!(rec.state(), RecordingState::Stopped);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(rec.elapsed_secs(), 3, "timer must not tick after stop");
        assert!(stream.is_live(), "recorder must never stop the stream");
    }

    #[tokio::test]
    async fn unsupported_preferences_fall_back_to_mp4() {
        let backend = Arc::new(FakeRecorderBackend::supporting(&[]));
        let (rec, _) = controller(backend.clone());

        rec.start(&stream_with(true, true)).unwrap();
        let blob = rec.stop().await.unwrap();

        assert_eq!(*backend.started_with.lock().unwrap(), vec![None]);
        assert_eq!(blob.mime_type(), FALLBACK_MIME_TYPE);
    }

    #[tokio::test]
    async fn stop_without_recording_is_none() {
        let (rec, _) = controller(Arc::new(FakeRecorderBackend::supporting(&["video/webm"])));
        assert!(rec.stop().await.is_none());
    }

    #[tokio::test]
    async fn second_take_requires_reset() {
        let (rec, _) = controller(Arc::new(FakeRecorderBackend::supporting(&["video/webm"])));
        let stream = stream_with(true, true);

        rec.start(&stream).unwrap();
        rec.stop().await.unwrap();
        assert!(matches!(
            rec.start(&stream),
            Err(RecordingError::NotIdle(RecordingState::Stopped))
        ));

        rec.reset();
        assert_eq!(rec.elapsed_secs(), 0);
        rec.start(&stream).unwrap();
    }
}
