// Native microphone backend for desktop builds. Each audio track owns one
// cpal capture; analysers tap the capture of the stream they are given.

use super::{
    AudioAnalyser, AudioAnalyserFactory, DeviceInfo, DeviceKind, MediaError, MediaStream,
    MediaTrack, TrackKind, TrackState,
};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use uuid::Uuid;

const MAX_BUFFERED_SAMPLES: usize = 4096;
const LOOPBACK_MARKERS: [&str; 5] = ["stereo mix", "what u hear", "wave out", "loopback", "monitor"];

type SampleRing = Arc<Mutex<VecDeque<u8>>>;
type CaptureRegistry = Arc<Mutex<HashMap<String, SampleRing>>>;

/// Lists capture devices, skipping loopback inputs that would meter system audio.
pub fn list_input_devices() -> Result<Vec<DeviceInfo>, MediaError> {
    let host = cpal::default_host();
    let devices = input_devices(&host)?
        .into_iter()
        .filter(|(name, _)| !is_loopback(name))
        .map(|(name, _)| DeviceInfo {
            id: name.clone(),
            label: name,
            kind: DeviceKind::AudioInput,
        })
        .collect();
    Ok(devices)
}

/// Opens microphone tracks and serves analysers over them.
///
/// Captures are registered by track; `create` never opens a device of its own.
#[derive(Clone, Default)]
pub struct NativeMicrophone {
    captures: CaptureRegistry,
}

impl NativeMicrophone {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts capturing from `device_id` (a device name from
    /// [`list_input_devices`]) or the default microphone.
    pub async fn open_track(&self, device_id: Option<&str>) -> Result<Arc<NativeMicTrack>, MediaError> {
        let ring: SampleRing = Arc::new(Mutex::new(VecDeque::with_capacity(MAX_BUFFERED_SAMPLES)));
        let (ready_tx, ready_rx) = oneshot::channel::<Result<String, MediaError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        // cpal streams are not Send on every host; each capture lives on its own thread.
        let buffer = ring.clone();
        let preferred = device_id.map(|id| id.trim().to_string()).filter(|id| !id.is_empty());
        thread::spawn(move || match open_input(preferred.as_deref(), buffer) {
            Ok((stream, label)) => {
                let _ = ready_tx.send(Ok(label));
                let _ = stop_rx.recv();
                drop(stream);
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        });

        let label = ready_rx
            .await
            .map_err(|_| MediaError::new("AbortError", "audio thread exited"))??;
        Ok(self.register(label, ring, Some(stop_tx)))
    }

    fn register(&self, label: String, ring: SampleRing, stop: Option<mpsc::Sender<()>>) -> Arc<NativeMicTrack> {
        let id = Uuid::new_v4().to_string();
        if let Ok(mut captures) = self.captures.lock() {
            captures.insert(id.clone(), ring);
        }
        Arc::new(NativeMicTrack {
            id,
            label,
            captures: self.captures.clone(),
            stop: Mutex::new(stop),
            live: AtomicBool::new(true),
        })
    }

    fn capture_for(&self, stream: &MediaStream) -> Result<SampleRing, MediaError> {
        let track = stream
            .audio_tracks()
            .find(|t| t.ready_state() == TrackState::Live)
            .ok_or_else(|| MediaError::new("NotFoundError", "stream has no live audio track"))?;
        let id = track
            .source_id()
            .ok_or_else(|| MediaError::new("NotFoundError", "audio track is not a native capture"))?;
        self.captures
            .lock()
            .ok()
            .and_then(|captures| captures.get(&id).cloned())
            .ok_or_else(|| MediaError::new("InvalidStateError", format!("capture {id} is closed")))
    }
}

impl AudioAnalyserFactory for NativeMicrophone {
    fn create(
        &self,
        stream: &MediaStream,
        fft_size: usize,
        _smoothing: f32,
    ) -> Result<Box<dyn AudioAnalyser>, MediaError> {
        let samples = self.capture_for(stream)?;
        Ok(Box::new(RingAnalyser {
            fft_size,
            samples: Some(samples),
        }))
    }
}

/// Audio track backed by a running cpal capture.
pub struct NativeMicTrack {
    id: String,
    label: String,
    captures: CaptureRegistry,
    stop: Mutex<Option<mpsc::Sender<()>>>,
    live: AtomicBool,
}

impl fmt::Debug for NativeMicTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeMicTrack")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("live", &self.live.load(Ordering::SeqCst))
            .finish()
    }
}

impl MediaTrack for NativeMicTrack {
    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn ready_state(&self) -> TrackState {
        if self.live.load(Ordering::SeqCst) {
            TrackState::Live
        } else {
            TrackState::Ended
        }
    }

    fn stop(&self) {
        if !self.live.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(stop) = self.stop.lock().ok().and_then(|mut s| s.take()) {
            let _ = stop.send(());
        }
        if let Ok(mut captures) = self.captures.lock() {
            captures.remove(&self.id);
        }
        info!("Microphone capture {} stopped", self.label);
    }

    fn source_id(&self) -> Option<String> {
        Some(self.id.clone())
    }
}

impl Drop for NativeMicTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Reads the newest window of a capture. Closing detaches from the capture
/// without stopping it; the track stays live for the recorder.
struct RingAnalyser {
    fft_size: usize,
    samples: Option<SampleRing>,
}

impl AudioAnalyser for RingAnalyser {
    fn fft_size(&self) -> usize {
        self.fft_size
    }

    fn byte_time_domain_data(&mut self, buf: &mut [u8]) {
        buf.fill(128);
        let Some(Ok(guard)) = self.samples.as_ref().map(|s| s.lock()) else {
            return;
        };
        let skip = guard.len().saturating_sub(buf.len());
        for (slot, sample) in buf.iter_mut().zip(guard.iter().skip(skip)) {
            *slot = *sample;
        }
    }

    fn close(&mut self) {
        self.samples = None;
    }
}

fn input_devices(host: &cpal::Host) -> Result<Vec<(String, cpal::Device)>, MediaError> {
    let devices = host
        .input_devices()
        .map_err(|e| MediaError::new("NotFoundError", e.to_string()))?;
    Ok(devices.map(|device| (input_name(&device), device)).collect())
}

fn open_input(preferred: Option<&str>, buffer: SampleRing) -> Result<(cpal::Stream, String), MediaError> {
    let host = cpal::default_host();
    let mut inputs = input_devices(&host)?;
    let default_name = host.default_input_device().map(|d| input_name(&d));
    let names: Vec<&str> = inputs.iter().map(|(name, _)| name.as_str()).collect();
    let index = choose_input(&names, preferred, default_name.as_deref())
        .ok_or_else(|| MediaError::new("NotFoundError", "No input device available"))?;
    let (label, device) = inputs.swap_remove(index);
    info!("Opening microphone capture on {}", label);

    let config = device
        .default_input_config()
        .map_err(|e| MediaError::new("NotReadableError", e.to_string()))?;
    let on_error = |err| error!("Microphone capture error: {}", err);

    let stream = match config.sample_format() {
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config.into(),
            move |data: &[i16], _: &_| {
                push_samples(&buffer, data.iter().map(|&s| s as f32 / i16::MAX as f32))
            },
            on_error,
            None,
        ),
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config.into(),
            move |data: &[f32], _: &_| push_samples(&buffer, data.iter().copied()),
            on_error,
            None,
        ),
        other => {
            return Err(MediaError::unsupported(format!(
                "Unsupported sample format {:?}",
                other
            )))
        }
    }
    .map_err(|e| MediaError::new("NotReadableError", e.to_string()))?;

    stream
        .play()
        .map_err(|e| MediaError::new("NotReadableError", e.to_string()))?;
    Ok((stream, label))
}

/// Exact name match first, then the host default, then any real microphone.
/// Loopback inputs are never chosen.
fn choose_input(names: &[&str], preferred: Option<&str>, default: Option<&str>) -> Option<usize> {
    let usable = |name: &str| !is_loopback(name);
    let position = |wanted: &str| names.iter().position(|n| *n == wanted && usable(*n));

    if let Some(wanted) = preferred {
        match position(wanted) {
            Some(index) => return Some(index),
            None => warn!("Microphone '{}' unavailable, using another input", wanted),
        }
    }
    default
        .and_then(position)
        .or_else(|| names.iter().position(|n| usable(*n)))
}

fn input_name(device: &cpal::Device) -> String {
    match device.description() {
        Ok(description) => description.name().to_string(),
        Err(_) => device.name().unwrap_or_else(|_| "Unknown input".to_string()),
    }
}

fn is_loopback(name: &str) -> bool {
    let lower = name.to_lowercase();
    LOOPBACK_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Stores samples the way an analyser node reports them: 128 is silence.
fn push_samples(buffer: &Mutex<VecDeque<u8>>, input: impl Iterator<Item = f32>) {
    let Ok(mut guard) = buffer.lock() else {
        return;
    };
    guard.extend(input.map(to_byte_sample));
    let excess = guard.len().saturating_sub(MAX_BUFFERED_SAMPLES);
    guard.drain(..excess);
}

fn to_byte_sample(sample: f32) -> u8 {
    (sample.clamp(-1.0, 1.0) * 128.0 + 128.0).clamp(0.0, 255.0) as u8
}
