use super::{AudioAnalyser, AudioAnalyserFactory, MediaStream, TrackKind};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const FFT_SIZE: usize = 128;
const SMOOTHING: f32 = 0.0;
const RMS_GAIN: f32 = 12.0;
const RMS_EXPONENT: f32 = 0.4;

/// Live microphone level in `0.0..=1.0`, polled from an analyser tap.
pub struct MicLevelMeter {
    factory: Arc<dyn AudioAnalyserFactory>,
    poll_interval: Duration,
    level: Arc<AtomicU32>,
    task: Mutex<Option<PollTask>>,
}

struct PollTask {
    handle: JoinHandle<()>,
    // Cleared by `stop`; a poll already inside the analyser must not publish afterwards.
    running: Arc<AtomicBool>,
}

impl MicLevelMeter {
    pub fn new(factory: Arc<dyn AudioAnalyserFactory>, poll_interval: Duration) -> Self {
        Self {
            factory,
            poll_interval,
            level: Arc::new(AtomicU32::new(0.0f32.to_bits())),
            task: Mutex::new(None),
        }
    }

    pub fn level(&self) -> f32 {
        f32::from_bits(self.level.load(Ordering::SeqCst))
    }

    pub fn level_handle(&self) -> Arc<AtomicU32> {
        self.level.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|g| g.as_ref().is_some_and(|t| !t.handle.is_finished()))
            .unwrap_or(false)
    }

    /// Never fails into the caller; without an audio track this only logs.
    pub fn start(&self, stream: &MediaStream) {
        self.stop();

        if stream.audio_tracks().next().is_none() {
            debug!("Mic meter not started: stream has no audio track");
            return;
        }

        let analyser = match self.factory.create(stream, FFT_SIZE, SMOOTHING) {
            Ok(analyser) => analyser,
            Err(e) => {
                warn!("Mic meter unavailable: {}", e);
                return;
            }
        };

        let level = self.level.clone();
        let interval = self.poll_interval;
        let running = Arc::new(AtomicBool::new(true));
        let still_running = running.clone();
        let handle = tokio::spawn(async move {
            let mut analyser = CloseOnDrop(analyser);
            let mut samples = vec![128u8; analyser.0.fft_size()];
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                analyser.0.byte_time_domain_data(&mut samples);
                level.store(compute_level(&samples).to_bits(), Ordering::SeqCst);
                if !still_running.load(Ordering::SeqCst) {
                    level.store(0.0f32.to_bits(), Ordering::SeqCst);
                    break;
                }
            }
        });

        if let Ok(mut guard) = self.task.lock() {
            *guard = Some(PollTask { handle, running });
        }
    }

    /// Idempotent; safe when never started.
    pub fn stop(&self) {
        if let Ok(mut guard) = self.task.lock() {
            if let Some(task) = guard.take() {
                task.running.store(false, Ordering::SeqCst);
                task.handle.abort();
            }
        }
        self.level.store(0.0f32.to_bits(), Ordering::SeqCst);
    }

    pub fn is_tracking(&self, stream: &MediaStream) -> bool {
        self.is_running() && stream.has_live(TrackKind::Audio)
    }
}

impl Drop for MicLevelMeter {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Closes the analyser when the poll task is aborted.
struct CloseOnDrop(Box<dyn AudioAnalyser>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// RMS of 128-centered samples, boosted so quiet speech still moves the meter.
pub fn compute_level(samples: &[u8]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples
        .iter()
        .map(|&s| {
            let v = (s as f32 - 128.0) / 128.0;
            v * v
        })
        .sum();
    let rms = (sum / samples.len() as f32).sqrt();
    (rms * RMS_GAIN).powf(RMS_EXPONENT).min(1.0)
}
