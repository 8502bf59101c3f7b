use super::{AudioConstraints, MediaDevices, PermissionKind, PermissionProbe, StreamConstraints, VideoConstraints};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    Granted,
    Denied,
    Prompt,
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionState {
    pub camera: PermissionStatus,
    pub microphone: PermissionStatus,
}

impl PermissionState {
    pub fn both(status: PermissionStatus) -> Self {
        Self {
            camera: status,
            microphone: status,
        }
    }

    pub fn is_fully_granted(&self) -> bool {
        self.camera == PermissionStatus::Granted && self.microphone == PermissionStatus::Granted
    }

    fn apply(&mut self, patch: PermissionPatch) {
        if let Some(camera) = patch.camera {
            self.camera = camera;
        }
        if let Some(microphone) = patch.microphone {
            self.microphone = microphone;
        }
    }
}

impl Default for PermissionState {
    fn default() -> Self {
        Self::both(PermissionStatus::Prompt)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PermissionPatch {
    pub camera: Option<PermissionStatus>,
    pub microphone: Option<PermissionStatus>,
}

/// Tracks camera and microphone permission. Recomputed per page load, never persisted.
pub struct DevicePermissionManager {
    devices: Arc<dyn MediaDevices>,
    probe: Option<Arc<dyn PermissionProbe>>,
    state: Arc<watch::Sender<PermissionState>>,
    settle_delay: Duration,
    settle_task: Mutex<Option<JoinHandle<()>>>,
}

impl DevicePermissionManager {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        probe: Option<Arc<dyn PermissionProbe>>,
        settle_delay: Duration,
    ) -> Self {
        let (state, _) = watch::channel(PermissionState::default());
        Self {
            devices,
            probe,
            state: Arc::new(state),
            settle_delay,
            settle_task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> PermissionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PermissionState> {
        self.state.subscribe()
    }

    /// Reads the platform's permission state without prompting.
    pub async fn query_permissions(&self) -> PermissionState {
        let observed = match &self.probe {
            Some(probe) => query_platform(probe.as_ref()).await,
            None => {
                debug!("Permissions API unavailable, reporting unsupported");
                PermissionState::both(PermissionStatus::Unsupported)
            }
        };
        self.state.send_replace(observed);
        observed
    }

    /// Opens a throwaway capture to elicit the permission prompt. Call from a user gesture.
    pub async fn request_permissions(&self) -> bool {
        let constraints = StreamConstraints {
            video: Some(VideoConstraints::default()),
            audio: Some(AudioConstraints::voice()),
        };

        match self.devices.get_user_media(&constraints).await {
            Ok(stream) => {
                stream.stop_all();
                self.state
                    .send_replace(PermissionState::both(PermissionStatus::Granted));
                info!("Permission request granted: camera=granted, microphone=granted");
                self.schedule_settle_check();
                true
            }
            Err(e) => {
                warn!("Media permission request failed: {}", e);
                self.state
                    .send_replace(PermissionState::both(PermissionStatus::Denied));
                false
            }
        }
    }

    /// Overrides permission state from a more reliable signal, e.g. the
    /// track composition of a stream that was actually acquired.
    pub fn set_permissions_directly(&self, patch: PermissionPatch) {
        self.state.send_modify(|state| state.apply(patch));
    }

    // Some platforms report stale values right after a grant; re-read once things settle.
    fn schedule_settle_check(&self) {
        let Some(probe) = self.probe.clone() else {
            return;
        };
        let state = self.state.clone();
        let delay = self.settle_delay;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let observed = query_platform(probe.as_ref()).await;
            state.send_modify(|current| {
                current.camera = settle_axis(current.camera, observed.camera);
                current.microphone = settle_axis(current.microphone, observed.microphone);
            });
            debug!("Permission state settled: {:?}", *state.borrow());
        });

        if let Ok(mut guard) = self.settle_task.lock() {
            if let Some(existing) = guard.take() {
                existing.abort();
            }
            *guard = Some(handle);
        }
    }
}

impl Drop for DevicePermissionManager {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.settle_task.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

async fn query_platform(probe: &dyn PermissionProbe) -> PermissionState {
    let camera = probe.query(PermissionKind::Camera).await;
    let microphone = probe.query(PermissionKind::Microphone).await;

    match (camera, microphone) {
        (Ok(camera), Ok(microphone)) => PermissionState { camera, microphone },
        (Err(e), _) | (_, Err(e)) => {
            warn!("Permission query failed, treating as unsupported: {}", e);
            PermissionState::both(PermissionStatus::Unsupported)
        }
    }
}

/// A fresh grant is only ever overturned by an explicit denial.
fn settle_axis(current: PermissionStatus, observed: PermissionStatus) -> PermissionStatus {
    match (current, observed) {
        (_, PermissionStatus::Unsupported) => current,
        (PermissionStatus::Granted, PermissionStatus::Denied) => PermissionStatus::Denied,
        (PermissionStatus::Granted, _) => PermissionStatus::Granted,
        (_, observed) => observed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeMediaDevices, FakePermissionProbe};

    fn manager(
        devices: Arc<FakeMediaDevices>,
        probe: Option<Arc<FakePermissionProbe>>,
    ) -> DevicePermissionManager {
        DevicePermissionManager::new(
            devices,
            probe.map(|p| p as Arc<dyn PermissionProbe>),
            Duration::from_millis(100),
        )
    }

    #[tokio::test]
    async fn query_without_probe_reports_unsupported() {
        let devices = Arc::new(FakeMediaDevices::with_default_devices());
        let manager = manager(devices.clone(), None);

        let state = manager.query_permissions().await;

        assert_eq!(state, PermissionState::both(PermissionStatus::Unsupported));
        assert!(devices.requests().is_empty(), "query must never prompt");
    }

    #[tokio::test]
    async fn query_maps_probe_values() {
        let devices = Arc::new(FakeMediaDevices::with_default_devices());
        let probe = Arc::new(FakePermissionProbe::new(
            PermissionStatus::Granted,
            PermissionStatus::Prompt,
        ));
        let manager = manager(devices, Some(probe));

        let state = manager.query_permissions().await;

        assert_eq!(state.camera, PermissionStatus::Granted);
        assert_eq!(state.microphone, PermissionStatus::Prompt);
    }

    #[tokio::test]
    async fn failing_probe_reports_unsupported() {
        let devices = Arc::new(FakeMediaDevices::with_default_devices());
        let probe = Arc::new(FakePermissionProbe::failing());
        let manager = manager(devices, Some(probe));

        let state = manager.query_permissions().await;

        assert_eq!(state, PermissionState::both(PermissionStatus::Unsupported));
    }

    #[tokio::test]
    async fn granted_request_releases_probe_stream() {
        let devices = Arc::new(FakeMediaDevices::with_default_devices());
        let manager = manager(devices.clone(), None);

        assert!(manager.request_permissions().await);
        assert_eq!(manager.state(), PermissionState::both(PermissionStatus::Granted));

        let requests = devices.requests();
        let audio = requests[0].audio.as_ref().unwrap();
        assert!(audio.echo_cancellation && audio.noise_suppression && audio.auto_gain_control);
        assert_eq!(audio.ideal_sample_rate, Some(48_000));
        assert_eq!(devices.live_stream_count(), 0);
    }

    #[tokio::test]
    async fn denied_request_marks_both_denied() {
        let devices = Arc::new(FakeMediaDevices::with_default_devices());
        devices.push_failure("NotAllowedError");
        let manager = manager(devices, None);

        assert!(!manager.request_permissions().await);
        assert_eq!(manager.state(), PermissionState::both(PermissionStatus::Denied));
    }

    #[tokio::test(start_paused = true)]
    async fn settle_check_keeps_grant_over_stale_prompt() {
        let devices = Arc::new(FakeMediaDevices::with_default_devices());
        let probe = Arc::new(FakePermissionProbe::new(
            PermissionStatus::Prompt,
            PermissionStatus::Prompt,
        ));
        let manager = manager(devices, Some(probe.clone()));

        assert!(manager.request_permissions().await);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(manager.state(), PermissionState::both(PermissionStatus::Granted));
        assert_eq!(probe.query_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn settle_check_applies_explicit_denial() {
        let devices = Arc::new(FakeMediaDevices::with_default_devices());
        let probe = Arc::new(FakePermissionProbe::new(
            PermissionStatus::Granted,
            PermissionStatus::Denied,
        ));
        let manager = manager(devices, Some(probe));

        assert!(manager.request_permissions().await);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(manager.state().camera, PermissionStatus::Granted);
        assert_eq!(manager.state().microphone, PermissionStatus::Denied);
    }

    #[tokio::test]
    async fn direct_patch_touches_only_given_axes() {
        let devices = Arc::new(FakeMediaDevices::with_default_devices());
        let manager = manager(devices, None);
        manager.query_permissions().await;

        manager.set_permissions_directly(PermissionPatch {
            camera: None,
            microphone: Some(PermissionStatus::Granted),
        });

        assert_eq!(manager.state().camera, PermissionStatus::Unsupported);
        assert_eq!(manager.state().microphone, PermissionStatus::Granted);
    }
}
