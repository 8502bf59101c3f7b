pub mod analysis;
pub mod api;
pub mod config;
pub mod interview;
pub mod logging;
pub mod media;
pub mod notify;
pub mod storage;

#[cfg(test)]
mod testing;

pub use analysis::{AnalysisOrchestrator, AnalysisSession, AnalysisStatus, AnalysisStore, ScoreReport};
pub use api::{ApiError, HttpInterviewApi, InterviewApi};
pub use config::AppConfig;
pub use interview::{CannotStartReason, InterviewSession, Platform, SubmittedTake, TakeError};
pub use notify::{LogNotifier, Notification, Notifier};
pub use storage::{FileStorage, MemoryStorage, SessionStorage};

use std::path::Path;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Storage(#[from] storage::StorageError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Wires an interview session against the real HTTP service.
///
/// With a `config_path` the JSON file is loaded (and created with defaults if
/// missing); otherwise configuration comes from the environment.
pub fn bootstrap(
    config_path: Option<&Path>,
    platform: Platform,
    notifier: Arc<dyn Notifier>,
) -> Result<InterviewSession, BootstrapError> {
    logging::init_tracing();

    let config = match config_path {
        Some(path) => config::load_or_create(path)?,
        None => AppConfig::from_env(),
    };

    let storage: Arc<dyn SessionStorage> = match &config.session_storage_path {
        Some(path) => Arc::new(FileStorage::open(path)?),
        None => Arc::new(MemoryStorage::new()),
    };
    let api = Arc::new(HttpInterviewApi::new(&config)?);

    tracing::info!(
        "Interview session ready (limit {} s, service {})",
        config.interview_time_limit_secs,
        config.api_base_url
    );
    Ok(InterviewSession::new(config, platform, api, storage, notifier))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::PermissionStatus;
    use crate::testing::{
        FakeAnalyserFactory, FakeMediaDevices, FakePermissionProbe, FakeRecorderBackend,
    };

    fn platform() -> Platform {
        Platform {
            devices: Arc::new(FakeMediaDevices::with_default_devices()),
            permission_probe: Some(Arc::new(FakePermissionProbe::new(
                PermissionStatus::Granted,
                PermissionStatus::Granted,
            ))),
            analysers: Arc::new(FakeAnalyserFactory::new(vec![128])),
            recorder: Arc::new(FakeRecorderBackend::supporting(&["video/mp4"])),
        }
    }

    #[tokio::test]
    async fn bootstrap_uses_file_config_and_storage() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        let config = AppConfig {
            interview_time_limit_secs: 90,
            session_storage_path: Some(dir.path().join("session.json")),
            ..AppConfig::default()
        };
        config::save(&config_path, &config).unwrap();

        let session = bootstrap(
            Some(&config_path),
            platform(),
            Arc::new(LogNotifier),
        )
        .unwrap();

        assert!(session.prepare().await);
        assert!(session.can_start());
        assert_eq!(
            session.analysis().store().snapshot().analysis_status,
            AnalysisStatus::Idle
        );
    }
}
