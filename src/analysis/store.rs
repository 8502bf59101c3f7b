use super::state::{reduce, Action, AnalysisSession};
use crate::storage::SessionStorage;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, warn};

pub const ANALYSIS_STORAGE_KEY: &str = "analysisData";

/// Notified synchronously after every state change, in dispatch order.
pub trait SessionObserver: Send + Sync {
    fn on_change(&self, action: &Action, session: &AnalysisSession);
}

/// Mirrors the session into session storage so a reload can redisplay it.
pub struct SessionPersistence {
    storage: Arc<dyn SessionStorage>,
}

impl SessionPersistence {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self { storage }
    }
}

impl SessionObserver for SessionPersistence {
    fn on_change(&self, action: &Action, session: &AnalysisSession) {
        if matches!(action, Action::Reset) {
            self.storage.remove(ANALYSIS_STORAGE_KEY);
            return;
        }

        let json = match serde_json::to_string(session) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize analysis session: {}", e);
                return;
            }
        };
        if let Err(e) = self.storage.set(ANALYSIS_STORAGE_KEY, &json) {
            warn!("Failed to persist analysis session: {}", e);
        }
    }
}

pub struct AnalysisStore {
    state: watch::Sender<AnalysisSession>,
    observers: Mutex<Vec<Arc<dyn SessionObserver>>>,
    // Serializes reduce + observer fan-out so storage never sees an older state last.
    dispatch_lock: Mutex<()>,
}

impl AnalysisStore {
    pub fn new(initial: AnalysisSession) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            state,
            observers: Mutex::new(Vec::new()),
            dispatch_lock: Mutex::new(()),
        }
    }

    /// Rehydrates from `analysisData` (or starts idle) and persists every change back.
    pub fn with_session_storage(storage: Arc<dyn SessionStorage>) -> Self {
        let store = Self::new(rehydrate(storage.as_ref()));
        store.add_observer(Arc::new(SessionPersistence::new(storage)));
        store
    }

    pub fn add_observer(&self, observer: Arc<dyn SessionObserver>) {
        if let Ok(mut observers) = self.observers.lock() {
            observers.push(observer);
        }
    }

    pub fn snapshot(&self) -> AnalysisSession {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AnalysisSession> {
        self.state.subscribe()
    }

    pub fn dispatch(&self, action: Action) -> AnalysisSession {
        let _guard = self.dispatch_lock.lock().unwrap_or_else(|e| e.into_inner());

        let current = self.snapshot();
        let next = reduce(&current, action.clone());
        let changed = next != current || matches!(action, Action::Reset);
        if !changed {
            debug!("Analysis action ignored: {:?}", ActionName(&action));
            return current;
        }

        self.state.send_replace(next.clone());
        let observers = self
            .observers
            .lock()
            .map(|o| o.clone())
            .unwrap_or_default();
        for observer in observers {
            observer.on_change(&action, &next);
        }
        next
    }
}

fn rehydrate(storage: &dyn SessionStorage) -> AnalysisSession {
    let Some(raw) = storage.get(ANALYSIS_STORAGE_KEY) else {
        return AnalysisSession::default();
    };
    match serde_json::from_str(&raw) {
        Ok(session) => {
            debug!("Analysis session rehydrated from session storage");
            session
        }
        Err(e) => {
            warn!("Discarding unreadable analysis session: {}", e);
            AnalysisSession::default()
        }
    }
}

/// Debug-prints an action without its result payload.
struct ActionName<'a>(&'a Action);

impl std::fmt::Debug for ActionName<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self.0 {
            Action::Start { .. } => "Start",
            Action::UploadFailed { .. } => "UploadFailed",
            Action::VideoSucceeded { .. } => "VideoSucceeded",
            Action::VideoFailed { .. } => "VideoFailed",
            Action::AudioSucceeded { .. } => "AudioSucceeded",
            Action::AudioFailed { .. } => "AudioFailed",
            Action::Reset => "Reset",
        };
        f.write_str(name)
    }
}
