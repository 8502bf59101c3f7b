use super::SessionStorage;
use crate::media::VideoBlob;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const VIDEO_KEY_PREFIX: &str = "interview-video-";
pub const DATA_KEY_SUFFIX: &str = "-data";
const OBJECT_URL_PREFIX: &str = "blob:interview/";

/// In-memory stand-in for `URL.createObjectURL`. URLs die with the process.
#[derive(Debug, Default)]
pub struct ObjectUrlRegistry {
    entries: Mutex<HashMap<String, VideoBlob>>,
}

impl ObjectUrlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, blob: &VideoBlob) -> String {
        let url = format!("{}{}", OBJECT_URL_PREFIX, Uuid::new_v4());
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(url.clone(), blob.clone());
        }
        url
    }

    pub fn resolve(&self, url: &str) -> Option<VideoBlob> {
        self.entries.lock().ok()?.get(url).cloned()
    }

    pub fn revoke(&self, url: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(url);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Metadata record written next to the optional `-data` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredVideoBlob {
    pub url: String,
    pub timestamp: i64,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime_type: String,
}

/// Keeps the latest take playable across a reload and downloadable.
pub struct VideoLocalPersistence {
    storage: Arc<dyn SessionStorage>,
    urls: Arc<ObjectUrlRegistry>,
    snapshot_limit: u64,
    download_dir: PathBuf,
    saved_url: Mutex<Option<String>>,
    issued: Mutex<Vec<String>>,
    pending: Mutex<Vec<JoinHandle<()>>>,
    // Bumped by `clear`; snapshot writes from an older generation are dropped.
    generation: Arc<AtomicU64>,
}

impl VideoLocalPersistence {
    pub fn new(
        storage: Arc<dyn SessionStorage>,
        urls: Arc<ObjectUrlRegistry>,
        snapshot_limit: u64,
        download_dir: PathBuf,
    ) -> Self {
        Self {
            storage,
            urls,
            snapshot_limit,
            download_dir,
            saved_url: Mutex::new(None),
            issued: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn saved_url(&self) -> Option<String> {
        self.saved_url.lock().ok()?.clone()
    }

    /// Returns a playable URL immediately; the base64 snapshot (for blobs under
    /// the limit) is written in the background, see [`Self::flush`].
    pub fn save_locally(&self, blob: &VideoBlob) -> String {
        let url = self.issue_url(blob);
        let timestamp = chrono::Utc::now().timestamp_millis();
        let key = self.fresh_key(timestamp);

        let record = StoredVideoBlob {
            url: url.clone(),
            timestamp,
            size: blob.size(),
            mime_type: blob.mime_type().to_string(),
        };
        match serde_json::to_string(&record) {
            Ok(json) => {
                if let Err(e) = self.storage.set(&key, &json) {
                    warn!("Failed to store video metadata {}: {}", key, e);
                }
            }
            Err(e) => warn!("Failed to serialize video metadata: {}", e),
        }

        if blob.size() < self.snapshot_limit {
            self.write_snapshot(format!("{}{}", key, DATA_KEY_SUFFIX), blob.clone());
        } else {
            debug!(
                "Video too large for a session snapshot ({} bytes), keeping metadata only",
                blob.size()
            );
        }

        info!("Video saved locally: {}", url);
        url
    }

    /// Waits for background snapshot writes started by `save_locally`.
    pub async fn flush(&self) {
        let pending = self
            .pending
            .lock()
            .map(|mut p| std::mem::take(&mut *p))
            .unwrap_or_default();
        for handle in pending {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Video snapshot task failed: {}", e);
                }
            }
        }
    }

    /// Most recent take: rebuilt from its snapshot when there is one,
    /// otherwise its object URL if that is still alive in this process.
    pub fn restore_from_session(&self) -> Option<String> {
        let key = self
            .storage
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(VIDEO_KEY_PREFIX) && !k.ends_with(DATA_KEY_SUFFIX))
            .max()?;

        let record: StoredVideoBlob = match self
            .storage
            .get(&key)
            .map(|raw| serde_json::from_str(&raw))
        {
            Some(Ok(record)) => record,
            Some(Err(e)) => {
                warn!("Unreadable video record {}: {}", key, e);
                return None;
            }
            None => return None,
        };

        let snapshot = self.storage.get(&format!("{}{}", key, DATA_KEY_SUFFIX));
        if let Some(blob) = snapshot.as_deref().and_then(decode_data_url) {
            let url = self.issue_url(&blob);
            self.set_saved_url(Some(url.clone()));
            info!("Video restored from session snapshot {}", key);
            return Some(url);
        }

        if self.urls.resolve(&record.url).is_some() {
            self.set_saved_url(Some(record.url.clone()));
            return Some(record.url);
        }

        debug!("Video record {} has no snapshot and its URL is gone", key);
        None
    }

    /// Writes `blob`, or the current saved take, to the download directory.
    /// The `.mp4` extension is fixed whatever the container actually is.
    pub async fn download_video(&self, blob: Option<&VideoBlob>) -> bool {
        let blob = match blob {
            Some(blob) => blob.clone(),
            None => match self.saved_url().and_then(|url| self.urls.resolve(&url)) {
                Some(blob) => blob,
                None => {
                    error!("No video to download");
                    return false;
                }
            },
        };

        let file_name = format!("interview-{}.mp4", chrono::Utc::now().timestamp_millis());
        let path = self.download_dir.join(file_name);
        if let Err(e) = tokio::fs::create_dir_all(&self.download_dir).await {
            error!("Video download failed: {}", e);
            return false;
        }
        match tokio::fs::write(&path, blob.bytes()).await {
            Ok(()) => {
                info!("Video downloaded to {}", path.display());
                true
            }
            Err(e) => {
                error!("Video download failed: {}", e);
                false
            }
        }
    }

    /// Drops every stored take and revokes the URLs handed out here.
    /// Snapshot writes still in flight are discarded rather than landing afterwards.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);

        let keys: Vec<String> = self
            .storage
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(VIDEO_KEY_PREFIX))
            .collect();
        for key in &keys {
            self.storage.remove(key);
        }

        if let Ok(mut issued) = self.issued.lock() {
            for url in issued.drain(..) {
                self.urls.revoke(&url);
            }
        }
        self.set_saved_url(None);
        info!("Cleared {} stored video records", keys.len());
    }

    fn issue_url(&self, blob: &VideoBlob) -> String {
        let url = self.urls.create(blob);
        if let Ok(mut issued) = self.issued.lock() {
            issued.push(url.clone());
        }
        self.set_saved_url(Some(url.clone()));
        url
    }

    fn set_saved_url(&self, url: Option<String>) {
        if let Ok(mut saved) = self.saved_url.lock() {
            *saved = url;
        }
    }

    // Two saves in the same millisecond must not share a key.
    fn fresh_key(&self, timestamp: i64) -> String {
        let mut ts = timestamp;
        loop {
            let key = format!("{}{}", VIDEO_KEY_PREFIX, ts);
            if self.storage.get(&key).is_none() {
                return key;
            }
            ts += 1;
        }
    }

    fn write_snapshot(&self, data_key: String, blob: VideoBlob) {
        let storage = self.storage.clone();

        if tokio::runtime::Handle::try_current().is_err() {
            store_snapshot(storage.as_ref(), &data_key, &encode_data_url(&blob));
            return;
        }

        let generation = self.generation.clone();
        let started = generation.load(Ordering::SeqCst);
        let current = move || generation.load(Ordering::SeqCst) == started;

        // Encoding and the storage write both stay off the async workers.
        let handle = tokio::spawn(async move {
            let written = tokio::task::spawn_blocking(move || {
                let encoded = encode_data_url(&blob);
                if !current() {
                    return;
                }
                store_snapshot(storage.as_ref(), &data_key, &encoded);
                if !current() {
                    storage.remove(&data_key);
                }
            });
            if let Err(e) = written.await {
                warn!("Video snapshot task failed: {}", e);
            }
        });
        if let Ok(mut pending) = self.pending.lock() {
            pending.retain(|h| !h.is_finished());
            pending.push(handle);
        }
    }
}

fn store_snapshot(storage: &dyn SessionStorage, key: &str, encoded: &str) {
    match storage.set(key, encoded) {
        Ok(()) => debug!("Video snapshot stored: {}", key),
        Err(e) => warn!("Failed to store video snapshot {}: {}", key, e),
    }
}

pub fn encode_data_url(blob: &VideoBlob) -> String {
    format!(
        "data:{};base64,{}",
        blob.mime_type(),
        STANDARD.encode(blob.bytes())
    )
}

pub fn decode_data_url(data_url: &str) -> Option<VideoBlob> {
    let rest = data_url.strip_prefix("data:")?;
    let (mime_type, payload) = rest.split_once(";base64,")?;
    match STANDARD.decode(payload) {
        Ok(bytes) => Some(VideoBlob::new(bytes, mime_type)),
        Err(e) => {
            warn!("Corrupt video snapshot: {}", e);
            None
        }
    }
}
