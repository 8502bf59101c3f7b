// Session storage: per-tab key/value records that survive a page reload.

pub mod video;

pub use video::{ObjectUrlRegistry, StoredVideoBlob, VideoLocalPersistence};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage quota exceeded ({needed} bytes needed, {quota} allowed)")]
    QuotaExceeded { needed: usize, quota: usize },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// String key/value store with browser `sessionStorage` semantics.
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str);

    /// All keys, in ascending order.
    fn keys(&self) -> Vec<String>;
}

fn usage(entries: &BTreeMap<String, String>) -> usize {
    entries.iter().map(|(k, v)| k.len() + v.len()).sum()
}

/// `used` already counts `replaced` bytes that this write would free.
fn check_quota(
    used: usize,
    replaced: usize,
    key: &str,
    value: &str,
    quota: Option<usize>,
) -> Result<(), StorageError> {
    let Some(quota) = quota else {
        return Ok(());
    };
    let needed = used - replaced + key.len() + value.len();
    if needed > quota {
        return Err(StorageError::QuotaExceeded { needed, quota });
    }
    Ok(())
}

/// Storage that lives as long as the process. Models a single page lifetime.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            quota: Some(quota),
        }
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Poisoned)?;
        let replaced = entries.get(key).map(|old| key.len() + old.len()).unwrap_or(0);
        check_quota(usage(&entries), replaced, key, value, self.quota)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(key);
        }
    }

    fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Values at least this long are kept in their own file beside the index.
const SIDECAR_THRESHOLD: usize = 64 * 1024;

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileIndex {
    #[serde(default)]
    inline: BTreeMap<String, String>,
    /// Key to payload length; the payload lives in a sidecar file.
    #[serde(default)]
    sidecars: BTreeMap<String, usize>,
}

impl FileIndex {
    fn usage(&self) -> usize {
        usage(&self.inline) + self.sidecars.iter().map(|(k, len)| k.len() + len).sum::<usize>()
    }

    fn footprint(&self, key: &str) -> usize {
        self.inline
            .get(key)
            .map(|v| v.len())
            .or_else(|| self.sidecars.get(key).copied())
            .map(|len| key.len() + len)
            .unwrap_or(0)
    }
}

/// Storage mirrored to disk after every write, so a restarted process sees
/// the same records a reloaded page would.
///
/// Small records share one JSON index file. Large ones (video snapshots) get
/// a file each, so updating a small record never rewrites a large payload.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    sidecar_dir: PathBuf,
    index: RwLock<FileIndex>,
    quota: Option<usize>,
}

impl FileStorage {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let sidecar_dir = path.with_extension("d");

        let mut index = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str::<FileIndex>(&raw).unwrap_or_else(|e| {
                tracing::warn!(
                    "Session storage at {} is unreadable ({}), starting empty",
                    path.display(),
                    e
                );
                FileIndex::default()
            })
        } else {
            FileIndex::default()
        };

        index.sidecars.retain(|key, _| {
            let present = sidecar_path(&sidecar_dir, key).exists();
            if !present {
                tracing::warn!("Dropping session record {}: payload file is missing", key);
            }
            present
        });

        Ok(Self {
            path,
            sidecar_dir,
            index: RwLock::new(index),
            quota: None,
        })
    }

    pub fn with_quota(mut self, quota: usize) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush_index(&self, index: &FileIndex) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string(index)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    // Written before the index lock is taken; renamed into place under it.
    fn stage_sidecar(&self, key: &str, value: &str) -> Result<PathBuf, StorageError> {
        fs::create_dir_all(&self.sidecar_dir)?;
        let staged = self
            .sidecar_dir
            .join(format!("{}.{}.tmp", sidecar_name(key), uuid::Uuid::new_v4()));
        fs::write(&staged, value)?;
        Ok(staged)
    }

    fn remove_sidecar(&self, key: &str) {
        let path = sidecar_path(&self.sidecar_dir, key);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to delete {}: {}", path.display(), e);
            }
        }
    }
}

fn sidecar_name(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(key.as_bytes())
}

fn sidecar_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(sidecar_name(key))
}

impl SessionStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        let index = self.index.read().ok()?;
        if let Some(value) = index.inline.get(key) {
            return Some(value.clone());
        }
        if !index.sidecars.contains_key(key) {
            return None;
        }
        match fs::read_to_string(sidecar_path(&self.sidecar_dir, key)) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Failed to read session record {}: {}", key, e);
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let staged = if value.len() >= SIDECAR_THRESHOLD {
            Some(self.stage_sidecar(key, value)?)
        } else {
            None
        };
        let discard = |staged: &Option<PathBuf>| {
            if let Some(path) = staged {
                let _ = fs::remove_file(path);
            }
        };

        let mut index = match self.index.write() {
            Ok(index) => index,
            Err(_) => {
                discard(&staged);
                return Err(StorageError::Poisoned);
            }
        };
        if let Err(e) = check_quota(index.usage(), index.footprint(key), key, value, self.quota) {
            discard(&staged);
            return Err(e);
        }

        let old_inline = index.inline.remove(key);
        let old_sidecar = index.sidecars.remove(key);
        match &staged {
            Some(_) => {
                index.sidecars.insert(key.to_string(), value.len());
            }
            None => {
                index.inline.insert(key.to_string(), value.to_string());
            }
        }

        let committed = match &staged {
            Some(path) => fs::rename(path, sidecar_path(&self.sidecar_dir, key))
                .map_err(StorageError::from)
                .and_then(|()| self.flush_index(&index)),
            None => self.flush_index(&index),
        };
        if let Err(e) = committed {
            discard(&staged);
            index.inline.remove(key);
            index.sidecars.remove(key);
            if let Some(old) = old_inline {
                index.inline.insert(key.to_string(), old);
            }
            if let Some(len) = old_sidecar {
                index.sidecars.insert(key.to_string(), len);
            }
            return Err(e);
        }

        if staged.is_none() && old_sidecar.is_some() {
            self.remove_sidecar(key);
        }
        Ok(())
    }

    fn remove(&self, key: &str) {
        let Ok(mut index) = self.index.write() else {
            return;
        };
        let was_inline = index.inline.remove(key).is_some();
        let was_sidecar = index.sidecars.remove(key).is_some();
        if !was_inline && !was_sidecar {
            return;
        }
        if let Err(e) = self.flush_index(&index) {
            tracing::warn!("Failed to persist removal of {}: {}", key, e);
        }
        if was_sidecar {
            self.remove_sidecar(key);
        }
    }

    fn keys(&self) -> Vec<String> {
        self.index
            .read()
            .map(|index| {
                let mut keys: Vec<String> = index
                    .inline
                    .keys()
                    .chain(index.sidecars.keys())
                    .cloned()
                    .collect();
                keys.sort();
                keys
            })
            .unwrap_or_default()
    }
}
