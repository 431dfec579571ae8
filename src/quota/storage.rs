//! Quota-limited storage media
//!
//! A synchronous string key-value medium with a hard byte quota that may be
//! shared with consumers outside the cache. Usage counts the byte length of
//! every key and value held, whoever wrote them.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{CacheError, Result};

// == Storage Trait ==
/// Synchronous, quota-limited key-value medium.
pub trait QuotaStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Stores a value, failing with [`CacheError::QuotaExceeded`] when the
    /// resulting usage would exceed the quota.
    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    fn remove_item(&self, key: &str) -> Result<()>;

    fn keys(&self) -> Result<Vec<String>>;

    /// Bytes currently used by all consumers.
    fn used_bytes(&self) -> usize;

    fn quota_bytes(&self) -> usize;
}

// == Shared map ==
#[derive(Debug, Default)]
struct ItemMap {
    items: HashMap<String, String>,
    used: usize,
}

impl ItemMap {
    fn from_items(items: HashMap<String, String>) -> Self {
        let used = items.iter().map(|(k, v)| k.len() + v.len()).sum();
        Self { items, used }
    }

    /// Usage after replacing `key` with `value`.
    fn projected(&self, key: &str, value: &str) -> usize {
        let old = self
            .items
            .get(key)
            .map_or(0, |v| key.len() + v.len());
        self.used - old + key.len() + value.len()
    }

    fn insert(&mut self, key: &str, value: &str, quota: usize) -> Result<()> {
        let projected = self.projected(key, value);
        if projected > quota {
            return Err(CacheError::QuotaExceeded(format!(
                "writing '{}' needs {} bytes, quota is {}",
                key, projected, quota
            )));
        }
        self.items.insert(key.to_string(), value.to_string());
        self.used = projected;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.items.remove(key) {
            Some(v) => {
                self.used -= key.len() + v.len();
                true
            }
            None => false,
        }
    }
}

// == Memory Storage ==
/// In-process medium. Clones share the same items and quota.
#[derive(Debug, Clone)]
pub struct MemoryQuotaStorage {
    inner: Arc<Mutex<ItemMap>>,
    quota: usize,
    fail_io: Arc<AtomicBool>,
}

impl MemoryQuotaStorage {
    pub fn new(quota_bytes: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ItemMap::default())),
            quota: quota_bytes,
            fail_io: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Makes every subsequent call fail with a storage error until reset.
    pub fn set_failing(&self, failing: bool) {
        self.fail_io.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.fail_io.load(Ordering::SeqCst) {
            return Err(CacheError::Storage("medium unavailable".to_string()));
        }
        Ok(())
    }
}

impl QuotaStorage for MemoryQuotaStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.inner.lock().items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.inner.lock().insert(key, value, self.quota)
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.check()?;
        self.inner.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.check()?;
        Ok(self.inner.lock().items.keys().cloned().collect())
    }

    fn used_bytes(&self) -> usize {
        self.inner.lock().used
    }

    fn quota_bytes(&self) -> usize {
        self.quota
    }
}

// == File Storage ==
/// Medium persisted as a single JSON object on disk.
///
/// Every mutation rewrites the file through a temporary file and a rename,
/// so a crash leaves either the old or the new contents.
#[derive(Debug)]
pub struct FileQuotaStorage {
    path: PathBuf,
    quota: usize,
    inner: Mutex<ItemMap>,
}

impl FileQuotaStorage {
    /// Opens (or creates) the medium at `path`.
    ///
    /// An unreadable file is discarded so the medium always opens.
    pub fn open(path: impl AsRef<Path>, quota_bytes: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let items = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<HashMap<String, String>>(&contents) {
                Ok(items) => items,
                Err(e) => {
                    warn!("Discarding unreadable medium file {:?}: {}", path, e);
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!("Opened medium {:?} with {} items", path, items.len());
        Ok(Self {
            path,
            quota: quota_bytes,
            inner: Mutex::new(ItemMap::from_items(items)),
        })
    }

    fn persist(&self, map: &ItemMap) -> Result<()> {
        let json = serde_json::to_string(&map.items)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl QuotaStorage for FileQuotaStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.inner.lock();
        let previous = map.items.get(key).cloned();
        map.insert(key, value, self.quota)?;
        if let Err(e) = self.persist(&map) {
            // Roll back so memory and disk agree
            map.remove(key);
            if let Some(prev) = previous {
                map.items.insert(key.to_string(), prev.clone());
                map.used += key.len() + prev.len();
            }
            return Err(e);
        }
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let mut map = self.inner.lock();
        if map.remove(key) {
            self.persist(&map)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.inner.lock().items.keys().cloned().collect())
    }

    fn used_bytes(&self) -> usize {
        self.inner.lock().used
    }

    fn quota_bytes(&self) -> usize {
        self.quota
    }
}
