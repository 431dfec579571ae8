//! Filesystem durable store: one JSON file per record.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use tokio::fs;
use tracing::{info, warn};

use super::backend::{decode_record, DurableStore, ScanItem};
use super::record::{CorruptRecord, DurableRecord};
use crate::error::{CacheError, Result};

const RECORD_EXTENSION: &str = "json";

/// Store rooted at a directory. File names are the URL-safe base64 of the key.
#[derive(Debug)]
pub struct FsDurableStore {
    dir: PathBuf,
    open: AtomicBool,
}

impl FsDurableStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            open: AtomicBool::new(false),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", URL_SAFE_NO_PAD.encode(key), RECORD_EXTENSION))
    }

    fn key_from_path(path: &Path) -> Option<String> {
        if path.extension()? != RECORD_EXTENSION {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let bytes = URL_SAFE_NO_PAD.decode(stem).ok()?;
        String::from_utf8(bytes).ok()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Unavailable(format!(
                "store at {:?} is not open",
                self.dir
            )))
        }
    }

    async fn record_files(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            match Self::key_from_path(&path) {
                Some(key) => files.push((key, path)),
                None => {
                    if path.extension().is_some_and(|e| e == RECORD_EXTENSION) {
                        warn!("Ignoring record file with undecodable name {:?}", path);
                    }
                }
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl DurableStore for FsDurableStore {
    async fn open(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CacheError::Unavailable(format!("{:?}: {}", self.dir, e)))?;
        self.open.store(true, Ordering::SeqCst);
        info!("Durable store opened at {:?}", self.dir);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<DurableRecord>> {
        self.ensure_open()?;
        match fs::read(self.record_path(key)).await {
            Ok(bytes) => decode_record(key, &bytes)
                .map(Some)
                .map_err(|c| CacheError::Decode(c.reason)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, record: &DurableRecord) -> Result<()> {
        self.ensure_open()?;
        let path = self.record_path(&record.key);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(record)?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        match fs::remove_file(self.record_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> Result<()> {
        self.ensure_open()?;
        for (_, path) in self.record_files().await? {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<ScanItem>> {
        self.ensure_open()?;
        let mut items = Vec::new();
        for (key, path) in self.record_files().await? {
            let item = match fs::read(&path).await {
                Ok(bytes) => decode_record(&key, &bytes),
                Err(e) => Err(CorruptRecord {
                    key,
                    reason: e.to_string(),
                }),
            };
            items.push(item);
        }
        Ok(items)
    }
}
