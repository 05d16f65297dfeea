//! Append-only durable store on the local filesystem.
//!
//! One log file per key. Each frame is
//! `[len: u32 LE][sha256(body): 32 bytes][body: bincode CacheEntry]`.
//! A frame is written with a single `write_all`, so a crash leaves at most a
//! torn tail, which readers detect by length or checksum and skip.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use crate::cache::durable::DurableStore;
use crate::cache::entry::{CacheEntry, DataKey};
use crate::error::{Error, Result};

const HEADER_LEN: usize = 4 + 32;

pub struct FileDurableStore {
    dir: PathBuf,
    locks: DashMap<DataKey, Arc<Mutex<()>>>,
}

impl FileDurableStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        async_fs::create_dir_all(&dir)
            .await
            .map_err(|e| store_error(&dir, e))?;

        tracing::info!("Durable store at {:?}", dir);
        Ok(FileDurableStore {
            dir,
            locks: DashMap::new(),
        })
    }

    fn log_path(&self, key: &DataKey) -> PathBuf {
        // hex keeps provider tickers like "^GSPC" or "GC=F" filesystem-safe
        self.dir.join(format!("{}.{}.log", hex::encode(key.symbol.as_str()), key.data_type))
    }

    fn lock(&self, key: &DataKey) -> Arc<Mutex<()>> {
        self.locks.entry(key.clone()).or_default().clone()
    }

    fn encode_frame(entry: &CacheEntry) -> Result<Vec<u8>> {
        let body = bincode::serialize(entry)
            .map_err(|e| Error::SerializationError(e.to_string()))?;
        let len = u32::try_from(body.len())
            .map_err(|_| Error::SerializationError("frame exceeds 4 GiB".to_string()))?;

        let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&Sha256::digest(&body));
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decodes every intact frame. Stops at a truncated tail and skips
    /// frames whose checksum or body does not verify.
    fn decode_frames(path: &Path, data: &[u8]) -> Vec<CacheEntry> {
        let mut entries = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            if data.len() - offset < HEADER_LEN {
                tracing::warn!("Torn frame header at byte {} in {:?}", offset, path);
                break;
            }

            let mut len_bytes = [0u8; 4];
            len_bytes.copy_from_slice(&data[offset..offset + 4]);
            let len = u32::from_le_bytes(len_bytes) as usize;
            let checksum = &data[offset + 4..offset + HEADER_LEN];
            let body_start = offset + HEADER_LEN;

            if data.len() - body_start < len {
                tracing::warn!("Torn frame body at byte {} in {:?}", offset, path);
                break;
            }
            let body = &data[body_start..body_start + len];
            offset = body_start + len;

            if Sha256::digest(body).as_slice() != checksum {
                tracing::warn!("Skipping frame with bad checksum in {:?}", path);
                continue;
            }
            match bincode::deserialize::<CacheEntry>(body) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!("Skipping undecodable frame in {:?}: {}", path, e),
            }
        }

        entries
    }

    async fn read_all(&self, key: &DataKey) -> Result<Vec<CacheEntry>> {
        let path = self.log_path(key);
        let data = match async_fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(store_error(&path, e)),
        };

        let mut entries = Self::decode_frames(&path, &data);
        entries.sort_by_key(|e| e.fetched_at());
        Ok(entries)
    }
}

#[async_trait]
impl DurableStore for FileDurableStore {
    async fn append(&self, entry: &CacheEntry) -> Result<()> {
        let frame = Self::encode_frame(entry)?;
        let path = self.log_path(entry.key());

        let lock = self.lock(entry.key());
        let _guard = lock.lock().await;

        let mut file = async_fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| store_error(&path, e))?;
        file.write_all(&frame).await.map_err(|e| store_error(&path, e))?;
        file.sync_data().await.map_err(|e| store_error(&path, e))?;

        Ok(())
    }

    async fn range(
        &self,
        key: &DataKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CacheEntry>> {
        Ok(self.read_all(key).await?
            .into_iter()
            .filter(|e| e.fetched_at() >= from && e.fetched_at() <= to)
            .collect())
    }

    async fn latest(&self, key: &DataKey) -> Result<Option<CacheEntry>> {
        Ok(self.read_all(key).await?.pop())
    }

    /// Rewrites the log through a temp file and rename.
    async fn compact(&self, key: &DataKey, keep_last: usize) -> Result<usize> {
        let lock = self.lock(key);
        let _guard = lock.lock().await;

        let entries = self.read_all(key).await?;
        if entries.len() <= keep_last {
            return Ok(0);
        }
        let dropped = entries.len() - keep_last;

        let mut data = Vec::new();
        for entry in &entries[dropped..] {
            data.extend(Self::encode_frame(entry)?);
        }

        let path = self.log_path(key);
        let tmp = path.with_extension("log.tmp");
        async_fs::write(&tmp, &data).await.map_err(|e| store_error(&tmp, e))?;
        async_fs::rename(&tmp, &path).await.map_err(|e| store_error(&path, e))?;

        tracing::info!("Compacted {}: dropped {} entries", key, dropped);
        Ok(dropped)
    }

    async fn health_check(&self) -> Result<()> {
        let meta = async_fs::metadata(&self.dir)
            .await
            .map_err(|e| store_error(&self.dir, e))?;
        if !meta.is_dir() {
            return Err(Error::StoreUnavailable(format!("{:?} is not a directory", self.dir)));
        }
        Ok(())
    }
}

fn store_error(path: &Path, e: std::io::Error) -> Error {
    Error::StoreUnavailable(format!("{:?}: {}", path, e))
}
