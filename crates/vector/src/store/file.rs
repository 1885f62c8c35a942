use async_trait::async_trait;
use codesearch_common::{CodeSearchError, Result};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::VectorStore;
use crate::types::StoredRecord;

const RECORD_EXT: &str = "json";
const TMP_EXT: &str = "tmp";

/// One JSON file per record in a single directory.
///
/// Files are named by the SHA-256 of the id so arbitrary ids (paths,
/// symbols) are safe on disk. A write goes to a temporary file that is
/// fsynced and renamed over the target, so a reader sees either the old or
/// the new record, never a torn one.
pub struct FileVectorStore {
    dir: PathBuf,
    lock: RwLock<()>,
}

fn storage_error(action: &str, path: &Path, e: impl std::fmt::Display) -> CodeSearchError {
    CodeSearchError::storage_unavailable(format!("Failed to {} {}: {}", action, path.display(), e))
}

impl FileVectorStore {
    /// Open (or create) a store directory, removing leftovers of interrupted writes
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| storage_error("create store directory", &dir, e))?;

        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| storage_error("read store directory", &dir, e))?;
        let mut removed = 0usize;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_error("read store directory", &dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(TMP_EXT) {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!("Failed to remove stale temp file {}: {}", path.display(), e);
                } else {
                    removed += 1;
                }
            }
        }

        info!("Vector store opened at {} ({} stale temp files removed)", dir.display(), removed);

        Ok(Self {
            dir,
            lock: RwLock::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_stem(id: &str) -> String {
        hex::encode(Sha256::digest(id.as_bytes()))
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", Self::file_stem(id), RECORD_EXT))
    }

    fn tmp_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", Self::file_stem(id), TMP_EXT))
    }

    async fn read_record(path: &Path) -> Result<Option<StoredRecord>> {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_error("read record", path, e)),
        };
        let record = serde_json::from_slice(&data)
            .map_err(|e| storage_error("decode record", path, e))?;
        Ok(Some(record))
    }

    async fn record_paths(&self) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| storage_error("read store directory", &self.dir, e))?;

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_error("read store directory", &self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXT) {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

#[async_trait]
impl VectorStore for FileVectorStore {
    async fn put(&self, record: &StoredRecord) -> Result<()> {
        let data = serde_json::to_vec(record)?;
        let path = self.record_path(&record.id);
        let tmp = self.tmp_path(&record.id);

        let _guard = self.lock.write().await;

        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| storage_error("create", &tmp, e))?;
        file.write_all(&data)
            .await
            .map_err(|e| storage_error("write", &tmp, e))?;
        file.sync_all()
            .await
            .map_err(|e| storage_error("sync", &tmp, e))?;
        drop(file);

        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| storage_error("commit", &path, e))?;

        debug!("Stored record {} (version {})", record.id, record.version);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<StoredRecord>> {
        let _guard = self.lock.read().await;
        let path = self.record_path(id);
        match Self::read_record(&path).await? {
            Some(record) if record.id != id => Err(CodeSearchError::storage_unavailable(format!(
                "record file {} holds id '{}', expected '{}'",
                path.display(),
                record.id,
                id
            ))),
            other => Ok(other),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let _guard = self.lock.write().await;
        let path = self.record_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(storage_error("delete", &path, e)),
        }
    }

    async fn scan(&self) -> Result<Vec<StoredRecord>> {
        let _guard = self.lock.read().await;

        let mut records = Vec::new();
        for path in self.record_paths().await? {
            if let Some(record) = Self::read_record(&path).await? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn len(&self) -> Result<usize> {
        let _guard = self.lock.read().await;
        Ok(self.record_paths().await?.len())
    }
}
