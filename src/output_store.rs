//! Write-once store for rendered documents in a publicly served directory.
//!
//! Files are named `{prefix}_{millis}.pdf`. The millisecond component is
//! strictly increasing within the process, and files are opened with
//! `create_new`, so an existing document is never overwritten. After each
//! write the oldest documents beyond `max_files` are evicted. Only names of
//! that shape with a known render prefix count as documents; anything else in
//! the directory is left alone.

use crate::error::AppError;
use crate::render::RenderRequest;
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

const EXTENSION: &str = "pdf";
const MAX_NAME_ATTEMPTS: usize = 16;

/// A document written by [`OutputStore::store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub file_name: String,
    pub path: PathBuf,
    /// Relative URL under which the file is served.
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct OutputStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    dir: PathBuf,
    public_prefix: String,
    max_files: Option<usize>,
    last_stamp: AtomicU64,
    sweep: tokio::sync::Mutex<()>,
}

impl OutputStore {
    /// Open (and create if needed) the output directory.
    pub fn new(
        dir: impl Into<PathBuf>,
        public_prefix: impl Into<String>,
        max_files: Option<usize>,
    ) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory: {:?}", dir))?;

        Ok(Self {
            inner: Arc::new(Inner {
                dir,
                public_prefix: public_prefix.into(),
                max_files,
                last_stamp: AtomicU64::new(0),
                sweep: tokio::sync::Mutex::new(()),
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Next timestamp component: wall-clock millis, bumped past the previous one.
    fn next_stamp(&self) -> u64 {
        let now = now_millis();
        let prev = self
            .inner
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(prev + 1)
    }

    /// Write `bytes` to a new file and return where it can be fetched.
    pub async fn store(&self, prefix: &str, bytes: &[u8]) -> Result<StoredDocument, AppError> {
        let mut attempts = 0;
        let (file_name, path, file) = loop {
            let file_name = format!("{}_{}.{}", prefix, self.next_stamp(), EXTENSION);
            let path = self.inner.dir.join(&file_name);
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => break (file_name, path, file),
                // Left over from an earlier run with a faster clock.
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists
                    && attempts < MAX_NAME_ATTEMPTS =>
                {
                    attempts += 1;
                    debug!("OutputStore: {} exists, trying next stamp", file_name);
                }
                Err(e) => {
                    return Err(AppError::Storage(format!(
                        "failed to create {:?}: {}",
                        path, e
                    )))
                }
            }
        };

        write_or_remove(file, &path, bytes).await?;

        info!("OutputStore: stored '{}' ({} bytes)", file_name, bytes.len());

        if let Some(limit) = self.inner.max_files {
            self.enforce_retention(limit).await;
        }

        Ok(StoredDocument {
            url: format!("{}/{}", self.inner.public_prefix, file_name),
            file_name,
            path,
        })
    }

    /// Delete the oldest documents until at most `limit` remain. Returns how many were removed.
    ///
    /// Failures are logged, never returned: a document that was just written
    /// stays valid even when the sweep cannot finish.
    pub async fn enforce_retention(&self, limit: usize) -> usize {
        let _guard = self.inner.sweep.lock().await;

        let mut documents = match self.list_documents().await {
            Ok(documents) => documents,
            Err(e) => {
                warn!("OutputStore: retention sweep skipped: {}", e);
                return 0;
            }
        };
        if documents.len() <= limit {
            return 0;
        }

        documents.sort();
        let excess = documents.len() - limit;
        let mut removed = 0;
        for (_, path) in documents.into_iter().take(excess) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    removed += 1;
                    debug!("OutputStore: evicted {:?}", path);
                }
                Err(e) => warn!("OutputStore: failed to evict {:?}: {}", path, e),
            }
        }

        info!("OutputStore: retention evicted {} documents (limit {})", removed, limit);
        removed
    }

    /// Documents this store produces, keyed by their timestamp component.
    async fn list_documents(&self) -> std::io::Result<Vec<(u64, PathBuf)>> {
        let mut entries = tokio::fs::read_dir(&self.inner.dir).await?;
        let mut documents = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if let Some(stamp) = stamp_of(&path) {
                documents.push((stamp, path));
            }
        }
        Ok(documents)
    }
}

/// Write `bytes` through `writer`; on failure the partial file at `path` is removed.
async fn write_or_remove<W>(mut writer: W, path: &Path, bytes: &[u8]) -> Result<(), AppError>
where
    W: AsyncWrite + Unpin,
{
    let written = match writer.write_all(bytes).await {
        Ok(()) => writer.flush().await,
        Err(e) => Err(e),
    };
    let Err(e) = written else {
        return Ok(());
    };

    drop(writer);
    if let Err(remove_err) = tokio::fs::remove_file(path).await {
        warn!("OutputStore: failed to remove partial {:?}: {}", path, remove_err);
    }
    Err(AppError::Storage(format!("failed to write {:?}: {}", path, e)))
}

/// Timestamp component of a `{prefix}_{millis}.pdf` name with a known render prefix.
fn stamp_of(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(EXTENSION)?.strip_suffix('.')?;
    let (prefix, stamp) = stem.rsplit_once('_')?;
    if !RenderRequest::FILE_PREFIXES.contains(&prefix)
        || stamp.is_empty()
        || !stamp.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    stamp.parse().ok()
}

fn system_time_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn now_millis() -> u64 {
    system_time_millis(SystemTime::now())
}
