//! Bulk download orchestration
//!
//! Streams each listed key to `<output_root>/<backend>/<key>`. A failing key is
//! recorded and the batch carries on; outcomes come back in listing order.

use std::path::{Component, Path, PathBuf};

use futures::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::config::DEFAULT_CONCURRENCY;
use crate::s3::backend::Backend;
use crate::s3::error::BackendError;
use crate::s3::types::is_object_key;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Prefix marker or empty key
    NotDownloadable,
    /// Key would escape the output directory
    UnsafePath,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotDownloadable => "not a downloadable object",
            SkipReason::UnsafePath => "unsafe local path",
        }
    }
}

#[derive(Debug)]
pub enum DownloadStatus {
    Downloaded { path: PathBuf, bytes: u64 },
    Skipped(SkipReason),
    Failed(DownloadError),
}

#[derive(Debug)]
pub struct DownloadOutcome {
    pub key: String,
    pub status: DownloadStatus,
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub output_root: PathBuf,
    /// Keys fetched in parallel within one backend
    pub concurrency: usize,
}

impl DownloadOptions {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Directory a backend's files land in
    pub fn backend_dir(&self, backend: &str) -> PathBuf {
        self.output_root.join(backend)
    }
}

/// Per-backend outcome counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl DownloadSummary {
    pub fn from_outcomes(outcomes: &[DownloadOutcome]) -> Self {
        outcomes.iter().fold(Self::default(), |mut acc, outcome| {
            match outcome.status {
                DownloadStatus::Downloaded { .. } => acc.downloaded += 1,
                DownloadStatus::Skipped(_) => acc.skipped += 1,
                DownloadStatus::Failed(_) => acc.failed += 1,
            }
            acc
        })
    }

    pub fn total(&self) -> usize {
        self.downloaded + self.skipped + self.failed
    }
}

/// Local destination for a key, or `None` if the key could escape `root/backend`.
///
/// Keys are joined segment by segment; empty and `.` segments are dropped.
pub fn destination_path(root: &Path, backend: &str, key: &str) -> Option<PathBuf> {
    if key.starts_with('/') || key.contains('\\') || key.contains('\0') {
        return None;
    }

    let mut path = root.join(backend);
    let mut segments = 0;
    for segment in key.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            _ => {}
        }
        // Reject anything the platform would read as a prefix or root (`C:` on Windows)
        if !matches!(Path::new(segment).components().next(), Some(Component::Normal(_))) {
            return None;
        }
        path.push(segment);
        segments += 1;
    }

    (segments > 0).then_some(path)
}

/// Download `keys` from `backend`, never aborting on a single failure.
pub async fn download_keys(
    backend: &dyn Backend,
    keys: &[String],
    options: &DownloadOptions,
) -> Vec<DownloadOutcome> {
    let base = options.backend_dir(backend.name());
    if let Err(e) = tokio::fs::create_dir_all(&base).await {
        tracing::warn!("Failed to create {:?}: {}", base, e);
    }

    futures::stream::iter(keys)
        .map(|key| download_one(backend, key, options))
        .buffered(options.concurrency.max(1))
        .collect()
        .await
}

async fn download_one(
    backend: &dyn Backend,
    key: &str,
    options: &DownloadOptions,
) -> DownloadOutcome {
    let status = if !is_object_key(key) {
        DownloadStatus::Skipped(SkipReason::NotDownloadable)
    } else {
        match destination_path(&options.output_root, backend.name(), key) {
            None => {
                tracing::warn!("{}: refusing unsafe key {:?}", backend.name(), key);
                DownloadStatus::Skipped(SkipReason::UnsafePath)
            }
            Some(path) => match fetch_to_file(backend, key, &path).await {
                Ok(bytes) => {
                    tracing::info!("{}: downloaded {} ({} bytes)", backend.name(), key, bytes);
                    DownloadStatus::Downloaded { path, bytes }
                }
                Err(e) => {
                    tracing::error!("{}: failed to download {}: {}", backend.name(), key, e);
                    DownloadStatus::Failed(e)
                }
            },
        }
    };

    DownloadOutcome {
        key: key.to_string(),
        status,
    }
}

/// Stream one object into `path`, replacing any existing file.
async fn fetch_to_file(
    backend: &dyn Backend,
    key: &str,
    path: &Path,
) -> Result<u64, DownloadError> {
    let io_err = |source| DownloadError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let mut body = backend.fetch(key).await?;

    let file = tokio::fs::File::create(path).await.map_err(io_err)?;
    let mut writer = tokio::io::BufWriter::with_capacity(1024 * 1024, file);
    let mut written = 0u64;

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        writer.write_all(&chunk).await.map_err(io_err)?;
        written += chunk.len() as u64;
    }

    writer.flush().await.map_err(io_err)?;
    Ok(written)
}
