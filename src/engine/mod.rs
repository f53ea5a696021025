pub mod ftp;
pub mod local;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;

use ftp::{FtpConfig, FtpEngine};
use local::LocalEngine;

/// Junk files that never participate in listings or diffs, regardless of
/// platform (the opposite side of a transfer may be a different OS anyway).
pub const JUNK_FILES: &[&str] = &[".DS_Store", "desktop.ini", "Thumbs.db"];

pub fn is_junk_file(file_name: &str) -> bool {
    JUNK_FILES.iter().any(|junk| file_name == *junk)
}

/// Join a root-relative directory and a child name with POSIX separators
pub(crate) fn join_rel(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

/// One filesystem entry as seen through a storage engine.
///
/// Produced fresh on every listing; engines never cache these.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub file_name: String,
    /// Relative to the engine root, always POSIX-separated
    pub relative_path: String,
    pub is_dir: bool,
    /// Bytes; 0 for directories
    pub size: u64,
    /// As reported by the backend listing; equality checks never read this
    #[allow(dead_code)]
    pub modified: SystemTime,
    pub meta: FileMeta,
}

/// Metadata carried across a transfer (mtime and mode at minimum)
#[derive(Debug, Clone, Copy)]
pub struct FileMeta {
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub mode: u32,
    pub size: u64,
}

/// Factory input: one config describes one engine instance.
///
/// Instances are never shared or pooled; each side of a sync owns its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EngineConfig {
    Local {
        path: PathBuf,
    },
    Ftp {
        path: String,
        #[serde(flatten)]
        connection: FtpConfig,
    },
}

impl std::fmt::Display for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineConfig::Local { path } => write!(f, "{}", path.display()),
            EngineConfig::Ftp { path, connection } => {
                // Credentials stay out of display output
                let scheme = if connection.secure { "ftps" } else { "ftp" };
                write!(
                    f,
                    "{}://{}@{}:{}{}",
                    scheme, connection.user, connection.host, connection.port, path
                )
            }
        }
    }
}

pub fn create_engine(config: &EngineConfig) -> Arc<dyn StorageEngine> {
    match config {
        EngineConfig::Local { path } => {
            tracing::debug!("Creating local engine rooted at {}", path.display());
            Arc::new(LocalEngine::new(path))
        }
        EngineConfig::Ftp { path, connection } => {
            tracing::debug!(
                "Creating FTP engine for {}:{} rooted at {}",
                connection.host,
                connection.port,
                path
            );
            Arc::new(FtpEngine::new(connection.clone(), path))
        }
    }
}

/// Readable byte stream handed out by an engine.
///
/// FTP readers are fed by a background download task; errors from that task
/// surface through read calls rather than from `open_reader` itself.
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

/// Writable byte stream handed out by an engine.
///
/// For FTP the sink feeds a background upload over the engine's single data
/// connection; `finish` joins that task so upload errors are not lost.
pub struct ByteWriter {
    sink: Box<dyn AsyncWrite + Send + Unpin>,
    task: Option<JoinHandle<Result<()>>>,
}

impl ByteWriter {
    /// Writer that lands directly in the sink (local files)
    pub fn direct(sink: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self { sink, task: None }
    }

    /// Writer backed by a background task that must complete for the write
    /// to be durable
    pub fn backed(sink: Box<dyn AsyncWrite + Send + Unpin>, task: JoinHandle<Result<()>>) -> Self {
        Self {
            sink,
            task: Some(task),
        }
    }

    pub fn sink_mut(&mut self) -> &mut (dyn AsyncWrite + Send + Unpin) {
        &mut self.sink
    }

    /// Flush, signal EOF, and wait for the backing task (if any)
    pub async fn finish(mut self) -> Result<()> {
        self.sink.shutdown().await?;
        drop(self.sink);
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| std::io::Error::other(e.to_string()))??;
        }
        Ok(())
    }
}

/// Uniform capability surface over a rooted subtree of a backend.
///
/// All paths are relative to the engine's configured root and use POSIX
/// separators. Engines normalize their backend's error taxonomy to this
/// contract: "not there" is a boolean, everything else propagates.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Cheap reachability check: the root exists and is accessible (local)
    /// or the server accepts our credentials (FTP). Never errors; failure
    /// is `false`.
    async fn validate(&self) -> bool;

    /// Single-level listing of `dir`, with junk files and any folder named
    /// in `ignored_folders` filtered out. Does not recurse.
    async fn list(&self, dir: &str, ignored_folders: &[String]) -> Result<Vec<FileInfo>>;

    /// Recursive flattening of `dir`, same filters as `list`, files only.
    #[allow(dead_code)] // Flat-listing consumers; exercised in tests
    async fn all_files(&self, dir: &str, ignored_folders: &[String]) -> Result<Vec<FileInfo>>;

    /// Open a byte stream reading `path`
    async fn open_reader(&self, path: &str) -> Result<ByteReader>;

    /// Open a byte stream writing `path`, creating missing parent
    /// directories on this side first
    async fn open_writer(&self, path: &str) -> Result<ByteWriter>;

    /// Whether `path` exists. Backend "not found" conditions map to
    /// `Ok(false)`; every other failure propagates.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Create `path` and any missing parents. Writers call this implicitly
    /// for their parent directory.
    #[allow(dead_code)] // Exercised in tests
    async fn ensure_dir(&self, path: &str) -> Result<()>;

    /// Remove the file at `path`
    async fn remove_file(&self, path: &str) -> Result<()>;

    /// Fresh metadata for `path`
    async fn metadata(&self, path: &str) -> Result<FileMeta>;

    /// Restore mtime (and mode where the backend supports it) on `path`.
    /// FTP engines degrade to a logged warning when the server refuses.
    async fn set_metadata(&self, path: &str, meta: &FileMeta) -> Result<()>;

    /// Drop any held session. Safe to call when never connected, and
    /// idempotent.
    async fn disconnect(&self);
}
