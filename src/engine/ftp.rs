use super::{is_junk_file, join_rel, ByteReader, ByteWriter, FileInfo, FileMeta, StorageEngine};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use suppaftp::list::File as FtpListEntry;
use suppaftp::native_tls::TlsConnector;
use suppaftp::types::FileType;
use suppaftp::{FtpError, NativeTlsConnector, NativeTlsFtpStream, Status};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::{StreamReader, SyncIoBridge};

/// Chunk size for pumping the blocking data connection into the async side
const STREAM_CHUNK: usize = 64 * 1024;

/// FTP connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FtpConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Upgrade the control connection to explicit FTPS
    #[serde(default)]
    pub secure: bool,
}

fn default_port() -> u16 {
    21
}

/// FTP storage engine.
///
/// Holds exactly one protocol session, opened lazily on the first real
/// operation. FTP sessions are stateful and not safe to share, so every
/// operation runs on a blocking thread while holding the session lock, and
/// callers disconnect after each logical phase.
pub struct FtpEngine {
    config: FtpConfig,
    root: String,
    client: Arc<Mutex<Option<NativeTlsFtpStream>>>,
}

impl FtpEngine {
    pub fn new(config: FtpConfig, root: impl Into<String>) -> Self {
        Self {
            config,
            root: root.into(),
            client: Arc::new(Mutex::new(None)),
        }
    }

    fn resolve(&self, rel: &str) -> String {
        resolve_posix(&self.root, rel)
    }

    /// Run `op` against the connected session on a blocking thread
    async fn with_client<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut NativeTlsFtpStream) -> Result<T> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = lock_session(&client)?;
            let stream = connect_if_needed(&mut guard, &config)?;
            op(stream)
        })
        .await
        .map_err(|e| SyncError::Io(std::io::Error::other(e.to_string())))?
    }
}

fn resolve_posix(root: &str, rel: &str) -> String {
    let mut out = root.trim_end_matches('/').to_string();
    for part in rel.split('/').filter(|p| !p.is_empty()) {
        out.push('/');
        out.push_str(part);
    }
    if out.is_empty() {
        "/".to_string()
    } else {
        out
    }
}

/// Parent of a root-relative path ("a/b/c.txt" -> "a/b", "c.txt" -> "")
fn parent_rel(rel: &str) -> &str {
    match rel.trim_end_matches('/').rfind('/') {
        Some(pos) => &rel[..pos],
        None => "",
    }
}

fn lock_session(
    client: &Mutex<Option<NativeTlsFtpStream>>,
) -> Result<MutexGuard<'_, Option<NativeTlsFtpStream>>> {
    client
        .lock()
        .map_err(|e| SyncError::Io(std::io::Error::other(format!("FTP session lock: {}", e))))
}

fn connect_if_needed<'a>(
    guard: &'a mut Option<NativeTlsFtpStream>,
    config: &FtpConfig,
) -> Result<&'a mut NativeTlsFtpStream> {
    match guard {
        Some(stream) => Ok(stream),
        None => {
            tracing::debug!("Connecting to ftp://{}:{}", config.host, config.port);
            let stream = NativeTlsFtpStream::connect((config.host.as_str(), config.port))?;
            let mut stream = if config.secure {
                let connector =
                    TlsConnector::new().map_err(|e| SyncError::Config(e.to_string()))?;
                stream.into_secure(NativeTlsConnector::from(connector), &config.host)?
            } else {
                stream
            };
            stream.login(&config.user, &config.password)?;
            stream.transfer_type(FileType::Binary)?;
            Ok(guard.insert(stream))
        }
    }
}

/// Create every missing component of an absolute directory path.
///
/// mkdir answers for already-present components are not errors worth
/// surfacing; a genuinely unwritable path fails at the transfer that follows.
fn mkdir_all(ftp: &mut NativeTlsFtpStream, absolute: &str) {
    let mut acc = String::new();
    for part in absolute.split('/').filter(|p| !p.is_empty()) {
        acc.push('/');
        acc.push_str(part);
        if let Err(e) = ftp.mkdir(&acc) {
            tracing::trace!("mkdir {}: {}", acc, e);
        }
    }
}

fn naive_to_system(naive: NaiveDateTime) -> SystemTime {
    SystemTime::from(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

/// MFMT wants YYYYMMDDHHMMSS in UTC
fn mfmt_stamp(mtime: SystemTime) -> String {
    DateTime::<Utc>::from(mtime).format("%Y%m%d%H%M%S").to_string()
}

fn io_other(e: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::other(e.to_string())
}

fn parse_list_lines(
    lines: Vec<String>,
    dir: &str,
    ignored_folders: &[String],
) -> Vec<FileInfo> {
    let mut files = Vec::new();
    for line in lines {
        let Ok(entry) = FtpListEntry::try_from(line.as_str()) else {
            tracing::trace!("Skipping unparsed LIST line: {}", line);
            continue;
        };

        let name = entry.name().to_string();
        if name == "." || name == ".." || is_junk_file(&name) {
            continue;
        }
        if entry.is_directory() && ignored_folders.iter().any(|f| *f == name) {
            continue;
        }

        let is_dir = entry.is_directory();
        let size = if is_dir { 0 } else { entry.size() as u64 };
        let modified = entry.modified();
        files.push(FileInfo {
            relative_path: join_rel(dir, &name),
            file_name: name,
            is_dir,
            size,
            modified,
            meta: FileMeta {
                atime: modified,
                mtime: modified,
                // LIST output has no reliable mode bits
                mode: if is_dir { 0o755 } else { 0o644 },
                size,
            },
        });
    }
    files
}

#[async_trait]
impl StorageEngine for FtpEngine {
    async fn validate(&self) -> bool {
        let client = Arc::clone(&self.client);
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let Ok(mut guard) = client.lock() else {
                return false;
            };
            match connect_if_needed(&mut guard, &config) {
                // Session stays open for the phase that follows
                Ok(_) => true,
                Err(e) => {
                    tracing::debug!("FTP validation failed: {}", e);
                    *guard = None;
                    false
                }
            }
        })
        .await
        .unwrap_or(false)
    }

    async fn list(&self, dir: &str, ignored_folders: &[String]) -> Result<Vec<FileInfo>> {
        let resolved = self.resolve(dir);
        let dir = dir.to_string();
        let ignored = ignored_folders.to_vec();
        self.with_client(move |ftp| {
            let lines = ftp.list(Some(&resolved))?;
            Ok(parse_list_lines(lines, &dir, &ignored))
        })
        .await
    }

    async fn all_files(&self, dir: &str, ignored_folders: &[String]) -> Result<Vec<FileInfo>> {
        let mut files = Vec::new();
        let mut pending = vec![dir.to_string()];

        while let Some(current) = pending.pop() {
            for entry in self.list(&current, ignored_folders).await? {
                if entry.is_dir {
                    pending.push(entry.relative_path);
                } else {
                    files.push(entry);
                }
            }
        }

        Ok(files)
    }

    async fn open_reader(&self, path: &str) -> Result<ByteReader> {
        let resolved = self.resolve(path);
        let client = Arc::clone(&self.client);
        let config = self.config.clone();
        let (tx, rx) = tokio::sync::mpsc::channel::<std::io::Result<Bytes>>(8);

        // The whole download runs on one blocking thread while holding the
        // session lock; the channel capacity is the backpressure window.
        tokio::task::spawn_blocking(move || {
            let mut guard = match lock_session(&client) {
                Ok(guard) => guard,
                Err(e) => {
                    let _ = tx.blocking_send(Err(io_other(e)));
                    return;
                }
            };
            let ftp = match connect_if_needed(&mut guard, &config) {
                Ok(ftp) => ftp,
                Err(e) => {
                    let _ = tx.blocking_send(Err(io_other(e)));
                    return;
                }
            };
            let mut data = match ftp.retr_as_stream(&resolved) {
                Ok(data) => data,
                Err(e) => {
                    let _ = tx.blocking_send(Err(io_other(e)));
                    return;
                }
            };

            let mut buf = vec![0u8; STREAM_CHUNK];
            let mut aborted = false;
            loop {
                match data.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                            // Reader side went away; stop the transfer
                            aborted = true;
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.blocking_send(Err(e));
                        aborted = true;
                        break;
                    }
                }
            }

            let finish = if aborted {
                ftp.abort(data)
            } else {
                ftp.finalize_retr_stream(data)
            };
            if let Err(e) = finish {
                let _ = tx.blocking_send(Err(io_other(e)));
            }
        });

        Ok(Box::new(StreamReader::new(ReceiverStream::new(rx))))
    }

    async fn open_writer(&self, path: &str) -> Result<ByteWriter> {
        let resolved = self.resolve(path);
        let parent = self.resolve(parent_rel(path));
        let client = Arc::clone(&self.client);
        let config = self.config.clone();
        let (near, far) = tokio::io::duplex(STREAM_CHUNK);

        let task = tokio::task::spawn_blocking(move || -> Result<()> {
            let mut guard = lock_session(&client)?;
            let ftp = connect_if_needed(&mut guard, &config)?;
            mkdir_all(ftp, &parent);

            let mut data = ftp.put_with_stream(&resolved)?;
            let mut bridge = SyncIoBridge::new(far);
            std::io::copy(&mut bridge, &mut data).map_err(|e| SyncError::TransferError {
                path: resolved.clone(),
                source: e,
            })?;
            ftp.finalize_put_stream(data)?;
            Ok(())
        });

        Ok(ByteWriter::backed(Box::new(near), task))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let resolved = self.resolve(path);
        self.with_client(move |ftp| match ftp.size(&resolved) {
            Ok(_) => Ok(true),
            // 550: file unavailable / not found
            Err(FtpError::UnexpectedResponse(resp))
                if resp.status == Status::FileUnavailable =>
            {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        })
        .await
    }

    async fn ensure_dir(&self, path: &str) -> Result<()> {
        let resolved = self.resolve(path);
        self.with_client(move |ftp| {
            mkdir_all(ftp, &resolved);
            Ok(())
        })
        .await
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        let resolved = self.resolve(path);
        self.with_client(move |ftp| Ok(ftp.rm(&resolved)?)).await
    }

    async fn metadata(&self, path: &str) -> Result<FileMeta> {
        let resolved = self.resolve(path);
        self.with_client(move |ftp| {
            let size = ftp.size(&resolved)? as u64;
            let mtime = match ftp.mdtm(&resolved) {
                Ok(naive) => naive_to_system(naive),
                // Fall back to the parent listing when MDTM is unsupported
                Err(e) => {
                    tracing::debug!("MDTM failed for {}: {}", resolved, e);
                    let parent = parent_rel(&resolved);
                    let name = resolved.rsplit('/').next().unwrap_or(&resolved);
                    let lines = ftp.list(Some(if parent.is_empty() { "/" } else { parent }))?;
                    lines
                        .iter()
                        .filter_map(|line| FtpListEntry::try_from(line.as_str()).ok())
                        .find(|entry| entry.name() == name)
                        .map(|entry| entry.modified())
                        .ok_or_else(|| {
                            SyncError::Io(std::io::Error::new(
                                std::io::ErrorKind::NotFound,
                                format!("FTP file not found: {}", resolved),
                            ))
                        })?
                }
            };
            Ok(FileMeta {
                atime: mtime,
                mtime,
                mode: 0o644,
                size,
            })
        })
        .await
    }

    async fn set_metadata(&self, path: &str, meta: &FileMeta) -> Result<()> {
        let resolved = self.resolve(path);
        let stamp = mfmt_stamp(meta.mtime);
        self.with_client(move |ftp| {
            // MFMT is not universal; losing mtime fidelity must not fail the
            // transfer
            if let Err(e) =
                ftp.custom_command(format!("MFMT {} {}", stamp, resolved), &[Status::File])
            {
                tracing::warn!("Failed to set remote mtime for {}: {}", resolved, e);
            }
            Ok(())
        })
        .await
    }

    async fn disconnect(&self) {
        let client = Arc::clone(&self.client);
        let _ = tokio::task::spawn_blocking(move || {
            if let Ok(mut guard) = client.lock() {
                if let Some(mut stream) = guard.take() {
                    if let Err(e) = stream.quit() {
                        tracing::debug!("FTP quit failed: {}", e);
                    }
                }
            }
        })
        .await;
    }
}
