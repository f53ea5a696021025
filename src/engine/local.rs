use super::{is_junk_file, join_rel, ByteReader, ByteWriter, FileInfo, FileMeta, StorageEngine};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use filetime::FileTime;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;
use tokio::fs;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Local filesystem engine rooted at a directory
pub struct LocalEngine {
    root: PathBuf,
}

impl LocalEngine {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, rel: &str) -> PathBuf {
        let mut path = self.root.clone();
        for part in rel.split('/').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path
    }

    fn meta_from(metadata: &std::fs::Metadata) -> FileMeta {
        #[cfg(unix)]
        let mode = metadata.permissions().mode() & 0o7777;
        #[cfg(not(unix))]
        let mode = if metadata.permissions().readonly() {
            0o444
        } else {
            0o644
        };

        FileMeta {
            atime: metadata.accessed().unwrap_or(UNIX_EPOCH),
            mtime: metadata.modified().unwrap_or(UNIX_EPOCH),
            mode,
            size: metadata.len(),
        }
    }
}

#[async_trait]
impl StorageEngine for LocalEngine {
    async fn validate(&self) -> bool {
        match fs::metadata(&self.root).await {
            Ok(metadata) => metadata.is_dir(),
            Err(e) => {
                tracing::debug!("Root {} not accessible: {}", self.root.display(), e);
                false
            }
        }
    }

    async fn list(&self, dir: &str, ignored_folders: &[String]) -> Result<Vec<FileInfo>> {
        let resolved = self.resolve(dir);
        let mut entries = fs::read_dir(&resolved)
            .await
            .map_err(|e| SyncError::ReadDirError {
                path: resolved.clone(),
                source: e,
            })?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(SyncError::Io)? {
            let file_name = entry
                .file_name()
                .into_string()
                .map_err(|_| SyncError::InvalidPath { path: entry.path() })?;

            if is_junk_file(&file_name) {
                continue;
            }

            let metadata = entry.metadata().await.map_err(|e| SyncError::ReadDirError {
                path: entry.path(),
                source: e,
            })?;

            if metadata.is_dir() && ignored_folders.iter().any(|f| *f == file_name) {
                continue;
            }

            let meta = Self::meta_from(&metadata);
            files.push(FileInfo {
                relative_path: join_rel(dir, &file_name),
                file_name,
                is_dir: metadata.is_dir(),
                size: if metadata.is_dir() { 0 } else { metadata.len() },
                modified: meta.mtime,
                meta,
            });
        }

        Ok(files)
    }

    async fn all_files(&self, dir: &str, ignored_folders: &[String]) -> Result<Vec<FileInfo>> {
        // Iterative walk; async fns cannot recurse without boxing anyway
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
        let file = fs::File::open(self.resolve(path)).await.map_err(|e| {
            SyncError::TransferError {
                path: path.to_string(),
                source: e,
            }
        })?;
        Ok(Box::new(file))
    }

    async fn open_writer(&self, path: &str) -> Result<ByteWriter> {
        let resolved = self.resolve(path);
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent).await.map_err(SyncError::Io)?;
        }
        let file = fs::File::create(&resolved)
            .await
            .map_err(|e| SyncError::TransferError {
                path: path.to_string(),
                source: e,
            })?;
        Ok(ByteWriter::direct(Box::new(file)))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        match fs::metadata(self.resolve(path)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SyncError::Io(e)),
        }
    }

    async fn ensure_dir(&self, path: &str) -> Result<()> {
        fs::create_dir_all(self.resolve(path))
            .await
            .map_err(SyncError::Io)
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        fs::remove_file(self.resolve(path))
            .await
            .map_err(SyncError::Io)
    }

    async fn metadata(&self, path: &str) -> Result<FileMeta> {
        let metadata = fs::metadata(self.resolve(path)).await.map_err(SyncError::Io)?;
        Ok(Self::meta_from(&metadata))
    }

    async fn set_metadata(&self, path: &str, meta: &FileMeta) -> Result<()> {
        let resolved = self.resolve(path);
        let meta = *meta;
        tokio::task::spawn_blocking(move || -> Result<()> {
            filetime::set_file_times(
                &resolved,
                FileTime::from_system_time(meta.atime),
                FileTime::from_system_time(meta.mtime),
            )
            .map_err(SyncError::Io)?;

            #[cfg(unix)]
            std::fs::set_permissions(&resolved, std::fs::Permissions::from_mode(meta.mode))
                .map_err(SyncError::Io)?;

            Ok(())
        })
        .await
        .map_err(|e| SyncError::Io(std::io::Error::other(e.to_string())))?
    }

    async fn disconnect(&self) {
        // Nothing held open between operations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as std_fs;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_validate() {
        let temp = TempDir::new().unwrap();
        assert!(LocalEngine::new(temp.path()).validate().await);
        assert!(!LocalEngine::new("/nonexistent/dsync-root").validate().await);
    }

    #[tokio::test]
    async fn test_list_filters_junk_and_ignored() {
        let temp = TempDir::new().unwrap();
        std_fs::write(temp.path().join("keep.txt"), "data").unwrap();
        std_fs::write(temp.path().join(".DS_Store"), "junk").unwrap();
        std_fs::create_dir(temp.path().join("node_modules")).unwrap();
        std_fs::create_dir(temp.path().join("src")).unwrap();

        let engine = LocalEngine::new(temp.path());
        let entries = engine
            .list("", &["node_modules".to_string()])
            .await
            .unwrap();

        let names: Vec<_> = entries.iter().map(|e| e.file_name.as_str()).collect();
        assert!(names.contains(&"keep.txt"));
        assert!(names.contains(&"src"));
        assert!(!names.contains(&".DS_Store"));
        assert!(!names.contains(&"node_modules"));
    }

    #[tokio::test]
    async fn test_list_relative_paths_are_posix() {
        let temp = TempDir::new().unwrap();
        std_fs::create_dir(temp.path().join("sub")).unwrap();
        std_fs::write(temp.path().join("sub/file.txt"), "data").unwrap();

        let engine = LocalEngine::new(temp.path());
        let entries = engine.list("sub", &[]).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].relative_path, "sub/file.txt");
    }

    #[tokio::test]
    async fn test_all_files_recurses() {
        let temp = TempDir::new().unwrap();
        std_fs::create_dir_all(temp.path().join("a/b")).unwrap();
        std_fs::write(temp.path().join("top.txt"), "1").unwrap();
        std_fs::write(temp.path().join("a/mid.txt"), "22").unwrap();
        std_fs::write(temp.path().join("a/b/deep.txt"), "333").unwrap();

        let engine = LocalEngine::new(temp.path());
        let mut files = engine.all_files("", &[]).await.unwrap();
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        let paths: Vec<_> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a/b/deep.txt", "a/mid.txt", "top.txt"]);
        assert!(files.iter().all(|f| !f.is_dir));
    }

    #[tokio::test]
    async fn test_all_files_respects_ignored() {
        let temp = TempDir::new().unwrap();
        std_fs::create_dir(temp.path().join("skipme")).unwrap();
        std_fs::write(temp.path().join("skipme/hidden.txt"), "x").unwrap();
        std_fs::write(temp.path().join("seen.txt"), "y").unwrap();

        let engine = LocalEngine::new(temp.path());
        let files = engine
            .all_files("", &["skipme".to_string()])
            .await
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_name, "seen.txt");
    }

    #[tokio::test]
    async fn test_exists_maps_not_found() {
        let temp = TempDir::new().unwrap();
        std_fs::write(temp.path().join("here.txt"), "x").unwrap();

        let engine = LocalEngine::new(temp.path());
        assert!(engine.exists("here.txt").await.unwrap());
        assert!(!engine.exists("gone.txt").await.unwrap());
        assert!(!engine.exists("no/such/dir/file.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_stream_roundtrip() {
        let temp = TempDir::new().unwrap();
        let engine = LocalEngine::new(temp.path());

        let mut writer = engine.open_writer("out/data.bin").await.unwrap();
        writer.sink_mut().write_all(b"hello dsync").await.unwrap();
        writer.finish().await.unwrap();

        let mut reader = engine.open_reader("out/data.bin").await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello dsync");
    }

    #[tokio::test]
    async fn test_metadata_roundtrip() {
        let temp = TempDir::new().unwrap();
        std_fs::write(temp.path().join("meta.txt"), "content").unwrap();

        let engine = LocalEngine::new(temp.path());
        let mut meta = engine.metadata("meta.txt").await.unwrap();
        assert_eq!(meta.size, 7);

        meta.mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        engine.set_metadata("meta.txt", &meta).await.unwrap();

        let fresh = engine.metadata("meta.txt").await.unwrap();
        assert_eq!(fresh.mtime, meta.mtime);
    }

    #[tokio::test]
    async fn test_ensure_dir_nested() {
        let temp = TempDir::new().unwrap();
        let engine = LocalEngine::new(temp.path());

        engine.ensure_dir("a/b/c").await.unwrap();
        assert!(temp.path().join("a/b/c").is_dir());

        // Idempotent
        engine.ensure_dir("a/b/c").await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_file() {
        let temp = TempDir::new().unwrap();
        std_fs::write(temp.path().join("doomed.txt"), "x").unwrap();

        let engine = LocalEngine::new(temp.path());
        engine.remove_file("doomed.txt").await.unwrap();
        assert!(!temp.path().join("doomed.txt").exists());

        // Removing something that vanished is an operational error
        assert!(engine.remove_file("doomed.txt").await.is_err());
    }
}
