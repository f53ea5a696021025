use crate::engine::StorageEngine;
use crate::error::{Result, SyncError};
use std::sync::Arc;
use tokio::io::BufReader;

/// 256KB keeps both local disks and the FTP data connection busy
const PIPE_BUF: usize = 256 * 1024;

/// Stream one file from `from` to `to` and restore its metadata.
///
/// The read side is checked first: a file that vanished between compare and
/// sync is skipped silently (returns false) rather than failing the run.
/// Everything else propagates and aborts the caller's loop.
pub async fn transfer_file(
    from: &Arc<dyn StorageEngine>,
    to: &Arc<dyn StorageEngine>,
    path: &str,
) -> Result<bool> {
    if !from.exists(path).await? {
        tracing::debug!("Skipping {}: gone since compare", path);
        return Ok(false);
    }

    let meta = from.metadata(path).await?;
    let reader = from.open_reader(path).await?;
    let mut writer = to.open_writer(path).await?;

    let mut buffered = BufReader::with_capacity(PIPE_BUF, reader);
    tokio::io::copy_buf(&mut buffered, writer.sink_mut())
        .await
        .map_err(|e| SyncError::TransferError {
            path: path.to_string(),
            source: e,
        })?;
    writer.finish().await?;

    to.set_metadata(path, &meta).await?;
    tracing::debug!("Transferred {} ({} bytes)", path, meta.size);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::local::LocalEngine;
    use std::fs;
    use tempfile::TempDir;

    fn engine(temp: &TempDir) -> Arc<dyn StorageEngine> {
        Arc::new(LocalEngine::new(temp.path()))
    }

    #[tokio::test]
    async fn test_transfer_creates_parents_and_copies() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir(src.path().join("docs")).unwrap();
        fs::write(src.path().join("docs/a.txt"), "payload").unwrap();

        let transferred = transfer_file(&engine(&src), &engine(&dst), "docs/a.txt")
            .await
            .unwrap();

        assert!(transferred);
        assert_eq!(
            fs::read_to_string(dst.path().join("docs/a.txt")).unwrap(),
            "payload"
        );
    }

    #[tokio::test]
    async fn test_transfer_preserves_mtime() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::write(src.path().join("a.txt"), "payload").unwrap();

        transfer_file(&engine(&src), &engine(&dst), "a.txt")
            .await
            .unwrap();

        let src_mtime = fs::metadata(src.path().join("a.txt"))
            .unwrap()
            .modified()
            .unwrap();
        let dst_mtime = fs::metadata(dst.path().join("a.txt"))
            .unwrap()
            .modified()
            .unwrap();
        let drift = src_mtime
            .duration_since(dst_mtime)
            .unwrap_or_else(|e| e.duration());
        assert!(drift.as_secs() < 2, "mtime drift too large: {:?}", drift);
    }

    #[tokio::test]
    async fn test_transfer_skips_vanished_source() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();

        let transferred = transfer_file(&engine(&src), &engine(&dst), "never-there.txt")
            .await
            .unwrap();

        assert!(!transferred);
        assert!(!dst.path().join("never-there.txt").exists());
    }
}
