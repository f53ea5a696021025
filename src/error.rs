use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read directory: {path}\nCause: {source}\nCheck that the directory exists and you have read permissions.")]
    ReadDirError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to transfer file: {path}\nCause: {source}\nCheck disk space and write permissions on the destination.")]
    TransferError {
        path: String,
        source: std::io::Error,
    },

    #[error("FTP error: {0}")]
    Ftp(#[from] suppaftp::FtpError),

    #[error("Invalid path: {path}\nPaths must be valid UTF-8 and not contain invalid characters.")]
    InvalidPath { path: PathBuf },

    #[error("No {side} storage engine configured\nSet both sides before comparing or syncing.")]
    EngineMissing { side: &'static str },

    #[error("Diff entry not found: {id}")]
    NodeNotFound { id: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
