use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::archive;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("io error: {0}")]
    IoError(#[from] io::Error),
    #[error("root does not exist: {0:?}")]
    RootDoesntExist(PathBuf),
    #[error("archive read error: {0}")]
    ArchiveReadError(#[from] archive::ReadError),
    #[error("archive write error: {0}")]
    ArchiveWriteError(#[from] archive::WriteError),
    #[error("walk dir error: {0}")]
    WalkDirError(#[from] walkdir::Error),
    #[error("malformed message: {0}")]
    MessageError(#[from] serde_json::Error),
    /// The channel closed while an answer was still outstanding.
    #[error("the peer disconnected")]
    Disconnected,
    /// A decision was requested before any channel was attached.
    #[error("no channel to the peer is attached")]
    NoChannel,
    #[error("invalid action id {0:?}")]
    InvalidActionId(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
