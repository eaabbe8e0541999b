use crate::storage::PageId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backup already in progress or not idle")]
    AlreadyRunning,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("backup verification failed: {0}")]
    VerificationFailed(String),

    #[error("backup cancelled by user")]
    Cancelled,

    #[error("backup not found at {0}")]
    BackupMissing(String),

    #[error("restore target already exists: {0}")]
    TargetExists(String),

    #[error("corrupt backup metadata: {0}")]
    CorruptMetadata(String),

    #[error("page {0} not preserved in shadow file")]
    NotPreserved(PageId),

    #[error("invalid page index {0}")]
    InvalidPageId(PageId),

    #[error("storage error: {0}")]
    Storage(String),
}
