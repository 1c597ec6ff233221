mod dir_listing;
mod inode;
mod node_id;
mod stats;

pub mod path;

pub use dir_listing::*;
pub use inode::*;
pub use node_id::*;
pub use stats::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("is a directory: {0}")]
    IsADirectory(String),
    #[error("operation not permitted: {0}")]
    PermissionDenied(String),
    #[error("resource busy: {0}")]
    Busy(String),
    #[error("directory not empty: {0}")]
    NotEmpty(String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("store error: {0}")]
    DbError(String),
    #[error("decode error: {0}")]
    DecodeError(String),
}

impl FsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }
}

pub type FsResult<T> = std::result::Result<T, FsError>;

impl From<std::io::Error> for FsError {
    fn from(err: std::io::Error) -> Self {
        FsError::IoError(err.to_string())
    }
}
