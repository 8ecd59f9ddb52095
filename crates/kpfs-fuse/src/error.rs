//! Error handling and mapping for the FUSE filesystem.
//!
//! This module provides conversion from projection errors to POSIX error
//! codes that FUSE can return to the kernel.

use kpfs_core::ProjectionError;
use std::io;
use thiserror::Error;

/// FUSE-specific errors that can occur during filesystem operations.
#[derive(Debug, Error)]
pub enum FuseError {
    /// Error from the projection layer.
    #[error("Projection error: {0}")]
    Projection(#[from] ProjectionError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid inode.
    #[error("Invalid inode: {0}")]
    InvalidInode(u64),

    /// Directory operation on a field.
    #[error("Not a directory: inode {0}")]
    NotADirectory(u64),

    /// File operation on a directory.
    #[error("Is a directory: inode {0}")]
    IsADirectory(u64),

    /// Any attempt to modify the filesystem.
    #[error("Read-only filesystem")]
    ReadOnly,

    /// Operation not supported.
    #[error("Operation not supported")]
    NotSupported,
}

impl FuseError {
    /// Converts this error to a libc error code for FUSE.
    pub fn to_errno(&self) -> i32 {
        match self {
            FuseError::Projection(e) => e.to_errno(),
            FuseError::Io(e) => e.to_errno(),
            FuseError::InvalidInode(_) => libc::ENOENT,
            FuseError::NotADirectory(_) => libc::ENOTDIR,
            FuseError::IsADirectory(_) => libc::EISDIR,
            FuseError::ReadOnly => libc::EROFS,
            FuseError::NotSupported => libc::ENOTSUP,
        }
    }
}

/// Result type for FUSE operations.
pub type FuseResult<T> = Result<T, FuseError>;

/// Extension trait to convert errors to errno.
pub trait ToErrno {
    /// Converts this error to a libc error code.
    fn to_errno(&self) -> i32;
}

impl ToErrno for ProjectionError {
    fn to_errno(&self) -> i32 {
        match self {
            ProjectionError::NotFound { .. } => libc::ENOENT,
            ProjectionError::InvalidOffset(_) => libc::EINVAL,
            ProjectionError::NotALeaf => libc::EISDIR,
        }
    }
}

impl ToErrno for io::Error {
    fn to_errno(&self) -> i32 {
        self.raw_os_error().unwrap_or(libc::EIO)
    }
}
