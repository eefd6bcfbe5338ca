//! Error taxonomy of the file system.
//!
//! Every failure is returned to the immediate caller; nothing in the engine
//! retries. Each variant maps to one POSIX errno through [`FsError::errno`].

use std::fmt;
use std::sync::PoisonError;

use thiserror::Error;

/// Fixed-capacity tables whose free slots can run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Inodes,
    DataBlocks,
    OpenFiles,
    Directory,
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Table::Inodes => "inode",
            Table::DataBlocks => "data block",
            Table::OpenFiles => "open file",
            Table::Directory => "directory",
        };
        f.write_str(name)
    }
}

impl Table {
    /// Error for an index outside this table.
    pub(crate) fn invalid(self, index: usize) -> FsError {
        match self {
            Table::Inodes | Table::Directory => FsError::InvalidInumber(index),
            Table::DataBlocks => FsError::InvalidBlock(index),
            Table::OpenFiles => FsError::InvalidHandle(index),
        }
    }
}

#[derive(Debug, Error)]
pub enum FsError {
    #[error("invalid path name {0:?}")]
    InvalidPath(String),

    #[error("no such file {0:?}")]
    NotFound(String),

    #[error("file {0:?} already exists")]
    AlreadyExists(String),

    #[error("{0} table is full")]
    TableExhausted(Table),

    #[error("invalid file handle {0}")]
    InvalidHandle(usize),

    #[error("invalid inode number {0}")]
    InvalidInumber(usize),

    #[error("inode {0} is not a directory")]
    NotDirectory(usize),

    #[error("zero-length request")]
    ZeroLengthRequest,

    /// A block allocation failed in the middle of a write. The bytes already
    /// copied stay in the file.
    #[error("block allocation failed after {written} bytes")]
    AllocationFailure { written: usize },

    /// Logical block of a file that has no data block behind it.
    #[error("logical block {0} is not mapped")]
    NullBlock(usize),

    #[error("data block {0} is out of range")]
    InvalidBlock(usize),

    #[error("offset {offset} lies past the end of the file ({size} bytes)")]
    InvalidOffset { offset: usize, size: usize },

    #[error("root directory landed on inode {0}")]
    RootMisplaced(usize),

    #[error("block encoding error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("lock poisoned")]
    LockPoisoned,
}

impl<T> From<PoisonError<T>> for FsError {
    fn from(_: PoisonError<T>) -> Self {
        FsError::LockPoisoned
    }
}

impl FsError {
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            FsError::InvalidPath(_) => libc::EINVAL,
            FsError::NotFound(_) => libc::ENOENT,
            FsError::AlreadyExists(_) => libc::EEXIST,
            FsError::TableExhausted(Table::OpenFiles) => libc::ENFILE,
            FsError::TableExhausted(_) => libc::ENOSPC,
            FsError::InvalidHandle(_) => libc::EBADF,
            FsError::InvalidInumber(_) => libc::EINVAL,
            FsError::NotDirectory(_) => libc::ENOTDIR,
            FsError::ZeroLengthRequest => libc::EINVAL,
            FsError::AllocationFailure { .. } => libc::ENOSPC,
            FsError::NullBlock(_) => libc::EIO,
            FsError::InvalidBlock(_) => libc::EIO,
            FsError::InvalidOffset { .. } => libc::EINVAL,
            FsError::RootMisplaced(_) => libc::EIO,
            FsError::Codec(_) => libc::EIO,
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            FsError::LockPoisoned => libc::EIO,
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;
