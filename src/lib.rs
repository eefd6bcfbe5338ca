//! In-memory file system engine: a fixed inode table, a fixed pool of data
//! blocks and an open-file table, shared by many threads.

mod bitmap;
mod block;
mod common;
mod config;
mod dir;
mod error;
mod file;
mod fs;
mod inode;
mod latency;
mod mapping;

pub use common::*;
pub use config::Config;
pub use error::{FsError, Result, Table};
pub use fs::{FileStat, FileSystem, FsStats, OpenFlags};
pub use inode::FileKind;
