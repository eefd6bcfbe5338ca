use super::*;
use bitmap::BitMap;

use log::debug;
use std::sync::Mutex;

/// Session on an open file: which inode, and where the next read or write
/// starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFile {
    pub inumber: usize,
    pub offset: usize,
}

pub struct OpenFileTable {
    bitmap: BitMap,
    entries: Vec<Mutex<OpenFile>>,
}

impl OpenFileTable {
    pub fn new(count: usize) -> Self {
        Self {
            // volatile state, no emulated storage latency
            bitmap: BitMap::new(Table::OpenFiles, count, 0),
            entries: (0..count).map(|_| Mutex::new(OpenFile::default())).collect(),
        }
    }

    pub fn add(&self, inumber: usize, offset: usize) -> Result<usize> {
        let handle = self.bitmap.alloc()?;
        *self.entries[handle].lock()? = OpenFile { inumber, offset };
        debug!("handle {handle} opened on inode {inumber} at {offset}");
        Ok(handle)
    }

    pub fn remove(&self, handle: usize) -> Result<()> {
        if !self.bitmap.dealloc(handle)? {
            return Err(FsError::InvalidHandle(handle));
        }
        debug!("handle {handle} closed");
        Ok(())
    }

    /// Entry of a handle that is currently open. The entry may still be
    /// closed and handed out again while the caller holds it.
    pub fn get(&self, handle: usize) -> Result<&Mutex<OpenFile>> {
        if !self.bitmap.is_taken(handle)? {
            return Err(FsError::InvalidHandle(handle));
        }
        Ok(&self.entries[handle])
    }

    pub fn open_count(&self) -> Result<usize> {
        Ok(self.bitmap.len() - self.bitmap.free_count()?)
    }
}
