use super::*;
use block::DataBlocks;
use file::OpenFileTable;
use inode::InodeTable;

use bitflags::bitflags;
use log::{debug, info, warn};
use std::fs::File;
use std::io::Write;
use std::path::Path;

bitflags! {
    /// Flags accepted by [`FileSystem::open`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        /// Create the file if it does not exist.
        const CREATE = 0b0001;
        /// Drop the current contents of an existing file.
        const TRUNCATE = 0b0010;
        /// Start the cursor at the end of the file.
        const APPEND = 0b0100;
        /// With `CREATE`, fail if the file already exists.
        const EXCLUSIVE = 0b1000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub inumber: usize,
    pub kind: FileKind,
    pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    pub free_inodes: usize,
    pub free_blocks: usize,
    pub open_files: usize,
}

/// One file system instance: a flat root directory over fixed inode, data
/// block and open-file tables. Share it between threads behind an `Arc`.
///
/// Locks are taken in the order inode, open-file entry, then allocator and
/// block locks, which are never held while waiting on another lock.
pub struct FileSystem {
    config: Config,
    inodes: InodeTable,
    data: DataBlocks,
    files: OpenFileTable,
}

fn valid_pathname(path: &str) -> bool {
    path.len() > 1 && path.starts_with('/')
}

impl FileSystem {
    /// Build empty tables and create the root directory.
    pub fn init(config: Config) -> Result<Self> {
        let fs = Self {
            config,
            inodes: InodeTable::new(INODE_TABLE_SIZE, config.delay),
            data: DataBlocks::new(DATA_BLOCKS, config.delay),
            files: OpenFileTable::new(MAX_OPEN_FILES),
        };
        let root = fs.inodes.create(FileKind::Directory, &fs.data)?;
        if root != ROOT_DIR_INUM {
            return Err(FsError::RootMisplaced(root));
        }
        info!("file system ready ({config:?})");
        Ok(fs)
    }

    /// Tear the instance down. Handles still open are dropped with it.
    pub fn destroy(self) -> Result<()> {
        let open = self.files.open_count()?;
        if open > 0 {
            warn!("destroying file system with {open} open handles");
        }
        info!("file system destroyed");
        Ok(())
    }

    pub fn config(&self) -> Config {
        self.config
    }

    /// Inumber of `/name` in the root directory.
    pub fn lookup(&self, path: &str) -> Result<usize> {
        if !valid_pathname(path) {
            return Err(FsError::InvalidPath(path.to_string()));
        }
        dir::find(&self.inodes, &self.data, ROOT_DIR_INUM, &path[1..])
    }

    pub fn open(&self, path: &str, flags: OpenFlags) -> Result<usize> {
        let inumber = match self.lookup(path) {
            Ok(inumber) => {
                if flags.contains(OpenFlags::CREATE | OpenFlags::EXCLUSIVE) {
                    return Err(FsError::AlreadyExists(path.to_string()));
                }
                inumber
            }
            Err(FsError::NotFound(_)) if flags.contains(OpenFlags::CREATE) => {
                return self.create(path);
            }
            Err(e) => return Err(e),
        };

        let mut inode = self.inodes.get(inumber)?.write()?;
        if flags.contains(OpenFlags::TRUNCATE) && inode.size > 0 {
            mapping::release_blocks(&mut inode, &self.data)?;
            debug!("{path}: truncated");
        }
        let offset = if flags.contains(OpenFlags::APPEND) {
            inode.size
        } else {
            0
        };
        drop(inode);

        self.files.add(inumber, offset)
    }

    /// New empty file named by `path`, opened at offset 0. If the open-file
    /// table is full the file stays created.
    fn create(&self, path: &str) -> Result<usize> {
        let inumber = self.inodes.create(FileKind::File, &self.data)?;
        let name = &path[1..];
        if let Err(e) = dir::add_entry(&self.inodes, &self.data, ROOT_DIR_INUM, inumber, name) {
            warn!("{path}: no directory entry ({e}), dropping inode {inumber}");
            self.inodes.delete(inumber, &self.data)?;
            return Err(e);
        }
        debug!("{path}: created as inode {inumber}");
        self.files.add(inumber, 0)
    }

    pub fn close(&self, handle: usize) -> Result<()> {
        self.files.remove(handle)
    }

    /// Write `buf` at the handle's cursor. Returns the bytes accepted, which
    /// is less than `buf.len()` only when the file reaches [`MAX_BYTES`].
    pub fn write(&self, handle: usize, buf: &[u8]) -> Result<usize> {
        let inumber = self.files.get(handle)?.lock()?.inumber;
        let mut inode = self.inodes.get(inumber)?.write()?;
        let mut file = self.files.get(handle)?.lock()?;
        if file.inumber != inumber {
            return Err(FsError::InvalidHandle(handle));
        }
        mapping::write(&mut inode, &mut file, &self.data, buf)
    }

    /// Read into `buf` from the handle's cursor, up to the end of the file.
    pub fn read(&self, handle: usize, buf: &mut [u8]) -> Result<usize> {
        let inumber = self.files.get(handle)?.lock()?.inumber;
        let inode = self.inodes.get(inumber)?.read()?;
        let mut file = self.files.get(handle)?.lock()?;
        if file.inumber != inumber {
            return Err(FsError::InvalidHandle(handle));
        }
        mapping::read(&inode, &mut file, &self.data, buf)
    }

    /// Move the handle's cursor. Offsets past the end of the file are
    /// rejected, files have no holes.
    pub fn seek(&self, handle: usize, offset: usize) -> Result<()> {
        let inumber = self.files.get(handle)?.lock()?.inumber;
        let inode = self.inodes.get(inumber)?.read()?;
        let mut file = self.files.get(handle)?.lock()?;
        if file.inumber != inumber {
            return Err(FsError::InvalidHandle(handle));
        }
        if offset > inode.size {
            return Err(FsError::InvalidOffset {
                offset,
                size: inode.size,
            });
        }
        file.offset = offset;
        Ok(())
    }

    pub fn stat(&self, path: &str) -> Result<FileStat> {
        let inumber = self.lookup(path)?;
        let inode = self.inodes.get(inumber)?.read()?;
        Ok(FileStat {
            inumber,
            kind: inode.kind,
            size: inode.size,
        })
    }

    pub fn statfs(&self) -> Result<FsStats> {
        Ok(FsStats {
            free_inodes: self.inodes.free_count()?,
            free_blocks: self.data.free_count()?,
            open_files: self.files.open_count()?,
        })
    }

    /// Names and inumbers in the root directory.
    pub fn read_dir(&self) -> Result<Vec<(String, usize)>> {
        dir::entries(&self.inodes, &self.data, ROOT_DIR_INUM)
    }

    /// Copy the whole of `source_path` to `dest_path` on the host file
    /// system, replacing anything there.
    pub fn copy_to_external(&self, source_path: &str, dest_path: impl AsRef<Path>) -> Result<()> {
        let handle = self.open(source_path, OpenFlags::empty())?;
        let copied = self.copy_out(handle, dest_path.as_ref());
        let closed = self.close(handle);
        copied.and(closed)
    }

    fn copy_out(&self, handle: usize, dest_path: &Path) -> Result<()> {
        let mut dest = File::create(dest_path)?;
        let mut buf = [0u8; BLOCK_SIZE];
        let mut total = 0;
        loop {
            let n = self.read(handle, &mut buf)?;
            if n == 0 {
                break;
            }
            dest.write_all(&buf[..n])?;
            total += n;
        }
        dest.flush()?;
        debug!("copied {total} bytes to {}", dest_path.display());
        Ok(())
    }
}
