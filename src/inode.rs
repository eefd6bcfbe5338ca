use super::*;
use bitmap::BitMap;
use block::DataBlocks;
use latency::insert_delay;

use log::{debug, warn};
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
}

/// inode in memory
#[derive(Debug, Clone)]
pub struct Inode {
    /// File type
    pub kind: FileKind,
    /// Size of file (bytes)
    pub size: usize,
    /// Direct data blocks, then the indirect block in [`INDIRECT_SLOT`]
    pub blocks: [Option<usize>; INODE_BLOCK_SLOTS],
    /// `(logical, physical)` block most recently written through the mapping
    /// engine. Consulted before the indirect block; the block list stays
    /// authoritative and release clears it.
    pub data_block: Option<(usize, usize)>,
}

impl Inode {
    fn new(kind: FileKind) -> Self {
        Self {
            kind,
            size: 0,
            blocks: [None; INODE_BLOCK_SLOTS],
            data_block: None,
        }
    }

    pub fn indirect_block(&self) -> Option<usize> {
        self.blocks[INDIRECT_SLOT]
    }
}

/// Fixed table of inodes. Slots are recycled only through the free-map; an
/// inode never moves.
pub struct InodeTable {
    bitmap: BitMap,
    inodes: Vec<RwLock<Inode>>,
    delay: usize,
}

impl InodeTable {
    pub fn new(count: usize, delay: usize) -> Self {
        Self {
            bitmap: BitMap::new(Table::Inodes, count, delay),
            inodes: (0..count)
                .map(|_| RwLock::new(Inode::new(FileKind::File)))
                .collect(),
            delay,
        }
    }

    /// Take the first free inode. A directory also gets its entry block; if
    /// that allocation fails the inode is handed back.
    pub fn create(&self, kind: FileKind, data: &DataBlocks) -> Result<usize> {
        let inumber = self.bitmap.alloc()?;
        insert_delay(self.delay);
        let mut inode = self.inodes[inumber].write()?;
        *inode = Inode::new(kind);

        if kind == FileKind::Directory {
            let bno = match data.alloc() {
                Ok(bno) => bno,
                Err(e) => {
                    warn!("inode {inumber}: no block for directory entries, rolling back");
                    drop(inode);
                    self.bitmap.dealloc(inumber)?;
                    return Err(e);
                }
            };
            let mut block = data.get(bno)?;
            dir::init_block(&mut block)?;
            drop(block);
            inode.size = BLOCK_SIZE;
            inode.blocks[0] = Some(bno);
        }

        debug!("inode {inumber} created as {kind:?}");
        Ok(inumber)
    }

    /// Release the inode and every block it maps.
    pub fn delete(&self, inumber: usize, data: &DataBlocks) -> Result<()> {
        insert_delay(self.delay);
        let mut inode = self.get(inumber)?.write()?;
        if !self.bitmap.is_taken(inumber)? {
            return Err(FsError::InvalidInumber(inumber));
        }
        mapping::release_blocks(&mut inode, data)?;
        self.bitmap.dealloc(inumber)?;
        debug!("inode {inumber} deleted");
        Ok(())
    }

    /// The inode slot for `inumber`. Only the range is checked: the slot may
    /// be free, or be freed and reused while the caller still holds it.
    pub fn get(&self, inumber: usize) -> Result<&RwLock<Inode>> {
        let inode = self
            .inodes
            .get(inumber)
            .ok_or(FsError::InvalidInumber(inumber))?;
        insert_delay(self.delay);
        Ok(inode)
    }

    pub fn free_count(&self) -> Result<usize> {
        self.bitmap.free_count()
    }
}
