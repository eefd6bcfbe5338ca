use super::*;
use bitmap::BitMap;
use latency::insert_delay;

use serde::{de::DeserializeOwned, Serialize};
use std::sync::{Mutex, MutexGuard};

/// One data block held in memory.
pub struct Block {
    data: [u8; BLOCK_SIZE],
}

impl Block {
    fn zeroed() -> Self {
        Self {
            data: [0; BLOCK_SIZE],
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn fill(&mut self, byte: u8) {
        self.data.fill(byte);
    }

    /// Decode the record stored at `offset`.
    pub fn get_ref<T>(&self, offset: usize) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let bytes = self.data.get(offset..).unwrap_or(&[]);
        Ok(bincode::deserialize(bytes)?)
    }

    /// Encode `value` at `offset`. Fails if it does not fit in the block.
    pub fn set<T>(&mut self, offset: usize, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        let mut bytes = self.data.get_mut(offset..).unwrap_or(&mut []);
        bincode::serialize_into(&mut bytes, value)?;
        Ok(())
    }
}

/// Fixed array of blocks addressed by index.
///
/// A block is reached only through the guard returned by [`BlockStore::get`],
/// so a borrowed region cannot outlive the critical section that fetched it.
/// Which file owns which block is not known here; callers hold the owning
/// inode's lock before touching a block.
pub struct BlockStore {
    blocks: Vec<Mutex<Block>>,
    delay: usize,
}

impl BlockStore {
    pub fn new(count: usize, delay: usize) -> Self {
        Self {
            blocks: (0..count).map(|_| Mutex::new(Block::zeroed())).collect(),
            delay,
        }
    }

    pub fn get(&self, bno: usize) -> Result<MutexGuard<'_, Block>> {
        let block = self.blocks.get(bno).ok_or(FsError::InvalidBlock(bno))?;
        insert_delay(self.delay);
        Ok(block.lock()?)
    }
}

/// The data block pool: free-map plus the blocks themselves.
pub struct DataBlocks {
    bitmap: BitMap,
    store: BlockStore,
}

impl DataBlocks {
    pub fn new(count: usize, delay: usize) -> Self {
        Self {
            bitmap: BitMap::new(Table::DataBlocks, count, delay),
            store: BlockStore::new(count, delay),
        }
    }

    /// First free block. The caller records the returned index in its
    /// mapping before anyone else can observe the block.
    pub fn alloc(&self) -> Result<usize> {
        self.bitmap.alloc()
    }

    pub fn free(&self, bno: usize) -> Result<()> {
        self.bitmap.dealloc(bno)?;
        Ok(())
    }

    pub fn get(&self, bno: usize) -> Result<MutexGuard<'_, Block>> {
        self.store.get(bno)
    }

    pub fn free_count(&self) -> Result<usize> {
        self.bitmap.free_count()
    }
}
