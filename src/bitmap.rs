use super::*;
use latency::insert_delay;

use core::mem::size_of;
use log::debug;
use std::sync::Mutex;

/// Bits of allocation state read per emulated storage access.
const BITS_PER_ACCESS: usize = BLOCK_SIZE / size_of::<u32>();

/// Free-map backing first-fit allocation of one table.
pub struct BitMap {
    table: Table,
    /// # of slots
    len: usize,
    bits: Mutex<Vec<u8>>,
    delay: usize,
}

impl BitMap {
    pub fn new(table: Table, len: usize, delay: usize) -> Self {
        Self {
            table,
            len,
            bits: Mutex::new(vec![0; len.div_ceil(8)]),
            delay,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Take the first free slot.
    ///
    /// The lock is taken per probe, so a full scan never holds it across the
    /// whole table; the test and the flip of one slot are still atomic.
    pub fn alloc(&self) -> Result<usize> {
        for bno in 0..self.len {
            if bno % BITS_PER_ACCESS == 0 {
                insert_delay(self.delay);
            }
            let byte = bno / 8;
            let mask = 1 << (bno % 8);
            let mut bits = self.bits.lock()?;
            if bits[byte] & mask == 0 {
                bits[byte] |= mask;
                debug!("{} {} allocated", self.table, bno);
                return Ok(bno);
            }
        }
        Err(FsError::TableExhausted(self.table))
    }

    /// Flip `bno` back to free. Returns whether it was taken; a slot freed
    /// twice is not reported as an error.
    pub fn dealloc(&self, bno: usize) -> Result<bool> {
        if bno >= self.len {
            return Err(self.table.invalid(bno));
        }
        insert_delay(self.delay);
        let byte = bno / 8;
        let mask = 1 << (bno % 8);
        let mut bits = self.bits.lock()?;
        let taken = bits[byte] & mask != 0;
        bits[byte] &= !mask;
        debug!("{} {} freed", self.table, bno);
        Ok(taken)
    }

    pub fn is_taken(&self, bno: usize) -> Result<bool> {
        if bno >= self.len {
            return Err(self.table.invalid(bno));
        }
        let bits = self.bits.lock()?;
        Ok(bits[bno / 8] & (1 << (bno % 8)) != 0)
    }

    pub fn free_count(&self) -> Result<usize> {
        let bits = self.bits.lock()?;
        let taken: u32 = bits.iter().map(|byte| byte.count_ones()).sum();
        Ok(self.len - taken as usize)
    }
}
