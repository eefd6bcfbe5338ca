//! Block mapping: turns a file cursor into data blocks and copies bytes.
//!
//! The first [`MAX_DIRECT_BLOCKS`] logical blocks of a file live in the
//! inode's direct slots. Logical block `n >= MAX_DIRECT_BLOCKS` lives in entry
//! `n - MAX_DIRECT_BLOCKS` of the indirect block, whose own index sits in
//! [`INDIRECT_SLOT`]. Entries of the indirect block are appended in logical
//! order.
//!
//! A request is split at [`MAX_DIRECT_DATA_SIZE`]: entirely below it goes to
//! the direct routine, entirely above to the indirect routine, and a request
//! straddling it is cut in two. Blocks are allocated when the cursor first
//! enters an unmapped logical block. A failed allocation ends the write with
//! [`FsError::AllocationFailure`]; bytes copied before it stay in place.
//!
//! The inode remembers the last block written, by logical and physical
//! number; indirect lookups for that logical block skip the indirect block.
//!
//! Callers hold the inode lock (write lock to write, read lock to read) and
//! the open-file entry lock for the whole call.

use super::*;
use block::DataBlocks;
use file::OpenFile;
use inode::Inode;

use core::mem::size_of;
use log::{error, warn};

/// How a request at `offset` of `len` bytes divides between the regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Direct,
    Indirect,
    /// The first `direct_len` bytes are direct, the rest indirect.
    Mixed { direct_len: usize },
}

pub fn classify(offset: usize, len: usize) -> Region {
    if offset + len <= MAX_DIRECT_DATA_SIZE {
        Region::Direct
    } else if offset >= MAX_DIRECT_DATA_SIZE {
        Region::Indirect
    } else {
        Region::Mixed {
            direct_len: MAX_DIRECT_DATA_SIZE - offset,
        }
    }
}

/// Write `buf` at the cursor, growing the mapping as needed. The length is
/// clamped so the file never exceeds [`MAX_BYTES`]; a full file accepts 0
/// bytes.
pub fn write(
    inode: &mut Inode,
    file: &mut OpenFile,
    data: &DataBlocks,
    buf: &[u8],
) -> Result<usize> {
    if buf.is_empty() {
        return Err(FsError::ZeroLengthRequest);
    }
    if file.offset > inode.size {
        return Err(FsError::InvalidOffset {
            offset: file.offset,
            size: inode.size,
        });
    }
    let len = buf.len().min(MAX_BYTES - file.offset);
    if len < buf.len() {
        warn!(
            "inode {}: write of {} bytes at {} clamped to {}",
            file.inumber,
            buf.len(),
            file.offset,
            len
        );
    }
    if len == 0 {
        return Ok(0);
    }
    let buf = &buf[..len];

    let written = match classify(file.offset, len) {
        Region::Direct => write_direct_region(inode, file, data, buf),
        Region::Indirect => write_indirect(inode, file, data, buf),
        Region::Mixed { direct_len } => {
            let (head, tail) = buf.split_at(direct_len);
            write_direct_region(inode, file, data, head).and_then(|direct| {
                write_indirect(inode, file, data, tail)
                    .map(|indirect| direct + indirect)
                    .map_err(|e| shift(e, direct))
            })
        }
    };
    if let Err(e) = &written {
        error!("inode {}: write failed: {e}", file.inumber);
    }
    written
}

/// Allocate the indirect block on first use, then write through it.
fn write_indirect(
    inode: &mut Inode,
    file: &mut OpenFile,
    data: &DataBlocks,
    buf: &[u8],
) -> Result<usize> {
    handle_indirect_block(inode, data).map_err(|e| after(e, 0))?;
    write_indirect_region(inode, file, data, buf)
}

/// Read up to `buf.len()` bytes at the cursor, stopping at the end of file.
pub fn read(
    inode: &Inode,
    file: &mut OpenFile,
    data: &DataBlocks,
    buf: &mut [u8],
) -> Result<usize> {
    if buf.is_empty() {
        return Err(FsError::ZeroLengthRequest);
    }
    let len = buf.len().min(inode.size.saturating_sub(file.offset));
    if len == 0 {
        return Ok(0);
    }
    let buf = &mut buf[..len];

    match classify(file.offset, len) {
        Region::Direct => read_direct_region(inode, file, data, buf),
        Region::Indirect => read_indirect_region(inode, file, data, buf),
        Region::Mixed { direct_len } => {
            let (head, tail) = buf.split_at_mut(direct_len);
            let direct = read_direct_region(inode, file, data, head)?;
            let indirect = read_indirect_region(inode, file, data, tail)?;
            Ok(direct + indirect)
        }
    }
}

/// Write `buf` through the direct slots. The cursor must stay below
/// [`MAX_DIRECT_DATA_SIZE`].
pub fn write_direct_region(
    inode: &mut Inode,
    file: &mut OpenFile,
    data: &DataBlocks,
    buf: &[u8],
) -> Result<usize> {
    let mut written = 0;
    while written < buf.len() {
        let lbn = file.offset / BLOCK_SIZE;
        if lbn >= MAX_DIRECT_BLOCKS {
            break;
        }
        let bno = match inode.blocks[lbn] {
            Some(bno) => bno,
            None => direct_block_insert(inode, lbn, data).map_err(|e| after(e, written))?,
        };
        written += copy_in(inode, file, data, bno, &buf[written..])?;
    }
    Ok(written)
}

/// Write `buf` through the indirect block, which must already exist.
pub fn write_indirect_region(
    inode: &mut Inode,
    file: &mut OpenFile,
    data: &DataBlocks,
    buf: &[u8],
) -> Result<usize> {
    let indirect = inode
        .indirect_block()
        .ok_or(FsError::NullBlock(MAX_DIRECT_BLOCKS))?;
    let mut written = 0;
    while written < buf.len() {
        let lbn = file.offset / BLOCK_SIZE;
        let bno = match indirect_lookup(inode, data, indirect, lbn)? {
            Some(bno) => bno,
            None => indirect_block_insert(indirect, lbn, data).map_err(|e| after(e, written))?,
        };
        written += copy_in(inode, file, data, bno, &buf[written..])?;
    }
    Ok(written)
}

pub fn read_direct_region(
    inode: &Inode,
    file: &mut OpenFile,
    data: &DataBlocks,
    buf: &mut [u8],
) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let lbn = file.offset / BLOCK_SIZE;
        let slot = if lbn < MAX_DIRECT_BLOCKS {
            inode.blocks[lbn]
        } else {
            None
        };
        let bno = slot.ok_or(FsError::NullBlock(lbn))?;
        total += copy_out(file, data, bno, &mut buf[total..])?;
    }
    Ok(total)
}

pub fn read_indirect_region(
    inode: &Inode,
    file: &mut OpenFile,
    data: &DataBlocks,
    buf: &mut [u8],
) -> Result<usize> {
    let indirect = inode
        .indirect_block()
        .ok_or(FsError::NullBlock(MAX_DIRECT_BLOCKS))?;
    let mut total = 0;
    while total < buf.len() {
        let lbn = file.offset / BLOCK_SIZE;
        let bno = indirect_lookup(inode, data, indirect, lbn)?.ok_or(FsError::NullBlock(lbn))?;
        total += copy_out(file, data, bno, &mut buf[total..])?;
    }
    Ok(total)
}

/// Allocate a zeroed block for direct slot `lbn`.
fn direct_block_insert(inode: &mut Inode, lbn: usize, data: &DataBlocks) -> Result<usize> {
    let bno = data.alloc()?;
    data.get(bno)?.fill(0);
    inode.blocks[lbn] = Some(bno);
    Ok(bno)
}

/// Allocate a zeroed block for logical block `lbn` and record it in the
/// indirect block.
fn indirect_block_insert(indirect: usize, lbn: usize, data: &DataBlocks) -> Result<usize> {
    let bno = data.alloc()?;
    data.get(bno)?.fill(0);
    let entry = i32::try_from(bno).map_err(|_| FsError::InvalidBlock(bno))?;
    data.get(indirect)?.set(indirect_offset(lbn)?, &entry)?;
    Ok(bno)
}

/// Make sure the inode has an indirect block, with every entry empty.
fn handle_indirect_block(inode: &mut Inode, data: &DataBlocks) -> Result<usize> {
    if let Some(bno) = inode.indirect_block() {
        return Ok(bno);
    }
    let bno = data.alloc()?;
    // every byte 0xff reads back as EMPTY_SLOT
    data.get(bno)?.fill(0xff);
    inode.blocks[INDIRECT_SLOT] = Some(bno);
    Ok(bno)
}

/// Give back every block `inode` maps and empty it.
pub fn release_blocks(inode: &mut Inode, data: &DataBlocks) -> Result<()> {
    if let Some(indirect) = inode.indirect_block() {
        for bno in indirect_entries(data, indirect)? {
            data.free(bno)?;
        }
    }
    for slot in inode.blocks.iter_mut() {
        if let Some(bno) = slot.take() {
            data.free(bno)?;
        }
    }
    inode.size = 0;
    inode.data_block = None;
    Ok(())
}

fn indirect_offset(lbn: usize) -> Result<usize> {
    match lbn.checked_sub(MAX_DIRECT_BLOCKS) {
        Some(slot) if slot < INDIRECT_ENTRIES => Ok(slot * size_of::<i32>()),
        _ => Err(FsError::NullBlock(lbn)),
    }
}

/// Block of logical block `lbn`, taken from the inode's cached block when it
/// is the one asked for, else from the indirect block.
fn indirect_lookup(
    inode: &Inode,
    data: &DataBlocks,
    indirect: usize,
    lbn: usize,
) -> Result<Option<usize>> {
    match inode.data_block {
        Some((cached, bno)) if cached == lbn => Ok(Some(bno)),
        _ => indirect_entry(data, indirect, lbn),
    }
}

fn indirect_entry(data: &DataBlocks, indirect: usize, lbn: usize) -> Result<Option<usize>> {
    let offset = indirect_offset(lbn)?;
    let entry: i32 = data.get(indirect)?.get_ref(offset)?;
    Ok(usize::try_from(entry).ok())
}

/// Every block recorded in the indirect block, in logical order.
fn indirect_entries(data: &DataBlocks, indirect: usize) -> Result<Vec<usize>> {
    let block = data.get(indirect)?;
    let mut entries = Vec::new();
    for slot in 0..INDIRECT_ENTRIES {
        let entry: i32 = block.get_ref(slot * size_of::<i32>())?;
        if let Ok(bno) = usize::try_from(entry) {
            entries.push(bno);
        }
    }
    Ok(entries)
}

/// Copy as much of `src` as fits in block `bno` at the cursor.
fn copy_in(
    inode: &mut Inode,
    file: &mut OpenFile,
    data: &DataBlocks,
    bno: usize,
    src: &[u8],
) -> Result<usize> {
    let start = file.offset % BLOCK_SIZE;
    let n = src.len().min(BLOCK_SIZE - start);
    data.get(bno)?.data_mut()[start..start + n].copy_from_slice(&src[..n]);
    inode.data_block = Some((file.offset / BLOCK_SIZE, bno));
    file.offset += n;
    inode.size = inode.size.max(file.offset);
    Ok(n)
}

/// Copy as much of block `bno` as fits in `dst` from the cursor.
fn copy_out(file: &mut OpenFile, data: &DataBlocks, bno: usize, dst: &mut [u8]) -> Result<usize> {
    let start = file.offset % BLOCK_SIZE;
    let n = dst.len().min(BLOCK_SIZE - start);
    dst[..n].copy_from_slice(&data.get(bno)?.data()[start..start + n]);
    file.offset += n;
    Ok(n)
}

/// An allocation failure after `written` bytes of the current region.
fn after(e: FsError, written: usize) -> FsError {
    match e {
        FsError::TableExhausted(Table::DataBlocks) => FsError::AllocationFailure { written },
        e => e,
    }
}

/// Account for `by` bytes written by an earlier region.
fn shift(e: FsError, by: usize) -> FsError {
    match e {
        FsError::AllocationFailure { written } => FsError::AllocationFailure {
            written: written + by,
        },
        e => e,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        inode: Inode,
        file: OpenFile,
        data: DataBlocks,
    }

    impl Fixture {
        fn new(blocks: usize) -> Self {
            Self {
                inode: Inode {
                    kind: FileKind::File,
                    size: 0,
                    blocks: [None; INODE_BLOCK_SLOTS],
                    data_block: None,
                },
                file: OpenFile::default(),
                data: DataBlocks::new(blocks, 0),
            }
        }

        fn write(&mut self, buf: &[u8]) -> Result<usize> {
            write(&mut self.inode, &mut self.file, &self.data, buf)
        }

        fn read_all(&mut self) -> Vec<u8> {
            self.file.offset = 0;
            let mut buf = vec![0; self.inode.size + 1];
            let n = read(&self.inode, &mut self.file, &self.data, &mut buf).unwrap();
            buf.truncate(n);
            buf
        }

        fn indirect_entries(&self) -> Vec<usize> {
            let Some(indirect) = self.inode.indirect_block() else {
                return Vec::new();
            };
            indirect_entries(&self.data, indirect).unwrap()
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn classification() {
        assert_eq!(classify(0, MAX_DIRECT_DATA_SIZE), Region::Direct);
        assert_eq!(classify(MAX_DIRECT_DATA_SIZE, 1), Region::Indirect);
        assert_eq!(
            classify(MAX_DIRECT_DATA_SIZE - 10, 20),
            Region::Mixed { direct_len: 10 }
        );
        assert_eq!(
            classify(0, MAX_DIRECT_DATA_SIZE + 1),
            Region::Mixed {
                direct_len: MAX_DIRECT_DATA_SIZE
            }
        );
    }

    #[test]
    fn exact_direct_capacity_uses_no_indirect_block() {
        let mut fx = Fixture::new(DATA_BLOCKS);
        let input = pattern(MAX_DIRECT_DATA_SIZE);
        assert_eq!(fx.write(&input).unwrap(), MAX_DIRECT_DATA_SIZE);
        assert!(fx.inode.blocks[..MAX_DIRECT_BLOCKS].iter().all(Option::is_some));
        assert_eq!(fx.inode.indirect_block(), None);
        assert_eq!(fx.data.free_count().unwrap(), DATA_BLOCKS - MAX_DIRECT_BLOCKS);
        assert_eq!(fx.read_all(), input);
    }

    #[test]
    fn one_byte_past_direct_capacity() {
        let mut fx = Fixture::new(DATA_BLOCKS);
        let mut input = pattern(MAX_DIRECT_DATA_SIZE);
        input.push(b'!');
        assert_eq!(fx.write(&input).unwrap(), input.len());
        assert!(fx.inode.indirect_block().is_some());
        let entries = fx.indirect_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(fx.data.get(entries[0]).unwrap().data()[0], b'!');
        // 10 direct + indirect block + 1 indirect data block
        assert_eq!(
            fx.data.free_count().unwrap(),
            DATA_BLOCKS - MAX_DIRECT_BLOCKS - 2
        );
        assert_eq!(fx.read_all(), input);
    }

    #[test]
    fn straddling_write_matches_split_writes() {
        let tail = pattern(20);
        let head = vec![b'h'; MAX_DIRECT_DATA_SIZE - 10];

        let mut once = Fixture::new(DATA_BLOCKS);
        once.write(&head).unwrap();
        assert_eq!(once.write(&tail).unwrap(), 20);

        let mut twice = Fixture::new(DATA_BLOCKS);
        twice.write(&head).unwrap();
        assert_eq!(twice.write(&tail[..10]).unwrap(), 10);
        assert_eq!(twice.inode.indirect_block(), None);
        assert_eq!(twice.write(&tail[10..]).unwrap(), 10);

        assert_eq!(once.inode.size, MAX_DIRECT_DATA_SIZE + 10);
        assert_eq!(once.read_all(), twice.read_all());
    }

    #[test]
    fn indirect_entries_follow_logical_order() {
        let mut fx = Fixture::new(DATA_BLOCKS);
        // stray allocations make block ids differ from logical positions
        for _ in 0..5 {
            fx.data.alloc().unwrap();
        }
        fx.write(&pattern(MAX_DIRECT_DATA_SIZE + 3 * BLOCK_SIZE)).unwrap();
        assert_eq!(fx.inode.blocks[0], Some(5));
        assert_eq!(fx.inode.indirect_block(), Some(15));
        let indirect = 15;
        assert_eq!(indirect_entry(&fx.data, indirect, MAX_DIRECT_BLOCKS).unwrap(), Some(16));
        assert_eq!(indirect_entry(&fx.data, indirect, MAX_DIRECT_BLOCKS + 1).unwrap(), Some(17));
        assert_eq!(indirect_entry(&fx.data, indirect, MAX_DIRECT_BLOCKS + 2).unwrap(), Some(18));
        assert_eq!(indirect_entry(&fx.data, indirect, MAX_DIRECT_BLOCKS + 3).unwrap(), None);
        assert_eq!(fx.indirect_entries(), vec![16, 17, 18]);
    }

    #[test]
    fn capacity_is_clamped() {
        let mut fx = Fixture::new(DATA_BLOCKS);
        let input = pattern(MAX_BYTES + 100);
        assert_eq!(fx.write(&input).unwrap(), MAX_BYTES);
        assert_eq!(fx.inode.size, MAX_BYTES);
        assert_eq!(fx.write(b"x").unwrap(), 0);
        assert_eq!(fx.inode.size, MAX_BYTES);
        assert_eq!(fx.read_all(), &input[..MAX_BYTES]);
    }

    #[test]
    fn allocation_failure_keeps_partial_write() {
        // 10 direct blocks, the indirect block and 2 indirect data blocks
        let mut fx = Fixture::new(MAX_DIRECT_BLOCKS + 3);
        let input = pattern(MAX_DIRECT_DATA_SIZE + 5 * BLOCK_SIZE);
        let err = fx.write(&input).unwrap_err();
        let written = MAX_DIRECT_DATA_SIZE + 2 * BLOCK_SIZE;
        assert!(matches!(err, FsError::AllocationFailure { written: w } if w == written));
        assert_eq!(fx.inode.size, written);
        assert_eq!(fx.read_all(), &input[..written]);
    }

    #[test]
    fn overwrite_in_place_allocates_nothing() {
        let mut fx = Fixture::new(DATA_BLOCKS);
        fx.write(&vec![b'a'; 3 * BLOCK_SIZE]).unwrap();
        let free = fx.data.free_count().unwrap();
        fx.file.offset = BLOCK_SIZE - 2;
        fx.write(b"xyzw").unwrap();
        assert_eq!(fx.data.free_count().unwrap(), free);
        assert_eq!(fx.inode.size, 3 * BLOCK_SIZE);
        let content = fx.read_all();
        assert_eq!(&content[BLOCK_SIZE - 3..BLOCK_SIZE + 3], b"axyzwa");
    }

    #[test]
    fn cursor_past_end_is_rejected() {
        let mut fx = Fixture::new(DATA_BLOCKS);
        fx.file.offset = 4;
        assert!(matches!(
            fx.write(b"x"),
            Err(FsError::InvalidOffset { offset: 4, size: 0 })
        ));
    }

    #[test]
    fn read_stops_at_end_of_file() {
        let mut fx = Fixture::new(DATA_BLOCKS);
        fx.write(b"hello").unwrap();
        fx.file.offset = 3;
        let mut buf = [0; 16];
        assert_eq!(read(&fx.inode, &mut fx.file, &fx.data, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"lo");
        assert_eq!(read(&fx.inode, &mut fx.file, &fx.data, &mut buf).unwrap(), 0);
        assert!(matches!(
            read(&fx.inode, &mut fx.file, &fx.data, &mut []),
            Err(FsError::ZeroLengthRequest)
        ));
    }

    #[test]
    fn unmapped_block_is_a_read_error() {
        let mut fx = Fixture::new(DATA_BLOCKS);
        fx.inode.size = 10;
        let mut buf = [0; 10];
        assert!(matches!(
            read(&fx.inode, &mut fx.file, &fx.data, &mut buf),
            Err(FsError::NullBlock(0))
        ));
    }

    #[test]
    fn release_returns_every_block() {
        let mut fx = Fixture::new(DATA_BLOCKS);
        fx.write(&pattern(MAX_DIRECT_DATA_SIZE + 4 * BLOCK_SIZE)).unwrap();
        assert!(fx.data.free_count().unwrap() < DATA_BLOCKS);
        release_blocks(&mut fx.inode, &fx.data).unwrap();
        assert_eq!(fx.data.free_count().unwrap(), DATA_BLOCKS);
        assert_eq!(fx.inode.size, 0);
        assert!(fx.inode.blocks.iter().all(Option::is_none));
    }

    #[test]
    fn last_written_block_is_cached() {
        let mut fx = Fixture::new(DATA_BLOCKS);
        fx.write(&pattern(2 * BLOCK_SIZE + 1)).unwrap();
        assert_eq!(fx.inode.data_block, Some((2, fx.inode.blocks[2].unwrap())));
        release_blocks(&mut fx.inode, &fx.data).unwrap();
        assert_eq!(fx.inode.data_block, None);
    }

    #[test]
    fn cached_block_skips_indirect_lookup() {
        let mut fx = Fixture::new(DATA_BLOCKS);
        fx.write(&vec![b'a'; MAX_DIRECT_DATA_SIZE + 10]).unwrap();
        let (lbn, bno) = fx.inode.data_block.unwrap();
        assert_eq!(lbn, MAX_DIRECT_BLOCKS);
        let indirect = fx.inode.indirect_block().unwrap();
        // with the indirect entry wiped only the cache still knows the block
        fx.data
            .get(indirect)
            .unwrap()
            .set(indirect_offset(lbn).unwrap(), &EMPTY_SLOT)
            .unwrap();
        let free = fx.data.free_count().unwrap();
        assert_eq!(fx.write(b"bbbbb").unwrap(), 5);
        assert_eq!(fx.data.free_count().unwrap(), free);
        assert_eq!(&fx.data.get(bno).unwrap().data()[8..15], b"aabbbbb");

        // the next block is not cached and goes through the indirect block
        fx.write(&vec![b'c'; BLOCK_SIZE]).unwrap();
        assert_eq!(fx.data.free_count().unwrap(), free - 1);
        assert_eq!(fx.inode.data_block.map(|(lbn, _)| lbn), Some(MAX_DIRECT_BLOCKS + 1));
    }
}
