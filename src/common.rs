use core::mem::size_of;

/// root i-number
pub const ROOT_DIR_INUM: usize = 0;

/// block size
pub const BLOCK_SIZE: usize = 1024;

/// number of data blocks in the pool
pub const DATA_BLOCKS: usize = 1024;

/// number of inodes in the inode table
pub const INODE_TABLE_SIZE: usize = 50;

/// number of concurrently open files
pub const MAX_OPEN_FILES: usize = 20;

/// bytes reserved for a name in a directory entry, NUL included
pub const MAX_FILE_NAME: usize = 40;

/// direct blocks in inode
pub const MAX_DIRECT_BLOCKS: usize = 10;

/// slot of the inode block list holding the indirect block
pub const INDIRECT_SLOT: usize = MAX_DIRECT_BLOCKS;

/// direct slots plus the indirect slot
pub const INODE_BLOCK_SLOTS: usize = MAX_DIRECT_BLOCKS + 1;

/// block indices held by the indirect block
pub const INDIRECT_ENTRIES: usize = BLOCK_SIZE / size_of::<i32>();

/// bytes addressable through direct blocks only
pub const MAX_DIRECT_DATA_SIZE: usize = MAX_DIRECT_BLOCKS * BLOCK_SIZE;

/// max size of a file
pub const MAX_BYTES: usize = (MAX_DIRECT_BLOCKS + INDIRECT_ENTRIES) * BLOCK_SIZE;

/// encoded size of a directory entry: name followed by an i32 inumber
pub const DIR_ENTRY_SIZE: usize = MAX_FILE_NAME + size_of::<i32>();

/// entries held by a directory block
pub const MAX_DIR_ENTRIES: usize = BLOCK_SIZE / DIR_ENTRY_SIZE;

/// marks an empty directory entry or indirect slot
pub const EMPTY_SLOT: i32 = -1;

/// spin iterations emulating one secondary storage access
pub const DEFAULT_DELAY: usize = 5000;
