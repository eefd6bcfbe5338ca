//! Directory entries.
//!
//! A directory owns a single data block holding [`MAX_DIR_ENTRIES`] fixed
//! size entries. Lookups and inserts scan it linearly; the block lock is
//! taken per probed entry, not for the whole scan, so two concurrent creates
//! of the same name can both miss in `find` and both insert. Duplicate names
//! are not rejected: the first matching entry wins on lookup. Names match
//! exactly; a name too long to store is refused, never cut.

use super::*;
use block::{Block, DataBlocks};
use inode::{FileKind, InodeTable};

use log::debug;
use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Name as stored in an entry: at most `MAX_FILE_NAME - 1` bytes, NUL padded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirName([u8; MAX_FILE_NAME]);

impl DirName {
    /// Empty names, names with a NUL and names of `MAX_FILE_NAME` bytes or
    /// more do not fit.
    pub fn new(name: &str) -> Result<Self> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() >= MAX_FILE_NAME || bytes.contains(&0) {
            return Err(FsError::InvalidPath(name.to_string()));
        }
        let mut raw = [0; MAX_FILE_NAME];
        raw[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8] {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(MAX_FILE_NAME);
        &self.0[..len]
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }
}

impl Serialize for DirName {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut tuple = serializer.serialize_tuple(MAX_FILE_NAME)?;
        for byte in &self.0 {
            tuple.serialize_element(byte)?;
        }
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for DirName {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct NameVisitor;

        impl<'de> Visitor<'de> for NameVisitor {
            type Value = DirName;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{MAX_FILE_NAME} name bytes")
            }

            fn visit_seq<A>(self, mut seq: A) -> std::result::Result<DirName, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut raw = [0u8; MAX_FILE_NAME];
                for (i, byte) in raw.iter_mut().enumerate() {
                    *byte = seq
                        .next_element()?
                        .ok_or_else(|| <A::Error as de::Error>::invalid_length(i, &self))?;
                }
                Ok(DirName(raw))
            }
        }

        deserializer.deserialize_tuple(MAX_FILE_NAME, NameVisitor)
    }
}

/// Encoded as [`DIR_ENTRY_SIZE`] bytes: the name, then the inumber
/// ([`EMPTY_SLOT`] when unused).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: DirName,
    pub inumber: i32,
}

impl DirEntry {
    fn empty() -> Self {
        Self {
            name: DirName([0; MAX_FILE_NAME]),
            inumber: EMPTY_SLOT,
        }
    }

    fn inumber(&self) -> Option<usize> {
        usize::try_from(self.inumber).ok()
    }
}

/// Mark every entry of a fresh directory block empty.
pub fn init_block(block: &mut Block) -> Result<()> {
    let empty = DirEntry::empty();
    for i in 0..MAX_DIR_ENTRIES {
        block.set(i * DIR_ENTRY_SIZE, &empty)?;
    }
    Ok(())
}

/// Entry block of directory `dir`.
fn entry_block(inodes: &InodeTable, dir: usize) -> Result<usize> {
    let inode = inodes.get(dir)?.read()?;
    if inode.kind != FileKind::Directory {
        return Err(FsError::NotDirectory(dir));
    }
    inode.blocks[0].ok_or(FsError::NullBlock(0))
}

/// Put `(name, sub)` in the first empty entry of `dir`.
pub fn add_entry(
    inodes: &InodeTable,
    data: &DataBlocks,
    dir: usize,
    sub: usize,
    name: &str,
) -> Result<()> {
    inodes.get(sub)?;
    let sub_inumber = i32::try_from(sub).map_err(|_| FsError::InvalidInumber(sub))?;
    let bno = entry_block(inodes, dir)?;
    let entry = DirEntry {
        name: DirName::new(name)?,
        inumber: sub_inumber,
    };
    for i in 0..MAX_DIR_ENTRIES {
        let offset = i * DIR_ENTRY_SIZE;
        let mut block = data.get(bno)?;
        if block.get_ref::<DirEntry>(offset)?.inumber == EMPTY_SLOT {
            block.set(offset, &entry)?;
            debug!("dir {dir}: entry {i} -> {name:?} (inode {sub})");
            return Ok(());
        }
    }
    Err(FsError::TableExhausted(Table::Directory))
}

/// Inumber of the first entry of `dir` named `name`.
pub fn find(inodes: &InodeTable, data: &DataBlocks, dir: usize, name: &str) -> Result<usize> {
    let bno = entry_block(inodes, dir)?;
    for i in 0..MAX_DIR_ENTRIES {
        let entry: DirEntry = data.get(bno)?.get_ref(i * DIR_ENTRY_SIZE)?;
        if let Some(inumber) = entry.inumber() {
            if entry.name.as_bytes() == name.as_bytes() {
                return Ok(inumber);
            }
        }
    }
    Err(FsError::NotFound(name.to_string()))
}

/// Used entries of `dir`, in slot order.
pub fn entries(inodes: &InodeTable, data: &DataBlocks, dir: usize) -> Result<Vec<(String, usize)>> {
    let bno = entry_block(inodes, dir)?;
    let mut found = Vec::new();
    for i in 0..MAX_DIR_ENTRIES {
        let entry: DirEntry = data.get(bno)?.get_ref(i * DIR_ENTRY_SIZE)?;
        if let Some(inumber) = entry.inumber() {
            found.push((entry.name.to_string_lossy(), inumber));
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_root() -> (InodeTable, DataBlocks) {
        let inodes = InodeTable::new(INODE_TABLE_SIZE, 0);
        let data = DataBlocks::new(DATA_BLOCKS, 0);
        assert_eq!(
            inodes.create(FileKind::Directory, &data).unwrap(),
            ROOT_DIR_INUM
        );
        (inodes, data)
    }

    #[test]
    fn entry_layout() {
        assert_eq!(MAX_DIR_ENTRIES, 23);
        let entry = DirEntry {
            name: DirName::new("f1").unwrap(),
            inumber: 3,
        };
        let bytes = bincode::serialize(&entry).unwrap();
        assert_eq!(bytes.len(), DIR_ENTRY_SIZE);
        assert_eq!(&bytes[..3], b"f1\0");
        assert_eq!(&bytes[MAX_FILE_NAME..], &3i32.to_le_bytes());
    }

    #[test]
    fn add_then_find() {
        let (inodes, data) = with_root();
        let f = inodes.create(FileKind::File, &data).unwrap();
        add_entry(&inodes, &data, ROOT_DIR_INUM, f, "f1").unwrap();
        assert_eq!(find(&inodes, &data, ROOT_DIR_INUM, "f1").unwrap(), f);
        assert!(matches!(
            find(&inodes, &data, ROOT_DIR_INUM, "f2"),
            Err(FsError::NotFound(_))
        ));
        assert_eq!(
            entries(&inodes, &data, ROOT_DIR_INUM).unwrap(),
            vec![("f1".to_string(), f)]
        );
    }

    #[test]
    fn duplicates_first_match_wins() {
        let (inodes, data) = with_root();
        let a = inodes.create(FileKind::File, &data).unwrap();
        let b = inodes.create(FileKind::File, &data).unwrap();
        add_entry(&inodes, &data, ROOT_DIR_INUM, a, "same").unwrap();
        add_entry(&inodes, &data, ROOT_DIR_INUM, b, "same").unwrap();
        assert_eq!(find(&inodes, &data, ROOT_DIR_INUM, "same").unwrap(), a);
        assert_eq!(entries(&inodes, &data, ROOT_DIR_INUM).unwrap().len(), 2);
    }

    #[test]
    fn longest_name_matches_only_itself() {
        let (inodes, data) = with_root();
        let f = inodes.create(FileKind::File, &data).unwrap();
        let longest = "x".repeat(MAX_FILE_NAME - 1);
        add_entry(&inodes, &data, ROOT_DIR_INUM, f, &longest).unwrap();
        assert_eq!(find(&inodes, &data, ROOT_DIR_INUM, &longest).unwrap(), f);

        let extended = format!("{longest}y");
        assert!(matches!(
            find(&inodes, &data, ROOT_DIR_INUM, &extended),
            Err(FsError::NotFound(_))
        ));
        assert!(matches!(
            find(&inodes, &data, ROOT_DIR_INUM, &longest[1..]),
            Err(FsError::NotFound(_))
        ));
        assert!(matches!(
            add_entry(&inodes, &data, ROOT_DIR_INUM, f, &extended),
            Err(FsError::InvalidPath(_))
        ));
        assert_eq!(
            entries(&inodes, &data, ROOT_DIR_INUM).unwrap(),
            vec![(longest, f)]
        );
    }

    #[test]
    fn rejects_bad_arguments() {
        let (inodes, data) = with_root();
        let f = inodes.create(FileKind::File, &data).unwrap();
        assert!(matches!(
            add_entry(&inodes, &data, ROOT_DIR_INUM, f, ""),
            Err(FsError::InvalidPath(_))
        ));
        assert!(matches!(
            add_entry(&inodes, &data, ROOT_DIR_INUM, INODE_TABLE_SIZE, "x"),
            Err(FsError::InvalidInumber(_))
        ));
        assert!(matches!(
            add_entry(&inodes, &data, f, ROOT_DIR_INUM, "x"),
            Err(FsError::NotDirectory(_))
        ));
        assert!(matches!(
            find(&inodes, &data, f, "x"),
            Err(FsError::NotDirectory(_))
        ));
    }

    #[test]
    fn full_directory() {
        let (inodes, data) = with_root();
        for i in 0..MAX_DIR_ENTRIES {
            add_entry(&inodes, &data, ROOT_DIR_INUM, 1, &format!("f{i}")).unwrap();
        }
        assert!(matches!(
            add_entry(&inodes, &data, ROOT_DIR_INUM, 1, "extra"),
            Err(FsError::TableExhausted(Table::Directory))
        ));
    }
}
