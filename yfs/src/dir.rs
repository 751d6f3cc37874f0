//! Directory content: a packed table of fixed size `(inum, name)` records.
//! A record with inum 0 is a free slot that later entries may reuse.

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::bmap;
use crate::error::{Result, YfsError};
use crate::io::BlockStorage;
use crate::layout::{RawDirEntry, DIRNAMELEN, DIR_ENTRY_SIZE};
use crate::node::{Inode, InodeNumber, InodeType};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub inum: InodeNumber,
    pub name: String,
}

/// `.` and `..` only ever appear through [`seed`].
pub fn is_reserved(name: &str) -> bool {
    name == "." || name == ".."
}

pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.contains('\0') {
        return Err(YfsError::InvalidName(name.to_string()));
    }
    if name.len() > DIRNAMELEN {
        return Err(YfsError::NameTooLong);
    }
    Ok(())
}

fn encode(inum: InodeNumber, name: &str) -> Result<RawDirEntry> {
    let inum = i16::try_from(inum)
        .map_err(|_| YfsError::Corrupted(format!("inode {} does not fit an entry", inum)))?;
    let mut raw = RawDirEntry::new_zeroed();
    raw.inum = inum;
    raw.name[..name.len()].copy_from_slice(name.as_bytes());
    Ok(raw)
}

fn decode_name(raw: &RawDirEntry) -> String {
    let len = raw
        .name
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(DIRNAMELEN);
    String::from_utf8_lossy(&raw.name[..len]).into_owned()
}

/// The directory inode, or `NotADirectory` if `inum` names something else.
pub fn directory<T: BlockStorage>(store: &mut Store<T>, inum: InodeNumber) -> Result<Inode> {
    let inode = store.live_inode(inum)?;
    match inode.kind {
        InodeType::Directory => Ok(inode),
        InodeType::Regular | InodeType::Symlink => Err(YfsError::NotADirectory),
        InodeType::Free => Err(YfsError::NotFound),
    }
}

/// Every record with its byte offset, free slots included.
fn slots<T: BlockStorage>(store: &mut Store<T>, dir: &Inode) -> Result<Vec<(u32, RawDirEntry)>> {
    let content = bmap::read(store, dir, 0, dir.size as usize)?;
    Ok(content
        .chunks_exact(DIR_ENTRY_SIZE)
        .enumerate()
        .filter_map(|(index, chunk)| {
            RawDirEntry::read_from(chunk).map(|raw| ((index * DIR_ENTRY_SIZE) as u32, raw))
        })
        .collect())
}

pub fn entries<T: BlockStorage>(store: &mut Store<T>, dir_inum: InodeNumber) -> Result<Vec<DirEntry>> {
    let dir = directory(store, dir_inum)?;
    Ok(slots(store, &dir)?
        .into_iter()
        .filter(|(_, raw)| raw.inum != 0)
        .map(|(_, raw)| DirEntry {
            inum: raw.inum as InodeNumber,
            name: decode_name(&raw),
        })
        .collect())
}

/// Looks `name` up in a single directory. No symlinks are followed.
pub fn lookup<T: BlockStorage>(
    store: &mut Store<T>,
    dir_inum: InodeNumber,
    name: &str,
) -> Result<Option<InodeNumber>> {
    Ok(entries(store, dir_inum)?
        .into_iter()
        .find(|entry| entry.name == name)
        .map(|entry| entry.inum))
}

/// Adds `name -> target`, reusing the first free slot or growing the table.
/// Does not touch the target's link count.
pub fn create_entry<T: BlockStorage>(
    store: &mut Store<T>,
    dir_inum: InodeNumber,
    target: InodeNumber,
    name: &str,
) -> Result<()> {
    validate_name(name)?;
    let mut dir = directory(store, dir_inum)?;

    let mut free = None;
    for (offset, raw) in slots(store, &dir)? {
        if raw.inum == 0 {
            free.get_or_insert(offset);
        } else if decode_name(&raw) == name {
            return Err(YfsError::AlreadyExists(name.to_string()));
        }
    }

    let raw = encode(target, name)?;
    let offset = free.unwrap_or(dir.size);
    bmap::write_content(store, dir_inum, &mut dir, offset, raw.as_bytes())?;
    Ok(())
}

/// Clears the record naming `target` as `name`.
pub fn delete_entry<T: BlockStorage>(
    store: &mut Store<T>,
    dir_inum: InodeNumber,
    name: &str,
    target: InodeNumber,
) -> Result<()> {
    let mut dir = directory(store, dir_inum)?;
    let offset = slots(store, &dir)?
        .into_iter()
        .find(|(_, raw)| {
            raw.inum != 0 && raw.inum as InodeNumber == target && decode_name(raw) == name
        })
        .map(|(offset, _)| offset)
        .ok_or(YfsError::NotFound)?;

    let cleared = RawDirEntry::new_zeroed();
    bmap::write_content(store, dir_inum, &mut dir, offset, cleared.as_bytes())?;
    Ok(())
}

pub fn count_entries<T: BlockStorage>(store: &mut Store<T>, dir_inum: InodeNumber) -> Result<usize> {
    Ok(entries(store, dir_inum)?.len())
}

/// Writes the `.` and `..` records every directory starts with.
pub fn seed<T: BlockStorage>(
    store: &mut Store<T>,
    dir_inum: InodeNumber,
    parent: InodeNumber,
) -> Result<()> {
    create_entry(store, dir_inum, dir_inum, ".")?;
    create_entry(store, dir_inum, parent, "..")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FormatOptions;
    use crate::io::{FileBlockEmulator, FileBlockEmulatorBuilder};
    use crate::layout::BLOCK_SIZE;

    fn create_test_store() -> Store<FileBlockEmulator> {
        let dev = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
            .with_block_count(64)
            .build()
            .expect("Could not initialize disk emulator.");
        Store::format(dev, &FormatOptions::new().with_blocks(64).with_inodes(64)).unwrap()
    }

    fn new_dir(store: &mut Store<FileBlockEmulator>) -> InodeNumber {
        let inum = store.alloc_inode().unwrap();
        store
            .put_inode(inum, Inode::fresh(InodeType::Directory, 1))
            .unwrap();
        seed(store, inum, inum).unwrap();
        inum
    }

    #[test]
    fn seeded_directory_starts_with_dot_entries() {
        let mut store = create_test_store();
        let dir = new_dir(&mut store);

        let listed = entries(&mut store, dir).unwrap();
        assert_eq!(
            listed,
            vec![
                DirEntry { inum: dir, name: ".".to_string() },
                DirEntry { inum: dir, name: "..".to_string() },
            ]
        );
        assert_eq!(store.inode(dir).unwrap().size, 2 * DIR_ENTRY_SIZE as u32);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut store = create_test_store();
        let dir = new_dir(&mut store);
        create_entry(&mut store, dir, 5, "a").unwrap();

        assert!(matches!(
            create_entry(&mut store, dir, 6, "a"),
            Err(YfsError::AlreadyExists(_))
        ));
        assert_eq!(lookup(&mut store, dir, "a").unwrap(), Some(5));
        assert_eq!(lookup(&mut store, dir, "b").unwrap(), None);
    }

    #[test]
    fn deleted_slots_are_reused() {
        let mut store = create_test_store();
        let dir = new_dir(&mut store);
        create_entry(&mut store, dir, 5, "a").unwrap();
        create_entry(&mut store, dir, 6, "b").unwrap();
        let size = store.inode(dir).unwrap().size;

        delete_entry(&mut store, dir, "a", 5).unwrap();
        assert_eq!(count_entries(&mut store, dir).unwrap(), 3);
        create_entry(&mut store, dir, 7, "c").unwrap();

        assert_eq!(store.inode(dir).unwrap().size, size);
        assert_eq!(lookup(&mut store, dir, "c").unwrap(), Some(7));
    }

    #[test]
    fn delete_matches_name_and_inode() {
        let mut store = create_test_store();
        let dir = new_dir(&mut store);
        create_entry(&mut store, dir, 5, "f").unwrap();
        create_entry(&mut store, dir, 5, "g").unwrap();

        delete_entry(&mut store, dir, "g", 5).unwrap();
        assert_eq!(lookup(&mut store, dir, "f").unwrap(), Some(5));
        assert_eq!(lookup(&mut store, dir, "g").unwrap(), None);
        assert!(matches!(
            delete_entry(&mut store, dir, "f", 6),
            Err(YfsError::NotFound)
        ));
    }

    #[test]
    fn directory_grows_past_one_block() {
        let mut store = create_test_store();
        let dir = new_dir(&mut store);
        let per_block = BLOCK_SIZE / DIR_ENTRY_SIZE;
        for i in 0..per_block {
            create_entry(&mut store, dir, 2 + i as u32, &format!("file{}", i)).unwrap();
        }

        let inode = store.inode(dir).unwrap();
        assert_eq!(inode.blocks.direct_blocks().count(), 2);
        assert_eq!(count_entries(&mut store, dir).unwrap(), per_block + 2);
        assert_eq!(lookup(&mut store, dir, "file15").unwrap(), Some(17));
    }

    #[test]
    fn names_are_validated() {
        let mut store = create_test_store();
        let dir = new_dir(&mut store);
        let longest = "x".repeat(DIRNAMELEN);

        create_entry(&mut store, dir, 3, &longest).unwrap();
        assert_eq!(lookup(&mut store, dir, &longest).unwrap(), Some(3));
        assert!(matches!(
            create_entry(&mut store, dir, 4, &"y".repeat(DIRNAMELEN + 1)),
            Err(YfsError::NameTooLong)
        ));
        assert!(matches!(
            create_entry(&mut store, dir, 4, "a/b"),
            Err(YfsError::InvalidName(_))
        ));
        assert!(matches!(
            create_entry(&mut store, dir, 4, ""),
            Err(YfsError::InvalidName(_))
        ));
    }

    #[test]
    fn entries_of_a_file_is_an_error() {
        let mut store = create_test_store();
        let inum = store.alloc_inode().unwrap();
        store
            .put_inode(inum, Inode::fresh(InodeType::Regular, 1))
            .unwrap();
        assert!(matches!(
            entries(&mut store, inum),
            Err(YfsError::NotADirectory)
        ));
    }
}
