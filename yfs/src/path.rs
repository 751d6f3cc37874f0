//! Pathname resolution. Absolute paths start at the root directory, relative
//! ones at the caller's current directory. Symbolic links met along the way
//! are expanded, up to `MAX_SYMLINK_DEPTH` of them per lookup.

use crate::dir;
use crate::error::{Result, YfsError};
use crate::io::BlockStorage;
use crate::layout::{DIRNAMELEN, MAX_PATHNAME_LEN, MAX_SYMLINK_DEPTH, ROOT_INODE};
use crate::node::{Inode, InodeNumber, InodeType};
use crate::store::Store;

fn check_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(YfsError::NotFound);
    }
    if path.len() > MAX_PATHNAME_LEN || components(path).any(|name| name.len() > DIRNAMELEN) {
        return Err(YfsError::NameTooLong);
    }
    Ok(())
}

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|name| !name.is_empty())
}

/// The target string of a symlink inode.
pub fn read_target<T: BlockStorage>(store: &mut Store<T>, inode: &Inode) -> Result<String> {
    let bnum = match inode.blocks.direct[0] {
        0 => return Err(YfsError::Corrupted("symlink without payload".to_string())),
        bnum => bnum,
    };
    let len = (inode.size as usize).min(MAX_PATHNAME_LEN);
    let block = store.block(bnum)?;
    Ok(String::from_utf8_lossy(&block[..len]).into_owned())
}

pub fn lookup_component<T: BlockStorage>(
    store: &mut Store<T>,
    dir_inum: InodeNumber,
    name: &str,
) -> Result<Option<InodeNumber>> {
    dir::lookup(store, dir_inum, name)
}

fn walk<T: BlockStorage>(
    store: &mut Store<T>,
    cwd: InodeNumber,
    path: &str,
    depth: &mut usize,
) -> Result<InodeNumber> {
    check_path(path)?;
    let mut current = if path.starts_with('/') { ROOT_INODE } else { cwd };

    for name in components(path) {
        let next = lookup_component(store, current, name)?.ok_or(YfsError::NotFound)?;
        let inode = store.live_inode(next)?;
        current = match inode.kind {
            InodeType::Symlink => {
                *depth += 1;
                if *depth > MAX_SYMLINK_DEPTH {
                    return Err(YfsError::SymlinkLoop);
                }
                let target = read_target(store, &inode)?;
                walk(store, current, &target, depth)?
            }
            InodeType::Directory | InodeType::Regular => next,
            InodeType::Free => return Err(YfsError::NotFound),
        };
    }
    Ok(current)
}

/// Resolves every component of `path`, the last one included.
pub fn resolve_full<T: BlockStorage>(
    store: &mut Store<T>,
    cwd: InodeNumber,
    path: &str,
) -> Result<InodeNumber> {
    let mut depth = 0;
    let inum = walk(store, cwd, path, &mut depth)?;
    // "/" or "." never pass through a lookup, make sure they still name something.
    store.live_inode(inum)?;
    Ok(inum)
}

/// Resolves all but the last component of `path`. Returns the containing
/// directory and the final component, which is not looked up.
pub fn resolve_parent<T: BlockStorage>(
    store: &mut Store<T>,
    cwd: InodeNumber,
    path: &str,
) -> Result<(InodeNumber, String)> {
    check_path(path)?;
    let trimmed = path.trim_end_matches('/');
    let (dir_path, name) = match trimmed.rfind('/') {
        Some(index) => (&trimmed[..=index], &trimmed[index + 1..]),
        None => ("", trimmed),
    };
    if name.is_empty() {
        return Err(YfsError::InvalidName(path.to_string()));
    }

    let dir_inum = if dir_path.is_empty() {
        cwd
    } else {
        let mut depth = 0;
        walk(store, cwd, dir_path, &mut depth)?
    };
    dir::directory(store, dir_inum)?;
    Ok((dir_inum, name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FormatOptions;
    use crate::io::{FileBlockEmulator, FileBlockEmulatorBuilder};
    use crate::lifecycle::{create_object, create_symlink, init_root};

    fn create_test_store() -> Store<FileBlockEmulator> {
        let dev = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
            .with_block_count(128)
            .build()
            .expect("Could not initialize disk emulator.");
        let options = FormatOptions::new().with_blocks(128).with_inodes(32);
        let mut store = Store::format(dev, &options).unwrap();
        init_root(&mut store).unwrap();
        store
    }

    #[test]
    fn root_path_resolves_to_root() {
        let mut store = create_test_store();
        assert_eq!(resolve_full(&mut store, ROOT_INODE, "/").unwrap(), ROOT_INODE);
        assert_eq!(resolve_full(&mut store, ROOT_INODE, "/./..").unwrap(), ROOT_INODE);
        assert!(matches!(
            resolve_full(&mut store, ROOT_INODE, ""),
            Err(YfsError::NotFound)
        ));
    }

    #[test]
    fn relative_paths_start_at_cwd() {
        let mut store = create_test_store();
        let a = create_object(&mut store, ROOT_INODE, "a", InodeType::Directory).unwrap();
        let f = create_object(&mut store, a, "f", InodeType::Regular).unwrap();

        assert_eq!(resolve_full(&mut store, a, "f").unwrap(), f);
        assert_eq!(resolve_full(&mut store, a, "../a//f").unwrap(), f);
        assert_eq!(resolve_full(&mut store, ROOT_INODE, "/a/f").unwrap(), f);
        assert!(matches!(
            resolve_full(&mut store, ROOT_INODE, "/a/f/g"),
            Err(YfsError::NotADirectory)
        ));
    }

    #[test]
    fn parent_resolution_splits_off_final_component() {
        let mut store = create_test_store();
        let a = create_object(&mut store, ROOT_INODE, "a", InodeType::Directory).unwrap();

        assert_eq!(
            resolve_parent(&mut store, ROOT_INODE, "/a/new").unwrap(),
            (a, "new".to_string())
        );
        assert_eq!(
            resolve_parent(&mut store, ROOT_INODE, "/a/").unwrap(),
            (ROOT_INODE, "a".to_string())
        );
        assert_eq!(
            resolve_parent(&mut store, a, "x").unwrap(),
            (a, "x".to_string())
        );
        assert!(matches!(
            resolve_parent(&mut store, ROOT_INODE, "/"),
            Err(YfsError::InvalidName(_))
        ));
        assert!(matches!(
            resolve_parent(&mut store, ROOT_INODE, "/missing/x"),
            Err(YfsError::NotFound)
        ));
    }

    #[test]
    fn symlinks_are_followed_in_every_component() {
        let mut store = create_test_store();
        let a = create_object(&mut store, ROOT_INODE, "a", InodeType::Directory).unwrap();
        let f = create_object(&mut store, a, "f", InodeType::Regular).unwrap();
        create_symlink(&mut store, ROOT_INODE, "abs", "/a").unwrap();
        create_symlink(&mut store, a, "rel", "f").unwrap();

        assert_eq!(resolve_full(&mut store, ROOT_INODE, "/abs/f").unwrap(), f);
        assert_eq!(resolve_full(&mut store, ROOT_INODE, "/a/rel").unwrap(), f);
        assert_eq!(resolve_full(&mut store, ROOT_INODE, "/abs/rel").unwrap(), f);
        assert_eq!(
            resolve_parent(&mut store, ROOT_INODE, "/abs/rel").unwrap(),
            (a, "rel".to_string())
        );
    }

    #[test]
    fn symlink_cycles_are_cut_off() {
        let mut store = create_test_store();
        create_symlink(&mut store, ROOT_INODE, "x", "/y").unwrap();
        create_symlink(&mut store, ROOT_INODE, "y", "/x").unwrap();

        assert!(matches!(
            resolve_full(&mut store, ROOT_INODE, "/x"),
            Err(YfsError::SymlinkLoop)
        ));
    }

    #[test]
    fn overlong_names_are_rejected() {
        let mut store = create_test_store();
        let long_component = format!("/{}", "c".repeat(DIRNAMELEN + 1));
        assert!(matches!(
            resolve_full(&mut store, ROOT_INODE, &long_component),
            Err(YfsError::NameTooLong)
        ));
        let long_path = "/d".repeat(MAX_PATHNAME_LEN);
        assert!(matches!(
            resolve_parent(&mut store, ROOT_INODE, &long_path),
            Err(YfsError::NameTooLong)
        ));
    }
}
