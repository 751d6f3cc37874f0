use log::{debug, warn};

use crate::bmap;
use crate::dir;
use crate::error::{Result, YfsError};
use crate::io::BlockStorage;
use crate::layout::ROOT_INODE;
use crate::node::{Inode, InodeNumber, InodeType};
use crate::store::Store;

/// Makes `name` in `dir_inum` refer to an object of `kind`.
///
/// An existing regular file asked for again as a regular file is truncated in
/// place and keeps its inode number and link count. Anything else already
/// using the name is an error. New directories come with `.` and `..`.
pub fn create_object<T: BlockStorage>(
    store: &mut Store<T>,
    dir_inum: InodeNumber,
    name: &str,
    kind: InodeType,
) -> Result<InodeNumber> {
    if let Some(existing) = dir::lookup(store, dir_inum, name)? {
        let mut inode = store.live_inode(existing)?;
        return match (kind, inode.kind) {
            (InodeType::Regular, InodeType::Regular) => {
                truncate(store, existing, &mut inode)?;
                Ok(existing)
            }
            (InodeType::Regular, InodeType::Directory) => Err(YfsError::IsADirectory),
            _ => Err(YfsError::AlreadyExists(name.to_string())),
        };
    }

    match kind {
        InodeType::Directory => materialize(store, dir_inum, name, kind, |store, inum| {
            dir::seed(store, inum, dir_inum)
        }),
        InodeType::Regular | InodeType::Symlink => {
            materialize(store, dir_inum, name, kind, |_, _| Ok(()))
        }
        InodeType::Free => Err(YfsError::InvalidArgument(
            "cannot create a free inode".to_string(),
        )),
    }
}

/// Creates a symlink whose first block holds `target` verbatim.
pub fn create_symlink<T: BlockStorage>(
    store: &mut Store<T>,
    dir_inum: InodeNumber,
    name: &str,
    target: &str,
) -> Result<InodeNumber> {
    if dir::lookup(store, dir_inum, name)?.is_some() {
        return Err(YfsError::AlreadyExists(name.to_string()));
    }

    materialize(store, dir_inum, name, InodeType::Symlink, |store, inum| {
        let mut inode = store.inode(inum)?;
        // First allocation on a fresh inode always lands in direct[0].
        let bnum = bmap::allocate(store, &mut inode, inum)?;
        let block = store.block_mut(bnum)?;
        if target.len() > block.len() {
            return Err(YfsError::NameTooLong);
        }
        block[..target.len()].copy_from_slice(target.as_bytes());
        inode.size = target.len() as u32;
        store.put_inode(inum, inode)
    })
}

/// Draws a fresh inode, lets `init` fill in its content and only then links it
/// into the parent. If any step fails the inode is reclaimed; it was never visible.
fn materialize<T, F>(
    store: &mut Store<T>,
    dir_inum: InodeNumber,
    name: &str,
    kind: InodeType,
    init: F,
) -> Result<InodeNumber>
where
    T: BlockStorage,
    F: FnOnce(&mut Store<T>, InodeNumber) -> Result<()>,
{
    dir::validate_name(name)?;
    let inum = store.alloc_inode()?;
    let reuse = store.inode(inum)?.reuse.wrapping_add(1);
    store.put_inode(inum, Inode::fresh(kind, reuse))?;

    let populated = match init(store, inum) {
        Ok(()) => dir::create_entry(store, dir_inum, inum, name),
        Err(err) => Err(err),
    };
    if let Err(err) = populated {
        warn!("discarding inode {} for {:?}: {}", inum, name, err);
        let mut inode = store.inode(inum)?;
        inode.nlink = 0;
        store.put_inode(inum, inode)?;
        reclaim(store, inum)?;
        return Err(err);
    }

    debug!("created {:?} inode {} as {:?} in {}", kind, inum, name, dir_inum);
    Ok(inum)
}

/// Frees the content of a regular file and resets its size to 0.
pub fn truncate<T: BlockStorage>(
    store: &mut Store<T>,
    inum: InodeNumber,
    inode: &mut Inode,
) -> Result<()> {
    bmap::release_blocks(store, inode)?;
    store.put_inode(inum, *inode)
}

/// Returns an unreferenced inode and everything it owns to the free pools.
pub fn reclaim<T: BlockStorage>(store: &mut Store<T>, inum: InodeNumber) -> Result<()> {
    let mut inode = store.inode(inum)?;
    if inode.nlink > 0 {
        return Err(YfsError::Corrupted(format!(
            "inode {} reclaimed with {} links",
            inum, inode.nlink
        )));
    }
    bmap::release_blocks(store, &mut inode)?;
    store.put_inode(inum, Inode::free(inode.reuse))?;
    store.free_inode(inum);
    debug!("reclaimed inode {}", inum);
    Ok(())
}

/// Counts one more directory entry naming `inum`.
pub fn link<T: BlockStorage>(store: &mut Store<T>, inum: InodeNumber) -> Result<()> {
    let mut inode = store.live_inode(inum)?;
    if inode.nlink >= i16::MAX as u16 {
        return Err(YfsError::NoSpace);
    }
    inode.nlink += 1;
    store.put_inode(inum, inode)
}

/// Drops one link and reclaims the inode once none remain. Returns whether
/// the inode was reclaimed.
pub fn unlink<T: BlockStorage>(store: &mut Store<T>, inum: InodeNumber) -> Result<bool> {
    let mut inode = store.live_inode(inum)?;
    inode.nlink = inode.nlink.saturating_sub(1);
    store.put_inode(inum, inode)?;
    if inode.nlink == 0 {
        reclaim(store, inum)?;
        return Ok(true);
    }
    Ok(false)
}

/// Creates the root directory on a freshly formatted store.
pub fn init_root<T: BlockStorage>(store: &mut Store<T>) -> Result<()> {
    let inum = store.alloc_inode()?;
    if inum != ROOT_INODE {
        return Err(YfsError::Corrupted(format!(
            "root directory landed on inode {}",
            inum
        )));
    }
    let reuse = store.inode(inum)?.reuse.wrapping_add(1);
    store.put_inode(inum, Inode::fresh(InodeType::Directory, reuse))?;
    dir::seed(store, ROOT_INODE, ROOT_INODE)
}
