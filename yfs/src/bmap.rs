//! Maps byte ranges of file content onto blocks.
//!
//! Content block `i` lives in `direct[i]` for `i < NUM_DIRECT` and in entry
//! `i - NUM_DIRECT` of the indirect block after that. Slots are filled strictly
//! in order, so an allocated file never has holes before its last block.

use log::debug;
use zerocopy::AsBytes;

use crate::error::{Result, YfsError};
use crate::io::{BlockNumber, BlockStorage};
use crate::layout::{BLOCK_SIZE, MAX_FILE_BLOCKS, MAX_FILE_SIZE, NUM_DIRECT, POINTERS_PER_BLOCK};
use crate::node::{Inode, InodeNumber, InodeType};
use crate::store::{Block, Store};

/// An indirect block seen as its array of block pointers.
type PointerTable = [BlockNumber; POINTERS_PER_BLOCK];

const POINTER_SIZE: usize = std::mem::size_of::<BlockNumber>();

/// Base a seek offset is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    FromStart,
    FromCurrent,
    FromEnd,
}

fn pointer_table(block: &Block) -> PointerTable {
    zerocopy::transmute!(*block)
}

fn read_pointer(block: &Block, index: usize) -> BlockNumber {
    pointer_table(block)[index]
}

fn write_pointer(block: &mut Block, index: usize, bnum: BlockNumber) {
    let start = index * POINTER_SIZE;
    block[start..start + POINTER_SIZE].copy_from_slice(bnum.as_bytes());
}

/// Allocated entries of an indirect block.
pub(crate) fn pointers(block: &Block) -> impl Iterator<Item = BlockNumber> {
    pointer_table(block)
        .into_iter()
        .filter(|&bnum| bnum != 0)
}

fn nonzero(bnum: BlockNumber) -> Option<BlockNumber> {
    if bnum == 0 {
        None
    } else {
        Some(bnum)
    }
}

/// The block backing content block `index`, if one is allocated.
fn slot<T: BlockStorage>(
    store: &mut Store<T>,
    inode: &Inode,
    index: usize,
) -> Result<Option<BlockNumber>> {
    if index < NUM_DIRECT {
        return Ok(nonzero(inode.blocks.direct[index]));
    }
    let index = index - NUM_DIRECT;
    if index >= POINTERS_PER_BLOCK {
        return Ok(None);
    }
    match inode.blocks.indirect {
        None => Ok(None),
        Some(indirect) => Ok(nonzero(read_pointer(store.block(indirect)?, index))),
    }
}

/// Block number holding the byte at `pos`, or `None` if that block has not
/// been allocated yet.
pub fn resolve<T: BlockStorage>(
    store: &mut Store<T>,
    inode: &Inode,
    pos: u32,
) -> Result<Option<BlockNumber>> {
    slot(store, inode, pos as usize / BLOCK_SIZE)
}

/// Installs a fresh block in the next unfilled slot, direct pointers first. The
/// indirect block itself is allocated the first time the direct range overflows.
/// The updated inode is stored before returning.
pub fn allocate<T: BlockStorage>(
    store: &mut Store<T>,
    inode: &mut Inode,
    inum: InodeNumber,
) -> Result<BlockNumber> {
    if let Some(index) = inode.blocks.direct.iter().position(|&bnum| bnum == 0) {
        let bnum = store.alloc_block()?;
        inode.blocks.direct[index] = bnum;
        store.put_inode(inum, *inode)?;
        debug!("[inode #{}] direct slot {} -> block {}", inum, index, bnum);
        return Ok(bnum);
    }

    let indirect = match inode.blocks.indirect {
        Some(indirect) => indirect,
        None => {
            let indirect = store.alloc_block()?;
            inode.blocks.indirect = Some(indirect);
            store.put_inode(inum, *inode)?;
            debug!("[inode #{}] indirect block {}", inum, indirect);
            indirect
        }
    };

    let free = pointer_table(store.block(indirect)?)
        .iter()
        .position(|&bnum| bnum == 0);
    let index = free.ok_or(YfsError::NoSpace)?;
    let bnum = store.alloc_block()?;
    write_pointer(store.block_mut(indirect)?, index, bnum);
    debug!("[inode #{}] indirect slot {} -> block {}", inum, index, bnum);
    Ok(bnum)
}

/// Allocates up to and including content block `index` and returns it.
fn ensure_slot<T: BlockStorage>(
    store: &mut Store<T>,
    inode: &mut Inode,
    inum: InodeNumber,
    index: usize,
) -> Result<BlockNumber> {
    if index >= MAX_FILE_BLOCKS {
        return Err(YfsError::NoSpace);
    }
    loop {
        if let Some(bnum) = slot(store, inode, index)? {
            return Ok(bnum);
        }
        allocate(store, inode, inum)?;
    }
}

/// Copies out up to `len` bytes starting at `pos`, never past `inode.size`.
/// An unallocated block inside the file ends the read early.
pub fn read<T: BlockStorage>(
    store: &mut Store<T>,
    inode: &Inode,
    pos: u32,
    len: usize,
) -> Result<Vec<u8>> {
    let size = inode.size as usize;
    let start = pos as usize;
    if start >= size {
        return Ok(Vec::new());
    }
    let end = start.saturating_add(len).min(size);

    let mut data = Vec::with_capacity(end - start);
    let mut position = start;
    while position < end {
        let offset = position % BLOCK_SIZE;
        let chunk = (BLOCK_SIZE - offset).min(end - position);
        let bnum = match slot(store, inode, position / BLOCK_SIZE)? {
            Some(bnum) => bnum,
            None => break,
        };
        data.extend_from_slice(&store.block(bnum)?[offset..offset + chunk]);
        position += chunk;
    }
    Ok(data)
}

/// Writes to a regular file, growing it as needed.
pub fn write<T: BlockStorage>(
    store: &mut Store<T>,
    inum: InodeNumber,
    pos: u32,
    data: &[u8],
) -> Result<usize> {
    let mut inode = store.live_inode(inum)?;
    match inode.kind {
        InodeType::Regular => write_content(store, inum, &mut inode, pos, data),
        InodeType::Directory | InodeType::Symlink => Err(YfsError::NotAFile),
        InodeType::Free => Err(YfsError::NotFound),
    }
}

/// Writes any kind of content, directories included. Blocks allocated before a
/// failure stay with the inode; `size` only moves once every byte landed.
pub(crate) fn write_content<T: BlockStorage>(
    store: &mut Store<T>,
    inum: InodeNumber,
    inode: &mut Inode,
    pos: u32,
    data: &[u8],
) -> Result<usize> {
    let start = pos as usize;
    let end = start + data.len();
    if end > MAX_FILE_SIZE {
        return Err(YfsError::NoSpace);
    }

    let mut position = start;
    while position < end {
        let offset = position % BLOCK_SIZE;
        let chunk = (BLOCK_SIZE - offset).min(end - position);
        let bnum = ensure_slot(store, inode, inum, position / BLOCK_SIZE)?;
        let source = &data[position - start..position - start + chunk];
        store.block_mut(bnum)?[offset..offset + chunk].copy_from_slice(source);
        position += chunk;
    }

    if !data.is_empty() && end > inode.size as usize {
        inode.size = end as u32;
        store.put_inode(inum, *inode)?;
    }
    Ok(data.len())
}

/// New position for a seek. Must land within `0..=size`.
pub fn seek(size: u32, current: u32, offset: i64, whence: Whence) -> Result<u32> {
    let base = match whence {
        Whence::FromStart => 0,
        Whence::FromCurrent => i64::from(current),
        Whence::FromEnd => i64::from(size),
    };
    let pos = base
        .checked_add(offset)
        .ok_or(YfsError::InvalidOffset(offset))?;
    if pos < 0 || pos > i64::from(size) {
        return Err(YfsError::InvalidOffset(pos));
    }
    Ok(pos as u32)
}

/// Returns every content block, and the indirect block, to the pool and
/// resets the size. The caller stores the inode.
pub fn release_blocks<T: BlockStorage>(store: &mut Store<T>, inode: &mut Inode) -> Result<()> {
    for bnum in inode.blocks.direct.iter_mut() {
        if *bnum != 0 {
            store.free_block(*bnum);
            *bnum = 0;
        }
    }
    if let Some(indirect) = inode.blocks.indirect.take() {
        let owned: Vec<BlockNumber> = pointers(store.block(indirect)?).collect();
        for bnum in owned {
            store.free_block(bnum);
        }
        store.free_block(indirect);
    }
    inode.size = 0;
    Ok(())
}
