use crate::error::{Result, YfsError};
use crate::io::BlockNumber;
use crate::layout::{RawInode, NUM_DIRECT};

/// Identifies an inode. 0 never names a file, numbering starts at `ROOT_INODE`.
pub type InodeNumber = u32;

/// What an inode holds. Closed set, every handler matches on it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeType {
    /// The slot is unused and may be handed out by the inode pool.
    Free,
    Directory,
    Regular,
    Symlink,
}

impl InodeType {
    fn from_raw(raw: i16) -> Result<Self> {
        match raw {
            0 => Ok(InodeType::Free),
            1 => Ok(InodeType::Directory),
            2 => Ok(InodeType::Regular),
            3 => Ok(InodeType::Symlink),
            other => Err(YfsError::Corrupted(format!("unknown inode type {}", other))),
        }
    }

    fn to_raw(self) -> i16 {
        match self {
            InodeType::Free => 0,
            InodeType::Directory => 1,
            InodeType::Regular => 2,
            InodeType::Symlink => 3,
        }
    }
}

/// Two tier block addressing: the first `NUM_DIRECT` blocks of content are
/// named in the inode itself, the rest through one indirect block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockPointers {
    /// 0 marks an unallocated slot. Slots are always filled front to back.
    pub direct: [BlockNumber; NUM_DIRECT],
    pub indirect: Option<BlockNumber>,
}

impl BlockPointers {
    /// Allocated direct blocks, in content order.
    pub fn direct_blocks(&self) -> impl Iterator<Item = BlockNumber> + '_ {
        self.direct.iter().copied().filter(|&bnum| bnum != 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inode {
    pub kind: InodeType,
    /// The number of directory entries naming this inode, not counting `.` and `..`.
    pub nlink: u16,
    /// Bumped every time the inode number is handed to a new object.
    pub reuse: u32,
    /// The total size of the content in bytes.
    pub size: u32,
    pub blocks: BlockPointers,
}

impl Inode {
    /// An unused inode slot that remembers its generation.
    pub fn free(reuse: u32) -> Self {
        Self {
            kind: InodeType::Free,
            nlink: 0,
            reuse,
            size: 0,
            blocks: BlockPointers::default(),
        }
    }

    /// A new object with one link and no content.
    pub fn fresh(kind: InodeType, reuse: u32) -> Self {
        Self {
            kind,
            nlink: 1,
            reuse,
            size: 0,
            blocks: BlockPointers::default(),
        }
    }

    pub fn is_free(&self) -> bool {
        self.kind == InodeType::Free
    }

    pub fn from_raw(raw: &RawInode) -> Result<Self> {
        let corrupted = |what: &str| YfsError::Corrupted(format!("negative {} in inode", what));
        let mut direct = [0; NUM_DIRECT];
        for (slot, &bnum) in direct.iter_mut().zip(raw.direct.iter()) {
            *slot = u32::try_from(bnum).map_err(|_| corrupted("block pointer"))?;
        }
        let indirect = u32::try_from(raw.indirect).map_err(|_| corrupted("indirect pointer"))?;
        Ok(Self {
            kind: InodeType::from_raw(raw.kind)?,
            nlink: u16::try_from(raw.nlink).map_err(|_| corrupted("link count"))?,
            reuse: raw.reuse as u32,
            size: u32::try_from(raw.size).map_err(|_| corrupted("size"))?,
            blocks: BlockPointers {
                direct,
                indirect: if indirect == 0 { None } else { Some(indirect) },
            },
        })
    }

    pub fn to_raw(&self) -> RawInode {
        let mut direct = [0; NUM_DIRECT];
        for (slot, &bnum) in direct.iter_mut().zip(self.blocks.direct.iter()) {
            *slot = bnum as i32;
        }
        RawInode {
            kind: self.kind.to_raw(),
            nlink: self.nlink as i16,
            reuse: self.reuse as i32,
            size: self.size as i32,
            direct,
            indirect: self.blocks.indirect.unwrap_or(0) as i32,
        }
    }
}
