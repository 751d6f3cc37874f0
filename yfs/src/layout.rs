use crate::error::{Result, YfsError};
use crate::io::BlockNumber;
use crate::node::InodeNumber;

use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Bytes per block. Also the sector size of the underlying device.
pub const BLOCK_SIZE: usize = 512;
/// Bytes per on-disk inode record.
pub const INODE_SIZE: usize = 64;
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;

/// Block pointers held directly in the inode.
pub const NUM_DIRECT: usize = 12;
/// Block pointers held by the single indirect block.
pub const POINTERS_PER_BLOCK: usize = BLOCK_SIZE / std::mem::size_of::<i32>();
pub const MAX_FILE_BLOCKS: usize = NUM_DIRECT + POINTERS_PER_BLOCK;
pub const MAX_FILE_SIZE: usize = MAX_FILE_BLOCKS * BLOCK_SIZE;

/// Longest directory entry name. Names of exactly this length are not NUL terminated.
pub const DIRNAMELEN: usize = 30;
pub const DIR_ENTRY_SIZE: usize = 32;
pub const MAX_PATHNAME_LEN: usize = 256;
/// Symbolic links followed during a single lookup before giving up.
pub const MAX_SYMLINK_DEPTH: usize = 20;

pub const ROOT_INODE: InodeNumber = 1;

/// Known locations.
pub const BOOT_BLOCK: BlockNumber = 0;
/// The inode area starts here. Its first record slot holds the header.
pub const INODE_START: BlockNumber = 1;

const FS_MAGIC: u32 = 0x5946_5342; // YFSB

// A symlink target must always fit in its single payload block.
const _: () = assert!(BLOCK_SIZE >= MAX_PATHNAME_LEN);
const _: () = assert!(std::mem::size_of::<FsHeader>() == INODE_SIZE);
const _: () = assert!(std::mem::size_of::<RawInode>() == INODE_SIZE);
const _: () = assert!(std::mem::size_of::<RawDirEntry>() == DIR_ENTRY_SIZE);

/// Occupies the slot of inode 0, which never names a file.
///
/// # Layout
/// ==============================================================================
/// | Boot block | Header + inodes 1..n (INODE_START..) | Data blocks            |
/// ==============================================================================
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy, Debug, PartialEq)]
pub struct FsHeader {
    /// Total blocks on the disk, including the boot block and the inode area.
    pub num_blocks: i32,
    /// Usable inodes, numbered 1..=num_inodes.
    pub num_inodes: i32,
    /// A 32-bit identifying string, in this case YFSB.
    pub magic: u32,
    padding: [u8; 52],
}

impl FsHeader {
    pub fn new(num_blocks: u32, num_inodes: u32) -> Self {
        Self {
            num_blocks: num_blocks as i32,
            num_inodes: num_inodes as i32,
            magic: FS_MAGIC,
            padding: [0; 52],
        }
    }

    /// Reads the header from the front of the first inode block.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let header = buf
            .get(..INODE_SIZE)
            .and_then(|bytes| FsHeader::read_from(bytes))
            .ok_or_else(|| YfsError::Corrupted("short header block".to_string()))?;
        if header.magic != FS_MAGIC {
            return Err(YfsError::Corrupted(format!(
                "bad magic {:#010x}",
                header.magic
            )));
        }
        if header.num_inodes < 1 || header.num_blocks < 0 {
            return Err(YfsError::Corrupted("invalid geometry".to_string()));
        }
        let header_blocks = first_data_block(header.num_inodes as u32);
        if header.num_blocks as u32 <= header_blocks {
            return Err(YfsError::Corrupted(
                "not enough blocks to hold inodes".to_string(),
            ));
        }
        Ok(header)
    }

    pub fn num_blocks(&self) -> u32 {
        self.num_blocks as u32
    }

    pub fn num_inodes(&self) -> u32 {
        self.num_inodes as u32
    }

    pub fn first_data_block(&self) -> BlockNumber {
        first_data_block(self.num_inodes())
    }
}

/// The last block of the inode area for a disk holding `num_inodes` inodes.
pub fn last_inode_block(num_inodes: u32) -> BlockNumber {
    INODE_START + num_inodes / INODES_PER_BLOCK as u32
}

pub fn first_data_block(num_inodes: u32) -> BlockNumber {
    last_inode_block(num_inodes) + 1
}

/// Block and byte offset of an inode record.
pub fn inode_location(inum: InodeNumber) -> (BlockNumber, usize) {
    let block = INODE_START + inum / INODES_PER_BLOCK as u32;
    let offset = (inum as usize % INODES_PER_BLOCK) * INODE_SIZE;
    (block, offset)
}

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy, Debug, PartialEq)]
/// This structure __must be exactly 64 bytes.__
pub struct RawInode {
    pub kind: i16,
    pub nlink: i16,
    pub reuse: i32,
    pub size: i32,
    pub direct: [i32; NUM_DIRECT],
    pub indirect: i32,
}

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy, Debug, PartialEq)]
pub struct RawDirEntry {
    /// 0 marks a free slot.
    pub inum: i16,
    pub name: [u8; DIRNAMELEN],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_encode_and_decode_header() {
        let header = FsHeader::new(64, 16);
        let mut block = vec![0; BLOCK_SIZE];
        block[..INODE_SIZE].copy_from_slice(header.as_bytes());

        let parsed = FsHeader::parse(&block).unwrap();

        assert_eq!(parsed, header);
        assert_eq!(parsed.first_data_block(), 4);
    }

    #[test]
    fn parsing_buffer_with_invalid_magic_fails() {
        let zero_buffer_with_right_size = vec![0; BLOCK_SIZE];
        match FsHeader::parse(&zero_buffer_with_right_size) {
            Err(YfsError::Corrupted(_)) => (),
            other => panic!("unexpected parse result {:?}", other),
        }
    }

    #[test]
    fn parsing_header_without_data_region_fails() {
        let header = FsHeader::new(3, 16);
        assert!(FsHeader::parse(header.as_bytes()).is_err());
    }

    #[test]
    fn inode_locations_skip_the_header_slot() {
        assert_eq!(inode_location(ROOT_INODE), (INODE_START, INODE_SIZE));
        assert_eq!(inode_location(7), (INODE_START, 7 * INODE_SIZE));
        assert_eq!(inode_location(8), (INODE_START + 1, 0));
        assert_eq!(last_inode_block(7), INODE_START);
        assert_eq!(last_inode_block(8), INODE_START + 1);
    }
}
