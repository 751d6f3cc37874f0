use crate::error::{Result, YfsError};
use crate::layout::first_data_block;

/// Geometry of a file system about to be formatted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    num_blocks: u32,
    num_inodes: u32,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            num_blocks: 1024,
            num_inodes: 128,
        }
    }
}

impl FormatOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the total number of blocks, boot block and inode area included.
    pub fn with_blocks(mut self, blocks: u32) -> Self {
        self.num_blocks = blocks;
        self
    }

    pub fn with_inodes(mut self, inodes: u32) -> Self {
        self.num_inodes = inodes;
        self
    }

    pub fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    pub fn num_inodes(&self) -> u32 {
        self.num_inodes
    }

    /// Checks the geometry fits the on-disk integer widths and leaves room for
    /// at least the root directory's first block.
    pub fn validate(&self) -> Result<()> {
        if self.num_inodes == 0 || self.num_inodes > i16::MAX as u32 {
            return Err(YfsError::InvalidArgument(format!(
                "inode count {} must be within 1..={}",
                self.num_inodes,
                i16::MAX
            )));
        }
        if self.num_blocks > i32::MAX as u32 {
            return Err(YfsError::InvalidArgument(format!(
                "block count {} is too large",
                self.num_blocks
            )));
        }
        let first_data = first_data_block(self.num_inodes);
        if self.num_blocks <= first_data {
            return Err(YfsError::InvalidArgument(format!(
                "{} blocks leave no data region after {} inodes",
                self.num_blocks, self.num_inodes
            )));
        }
        Ok(())
    }
}
