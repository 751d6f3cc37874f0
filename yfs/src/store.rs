use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::{debug, info, warn};
use zerocopy::{AsBytes, FromBytes};

use crate::alloc::FreePool;
use crate::bmap;
use crate::config::FormatOptions;
use crate::error::{Result, YfsError};
use crate::io::{BlockNumber, BlockStorage};
use crate::layout::{
    inode_location, FsHeader, RawInode, BLOCK_SIZE, BOOT_BLOCK, INODES_PER_BLOCK, INODE_SIZE,
    INODE_START,
};
use crate::node::{Inode, InodeNumber};

pub type Block = [u8; BLOCK_SIZE];

/// Clean entries are dropped once a cache holds this many.
const INODE_CACHE_LIMIT: usize = 1024;
const BLOCK_CACHE_LIMIT: usize = 256;

/// Cached inodes and blocks over a block device, the two free pools, and the set
/// of cached objects modified since the last flush.
///
/// Modified entries stay resident until `flush` writes them to the device, which
/// also empties both caches. Between flushes only clean entries are evicted.
pub struct Store<T: BlockStorage> {
    dev: T,
    header: FsHeader,
    inodes: HashMap<InodeNumber, Inode>,
    blocks: HashMap<BlockNumber, Block>,
    dirty_inodes: BTreeSet<InodeNumber>,
    dirty_blocks: BTreeSet<BlockNumber>,
    inode_pool: FreePool,
    block_pool: FreePool,
}

impl<T: BlockStorage> Store<T> {
    /// Lays down an empty file system: zeroed boot block and inode area, with
    /// the header in the first inode slot. Every inode is left free.
    pub fn format(mut dev: T, options: &FormatOptions) -> Result<Self> {
        options.validate()?;
        if options.num_blocks() as usize > dev.block_count() {
            return Err(YfsError::InvalidArgument(format!(
                "{} blocks requested but the device holds {}",
                options.num_blocks(),
                dev.block_count()
            )));
        }

        let header = FsHeader::new(options.num_blocks(), options.num_inodes());
        let zeroes = [0; BLOCK_SIZE];
        dev.write_block(BOOT_BLOCK, &zeroes)?;
        for bnum in INODE_START..header.first_data_block() {
            dev.write_block(bnum, &zeroes)?;
        }
        let mut first = [0; BLOCK_SIZE];
        first[..INODE_SIZE].copy_from_slice(header.as_bytes());
        dev.write_block(INODE_START, &first)?;
        dev.sync_disk()?;

        info!(
            "formatted {} blocks with {} inodes, data starts at block {}",
            header.num_blocks(),
            header.num_inodes(),
            header.first_data_block()
        );
        Ok(Self::empty(dev, header))
    }

    /// Attaches to a formatted device and rebuilds both free pools from the
    /// inodes found on it.
    pub fn open(mut dev: T) -> Result<Self> {
        let mut buf = [0; BLOCK_SIZE];
        dev.read_block(INODE_START, &mut buf)?;
        let header = FsHeader::parse(&buf)?;
        if header.num_blocks() as usize > dev.block_count() {
            return Err(YfsError::Corrupted(format!(
                "file system spans {} blocks but the device holds {}",
                header.num_blocks(),
                dev.block_count()
            )));
        }

        let mut store = Self::empty(dev, header);
        store.scan()?;
        info!(
            "mounted {} blocks ({} free), {} inodes ({} free)",
            header.num_blocks(),
            store.free_block_count(),
            header.num_inodes(),
            store.free_inode_count()
        );
        Ok(store)
    }

    fn empty(dev: T, header: FsHeader) -> Self {
        let mut inode_pool = FreePool::new(header.num_inodes() as usize + 1);
        // Inode 0's slot is the header.
        inode_pool.reserve(0);
        let mut block_pool = FreePool::new(header.num_blocks() as usize);
        for bnum in BOOT_BLOCK..header.first_data_block() {
            block_pool.reserve(bnum);
        }

        Self {
            dev,
            header,
            inodes: HashMap::new(),
            blocks: HashMap::new(),
            dirty_inodes: BTreeSet::new(),
            dirty_blocks: BTreeSet::new(),
            inode_pool,
            block_pool,
        }
    }

    fn scan(&mut self) -> Result<()> {
        for inum in 1..=self.header.num_inodes() {
            let inode = self.inode(inum)?;
            if inode.is_free() {
                if inode.blocks != Default::default() {
                    warn!("free inode {} still points at blocks", inum);
                }
                continue;
            }
            self.inode_pool.reserve(inum);

            let mut owned: Vec<BlockNumber> = inode.blocks.direct_blocks().collect();
            if let Some(indirect) = inode.blocks.indirect {
                self.claim(inum, indirect)?;
                owned.extend(bmap::pointers(self.block(indirect)?));
            }
            for bnum in owned {
                self.claim(inum, bnum)?;
            }
        }
        Ok(())
    }

    fn claim(&mut self, inum: InodeNumber, bnum: BlockNumber) -> Result<()> {
        if self.check_block(bnum).is_err() {
            return Err(YfsError::Corrupted(format!(
                "inode {} points outside the data region at block {}",
                inum, bnum
            )));
        }
        if !self.block_pool.reserve(bnum) {
            return Err(YfsError::Corrupted(format!(
                "block {} is owned twice, last by inode {}",
                bnum, inum
            )));
        }
        Ok(())
    }

    pub fn header(&self) -> &FsHeader {
        &self.header
    }

    fn check_inode(&self, inum: InodeNumber) -> Result<()> {
        if inum == 0 || inum > self.header.num_inodes() {
            return Err(YfsError::NotFound);
        }
        Ok(())
    }

    fn check_block(&self, bnum: BlockNumber) -> Result<()> {
        if bnum < self.header.first_data_block() || bnum >= self.header.num_blocks() {
            return Err(YfsError::NotFound);
        }
        Ok(())
    }

    /// Returns a copy of the inode, free or not. Changes are made visible with
    /// [`Store::put_inode`].
    pub fn inode(&mut self, inum: InodeNumber) -> Result<Inode> {
        self.check_inode(inum)?;
        if let Some(inode) = self.inodes.get(&inum) {
            return Ok(*inode);
        }

        if self.inodes.len() >= INODE_CACHE_LIMIT {
            let dirty = &self.dirty_inodes;
            self.inodes.retain(|inum, _| dirty.contains(inum));
        }
        let (bnum, _) = inode_location(inum);
        let mut buf = [0; BLOCK_SIZE];
        self.dev.read_block(bnum, &mut buf)?;
        // Pull in the neighbours sharing this block while we have it.
        let first = (bnum - INODE_START) * INODES_PER_BLOCK as u32;
        for slot in 0..INODES_PER_BLOCK {
            let neighbour = first + slot as u32;
            if self.check_inode(neighbour).is_err() || self.inodes.contains_key(&neighbour) {
                continue;
            }
            let offset = slot * INODE_SIZE;
            let raw = RawInode::read_from(&buf[offset..offset + INODE_SIZE])
                .ok_or_else(|| YfsError::Corrupted("short inode record".to_string()))?;
            self.inodes.insert(neighbour, Inode::from_raw(&raw)?);
        }

        self.inodes.get(&inum).copied().ok_or(YfsError::NotFound)
    }

    /// Like [`Store::inode`] but a free inode is reported as missing.
    pub fn live_inode(&mut self, inum: InodeNumber) -> Result<Inode> {
        let inode = self.inode(inum)?;
        if inode.is_free() {
            return Err(YfsError::NotFound);
        }
        Ok(inode)
    }

    pub fn put_inode(&mut self, inum: InodeNumber, inode: Inode) -> Result<()> {
        self.check_inode(inum)?;
        self.inodes.insert(inum, inode);
        self.dirty_inodes.insert(inum);
        Ok(())
    }

    fn load_block(&mut self, bnum: BlockNumber) -> Result<&mut Block> {
        self.check_block(bnum)?;
        if !self.blocks.contains_key(&bnum) {
            if self.blocks.len() >= BLOCK_CACHE_LIMIT {
                let dirty = &self.dirty_blocks;
                self.blocks.retain(|bnum, _| dirty.contains(bnum));
            }
            let mut buf = [0; BLOCK_SIZE];
            self.dev.read_block(bnum, &mut buf)?;
            self.blocks.insert(bnum, buf);
        }
        self.blocks.get_mut(&bnum).ok_or(YfsError::NotFound)
    }

    pub fn block(&mut self, bnum: BlockNumber) -> Result<&Block> {
        self.load_block(bnum).map(|block| &*block)
    }

    /// Write access to a block. The block is flushed on the next sync.
    pub fn block_mut(&mut self, bnum: BlockNumber) -> Result<&mut Block> {
        self.check_block(bnum)?;
        self.dirty_blocks.insert(bnum);
        self.load_block(bnum)
    }

    pub fn alloc_inode(&mut self) -> Result<InodeNumber> {
        let inum = self.inode_pool.acquire().ok_or(YfsError::NoSpace)?;
        debug!("allocated inode {}", inum);
        Ok(inum)
    }

    pub fn free_inode(&mut self, inum: InodeNumber) {
        debug!("released inode {}", inum);
        self.inode_pool.release(inum);
    }

    /// Takes a block from the pool. Its content starts out zeroed.
    pub fn alloc_block(&mut self) -> Result<BlockNumber> {
        let bnum = self.block_pool.acquire().ok_or(YfsError::NoSpace)?;
        self.blocks.insert(bnum, [0; BLOCK_SIZE]);
        self.dirty_blocks.insert(bnum);
        debug!("allocated block {}", bnum);
        Ok(bnum)
    }

    pub fn free_block(&mut self, bnum: BlockNumber) {
        debug!("released block {}", bnum);
        self.block_pool.release(bnum);
        self.blocks.remove(&bnum);
        self.dirty_blocks.remove(&bnum);
    }

    pub fn free_inode_count(&self) -> usize {
        self.inode_pool.free_count()
    }

    pub fn free_block_count(&self) -> usize {
        self.block_pool.free_count()
    }

    pub fn is_block_used(&self, bnum: BlockNumber) -> bool {
        self.block_pool.is_used(bnum)
    }

    /// Inodes and blocks currently held in memory.
    pub fn cached_count(&self) -> (usize, usize) {
        (self.inodes.len(), self.blocks.len())
    }

    /// Inodes and blocks modified since the last flush.
    pub fn dirty_count(&self) -> (usize, usize) {
        (self.dirty_inodes.len(), self.dirty_blocks.len())
    }

    /// Writes every modified inode and block to the device and syncs it.
    pub fn flush(&mut self) -> Result<()> {
        let mut by_block: BTreeMap<BlockNumber, Vec<InodeNumber>> = BTreeMap::new();
        for &inum in &self.dirty_inodes {
            by_block
                .entry(inode_location(inum).0)
                .or_default()
                .push(inum);
        }

        let mut buf = [0; BLOCK_SIZE];
        for (bnum, inums) in by_block {
            self.dev.read_block(bnum, &mut buf)?;
            for inum in inums {
                let (_, offset) = inode_location(inum);
                if let Some(inode) = self.inodes.get(&inum) {
                    buf[offset..offset + INODE_SIZE].copy_from_slice(inode.to_raw().as_bytes());
                }
            }
            self.dev.write_block(bnum, &buf)?;
        }

        for &bnum in &self.dirty_blocks {
            if let Some(block) = self.blocks.get(&bnum) {
                self.dev.write_block(bnum, block)?;
            }
        }
        self.dev.sync_disk()?;

        debug!(
            "flushed {} inodes and {} blocks",
            self.dirty_inodes.len(),
            self.dirty_blocks.len()
        );
        self.dirty_inodes.clear();
        self.dirty_blocks.clear();
        self.inodes.clear();
        self.blocks.clear();
        Ok(())
    }

    /// Hands the device back without flushing.
    pub fn into_device(self) -> T {
        self.dev
    }
}
