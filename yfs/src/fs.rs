use std::collections::HashMap;

use log::{info, warn};

use crate::bmap::{self, Whence};
use crate::config::FormatOptions;
use crate::dir;
use crate::error::{Result, YfsError};
use crate::io::BlockStorage;
use crate::layout::{BLOCK_SIZE, MAX_PATHNAME_LEN, ROOT_INODE};
use crate::lifecycle;
use crate::node::{InodeNumber, InodeType};
use crate::path;
use crate::store::Store;

/// Identifies the process a request came from.
pub type Pid = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub inum: InodeNumber,
    pub kind: InodeType,
    pub size: u32,
    pub nlink: u16,
}

fn reject_reserved(name: &str) -> Result<()> {
    if dir::is_reserved(name) {
        return Err(YfsError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// The file system operations, one method per request type. Path arguments
/// are resolved relative to `cwd` unless they start with `/`.
///
/// Positions for `seek` are tracked per process and inode. `read` and `write`
/// move that position to the end of the transferred range.
pub struct Yfs<T: BlockStorage> {
    store: Store<T>,
    cursors: HashMap<(Pid, InodeNumber), u32>,
}

impl<T: BlockStorage> Yfs<T> {
    /// Initializes an empty file system, holding only the root directory, onto owned
    /// block storage.
    pub fn format(dev: T, options: FormatOptions) -> Result<Self> {
        let mut store = Store::format(dev, &options)?;
        lifecycle::init_root(&mut store)?;
        store.flush()?;
        Ok(Self::from_store(store))
    }

    pub fn mount(dev: T) -> Result<Self> {
        let mut store = Store::open(dev)?;
        dir::directory(&mut store, ROOT_INODE)
            .map_err(|_| YfsError::Corrupted("root inode is not a directory".to_string()))?;
        Ok(Self::from_store(store))
    }

    fn from_store(store: Store<T>) -> Self {
        Self {
            store,
            cursors: HashMap::new(),
        }
    }

    pub fn store(&self) -> &Store<T> {
        &self.store
    }

    pub fn open(&mut self, cwd: InodeNumber, pathname: &str) -> Result<InodeNumber> {
        info!("open {:?}", pathname);
        path::resolve_full(&mut self.store, cwd, pathname)
    }

    /// Creates a regular file, or truncates the one already there.
    pub fn create(&mut self, cwd: InodeNumber, pathname: &str) -> Result<InodeNumber> {
        info!("create {:?}", pathname);
        let (dir_inum, name) = path::resolve_parent(&mut self.store, cwd, pathname)?;
        reject_reserved(&name)?;
        let inum = lifecycle::create_object(&mut self.store, dir_inum, &name, InodeType::Regular)?;
        // A truncated file keeps its number; positions past the new end are gone.
        self.forget_cursors(inum);
        Ok(inum)
    }

    pub fn read(
        &mut self,
        pid: Pid,
        inum: InodeNumber,
        offset: u32,
        len: usize,
    ) -> Result<Vec<u8>> {
        info!("[inode #{}] read {} bytes at {}", inum, len, offset);
        let inode = self.store.live_inode(inum)?;
        let data = bmap::read(&mut self.store, &inode, offset, len)?;
        let end = offset.min(inode.size) + data.len() as u32;
        self.cursors.insert((pid, inum), end);
        Ok(data)
    }

    pub fn write(
        &mut self,
        pid: Pid,
        inum: InodeNumber,
        offset: u32,
        data: &[u8],
    ) -> Result<usize> {
        info!("[inode #{}] write {} bytes at {}", inum, data.len(), offset);
        let written = bmap::write(&mut self.store, inum, offset, data)?;
        self.cursors.insert((pid, inum), offset + written as u32);
        Ok(written)
    }

    pub fn seek(
        &mut self,
        pid: Pid,
        inum: InodeNumber,
        offset: i64,
        whence: Whence,
    ) -> Result<u32> {
        let inode = self.store.live_inode(inum)?;
        let current = self.cursors.get(&(pid, inum)).copied().unwrap_or(0);
        let pos = bmap::seek(inode.size, current, offset, whence)?;
        info!("[inode #{}] seek {:?} {} -> {}", inum, whence, offset, pos);
        self.cursors.insert((pid, inum), pos);
        Ok(pos)
    }

    /// Adds `new` as another name for the regular file at `old`.
    pub fn link(&mut self, cwd: InodeNumber, old: &str, new: &str) -> Result<()> {
        info!("link {:?} -> {:?}", new, old);
        let (old_dir, old_name) = path::resolve_parent(&mut self.store, cwd, old)?;
        let inum =
            path::lookup_component(&mut self.store, old_dir, &old_name)?.ok_or(YfsError::NotFound)?;
        match self.store.live_inode(inum)?.kind {
            InodeType::Regular => {}
            InodeType::Directory => return Err(YfsError::IsADirectory),
            InodeType::Symlink | InodeType::Free => return Err(YfsError::NotAFile),
        }

        let (new_dir, new_name) = path::resolve_parent(&mut self.store, cwd, new)?;
        reject_reserved(&new_name)?;
        if path::lookup_component(&mut self.store, new_dir, &new_name)?.is_some() {
            return Err(YfsError::AlreadyExists(new_name));
        }
        lifecycle::link(&mut self.store, inum)?;
        if let Err(err) = dir::create_entry(&mut self.store, new_dir, inum, &new_name) {
            lifecycle::unlink(&mut self.store, inum)?;
            return Err(err);
        }
        Ok(())
    }

    pub fn unlink(&mut self, cwd: InodeNumber, pathname: &str) -> Result<()> {
        info!("unlink {:?}", pathname);
        let (dir_inum, name) = path::resolve_parent(&mut self.store, cwd, pathname)?;
        reject_reserved(&name)?;
        let inum =
            path::lookup_component(&mut self.store, dir_inum, &name)?.ok_or(YfsError::NotFound)?;
        match self.store.live_inode(inum)?.kind {
            InodeType::Regular | InodeType::Symlink => {}
            InodeType::Directory => return Err(YfsError::IsADirectory),
            InodeType::Free => return Err(YfsError::NotFound),
        }

        dir::delete_entry(&mut self.store, dir_inum, &name, inum)?;
        self.drop_reference(inum)
    }

    /// Creates `new` as a symbolic link holding the text `target`. The target
    /// is stored as given and need not exist.
    pub fn symlink(&mut self, cwd: InodeNumber, target: &str, new: &str) -> Result<()> {
        info!("symlink {:?} -> {:?}", new, target);
        if target.is_empty() {
            return Err(YfsError::InvalidName(target.to_string()));
        }
        if target.len() > MAX_PATHNAME_LEN || target.len() > BLOCK_SIZE {
            return Err(YfsError::NameTooLong);
        }
        let (dir_inum, name) = path::resolve_parent(&mut self.store, cwd, new)?;
        reject_reserved(&name)?;
        lifecycle::create_symlink(&mut self.store, dir_inum, &name, target)?;
        Ok(())
    }

    /// Returns at most `len` bytes of the target of the symlink at `pathname`.
    /// The link itself is not followed.
    pub fn readlink(&mut self, cwd: InodeNumber, pathname: &str, len: usize) -> Result<Vec<u8>> {
        info!("readlink {:?}", pathname);
        let (dir_inum, name) = path::resolve_parent(&mut self.store, cwd, pathname)?;
        let inum =
            path::lookup_component(&mut self.store, dir_inum, &name)?.ok_or(YfsError::NotFound)?;
        let inode = self.store.live_inode(inum)?;
        if inode.kind != InodeType::Symlink {
            return Err(YfsError::NotASymlink);
        }
        let target = path::read_target(&mut self.store, &inode)?;
        let len = len.min(target.len());
        Ok(target.as_bytes()[..len].to_vec())
    }

    pub fn mkdir(&mut self, cwd: InodeNumber, pathname: &str) -> Result<()> {
        info!("mkdir {:?}", pathname);
        let (dir_inum, name) = path::resolve_parent(&mut self.store, cwd, pathname)?;
        reject_reserved(&name)?;
        if path::lookup_component(&mut self.store, dir_inum, &name)?.is_some() {
            return Err(YfsError::AlreadyExists(name));
        }
        lifecycle::create_object(&mut self.store, dir_inum, &name, InodeType::Directory)?;
        Ok(())
    }

    /// Removes a directory holding nothing but `.` and `..`.
    pub fn rmdir(&mut self, cwd: InodeNumber, pathname: &str) -> Result<()> {
        info!("rmdir {:?}", pathname);
        let (dir_inum, name) = path::resolve_parent(&mut self.store, cwd, pathname)?;
        reject_reserved(&name)?;
        let inum =
            path::lookup_component(&mut self.store, dir_inum, &name)?.ok_or(YfsError::NotFound)?;
        match self.store.live_inode(inum)?.kind {
            InodeType::Directory => {}
            InodeType::Regular | InodeType::Symlink => return Err(YfsError::NotADirectory),
            InodeType::Free => return Err(YfsError::NotFound),
        }
        if inum == ROOT_INODE {
            return Err(YfsError::InvalidName(pathname.to_string()));
        }
        if dir::count_entries(&mut self.store, inum)? != 2 {
            return Err(YfsError::DirectoryNotEmpty);
        }

        dir::delete_entry(&mut self.store, dir_inum, &name, inum)?;
        self.drop_reference(inum)
    }

    /// Resolves the new working directory for the caller.
    pub fn chdir(&mut self, cwd: InodeNumber, pathname: &str) -> Result<InodeNumber> {
        info!("chdir {:?}", pathname);
        let inum = path::resolve_full(&mut self.store, cwd, pathname)?;
        dir::directory(&mut self.store, inum)?;
        Ok(inum)
    }

    /// Reports on the entry named by `pathname`. A symlink is described, not followed.
    pub fn stat(&mut self, cwd: InodeNumber, pathname: &str) -> Result<Stat> {
        info!("stat {:?}", pathname);
        let inum = if pathname.starts_with('/') && pathname.trim_matches('/').is_empty() {
            ROOT_INODE
        } else {
            let (dir_inum, name) = path::resolve_parent(&mut self.store, cwd, pathname)?;
            path::lookup_component(&mut self.store, dir_inum, &name)?.ok_or(YfsError::NotFound)?
        };
        let inode = self.store.live_inode(inum)?;
        Ok(Stat {
            inum,
            kind: inode.kind,
            size: inode.size,
            nlink: inode.nlink,
        })
    }

    pub fn sync(&mut self) -> Result<()> {
        let (inodes, blocks) = self.store.dirty_count();
        info!("sync: {} inodes and {} blocks pending", inodes, blocks);
        self.store.flush()
    }

    /// Flushes everything. The caller stops serving once this returns.
    pub fn shutdown(&mut self) -> Result<()> {
        self.sync()?;
        info!("file system is shutting down");
        Ok(())
    }

    /// Flushes and hands the device back.
    pub fn into_device(mut self) -> Result<T> {
        self.store.flush()?;
        Ok(self.store.into_device())
    }

    fn forget_cursors(&mut self, inum: InodeNumber) {
        self.cursors.retain(|&(_, cursor_inum), _| cursor_inum != inum);
    }

    fn drop_reference(&mut self, inum: InodeNumber) -> Result<()> {
        if lifecycle::unlink(&mut self.store, inum)? {
            self.forget_cursors(inum);
        } else {
            warn!("[inode #{}] still has links after removal of one name", inum);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{FileBlockEmulator, FileBlockEmulatorBuilder};

    const PID: Pid = 7;

    fn create_test_fs() -> Yfs<FileBlockEmulator> {
        let dev = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
            .with_block_count(256)
            .build()
            .expect("Could not initialize disk emulator.");
        Yfs::format(dev, FormatOptions::new().with_blocks(256).with_inodes(32)).unwrap()
    }

    #[test]
    fn root_dir_returns_root_inode() {
        let mut fs = create_test_fs();
        assert_eq!(fs.open(ROOT_INODE, "/").unwrap(), ROOT_INODE);
        let stat = fs.stat(ROOT_INODE, "/").unwrap();
        assert_eq!(stat.kind, InodeType::Directory);
        assert_eq!(stat.size, 64);
    }

    #[test]
    fn file_not_found_without_create_returns_error() {
        let mut fs = create_test_fs();
        match fs.open(ROOT_INODE, "/foo").unwrap_err() {
            YfsError::NotFound => (),
            other => panic!("Unexpected error type {:?}", other),
        }
    }

    #[test]
    fn create_returns_handle_that_open_finds() {
        let mut fs = create_test_fs();
        let inum = fs.create(ROOT_INODE, "/foo").unwrap();
        assert_eq!(inum, 2);
        assert_eq!(fs.open(ROOT_INODE, "/foo").unwrap(), inum);
    }

    #[test]
    fn reserved_names_cannot_be_created() {
        let mut fs = create_test_fs();
        for pathname in ["/.", "/..", "/a/..", "."] {
            assert!(fs.create(ROOT_INODE, pathname).is_err(), "{}", pathname);
        }
        assert!(matches!(
            fs.mkdir(ROOT_INODE, "/.."),
            Err(YfsError::InvalidName(_))
        ));
    }

    #[test]
    fn cursor_is_tracked_per_process() {
        let mut fs = create_test_fs();
        let inum = fs.create(ROOT_INODE, "/f").unwrap();
        fs.write(PID, inum, 0, b"0123456789").unwrap();

        assert_eq!(fs.seek(PID, inum, -4, Whence::FromCurrent).unwrap(), 6);
        assert_eq!(fs.seek(PID, inum, 1, Whence::FromCurrent).unwrap(), 7);
        // Another process starts at 0.
        assert_eq!(fs.seek(PID + 1, inum, 3, Whence::FromCurrent).unwrap(), 3);

        fs.read(PID, inum, 2, 3).unwrap();
        assert_eq!(fs.seek(PID, inum, 0, Whence::FromCurrent).unwrap(), 5);
    }

    #[test]
    fn seek_outside_file_fails() {
        let mut fs = create_test_fs();
        let inum = fs.create(ROOT_INODE, "/f").unwrap();
        fs.write(PID, inum, 0, b"abc").unwrap();

        assert_eq!(fs.seek(PID, inum, 0, Whence::FromEnd).unwrap(), 3);
        assert!(matches!(
            fs.seek(PID, inum, -4, Whence::FromEnd),
            Err(YfsError::InvalidOffset(-1))
        ));
        assert!(matches!(
            fs.seek(PID, 30, 0, Whence::FromStart),
            Err(YfsError::NotFound)
        ));
    }

    #[test]
    fn read_past_the_end_leaves_cursor_at_the_end() {
        let mut fs = create_test_fs();
        let inum = fs.create(ROOT_INODE, "/f").unwrap();
        fs.write(PID, inum, 0, b"0123456789").unwrap();

        assert!(fs.read(PID, inum, 50, 4).unwrap().is_empty());
        assert_eq!(fs.seek(PID, inum, 0, Whence::FromCurrent).unwrap(), 10);
        assert_eq!(fs.read(PID, inum, 8, 4).unwrap(), b"89");
        assert_eq!(fs.seek(PID, inum, 0, Whence::FromCurrent).unwrap(), 10);
    }

    #[test]
    fn truncating_create_resets_cursors() {
        let mut fs = create_test_fs();
        let inum = fs.create(ROOT_INODE, "/f").unwrap();
        fs.write(PID, inum, 0, b"0123456789").unwrap();
        assert_eq!(fs.seek(PID, inum, 8, Whence::FromStart).unwrap(), 8);
        assert_eq!(fs.seek(PID + 1, inum, 4, Whence::FromStart).unwrap(), 4);

        assert_eq!(fs.create(ROOT_INODE, "/f").unwrap(), inum);
        assert_eq!(fs.seek(PID, inum, 0, Whence::FromCurrent).unwrap(), 0);
        assert_eq!(fs.seek(PID + 1, inum, 0, Whence::FromCurrent).unwrap(), 0);
    }

    #[test]
    fn link_at_the_count_ceiling_adds_no_name() {
        let mut fs = create_test_fs();
        let inum = fs.create(ROOT_INODE, "/f").unwrap();
        let mut inode = fs.store.live_inode(inum).unwrap();
        inode.nlink = i16::MAX as u16;
        fs.store.put_inode(inum, inode).unwrap();

        assert!(matches!(
            fs.link(ROOT_INODE, "/f", "/g"),
            Err(YfsError::NoSpace)
        ));
        assert!(matches!(
            fs.open(ROOT_INODE, "/g"),
            Err(YfsError::NotFound)
        ));
        assert_eq!(fs.stat(ROOT_INODE, "/f").unwrap().nlink, i16::MAX as u16);
    }

    #[test]
    fn failed_link_gives_back_the_count() {
        let mut fs = create_test_fs();
        fs.create(ROOT_INODE, "/f").unwrap();

        assert!(matches!(
            fs.link(ROOT_INODE, "/f", "/g\0"),
            Err(YfsError::InvalidName(_))
        ));
        assert_eq!(fs.stat(ROOT_INODE, "/f").unwrap().nlink, 1);
    }

    #[test]
    fn link_to_directory_or_symlink_is_refused() {
        let mut fs = create_test_fs();
        fs.mkdir(ROOT_INODE, "/d").unwrap();
        fs.symlink(ROOT_INODE, "/d", "/s").unwrap();

        assert!(matches!(
            fs.link(ROOT_INODE, "/d", "/e"),
            Err(YfsError::IsADirectory)
        ));
        assert!(matches!(
            fs.link(ROOT_INODE, "/s", "/t"),
            Err(YfsError::NotAFile)
        ));
    }

    #[test]
    fn link_uses_the_new_name() {
        let mut fs = create_test_fs();
        let inum = fs.create(ROOT_INODE, "/f").unwrap();
        fs.mkdir(ROOT_INODE, "/d").unwrap();
        fs.link(ROOT_INODE, "/f", "/d/g").unwrap();

        assert_eq!(fs.open(ROOT_INODE, "/d/g").unwrap(), inum);
        assert!(matches!(
            fs.open(ROOT_INODE, "/d/f"),
            Err(YfsError::NotFound)
        ));
        assert!(matches!(
            fs.link(ROOT_INODE, "/f", "/d/g"),
            Err(YfsError::AlreadyExists(_))
        ));
    }

    #[test]
    fn unlink_refuses_directories() {
        let mut fs = create_test_fs();
        fs.mkdir(ROOT_INODE, "/d").unwrap();
        assert!(matches!(
            fs.unlink(ROOT_INODE, "/d"),
            Err(YfsError::IsADirectory)
        ));
        assert!(matches!(
            fs.unlink(ROOT_INODE, "/nope"),
            Err(YfsError::NotFound)
        ));
    }

    #[test]
    fn rmdir_refuses_files_and_root() {
        let mut fs = create_test_fs();
        fs.create(ROOT_INODE, "/f").unwrap();
        assert!(matches!(
            fs.rmdir(ROOT_INODE, "/f"),
            Err(YfsError::NotADirectory)
        ));
        assert!(fs.rmdir(ROOT_INODE, "/").is_err());
        assert!(matches!(
            fs.rmdir(ROOT_INODE, "/.."),
            Err(YfsError::InvalidName(_))
        ));
    }

    #[test]
    fn chdir_requires_directory() {
        let mut fs = create_test_fs();
        fs.mkdir(ROOT_INODE, "/d").unwrap();
        fs.create(ROOT_INODE, "/d/f").unwrap();

        let d = fs.chdir(ROOT_INODE, "/d").unwrap();
        assert_eq!(fs.chdir(d, "..").unwrap(), ROOT_INODE);
        assert!(matches!(
            fs.chdir(d, "f"),
            Err(YfsError::NotADirectory)
        ));
    }

    #[test]
    fn readlink_truncates_and_checks_type() {
        let mut fs = create_test_fs();
        fs.symlink(ROOT_INODE, "some/where", "/l").unwrap();
        fs.create(ROOT_INODE, "/f").unwrap();

        assert_eq!(fs.readlink(ROOT_INODE, "/l", 4).unwrap(), b"some");
        assert!(matches!(
            fs.readlink(ROOT_INODE, "/f", 10),
            Err(YfsError::NotASymlink)
        ));
    }

    #[test]
    fn symlink_validates_target_and_name() {
        let mut fs = create_test_fs();
        assert!(matches!(
            fs.symlink(ROOT_INODE, "", "/l"),
            Err(YfsError::InvalidName(_))
        ));
        let long = "t".repeat(MAX_PATHNAME_LEN + 1);
        assert!(matches!(
            fs.symlink(ROOT_INODE, &long, "/l"),
            Err(YfsError::NameTooLong)
        ));
        fs.create(ROOT_INODE, "/f").unwrap();
        assert!(matches!(
            fs.symlink(ROOT_INODE, "x", "/f"),
            Err(YfsError::AlreadyExists(_))
        ));
    }

    #[test]
    fn stat_does_not_follow_symlinks() {
        let mut fs = create_test_fs();
        let inum = fs.create(ROOT_INODE, "/f").unwrap();
        fs.write(PID, inum, 0, b"hello").unwrap();
        fs.symlink(ROOT_INODE, "/f", "/l").unwrap();

        let stat = fs.stat(ROOT_INODE, "/l").unwrap();
        assert_eq!(stat.kind, InodeType::Symlink);
        assert_eq!(stat.size, 2);
        assert_eq!(fs.open(ROOT_INODE, "/l").unwrap(), inum);
    }
}
