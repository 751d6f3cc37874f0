use yfs::io::FileBlockEmulatorBuilder;
use yfs::layout::ROOT_INODE;
use yfs::{FormatOptions, Whence, Yfs};

pub fn main() {
    let tmp = tempfile::tempfile().unwrap();
    let dev = FileBlockEmulatorBuilder::from(tmp)
        .with_block_count(256)
        .build()
        .expect("Could not initialize disk emulator.");

    // create a new yfs on the device and put a file under /
    let options = FormatOptions::new().with_blocks(256).with_inodes(32);
    let mut fs = Yfs::format(dev, options).expect("should format");
    fs.mkdir(ROOT_INODE, "/hello").unwrap();
    let inum = fs.create(ROOT_INODE, "/hello/world.txt").unwrap();
    fs.write(1, inum, 0, b"hello, world\n").unwrap();
    fs.symlink(ROOT_INODE, "/hello/world.txt", "/greeting").unwrap();

    let inum = fs.open(ROOT_INODE, "/greeting").unwrap();
    let size = fs.seek(1, inum, 0, Whence::FromEnd).unwrap();
    let text = fs.read(1, inum, 0, size as usize).unwrap();
    print!("{}", String::from_utf8_lossy(&text));
    println!("{:?}", fs.stat(ROOT_INODE, "/greeting").unwrap());
    fs.shutdown().unwrap();
}
