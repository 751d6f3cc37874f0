//! Request and reply types exchanged between client processes and the server.

use crate::error::ErrorCode;
use crate::fs::{Pid, Stat};
use crate::node::InodeNumber;

pub use crate::bmap::Whence;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Open { path: String },
    Create { path: String },
    Read { inum: InodeNumber, offset: u32, len: usize },
    Write { inum: InodeNumber, offset: u32, data: Vec<u8> },
    Seek { inum: InodeNumber, offset: i64, whence: Whence },
    Link { old: String, new: String },
    Unlink { path: String },
    SymLink { target: String, new: String },
    ReadLink { path: String, len: usize },
    MkDir { path: String },
    RmDir { path: String },
    ChDir { path: String },
    Stat { path: String },
    Sync,
    ShutDown,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Open { .. } => "open",
            Request::Create { .. } => "create",
            Request::Read { .. } => "read",
            Request::Write { .. } => "write",
            Request::Seek { .. } => "seek",
            Request::Link { .. } => "link",
            Request::Unlink { .. } => "unlink",
            Request::SymLink { .. } => "symlink",
            Request::ReadLink { .. } => "readlink",
            Request::MkDir { .. } => "mkdir",
            Request::RmDir { .. } => "rmdir",
            Request::ChDir { .. } => "chdir",
            Request::Stat { .. } => "stat",
            Request::Sync => "sync",
            Request::ShutDown => "shutdown",
        }
    }
}

/// A request together with the identity and working directory of its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub pid: Pid,
    pub cwd: InodeNumber,
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `Open`, `Create` and `ChDir`.
    Inode(InodeNumber),
    /// `Read` and `ReadLink`.
    Data(Vec<u8>),
    /// Bytes accepted by `Write`.
    Count(usize),
    Position(u32),
    Stat(Stat),
    Done,
}

pub type Reply = Result<Response, ErrorCode>;

/// What a transport hands the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Request(Message),
    /// A request arrived from `pid` but its arguments could not be copied in.
    Garbled { pid: Pid },
}

/// Moves requests in and replies out.
pub trait Transport {
    /// Blocks until the next request. `None` once no client can send any more.
    fn receive(&mut self) -> Option<Delivery>;

    fn reply(&mut self, pid: Pid, reply: Reply) -> std::io::Result<()>;
}
