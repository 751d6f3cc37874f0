//! A Yalnix style inode file system served one request at a time.
//!
//! [`Yfs`] implements the operations over any [`io::BlockStorage`] device.
//! [`server::Server`] dispatches [`proto::Request`]s to it over a
//! [`proto::Transport`], such as the in-process one in [`channel`].

mod alloc;
pub mod bmap;
pub mod channel;
pub mod config;
pub mod dir;
pub mod error;
mod fs;
pub mod io;
pub mod layout;
pub mod lifecycle;
pub mod node;
pub mod path;
pub mod proto;
pub mod server;
pub mod store;

pub use crate::bmap::Whence;
pub use crate::config::FormatOptions;
pub use crate::error::{ErrorCode, Result, YfsError};
pub use crate::fs::{Pid, Stat, Yfs};
pub use crate::node::{InodeNumber, InodeType};
