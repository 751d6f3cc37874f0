//! An in-process transport: client threads send requests over an mpsc channel
//! to the single thread running [`Server::serve`](crate::server::Server::serve).

use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use log::debug;

use crate::error::ErrorCode;
use crate::fs::{Pid, Stat};
use crate::layout::ROOT_INODE;
use crate::node::InodeNumber;
use crate::proto::{Delivery, Message, Reply, Request, Response, Transport, Whence};

type Envelope = (Delivery, Sender<Reply>);

/// Creates a connected transport and a connector that hands out clients.
pub fn channel() -> (ChannelTransport, Connector) {
    let (sender, receiver) = mpsc::channel();
    let transport = ChannelTransport {
        receiver,
        pending: HashMap::new(),
    };
    let connector = Connector {
        sender,
        next_pid: Arc::new(AtomicU32::new(1)),
    };
    (transport, connector)
}

/// Server end. `receive` returns `None` once every connector and client is gone.
pub struct ChannelTransport {
    receiver: Receiver<Envelope>,
    pending: HashMap<Pid, Sender<Reply>>,
}

impl Transport for ChannelTransport {
    fn receive(&mut self) -> Option<Delivery> {
        let (delivery, reply_to) = self.receiver.recv().ok()?;
        let pid = match &delivery {
            Delivery::Request(message) => message.pid,
            Delivery::Garbled { pid } => *pid,
        };
        self.pending.insert(pid, reply_to);
        Some(delivery)
    }

    fn reply(&mut self, pid: Pid, reply: Reply) -> std::io::Result<()> {
        let reply_to = self.pending.remove(&pid).ok_or_else(|| {
            std::io::Error::new(ErrorKind::NotFound, format!("no request pending for pid {}", pid))
        })?;
        reply_to
            .send(reply)
            .map_err(|_| std::io::Error::new(ErrorKind::BrokenPipe, "client went away"))
    }
}

#[derive(Clone)]
pub struct Connector {
    sender: Sender<Envelope>,
    next_pid: Arc<AtomicU32>,
}

impl Connector {
    /// A new client with its own pid, starting out in the root directory.
    pub fn connect(&self) -> Client {
        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        debug!("pid {} connected", pid);
        Client {
            pid,
            cwd: ROOT_INODE,
            sender: self.sender.clone(),
        }
    }
}

/// One client process. Calls block until the server has answered.
pub struct Client {
    pid: Pid,
    cwd: InodeNumber,
    sender: Sender<Envelope>,
}

fn unexpected(response: Response) -> ErrorCode {
    debug!("unexpected response {:?}", response);
    ErrorCode::TransportFailure
}

impl Client {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn cwd(&self) -> InodeNumber {
        self.cwd
    }

    fn exchange(&mut self, delivery: Delivery) -> Reply {
        let (reply_to, reply) = mpsc::channel();
        self.sender
            .send((delivery, reply_to))
            .map_err(|_| ErrorCode::TransportFailure)?;
        reply.recv().map_err(|_| ErrorCode::TransportFailure)?
    }

    pub fn call(&mut self, request: Request) -> Reply {
        self.exchange(Delivery::Request(Message {
            pid: self.pid,
            cwd: self.cwd,
            request,
        }))
    }

    /// Sends a request whose arguments could not be copied in.
    pub fn call_garbled(&mut self) -> Reply {
        self.exchange(Delivery::Garbled { pid: self.pid })
    }

    fn inode(&mut self, request: Request) -> Result<InodeNumber, ErrorCode> {
        match self.call(request)? {
            Response::Inode(inum) => Ok(inum),
            other => Err(unexpected(other)),
        }
    }

    fn data(&mut self, request: Request) -> Result<Vec<u8>, ErrorCode> {
        match self.call(request)? {
            Response::Data(data) => Ok(data),
            other => Err(unexpected(other)),
        }
    }

    fn done(&mut self, request: Request) -> Result<(), ErrorCode> {
        match self.call(request)? {
            Response::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub fn open(&mut self, path: &str) -> Result<InodeNumber, ErrorCode> {
        self.inode(Request::Open {
            path: path.to_string(),
        })
    }

    pub fn create(&mut self, path: &str) -> Result<InodeNumber, ErrorCode> {
        self.inode(Request::Create {
            path: path.to_string(),
        })
    }

    pub fn read(&mut self, inum: InodeNumber, offset: u32, len: usize) -> Result<Vec<u8>, ErrorCode> {
        self.data(Request::Read { inum, offset, len })
    }

    pub fn write(&mut self, inum: InodeNumber, offset: u32, data: &[u8]) -> Result<usize, ErrorCode> {
        let request = Request::Write {
            inum,
            offset,
            data: data.to_vec(),
        };
        match self.call(request)? {
            Response::Count(count) => Ok(count),
            other => Err(unexpected(other)),
        }
    }

    pub fn seek(&mut self, inum: InodeNumber, offset: i64, whence: Whence) -> Result<u32, ErrorCode> {
        match self.call(Request::Seek {
            inum,
            offset,
            whence,
        })? {
            Response::Position(pos) => Ok(pos),
            other => Err(unexpected(other)),
        }
    }

    pub fn link(&mut self, old: &str, new: &str) -> Result<(), ErrorCode> {
        self.done(Request::Link {
            old: old.to_string(),
            new: new.to_string(),
        })
    }

    pub fn unlink(&mut self, path: &str) -> Result<(), ErrorCode> {
        self.done(Request::Unlink {
            path: path.to_string(),
        })
    }

    pub fn symlink(&mut self, target: &str, new: &str) -> Result<(), ErrorCode> {
        self.done(Request::SymLink {
            target: target.to_string(),
            new: new.to_string(),
        })
    }

    pub fn readlink(&mut self, path: &str, len: usize) -> Result<Vec<u8>, ErrorCode> {
        self.data(Request::ReadLink {
            path: path.to_string(),
            len,
        })
    }

    pub fn mkdir(&mut self, path: &str) -> Result<(), ErrorCode> {
        self.done(Request::MkDir {
            path: path.to_string(),
        })
    }

    pub fn rmdir(&mut self, path: &str) -> Result<(), ErrorCode> {
        self.done(Request::RmDir {
            path: path.to_string(),
        })
    }

    /// Changes this client's working directory.
    pub fn chdir(&mut self, path: &str) -> Result<(), ErrorCode> {
        self.cwd = self.inode(Request::ChDir {
            path: path.to_string(),
        })?;
        Ok(())
    }

    pub fn stat(&mut self, path: &str) -> Result<Stat, ErrorCode> {
        match self.call(Request::Stat {
            path: path.to_string(),
        })? {
            Response::Stat(stat) => Ok(stat),
            other => Err(unexpected(other)),
        }
    }

    pub fn sync(&mut self) -> Result<(), ErrorCode> {
        self.done(Request::Sync)
    }

    pub fn shutdown(&mut self) -> Result<(), ErrorCode> {
        self.done(Request::ShutDown)
    }
}
