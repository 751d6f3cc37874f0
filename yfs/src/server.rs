use log::{error, info, warn};

use crate::error::{ErrorCode, Result, YfsError};
use crate::fs::Yfs;
use crate::io::BlockStorage;
use crate::proto::{Delivery, Message, Reply, Request, Response, Transport};

/// Answers requests one at a time against a mounted file system.
pub struct Server<T: BlockStorage> {
    fs: Yfs<T>,
}

impl<T: BlockStorage> Server<T> {
    pub fn new(fs: Yfs<T>) -> Self {
        Self { fs }
    }

    pub fn fs(&self) -> &Yfs<T> {
        &self.fs
    }

    fn dispatch(&mut self, message: Message) -> Result<Response> {
        let Message { pid, cwd, request } = message;
        let fs = &mut self.fs;
        Ok(match request {
            Request::Open { path } => Response::Inode(fs.open(cwd, &path)?),
            Request::Create { path } => Response::Inode(fs.create(cwd, &path)?),
            Request::Read { inum, offset, len } => {
                Response::Data(fs.read(pid, inum, offset, len)?)
            }
            Request::Write { inum, offset, data } => {
                Response::Count(fs.write(pid, inum, offset, &data)?)
            }
            Request::Seek {
                inum,
                offset,
                whence,
            } => Response::Position(fs.seek(pid, inum, offset, whence)?),
            Request::Link { old, new } => {
                fs.link(cwd, &old, &new)?;
                Response::Done
            }
            Request::Unlink { path } => {
                fs.unlink(cwd, &path)?;
                Response::Done
            }
            Request::SymLink { target, new } => {
                fs.symlink(cwd, &target, &new)?;
                Response::Done
            }
            Request::ReadLink { path, len } => Response::Data(fs.readlink(cwd, &path, len)?),
            Request::MkDir { path } => {
                fs.mkdir(cwd, &path)?;
                Response::Done
            }
            Request::RmDir { path } => {
                fs.rmdir(cwd, &path)?;
                Response::Done
            }
            Request::ChDir { path } => Response::Inode(fs.chdir(cwd, &path)?),
            Request::Stat { path } => Response::Stat(fs.stat(cwd, &path)?),
            Request::Sync => {
                fs.sync()?;
                Response::Done
            }
            Request::ShutDown => {
                fs.shutdown()?;
                Response::Done
            }
        })
    }

    /// Runs one request to completion. Every failure becomes an error reply.
    pub fn handle(&mut self, message: Message) -> Reply {
        let (pid, op) = (message.pid, message.request.name());
        self.dispatch(message).map_err(|err| {
            warn!("pid {}: {} refused: {}", pid, op, err);
            ErrorCode::from(&err)
        })
    }

    /// Serves until a successful shutdown request or until the transport has no
    /// more clients. Each delivery is answered exactly once.
    pub fn serve<R: Transport>(&mut self, transport: &mut R) -> Result<()> {
        while let Some(delivery) = transport.receive() {
            let (pid, reply, shutdown) = match delivery {
                Delivery::Request(message) => {
                    let pid = message.pid;
                    let shutdown = message.request == Request::ShutDown;
                    let reply = self.handle(message);
                    let done = shutdown && reply.is_ok();
                    (pid, reply, done)
                }
                Delivery::Garbled { pid } => {
                    let err =
                        YfsError::TransportFailure(format!("garbled request from pid {}", pid));
                    warn!("{}", err);
                    (pid, Err(ErrorCode::from(&err)), false)
                }
            };

            if let Err(err) = transport.reply(pid, reply) {
                error!("could not reply to pid {}: {}", pid, err);
            }
            if shutdown {
                info!("shut down by pid {}", pid);
                return Ok(());
            }
        }

        info!("transport closed, syncing");
        self.fs.sync()
    }

    /// Gives the file system back once serving is over.
    pub fn into_inner(self) -> Yfs<T> {
        self.fs
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::config::FormatOptions;
    use crate::fs::Pid;
    use crate::io::{FileBlockEmulator, FileBlockEmulatorBuilder};
    use crate::layout::ROOT_INODE;

    /// Replays a fixed list of deliveries and records the replies.
    #[derive(Default)]
    struct Replay {
        inbox: VecDeque<Delivery>,
        replies: Vec<(Pid, Reply)>,
    }

    impl Transport for Replay {
        fn receive(&mut self) -> Option<Delivery> {
            self.inbox.pop_front()
        }

        fn reply(&mut self, pid: Pid, reply: Reply) -> std::io::Result<()> {
            self.replies.push((pid, reply));
            Ok(())
        }
    }

    fn create_test_server() -> Server<FileBlockEmulator> {
        let dev = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
            .with_block_count(128)
            .build()
            .expect("Could not initialize disk emulator.");
        let options = FormatOptions::new().with_blocks(128).with_inodes(32);
        Server::new(Yfs::format(dev, options).unwrap())
    }

    fn message(pid: Pid, request: Request) -> Delivery {
        Delivery::Request(Message {
            pid,
            cwd: ROOT_INODE,
            request,
        })
    }

    #[test]
    fn errors_become_error_codes() {
        let mut server = create_test_server();
        let reply = server.handle(Message {
            pid: 1,
            cwd: ROOT_INODE,
            request: Request::Open {
                path: "/missing".to_string(),
            },
        });
        assert_eq!(reply, Err(ErrorCode::NotFound));
    }

    #[test]
    fn every_delivery_is_answered_once() {
        let mut server = create_test_server();
        let mut transport = Replay::default();
        transport.inbox.extend(vec![
            message(1, Request::MkDir { path: "/a".to_string() }),
            Delivery::Garbled { pid: 2 },
            message(3, Request::MkDir { path: "/a".to_string() }),
            message(1, Request::Stat { path: "/a".to_string() }),
        ]);

        server.serve(&mut transport).unwrap();

        let pids: Vec<Pid> = transport.replies.iter().map(|(pid, _)| *pid).collect();
        assert_eq!(pids, vec![1, 2, 3, 1]);
        assert_eq!(transport.replies[0].1, Ok(Response::Done));
        assert_eq!(transport.replies[1].1, Err(ErrorCode::TransportFailure));
        assert_eq!(transport.replies[2].1, Err(ErrorCode::AlreadyExists));
        assert!(matches!(transport.replies[3].1, Ok(Response::Stat(_))));
    }

    #[test]
    fn shutdown_stops_serving() {
        let mut server = create_test_server();
        let mut transport = Replay::default();
        transport.inbox.extend(vec![
            message(1, Request::Create { path: "/f".to_string() }),
            message(1, Request::ShutDown),
            message(1, Request::Create { path: "/g".to_string() }),
        ]);

        server.serve(&mut transport).unwrap();

        assert_eq!(transport.replies.len(), 2);
        assert_eq!(transport.replies[1].1, Ok(Response::Done));
        assert_eq!(transport.inbox.len(), 1);
        assert_eq!(server.fs().store().dirty_count(), (0, 0));
    }

    #[test]
    fn served_state_outlives_the_server() {
        let mut server = create_test_server();
        let mut transport = Replay::default();
        transport.inbox.extend(vec![
            message(1, Request::Create { path: "/f".to_string() }),
            message(
                1,
                Request::Write {
                    inum: 2,
                    offset: 0,
                    data: b"kept".to_vec(),
                },
            ),
        ]);

        server.serve(&mut transport).unwrap();
        assert_eq!(transport.replies[1].1, Ok(Response::Count(4)));

        let dev = server.into_inner().into_device().unwrap();
        let mut fs = Yfs::mount(dev).unwrap();
        assert_eq!(fs.open(ROOT_INODE, "/f").unwrap(), 2);
        assert_eq!(fs.read(1, 2, 0, 10).unwrap(), b"kept");
    }
}
