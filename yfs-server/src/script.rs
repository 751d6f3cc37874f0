//! A line oriented transport: one request per input line, one reply per output
//! line. Lines may start with `@<pid>` to speak for another process, each of
//! which keeps its own working directory.

use std::collections::HashMap;
use std::io::{BufRead, Lines, Write};

use anyhow::{anyhow, bail, Context, Result};
use log::warn;
use yfs::layout::ROOT_INODE;
use yfs::proto::{Delivery, Message, Reply, Request, Response, Transport};
use yfs::{InodeNumber, Pid, Whence};

const DEFAULT_PID: Pid = 1;

fn arg<'a>(words: &mut impl Iterator<Item = &'a str>, what: &str) -> Result<&'a str> {
    words.next().ok_or_else(|| anyhow!("missing {}", what))
}

fn number<'a, N>(words: &mut impl Iterator<Item = &'a str>, what: &str) -> Result<N>
where
    N: std::str::FromStr,
    N::Err: std::error::Error + Send + Sync + 'static,
{
    let word = arg(words, what)?;
    word.parse()
        .with_context(|| format!("{} {:?} is not a number", what, word))
}

fn path<'a>(words: &mut impl Iterator<Item = &'a str>) -> Result<String> {
    arg(words, "path").map(str::to_string)
}

/// Returns what follows the first `count` words of `text`, with the
/// separating whitespace removed but inner spacing kept.
fn after_words(text: &str, count: usize) -> Option<&str> {
    let mut rest = text.trim_start();
    for _ in 0..count {
        let end = rest.find(char::is_whitespace)?;
        rest = rest[end..].trim_start();
    }
    Some(rest).filter(|rest| !rest.is_empty())
}

fn whence(word: &str) -> Result<Whence> {
    match word {
        "set" | "start" => Ok(Whence::FromStart),
        "cur" | "current" => Ok(Whence::FromCurrent),
        "end" => Ok(Whence::FromEnd),
        other => bail!("unknown seek base {:?}", other),
    }
}

/// Parses one script line into the request it names.
pub fn parse_request(line: &str) -> Result<Request> {
    let line = line.trim();
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let mut words = rest.split_whitespace();

    let request = match command {
        "open" => Request::Open {
            path: path(&mut words)?,
        },
        "create" => Request::Create {
            path: path(&mut words)?,
        },
        "read" => Request::Read {
            inum: number(&mut words, "inode")?,
            offset: number(&mut words, "offset")?,
            len: number(&mut words, "length")?,
        },
        "write" => {
            let inum = number(&mut words, "inode")?;
            let offset = number(&mut words, "offset")?;
            // Everything after the offset is data, spaces included.
            let data = after_words(rest, 2).ok_or_else(|| anyhow!("missing data"))?;
            return Ok(Request::Write {
                inum,
                offset,
                data: data.as_bytes().to_vec(),
            });
        }
        "seek" => Request::Seek {
            inum: number(&mut words, "inode")?,
            offset: number(&mut words, "offset")?,
            whence: whence(words.next().unwrap_or("set"))?,
        },
        "link" => Request::Link {
            old: path(&mut words)?,
            new: path(&mut words)?,
        },
        "unlink" | "rm" => Request::Unlink {
            path: path(&mut words)?,
        },
        "symlink" | "ln-s" => Request::SymLink {
            target: path(&mut words)?,
            new: path(&mut words)?,
        },
        "readlink" => Request::ReadLink {
            path: path(&mut words)?,
            len: match words.next() {
                Some(word) => word.parse().context("length is not a number")?,
                None => yfs::layout::MAX_PATHNAME_LEN,
            },
        },
        "mkdir" => Request::MkDir {
            path: path(&mut words)?,
        },
        "rmdir" => Request::RmDir {
            path: path(&mut words)?,
        },
        "cd" | "chdir" => Request::ChDir {
            path: path(&mut words)?,
        },
        "stat" => Request::Stat {
            path: path(&mut words)?,
        },
        "sync" => Request::Sync,
        "shutdown" => Request::ShutDown,
        "" => bail!("empty request"),
        other => bail!("unknown request {:?}", other),
    };
    if let Some(extra) = words.next() {
        bail!("unexpected argument {:?}", extra);
    }
    Ok(request)
}

/// Splits an optional `@<pid>` prefix off a line.
fn split_pid(line: &str) -> Result<(Pid, &str)> {
    match line.trim_start().strip_prefix('@') {
        Some(rest) => {
            let (pid, rest) = rest.split_once(' ').unwrap_or((rest, ""));
            let pid = pid
                .parse()
                .with_context(|| format!("bad pid {:?}", pid))?;
            Ok((pid, rest))
        }
        None => Ok((DEFAULT_PID, line)),
    }
}

pub fn format_reply(reply: &Reply) -> String {
    match reply {
        Ok(Response::Inode(inum)) => format!("ok {}", inum),
        Ok(Response::Data(data)) => {
            format!("ok {} {}", data.len(), String::from_utf8_lossy(data))
        }
        Ok(Response::Count(count)) => format!("ok {}", count),
        Ok(Response::Position(pos)) => format!("ok {}", pos),
        Ok(Response::Stat(stat)) => format!(
            "ok inum={} type={:?} size={} nlink={}",
            stat.inum, stat.kind, stat.size, stat.nlink
        ),
        Ok(Response::Done) => "ok".to_string(),
        Err(code) => format!("error {} {}", code.code(), code),
    }
}

pub struct ScriptTransport<R, W> {
    lines: Lines<R>,
    out: W,
    cwds: HashMap<Pid, InodeNumber>,
    /// Processes whose outstanding request is a `chdir`.
    changing_dir: HashMap<Pid, bool>,
}

impl<R: BufRead, W: Write> ScriptTransport<R, W> {
    pub fn new(input: R, out: W) -> Self {
        Self {
            lines: input.lines(),
            out,
            cwds: HashMap::new(),
            changing_dir: HashMap::new(),
        }
    }

    pub fn into_output(self) -> W {
        self.out
    }

    fn cwd(&self, pid: Pid) -> InodeNumber {
        self.cwds.get(&pid).copied().unwrap_or(ROOT_INODE)
    }
}

impl<R: BufRead, W: Write> Transport for ScriptTransport<R, W> {
    fn receive(&mut self) -> Option<Delivery> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => {
                    warn!("could not read request: {}", err);
                    return None;
                }
            };
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }

            let parsed = split_pid(&line)
                .and_then(|(pid, rest)| parse_request(rest).map(|request| (pid, request)));
            return Some(match parsed {
                Ok((pid, request)) => {
                    self.changing_dir
                        .insert(pid, matches!(request, Request::ChDir { .. }));
                    Delivery::Request(Message {
                        pid,
                        cwd: self.cwd(pid),
                        request,
                    })
                }
                Err(err) => {
                    warn!("{:?}: {:#}", line, err);
                    let pid = split_pid(&line).map(|(pid, _)| pid).unwrap_or(DEFAULT_PID);
                    self.changing_dir.insert(pid, false);
                    Delivery::Garbled { pid }
                }
            });
        }
    }

    fn reply(&mut self, pid: Pid, reply: Reply) -> std::io::Result<()> {
        if self.changing_dir.remove(&pid).unwrap_or(false) {
            if let Ok(Response::Inode(inum)) = &reply {
                self.cwds.insert(pid, *inum);
            }
        }
        writeln!(self.out, "{}", format_reply(&reply))?;
        self.out.flush()
    }
}
