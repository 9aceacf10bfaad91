//! Text event traces.
//!
//! One event per line; `#` starts a comment. Numbers are decimal or `0x` hex.
//!
//! ```text
//! # expect: races=1
//! fork 1 2
//! fork 1 3
//! enter 2 0x400100
//! write 2 0x1000 0x400104 4
//! write 3 0x1000 0x400200 4
//! ```
//!
//! A leading `# expect: races=N warnings=M` comment records the outcome a
//! replay should produce. Files ending in `.zst` are zstd-compressed.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

use racetrack_core::{LockId, SyncId, ThreadId};
use regex::Regex;
use thiserror::Error;

/// Access size used when a `read`/`write` line omits it.
pub const DEFAULT_ACCESS_SIZE: usize = 1;

/// Trace parsing errors.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
}

/// One trace event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceEvent {
    Fork { parent: ThreadId, child: ThreadId },
    Join { parent: ThreadId, child: ThreadId },
    Exit { thread: ThreadId },
    Enter { thread: ThreadId, site: u64 },
    Leave { thread: ThreadId },
    Read { thread: ThreadId, addr: u64, pc: u64, size: usize },
    Write { thread: ThreadId, addr: u64, pc: u64, size: usize },
    Acquire { thread: ThreadId, lock: LockId },
    Release { thread: ThreadId, lock: LockId },
    Signal { thread: ThreadId, sync: SyncId },
    Wait { thread: ThreadId, sync: SyncId },
    Alloc { thread: ThreadId, addr: u64, size: usize },
    Free { thread: ThreadId, addr: u64 },
}

impl TraceEvent {
    /// Thread the event is reported by.
    #[must_use]
    pub const fn thread(&self) -> ThreadId {
        match *self {
            Self::Fork { parent, .. } | Self::Join { parent, .. } => parent,
            Self::Exit { thread }
            | Self::Enter { thread, .. }
            | Self::Leave { thread }
            | Self::Read { thread, .. }
            | Self::Write { thread, .. }
            | Self::Acquire { thread, .. }
            | Self::Release { thread, .. }
            | Self::Signal { thread, .. }
            | Self::Wait { thread, .. }
            | Self::Alloc { thread, .. }
            | Self::Free { thread, .. } => thread,
        }
    }

    /// Parse one line. Returns `Ok(None)` for blank and comment lines.
    ///
    /// # Errors
    /// Returns a description of the problem for malformed lines.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.split_once('#').map_or(line, |(event, _)| event).trim();
        if line.is_empty() {
            return Ok(None);
        }
        let caps = regex(&LINE_PATTERN, r"^([a-z]+)((?:\s+[0-9A-Za-z_]+)*)$")
            .captures(line)
            .ok_or_else(|| format!("malformed event `{line}`"))?;
        let op = &caps[1];
        let args: Vec<&str> = caps[2].split_whitespace().collect();
        let args = Args { op, args: &args };

        let event = match op {
            "fork" => {
                args.arity(2, 2)?;
                Self::Fork {
                    parent: args.thread(0)?,
                    child: args.thread(1)?,
                }
            }
            "join" => {
                args.arity(2, 2)?;
                Self::Join {
                    parent: args.thread(0)?,
                    child: args.thread(1)?,
                }
            }
            "exit" => {
                args.arity(1, 1)?;
                Self::Exit {
                    thread: args.thread(0)?,
                }
            }
            "enter" => {
                args.arity(2, 2)?;
                Self::Enter {
                    thread: args.thread(0)?,
                    site: args.num(1)?,
                }
            }
            "leave" => {
                args.arity(1, 1)?;
                Self::Leave {
                    thread: args.thread(0)?,
                }
            }
            "read" | "write" => {
                args.arity(2, 4)?;
                let thread = args.thread(0)?;
                let addr = args.num(1)?;
                let pc = args.opt_num(2)?.unwrap_or(0);
                let size = args.opt_size(3)?.unwrap_or(DEFAULT_ACCESS_SIZE);
                if op == "read" {
                    Self::Read {
                        thread,
                        addr,
                        pc,
                        size,
                    }
                } else {
                    Self::Write {
                        thread,
                        addr,
                        pc,
                        size,
                    }
                }
            }
            "acquire" => {
                args.arity(2, 2)?;
                Self::Acquire {
                    thread: args.thread(0)?,
                    lock: LockId(args.num(1)?),
                }
            }
            "release" => {
                args.arity(2, 2)?;
                Self::Release {
                    thread: args.thread(0)?,
                    lock: LockId(args.num(1)?),
                }
            }
            "signal" => {
                args.arity(2, 2)?;
                Self::Signal {
                    thread: args.thread(0)?,
                    sync: SyncId(args.num(1)?),
                }
            }
            "wait" => {
                args.arity(2, 2)?;
                Self::Wait {
                    thread: args.thread(0)?,
                    sync: SyncId(args.num(1)?),
                }
            }
            "alloc" => {
                args.arity(3, 3)?;
                Self::Alloc {
                    thread: args.thread(0)?,
                    addr: args.num(1)?,
                    size: args.size(2)?,
                }
            }
            "free" => {
                args.arity(2, 2)?;
                Self::Free {
                    thread: args.thread(0)?,
                    addr: args.num(1)?,
                }
            }
            other => return Err(format!("unknown event `{other}`")),
        };
        Ok(Some(event))
    }
}

struct Args<'a> {
    op: &'a str,
    args: &'a [&'a str],
}

impl Args<'_> {
    fn arity(&self, min: usize, max: usize) -> Result<(), String> {
        let n = self.args.len();
        if (min..=max).contains(&n) {
            Ok(())
        } else if min == max {
            Err(format!("`{}` takes {min} arguments, got {n}", self.op))
        } else {
            Err(format!("`{}` takes {min} to {max} arguments, got {n}", self.op))
        }
    }

    fn num(&self, i: usize) -> Result<u64, String> {
        self.opt_num(i)?
            .ok_or_else(|| format!("`{}` is missing argument {}", self.op, i + 1))
    }

    fn opt_num(&self, i: usize) -> Result<Option<u64>, String> {
        self.args.get(i).map(|s| parse_number(s)).transpose()
    }

    fn thread(&self, i: usize) -> Result<ThreadId, String> {
        self.num(i).map(ThreadId)
    }

    fn size(&self, i: usize) -> Result<usize, String> {
        let n = self.num(i)?;
        usize::try_from(n).map_err(|_| format!("size {n} out of range"))
    }

    fn opt_size(&self, i: usize) -> Result<Option<usize>, String> {
        if i < self.args.len() {
            self.size(i).map(Some)
        } else {
            Ok(None)
        }
    }
}

/// Parse a decimal or `0x` hexadecimal number.
///
/// # Errors
/// Returns a description if `s` is not a number.
pub fn parse_number(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| format!("`{s}` is not a number"))
}

/// Outcome a trace declares in its `# expect:` header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Expectation {
    pub races: Option<usize>,
    pub warnings: Option<usize>,
}

impl Expectation {
    fn parse(line: &str) -> Option<Self> {
        let header = regex(&EXPECT_PATTERN, r"^#\s*expect:?\s+(.*)$");
        let pair = regex(&PAIR_PATTERN, r"(\w+)\s*=\s*(\d+)");

        let caps = header.captures(line.trim())?;
        let mut expect = Self::default();
        for kv in pair.captures_iter(&caps[1]) {
            let value = kv[2].parse().ok()?;
            match &kv[1] {
                "races" => expect.races = Some(value),
                "warnings" => expect.warnings = Some(value),
                _ => {}
            }
        }
        Some(expect)
    }
}

/// A parsed event with its source line number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceLine {
    pub line: usize,
    pub event: TraceEvent,
}

/// A parsed trace.
#[derive(Clone, Debug, Default)]
pub struct Trace {
    pub events: Vec<TraceLine>,
    pub expect: Expectation,
}

impl Trace {
    /// Parse a trace from a reader.
    ///
    /// # Errors
    /// Returns [`TraceError::Syntax`] with the 1-based line number of the
    /// first malformed line.
    pub fn parse(reader: impl BufRead) -> Result<Self, TraceError> {
        let mut trace = Self::default();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let number = idx + 1;
            if trace.events.is_empty() {
                if let Some(expect) = Expectation::parse(&line) {
                    trace.expect = expect;
                    continue;
                }
            }
            match TraceEvent::parse(&line) {
                Ok(Some(event)) => trace.events.push(TraceLine {
                    line: number,
                    event,
                }),
                Ok(None) => {}
                Err(message) => {
                    return Err(TraceError::Syntax {
                        line: number,
                        message,
                    });
                }
            }
        }
        Ok(trace)
    }

    /// Read a trace file, decompressing `.zst` files.
    ///
    /// # Errors
    /// Returns [`TraceError::Io`] if the file cannot be read or decoded.
    pub fn from_file(path: &Path) -> Result<Self, TraceError> {
        let file = File::open(path)?;
        let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "zst") {
            Box::new(zstd::stream::Decoder::new(file)?)
        } else {
            Box::new(file)
        };
        Self::parse(BufReader::new(reader))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl FromStr for Trace {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s.as_bytes())
    }
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| {
        Regex::new(pattern).unwrap_or_else(|e| panic!("invalid pattern `{pattern}`: {e}"))
    })
}

static LINE_PATTERN: OnceLock<Regex> = OnceLock::new();
static EXPECT_PATTERN: OnceLock<Regex> = OnceLock::new();
static PAIR_PATTERN: OnceLock<Regex> = OnceLock::new();
