//! Sequential line reader with push-back.
//!
//! # Responsibilities
//! - Stream the lines of a file from a background thread
//! - Hand lines out in order, pushed-back lines first (LIFO)
//! - Report end of input and the number of lines consumed
//!
//! # Design Decisions
//! - The file is opened eagerly, so a missing file fails at construction
//! - A bounded channel keeps at most `capacity` lines in memory
//! - A read error is delivered once, in order, then input ends

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;

use thiserror::Error;

/// Default number of lines buffered ahead of the consumer.
pub const DEFAULT_CAPACITY: usize = 100;

/// Error type for line reading.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read line: {0}")]
    Read(#[source] io::Error),
    #[error("failed to start reader thread: {0}")]
    Spawn(#[source] io::Error),
}

/// A line handed out by [`LineReader::read_line`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Lines consumed from the file so far, this one included. A pushed-back
    /// line carries the count at the time it is re-read.
    pub number: usize,
    pub text: String,
}

/// Reads lines from a file on a background thread.
#[derive(Debug)]
pub struct LineReader {
    filename: PathBuf,
    lines: Receiver<io::Result<String>>,
    done: Arc<AtomicBool>,
    exhausted: bool,
    count: usize,
    pushed_back: Vec<String>,
}

impl LineReader {
    /// Open `path` with the default buffer capacity.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ReaderError> {
        Self::open_with_capacity(path, DEFAULT_CAPACITY)
    }

    /// Open `path`, buffering up to `capacity` lines ahead of the consumer.
    pub fn open_with_capacity(
        path: impl AsRef<Path>,
        capacity: usize,
    ) -> Result<Self, ReaderError> {
        let filename = path.as_ref().to_path_buf();
        let file = File::open(&filename).map_err(|source| ReaderError::Open {
            path: filename.clone(),
            source,
        })?;

        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        let done = Arc::new(AtomicBool::new(false));
        let producer_done = Arc::clone(&done);

        thread::Builder::new()
            .name("line-reader".into())
            .spawn(move || {
                for line in BufReader::new(file).lines() {
                    let failed = line.is_err();
                    if tx.send(line).is_err() || failed {
                        break;
                    }
                }
                producer_done.store(true, Ordering::Release);
            })
            .map_err(ReaderError::Spawn)?;

        tracing::debug!(file = %filename.display(), capacity, "Line reader started");

        Ok(Self {
            filename,
            lines: rx,
            done,
            exhausted: false,
            count: 0,
            pushed_back: Vec::new(),
        })
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// Whether the background thread has finished reading the file.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Lines consumed from the file so far. Pushed-back lines do not count
    /// again when re-read.
    pub fn lines(&self) -> usize {
        self.count
    }

    /// Next line, or `None` at end of input.
    pub fn read_line(&mut self) -> Result<Option<Line>, ReaderError> {
        if let Some(text) = self.pushed_back.pop() {
            return Ok(Some(Line {
                number: self.count,
                text,
            }));
        }
        if self.exhausted {
            return Ok(None);
        }

        match self.lines.recv() {
            Ok(Ok(text)) => {
                self.count += 1;
                Ok(Some(Line {
                    number: self.count,
                    text,
                }))
            }
            Ok(Err(e)) => {
                self.exhausted = true;
                Err(ReaderError::Read(e))
            }
            Err(_) => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    /// Push `text` back; it is returned by the next [`read_line`](Self::read_line).
    pub fn unread_line(&mut self, text: impl Into<String>) {
        self.pushed_back.push(text.into());
    }
}

impl Iterator for LineReader {
    type Item = Result<Line, ReaderError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_line().transpose()
    }
}
