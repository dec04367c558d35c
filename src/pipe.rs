//! Named pipe reader: keeps a FIFO open for the lifetime of the service.
//!
//! Opening a FIFO for reading blocks until a writer attaches. Each read
//! yields at most one buffer's worth of bytes, which is handed to the
//! dispatcher before the next read. When the last writer closes its end,
//! `read` returns 0; we close our end and open the pipe again, so writers
//! can come and go without stopping the service.
//!
//! ## Rust concepts
//! - `impl Read` generics so the buffer can be filled from any reader
//! - `FnMut` callbacks for dispatching chunks
//! - `std::os::unix` extension traits (`FileTypeExt`, `OpenOptionsExt`)
//! - `thiserror` for an error enum with a wrapped `io::Error`

use crate::Shutdown;
use crate::interpreter::Outcome;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Default read size: the Linux `PIPE_BUF`, the largest write the kernel
/// delivers without interleaving it with other writers.
pub const PIPE_CAPACITY: usize = 4096;

#[derive(Debug, Error)]
pub enum PipeError {
    #[error("{} exists but is not a named pipe", .0.display())]
    NotAFifo(PathBuf),

    #[error("failed to create named pipe {}: {source}", .path.display())]
    CreateFifo { path: PathBuf, source: nix::Error },

    #[error("pipe I/O error: {0}")]
    Io(#[from] io::Error),
}

// ── FIFO provisioning ────────────────────────────────────────────────

/// What `ensure_fifo` found at the pipe path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FifoStatus {
    Existing,
    Created,
    /// Absent and creation was not requested; opens will be retried.
    Missing,
}

/// Make sure `path` is a FIFO, creating it when absent and `create` is set.
///
/// Any other kind of file at `path` is an error: reading a regular file
/// hits EOF immediately and the reopen loop would never block.
pub fn ensure_fifo(path: &Path, create: bool) -> Result<FifoStatus, PipeError> {
    match fs::metadata(path) {
        Ok(meta) if meta.file_type().is_fifo() => Ok(FifoStatus::Existing),
        Ok(_) => Err(PipeError::NotAFifo(path.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if !create {
                return Ok(FifoStatus::Missing);
            }
            mkfifo(path, Mode::from_bits_truncate(0o666)).map_err(|source| {
                PipeError::CreateFifo {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            Ok(FifoStatus::Created)
        }
        Err(e) => Err(e.into()),
    }
}

/// Unblock a reader waiting in `open` for a writer.
///
/// Opens the write end without blocking and drops it straight away; the
/// reader's `open` returns and its first `read` sees EOF. Returns false when
/// no reader was waiting (the kernel reports ENXIO) or the path is unusable.
pub fn wake_reader(path: &Path) -> bool {
    OpenOptions::new()
        .write(true)
        .custom_flags(OFlag::O_NONBLOCK.bits())
        .open(path)
        .is_ok()
}

/// Keep waking the reader until it acknowledges shutdown, at most
/// `attempts` times. Covers a reader that checked the flag but had not yet
/// blocked in `open` when the first wake-up was sent.
pub fn wake_until_acknowledged(
    shutdown: &Shutdown,
    path: &Path,
    attempts: u32,
    interval: Duration,
) -> bool {
    for _ in 0..attempts {
        if shutdown.is_acknowledged() {
            return true;
        }
        wake_reader(path);
        thread::sleep(interval);
    }
    shutdown.is_acknowledged()
}

// ── Bounded read buffer ──────────────────────────────────────────────

/// Fixed-capacity buffer holding the bytes of the latest read.
///
/// A single read never exceeds the capacity. Anything a writer sent beyond
/// it arrives in the next read as a separate chunk.
pub struct ChunkBuffer {
    bytes: Box<[u8]>,
    len: usize,
}

impl ChunkBuffer {
    /// Capacity is at least one byte.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: vec![0; capacity.max(1)].into_boxed_slice(),
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Bytes from the latest read.
    pub fn chunk(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Whether the latest read used the whole buffer, which means a command
    /// may continue in the next read.
    pub fn is_full(&self) -> bool {
        self.len == self.bytes.len()
    }

    /// Replace the contents with one read from `reader`, retrying on EINTR.
    /// Returns the number of bytes read; 0 means end of stream.
    pub fn fill_from<R: Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        self.len = 0;
        let n = loop {
            match reader.read(&mut self.bytes) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        self.len = n;
        Ok(n)
    }
}

impl Default for ChunkBuffer {
    fn default() -> Self {
        Self::with_capacity(PIPE_CAPACITY)
    }
}

// ── Retry backoff ────────────────────────────────────────────────────

/// Exponential backoff between failed opens or reads.
///
/// `PipeReader` resets it after a read that returns data; a successful
/// `open` alone does not, since a writer that connects and leaves without
/// writing says nothing about the pipe being healthy.
#[derive(Clone, Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; doubles the next one up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(5))
    }
}

// ── Reader loop ──────────────────────────────────────────────────────

/// Why `PipeReader::run` returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderExit {
    /// The dispatcher asked to stop (an `EXIT` command).
    Stopped,
    /// Shutdown was requested (signal).
    Shutdown,
}

pub struct PipeReader {
    path: PathBuf,
    buffer: ChunkBuffer,
    backoff: Backoff,
}

impl PipeReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            buffer: ChunkBuffer::default(),
            backoff: Backoff::default(),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.buffer = ChunkBuffer::with_capacity(capacity);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Read chunks and hand each one to `dispatch` until it returns
    /// `Outcome::Stop` or `shutdown` is requested.
    ///
    /// Open and read failures are treated as transient: the pipe is closed
    /// and reopened after a backoff delay. `shutdown` is acknowledged on
    /// return, whatever the reason.
    pub fn run<F>(&mut self, shutdown: &Shutdown, dispatch: F) -> ReaderExit
    where
        F: FnMut(&[u8]) -> Outcome,
    {
        let exit = self.read_until_exit(shutdown, dispatch);
        shutdown.acknowledge();
        exit
    }

    fn read_until_exit<F>(&mut self, shutdown: &Shutdown, mut dispatch: F) -> ReaderExit
    where
        F: FnMut(&[u8]) -> Outcome,
    {
        loop {
            let Some(mut pipe) = self.open(shutdown) else {
                return ReaderExit::Shutdown;
            };

            if let Some(exit) = self.drain(&mut pipe, shutdown, &mut dispatch) {
                return exit;
            }
            // `pipe` drops here, closing our end before the next open.
        }
    }

    /// Block until a writer attaches. `None` once shutdown is requested.
    fn open(&mut self, shutdown: &Shutdown) -> Option<File> {
        loop {
            if shutdown.is_requested() {
                return None;
            }

            tracing::debug!("Waiting for a writer on {}", self.path.display());
            match File::open(&self.path) {
                Ok(file) => return Some(file),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    tracing::warn!(
                        "Failed to open {}: {} (retrying in {}ms)",
                        self.path.display(),
                        e,
                        delay.as_millis()
                    );
                    thread::sleep(delay);
                }
            }
        }
    }

    /// Read until the writer goes away. `Some` when the service should end.
    fn drain<F>(
        &mut self,
        pipe: &mut File,
        shutdown: &Shutdown,
        dispatch: &mut F,
    ) -> Option<ReaderExit>
    where
        F: FnMut(&[u8]) -> Outcome,
    {
        loop {
            if shutdown.is_requested() {
                return Some(ReaderExit::Shutdown);
            }

            match self.buffer.fill_from(pipe) {
                Ok(0) => {
                    tracing::debug!("Writer disconnected from {}", self.path.display());
                    return None;
                }
                Ok(n) => {
                    self.backoff.reset();
                    if self.buffer.is_full() {
                        tracing::warn!(
                            "Read filled the {}-byte buffer; a command may be split across reads",
                            n
                        );
                    }

                    if dispatch(self.buffer.chunk()) == Outcome::Stop {
                        return Some(if shutdown.is_requested() {
                            ReaderExit::Shutdown
                        } else {
                            ReaderExit::Stopped
                        });
                    }
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    tracing::warn!(
                        "Read from {} failed: {} (reopening in {}ms)",
                        self.path.display(),
                        e,
                        delay.as_millis()
                    );
                    thread::sleep(delay);
                    return None;
                }
            }
        }
    }
}
