//! Chunked stream copying with an in-flight mutator.
//!
//! The copier fills a fixed-size buffer from a [`TransferSource`], lets the
//! mutator rewrite just the bytes that were read, writes them to a
//! [`TransferSink`] and then asks the sink whether the process consuming it
//! is still healthy. A sink failure aborts the copy before the next chunk.

use crate::error::{CloneError, Result};
use crate::progress::{estimate_remaining, fraction_done, percent, render_bytes, render_progress};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

/// Default chunk size: 8 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// A readable source that knows how far it has got.
pub trait TransferSource: Read {
    /// Bytes consumed from the underlying medium so far.
    fn position(&self) -> u64;

    /// Total size of the underlying medium, when known up front.
    fn total_len(&self) -> Option<u64>;
}

/// A writable destination that may be fed to another process.
pub trait TransferSink: Write {
    /// Report a failure of whatever is consuming this sink.
    fn check(&mut self) -> Result<()> {
        Ok(())
    }

    /// Turn a failed write into the error that best explains it.
    fn write_failed(&mut self, err: io::Error) -> CloneError {
        CloneError::io("writing transfer output", err)
    }
}

impl TransferSink for Vec<u8> {}

/// Wraps any reader, counting the bytes that pass through it.
pub struct SizedReader<R> {
    inner: R,
    total: Option<u64>,
    position: u64,
}

impl<R: Read> SizedReader<R> {
    pub fn new(inner: R, total: Option<u64>) -> Self {
        Self {
            inner,
            total,
            position: 0,
        }
    }
}

impl<R: Read> Read for SizedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: Read> TransferSource for SizedReader<R> {
    fn position(&self) -> u64 {
        self.position
    }

    fn total_len(&self) -> Option<u64> {
        self.total
    }
}

/// Figures for one transfer, handed to the progress callback.
#[derive(Debug, Clone)]
pub struct TransferState {
    pub total_bytes: Option<u64>,
    pub bytes_so_far: u64,
    pub started: Instant,
}

impl TransferState {
    pub fn new(total_bytes: Option<u64>) -> Self {
        Self {
            total_bytes,
            bytes_so_far: 0,
            started: Instant::now(),
        }
    }

    pub fn fraction_done(&self) -> Option<f64> {
        self.total_bytes
            .map(|total| fraction_done(self.bytes_so_far, total))
    }

    pub fn percent(&self) -> Option<u8> {
        self.fraction_done().map(percent)
    }

    /// Seconds left, given how long the transfer has been running.
    pub fn eta_after(&self, elapsed: Duration) -> Option<u64> {
        self.fraction_done()
            .and_then(|fraction| estimate_remaining(fraction, elapsed))
    }

    pub fn eta(&self) -> Option<u64> {
        self.eta_after(self.started.elapsed())
    }

    /// Status line suffix: percentage and ETA, or a byte count when the
    /// total is unknown.
    pub fn render(&self) -> String {
        match self.percent() {
            Some(p) => render_progress(p, self.eta()),
            None => render_bytes(self.bytes_so_far),
        }
    }
}

/// Copies a source to a sink in fixed-size chunks.
#[derive(Debug, Clone, Copy)]
pub struct ChunkedCopier {
    chunk_size: usize,
}

impl ChunkedCopier {
    /// `chunk_size` must be positive; configuration validates this upstream
    /// and a zero is bumped to one byte here.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Copy everything from `source` to `sink`, returning the bytes written.
    pub fn copy<S, W, M, P>(
        &self,
        source: &mut S,
        sink: &mut W,
        mut mutate: M,
        mut on_progress: P,
    ) -> Result<u64>
    where
        S: TransferSource + ?Sized,
        W: TransferSink + ?Sized,
        M: FnMut(&mut [u8]),
        P: FnMut(&TransferState),
    {
        let mut buffer = vec![0u8; self.chunk_size];
        let mut state = TransferState::new(source.total_len());
        let mut written = 0u64;

        loop {
            state.bytes_so_far = source.position();
            on_progress(&state);

            let n = fill_chunk(source, &mut buffer)
                .map_err(|e| CloneError::io("reading transfer input", e))?;
            if n == 0 {
                break;
            }

            let chunk = &mut buffer[..n];
            mutate(chunk);
            if let Err(e) = sink.write_all(chunk) {
                return Err(sink.write_failed(e));
            }
            sink.check()?;
            written += n as u64;
        }

        if let Err(e) = sink.flush() {
            return Err(sink.write_failed(e));
        }
        tracing::debug!(bytes = written, "transfer complete");
        Ok(written)
    }
}

impl Default for ChunkedCopier {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

/// Read until `buffer` is full or the source is exhausted.
fn fill_chunk<S: Read + ?Sized>(source: &mut S, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match source.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
