//! Unit tests for the chunked copier.

use mysql_clone::copier::{ChunkedCopier, SizedReader, TransferSink, TransferState};
use mysql_clone::error::{CloneError, Result};
use std::io::{self, Write};

fn source(data: &[u8]) -> SizedReader<&[u8]> {
    SizedReader::new(data, Some(data.len() as u64))
}

#[test]
fn test_output_is_mutated_concatenation_for_every_chunk_size() {
    let data = b"CHARSET=utf8mb4; abc CHARSET=utf8mb4".to_vec();
    for chunk_size in 1..=data.len() {
        let copier = ChunkedCopier::new(chunk_size);
        let mut sink = Vec::new();
        let copied = copier
            .copy(
                &mut source(&data),
                &mut sink,
                |chunk| chunk.make_ascii_lowercase(),
                |_| {},
            )
            .unwrap();

        assert_eq!(copied, data.len() as u64, "chunk size {}", chunk_size);
        assert_eq!(sink, data.to_ascii_lowercase(), "chunk size {}", chunk_size);
    }
}

#[test]
fn test_mutator_sees_only_bytes_read() {
    let copier = ChunkedCopier::new(4);
    let mut lengths = Vec::new();
    let mut sink = Vec::new();
    copier
        .copy(&mut source(b"abcdef"), &mut sink, |chunk| lengths.push(chunk.len()), |_| {})
        .unwrap();

    assert_eq!(lengths, vec![4, 2]);
    assert_eq!(sink, b"abcdef");
}

#[test]
fn test_empty_source_copies_nothing() {
    let copier = ChunkedCopier::new(16);
    let mut calls = 0;
    let mut sink = Vec::new();
    let copied = copier
        .copy(&mut source(b""), &mut sink, |_| calls += 1, |_| {})
        .unwrap();

    assert_eq!(copied, 0);
    assert_eq!(calls, 0);
    assert!(sink.is_empty());
}

#[test]
fn test_progress_runs_from_zero_to_complete() {
    let data = vec![b'x'; 1000];
    let copier = ChunkedCopier::new(100);
    let mut reports: Vec<TransferState> = Vec::new();
    let mut sink = Vec::new();
    copier
        .copy(&mut source(&data), &mut sink, |_| {}, |s| reports.push(s.clone()))
        .unwrap();

    let first = reports.first().unwrap();
    assert_eq!(first.bytes_so_far, 0);
    assert_eq!(first.percent(), Some(0));
    assert_eq!(first.eta(), None);

    let last = reports.last().unwrap();
    assert_eq!(last.bytes_so_far, 1000);
    assert_eq!(last.percent(), Some(100));

    let positions: Vec<u64> = reports.iter().map(|s| s.bytes_so_far).collect();
    assert!(positions.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_unknown_total_reports_bytes() {
    let copier = ChunkedCopier::new(8);
    let mut last = None;
    let mut sink = Vec::new();
    copier
        .copy(
            &mut SizedReader::new(&b"0123456789"[..], None),
            &mut sink,
            |_| {},
            |s| last = Some(s.clone()),
        )
        .unwrap();

    let last = last.unwrap();
    assert_eq!(last.percent(), None);
    assert_eq!(last.render(), "10 B");
}

/// Accepts writes but reports its consumer dead after a set number of chunks.
struct DyingSink {
    received: Vec<u8>,
    chunks_left: usize,
}

impl Write for DyingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.received.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl TransferSink for DyingSink {
    fn check(&mut self) -> Result<()> {
        if self.chunks_left == 0 {
            return Err(CloneError::io("consumer", io::Error::other("gone")));
        }
        self.chunks_left -= 1;
        Ok(())
    }
}

#[test]
fn test_sink_failure_stops_the_copy() {
    let copier = ChunkedCopier::new(2);
    let mut sink = DyingSink {
        received: Vec::new(),
        chunks_left: 1,
    };
    let err = copier
        .copy(&mut source(b"aabbccdd"), &mut sink, |_| {}, |_| {})
        .unwrap_err();

    assert!(matches!(err, CloneError::Io { .. }));
    assert_eq!(sink.received, b"aabb");
}

/// Refuses every write.
struct ClosedSink;

impl Write for ClosedSink {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::from(io::ErrorKind::BrokenPipe))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl TransferSink for ClosedSink {
    fn write_failed(&mut self, err: io::Error) -> CloneError {
        CloneError::io("closed sink", err)
    }
}

#[test]
fn test_write_error_goes_through_sink() {
    let copier = ChunkedCopier::default();
    let err = copier
        .copy(&mut source(b"data"), &mut ClosedSink, |_| {}, |_| {})
        .unwrap_err();

    match err {
        CloneError::Io { context, source } => {
            assert_eq!(context, "closed sink");
            assert_eq!(source.kind(), io::ErrorKind::BrokenPipe);
        }
        other => panic!("unexpected error: {other}"),
    }
}
