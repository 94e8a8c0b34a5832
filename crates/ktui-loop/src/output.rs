#![forbid(unsafe_code)]

//! Buffered terminal output.
//!
//! Bytes are appended by callbacks and drained by the loop whenever the
//! terminal is writable. Partial writes keep the unwritten suffix queued.

use std::io::{self, Write};
use std::os::fd::AsFd;
use std::time::{Duration, Instant};

use crate::selector::Selector;

/// Outcome of a single write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainProgress {
    /// Bytes accepted by the writer.
    pub written: usize,
    /// True when this write emptied a non-empty buffer.
    pub emptied: bool,
}

#[derive(Debug, Default)]
pub struct OutputBuffer {
    pending: Vec<u8>,
}

fn closed_stream() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "terminal stream closed")
}

impl OutputBuffer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    pub fn queue(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Discard everything still queued.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Issue one write of the queued bytes.
    ///
    /// A would-block or interrupted write counts as no progress. A zero-byte
    /// write with data pending means the terminal went away and is reported
    /// as `UnexpectedEof`.
    pub fn drain_once<W: Write + ?Sized>(&mut self, writer: &mut W) -> io::Result<DrainProgress> {
        if self.pending.is_empty() {
            return Ok(DrainProgress {
                written: 0,
                emptied: false,
            });
        }
        let written = match writer.write(&self.pending) {
            Ok(0) => return Err(closed_stream()),
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                0
            }
            Err(e) => return Err(e),
        };
        self.pending.drain(..written);
        Ok(DrainProgress {
            written,
            emptied: written > 0 && self.pending.is_empty(),
        })
    }

    /// Drain the buffer, waiting for writability, until it is empty or
    /// `budget` runs out.
    ///
    /// Returns true if everything was written.
    pub fn flush<W: Write + AsFd + ?Sized>(
        &mut self,
        writer: &mut W,
        budget: Duration,
    ) -> io::Result<bool> {
        if self.pending.is_empty() {
            return Ok(true);
        }
        let deadline = Instant::now() + budget;
        // The selector holds its own fd so the writer stays mutably borrowable.
        let fd = writer.as_fd().try_clone_to_owned()?;
        let mut selector = Selector::with_capacity(1);
        selector.register_write(fd.as_fd());

        while !self.pending.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    pending = self.pending.len(),
                    budget_ms = budget.as_millis() as u64,
                    "output flush ran out of time"
                );
                return Ok(false);
            }
            if selector.wait(deadline - now)? == 0 {
                continue;
            }
            if selector.is_ready_to_write(fd.as_fd()) {
                self.drain_once(writer)?;
            }
        }
        writer.flush()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::os::unix::net::UnixStream;

    /// Accepts at most `chunk` bytes per write.
    struct Trickle {
        chunk: usize,
        out: Vec<u8>,
        calls: usize,
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.calls += 1;
            let n = buf.len().min(self.chunk);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Blocked;

    impl Write for Blocked {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::WouldBlock.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Closed;

    impl Write for Closed {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn partial_writes_keep_suffix() {
        let mut buffer = OutputBuffer::new();
        buffer.queue(b"hello ");
        buffer.queue(b"world");
        let mut sink = Trickle {
            chunk: 4,
            out: Vec::new(),
            calls: 0,
        };

        let first = buffer.drain_once(&mut sink).unwrap();
        assert_eq!(first, DrainProgress { written: 4, emptied: false });
        assert_eq!(buffer.len(), 7);

        let mut emptied = 0;
        while !buffer.is_empty() {
            if buffer.drain_once(&mut sink).unwrap().emptied {
                emptied += 1;
            }
        }
        assert_eq!(sink.out, b"hello world");
        assert_eq!(sink.calls, 3);
        assert_eq!(emptied, 1);
    }

    #[test]
    fn empty_buffer_does_not_write() {
        let mut buffer = OutputBuffer::new();
        let progress = buffer.drain_once(&mut Closed).unwrap();
        assert_eq!(progress, DrainProgress { written: 0, emptied: false });
    }

    #[test]
    fn would_block_is_no_progress() {
        let mut buffer = OutputBuffer::new();
        buffer.queue(b"abc");
        let progress = buffer.drain_once(&mut Blocked).unwrap();
        assert_eq!(progress.written, 0);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn zero_byte_write_is_end_of_stream() {
        let mut buffer = OutputBuffer::new();
        buffer.queue(b"abc");
        let err = buffer.drain_once(&mut Closed).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn flush_delivers_everything() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        let mut buffer = OutputBuffer::new();
        buffer.queue(b"\x1b[?1049l");
        assert!(buffer.flush(&mut a, Duration::from_secs(2)).unwrap());
        assert!(buffer.is_empty());

        let mut got = [0u8; 8];
        b.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"\x1b[?1049l");
    }

    #[test]
    fn flush_gives_up_when_peer_stops_reading() {
        let (mut a, _b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        let mut buffer = OutputBuffer::new();
        // Larger than any socket buffer, and nobody reads the other end.
        buffer.queue(&vec![b'x'; 16 * 1024 * 1024]);
        let started = Instant::now();
        let done = buffer.flush(&mut a, Duration::from_millis(50)).unwrap();
        assert!(!done);
        assert!(!buffer.is_empty());
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
