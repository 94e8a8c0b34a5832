#![forbid(unsafe_code)]

//! Readiness multiplexer over a small fixed set of file descriptors.
//!
//! A thin `poll(2)` wrapper. Interest is registered per fd; after a wait the
//! readiness of each fd can be queried. A wait interrupted by a signal reports
//! zero ready fds, like a timeout, and callers treat both as a spurious wake.

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout};

#[derive(Debug)]
struct Interest<'fd> {
    fd: BorrowedFd<'fd>,
    read: bool,
    write: bool,
    readable: bool,
    writable: bool,
}

/// Waits on registered fds for read/write readiness.
#[derive(Debug)]
pub struct Selector<'fd> {
    entries: Vec<Interest<'fd>>,
}

impl<'fd> Selector<'fd> {
    /// Create a selector with room for `capacity` fds.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    fn entry_mut(&mut self, fd: BorrowedFd<'fd>) -> &mut Interest<'fd> {
        let raw = fd.as_raw_fd();
        let index = match self.entries.iter().position(|e| e.fd.as_raw_fd() == raw) {
            Some(index) => index,
            None => {
                self.entries.push(Interest {
                    fd,
                    read: false,
                    write: false,
                    readable: false,
                    writable: false,
                });
                self.entries.len() - 1
            }
        };
        &mut self.entries[index]
    }

    fn find_mut(&mut self, fd: BorrowedFd<'_>) -> Option<&mut Interest<'fd>> {
        let raw = fd.as_raw_fd();
        self.entries.iter_mut().find(|e| e.fd.as_raw_fd() == raw)
    }

    fn find(&self, fd: BorrowedFd<'_>) -> Option<&Interest<'fd>> {
        let raw = fd.as_raw_fd();
        self.entries.iter().find(|e| e.fd.as_raw_fd() == raw)
    }

    pub fn register_read(&mut self, fd: BorrowedFd<'fd>) {
        self.entry_mut(fd).read = true;
    }

    pub fn register_write(&mut self, fd: BorrowedFd<'fd>) {
        self.entry_mut(fd).write = true;
    }

    pub fn unregister_write(&mut self, fd: BorrowedFd<'_>) {
        if let Some(entry) = self.find_mut(fd) {
            entry.write = false;
            entry.writable = false;
        }
    }

    /// Wait at most `timeout`. A zero timeout polls without blocking.
    ///
    /// Returns the number of fds with any readiness; zero is a valid result.
    pub fn wait(&mut self, timeout: Duration) -> io::Result<usize> {
        // Round up so a sub-millisecond deadline does not turn into a busy poll.
        let millis = timeout.as_nanos().div_ceil(1_000_000);
        let millis: u16 = millis.try_into().unwrap_or(u16::MAX);
        self.poll(PollTimeout::from(millis))
    }

    /// Wait until at least one fd is ready (or a signal interrupts the wait).
    pub fn wait_forever(&mut self) -> io::Result<usize> {
        self.poll(PollTimeout::NONE)
    }

    fn poll(&mut self, timeout: PollTimeout) -> io::Result<usize> {
        let mut indices = Vec::with_capacity(self.entries.len());
        let mut poll_fds = Vec::with_capacity(self.entries.len());
        for (index, entry) in self.entries.iter_mut().enumerate() {
            entry.readable = false;
            entry.writable = false;
            let mut flags = PollFlags::empty();
            if entry.read {
                flags |= PollFlags::POLLIN;
            }
            if entry.write {
                flags |= PollFlags::POLLOUT;
            }
            if !flags.is_empty() {
                indices.push(index);
                poll_fds.push(PollFd::new(entry.fd, flags));
            }
        }

        let ready = match nix::poll::poll(&mut poll_fds, timeout) {
            Ok(n) => n,
            Err(Errno::EINTR) => return Ok(0),
            Err(e) => return Err(io::Error::from(e)),
        };

        for (poll_fd, &index) in poll_fds.iter().zip(&indices) {
            let revents = poll_fd.revents().unwrap_or(PollFlags::empty());
            if revents.contains(PollFlags::POLLNVAL) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("fd {} is not open", self.entries[index].fd.as_raw_fd()),
                ));
            }
            let entry = &mut self.entries[index];
            // Hangups and errors surface through the next read or write.
            let failed = revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR);
            entry.readable = entry.read && (failed || revents.contains(PollFlags::POLLIN));
            entry.writable = entry.write && (failed || revents.contains(PollFlags::POLLOUT));
        }

        Ok(usize::try_from(ready).unwrap_or(0))
    }

    #[must_use]
    pub fn is_ready_to_read(&self, fd: BorrowedFd<'_>) -> bool {
        self.find(fd).is_some_and(|e| e.readable)
    }

    #[must_use]
    pub fn is_ready_to_write(&self, fd: BorrowedFd<'_>) -> bool {
        self.find(fd).is_some_and(|e| e.writable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn zero_timeout_with_nothing_ready() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut selector = Selector::with_capacity(2);
        selector.register_read(a.as_fd());
        assert_eq!(selector.wait(Duration::ZERO).unwrap(), 0);
        assert!(!selector.is_ready_to_read(a.as_fd()));
    }

    #[test]
    fn reports_readable_fd() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let (c, _d) = UnixStream::pair().unwrap();
        let mut selector = Selector::with_capacity(2);
        selector.register_read(a.as_fd());
        selector.register_read(c.as_fd());
        b.write_all(b"x").unwrap();
        assert_eq!(selector.wait(Duration::from_millis(500)).unwrap(), 1);
        assert!(selector.is_ready_to_read(a.as_fd()));
        assert!(!selector.is_ready_to_read(c.as_fd()));
        assert!(!selector.is_ready_to_write(a.as_fd()));
    }

    #[test]
    fn write_interest_toggles() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut selector = Selector::with_capacity(1);
        selector.register_read(a.as_fd());
        selector.register_write(a.as_fd());
        assert_eq!(selector.wait(Duration::from_millis(500)).unwrap(), 1);
        assert!(selector.is_ready_to_write(a.as_fd()));

        selector.unregister_write(a.as_fd());
        assert!(!selector.is_ready_to_write(a.as_fd()));
        assert_eq!(selector.wait(Duration::ZERO).unwrap(), 0);
        assert!(!selector.is_ready_to_write(a.as_fd()));
    }

    #[test]
    fn hangup_reads_as_readable() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut selector = Selector::with_capacity(1);
        selector.register_read(a.as_fd());
        drop(b);
        assert_eq!(selector.wait_forever().unwrap(), 1);
        assert!(selector.is_ready_to_read(a.as_fd()));
    }

    #[test]
    fn unknown_fd_is_never_ready() {
        let (a, _b) = UnixStream::pair().unwrap();
        let selector = Selector::with_capacity(0);
        assert!(!selector.is_ready_to_read(a.as_fd()));
        assert!(!selector.is_ready_to_write(a.as_fd()));
    }
}
