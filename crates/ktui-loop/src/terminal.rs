#![forbid(unsafe_code)]

//! The terminal channel the loop drives.
//!
//! [`Tty`] is the controlling terminal. The [`Terminal`] trait exists so the
//! loop can also run over a socket pair or pty in tests.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};

use nix::sys::termios::{self, SetArg, Termios};
use rustix::fs::OFlags;

/// Raw window size as reported by the terminal driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
    pub xpixel: u16,
    pub ypixel: u16,
}

/// Screen geometry handed to applications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScreenSize {
    pub width_cells: u16,
    pub height_cells: u16,
    pub width_px: u16,
    pub height_px: u16,
    /// Zero when the terminal does not report pixel sizes.
    pub cell_width: u16,
    pub cell_height: u16,
}

impl From<WindowSize> for ScreenSize {
    fn from(ws: WindowSize) -> Self {
        let per_cell = |px: u16, cells: u16| px.checked_div(cells).unwrap_or(0);
        Self {
            width_cells: ws.cols,
            height_cells: ws.rows,
            width_px: ws.xpixel,
            height_px: ws.ypixel,
            cell_width: per_cell(ws.xpixel, ws.cols),
            cell_height: per_cell(ws.ypixel, ws.rows),
        }
    }
}

/// A bidirectional, pollable terminal byte stream.
///
/// Reads and writes must not block: the loop only touches the stream after
/// the selector reported it ready, and treats `WouldBlock` as no progress.
pub trait Terminal: Read + Write + AsFd {
    fn window_size(&self) -> io::Result<WindowSize>;

    /// Switch to raw mode. Called once before the first byte is written.
    fn set_raw_mode(&mut self) -> io::Result<()>;

    /// Undo [`set_raw_mode`](Self::set_raw_mode). Must be safe to call twice.
    fn restore(&mut self) -> io::Result<()>;

    /// Emit a diagnostic line without disturbing the screen.
    fn debug_print(&mut self, msg: &str) {
        tracing::debug!(target: "ktui_loop::app", "{msg}");
    }
}

/// The process's controlling terminal (`/dev/tty`).
///
/// Raw mode and the non-blocking flag are undone on [`Terminal::restore`]
/// and again on drop.
#[derive(Debug)]
pub struct Tty {
    file: File,
    original: Option<Termios>,
    original_flags: Option<OFlags>,
}

impl Tty {
    pub fn open() -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open("/dev/tty")?;
        Ok(Self {
            file,
            original: None,
            original_flags: None,
        })
    }
}

impl Terminal for Tty {
    fn window_size(&self) -> io::Result<WindowSize> {
        let ws = rustix::termios::tcgetwinsize(&self.file)?;
        Ok(WindowSize {
            rows: ws.ws_row,
            cols: ws.ws_col,
            xpixel: ws.ws_xpixel,
            ypixel: ws.ws_ypixel,
        })
    }

    fn set_raw_mode(&mut self) -> io::Result<()> {
        let original = termios::tcgetattr(&self.file).map_err(io::Error::from)?;
        let mut raw = original.clone();
        termios::cfmakeraw(&mut raw);
        termios::tcsetattr(&self.file, SetArg::TCSANOW, &raw).map_err(io::Error::from)?;
        self.original = Some(original);

        let flags = rustix::fs::fcntl_getfl(&self.file)?;
        rustix::fs::fcntl_setfl(&self.file, flags | OFlags::NONBLOCK)?;
        self.original_flags = Some(flags);
        tracing::debug!("tty switched to raw mode");
        Ok(())
    }

    fn restore(&mut self) -> io::Result<()> {
        if let Some(flags) = self.original_flags.take() {
            rustix::fs::fcntl_setfl(&self.file, flags)?;
        }
        if let Some(original) = self.original.take() {
            termios::tcsetattr(&self.file, SetArg::TCSAFLUSH, &original)
                .map_err(io::Error::from)?;
            tracing::debug!("tty restored");
        }
        Ok(())
    }
}

impl Read for Tty {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for Tty {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl AsFd for Tty {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl Drop for Tty {
    fn drop(&mut self) {
        // Best-effort restore; errors during cleanup are ignored.
        let _ = self.restore();
    }
}
