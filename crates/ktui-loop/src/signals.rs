#![forbid(unsafe_code)]

//! Signal delivery into the event loop.
//!
//! Signals are caught by a `signal-hook` relay thread and forwarded as single
//! bytes over a socket pair. The read end is registered with the loop's
//! selector, so signal handling happens on the loop thread between
//! iterations, never inside an async-signal context.
//!
//! While no bridge is alive, SIGINT, SIGTERM, SIGHUP and SIGTSTP take their
//! default action again. `signal-hook` never removes its low-level handler, so
//! a conditional default action is registered alongside it and armed whenever
//! the last bridge is dropped.

use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGPIPE, SIGTERM, SIGTSTP, SIGWINCH};
use signal_hook::iterator::Signals;

/// A signal the loop reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopSignal {
    Int,
    Term,
    Hup,
    Winch,
    Tstp,
    Pipe,
}

impl LoopSignal {
    const ALL: [LoopSignal; 6] = [
        LoopSignal::Int,
        LoopSignal::Term,
        LoopSignal::Hup,
        LoopSignal::Winch,
        LoopSignal::Tstp,
        LoopSignal::Pipe,
    ];

    /// Wire byte used on the signal pipe.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            LoopSignal::Int => b'i',
            LoopSignal::Term => b't',
            LoopSignal::Hup => b'h',
            LoopSignal::Winch => b'w',
            LoopSignal::Tstp => b'z',
            LoopSignal::Pipe => b'p',
        }
    }

    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.to_byte() == byte)
    }

    fn from_raw(signal: i32) -> Option<Self> {
        match signal {
            SIGINT => Some(LoopSignal::Int),
            SIGTERM => Some(LoopSignal::Term),
            SIGHUP => Some(LoopSignal::Hup),
            SIGWINCH => Some(LoopSignal::Winch),
            SIGTSTP => Some(LoopSignal::Tstp),
            SIGPIPE => Some(LoopSignal::Pipe),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            LoopSignal::Int => "SIGINT",
            LoopSignal::Term => "SIGTERM",
            LoopSignal::Hup => "SIGHUP",
            LoopSignal::Winch => "SIGWINCH",
            LoopSignal::Tstp => "SIGTSTP",
            LoopSignal::Pipe => "SIGPIPE",
        }
    }
}

/// The terminating signal that ended a run, if any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeathSignal {
    #[default]
    None,
    Int,
    Term,
    Hup,
}

impl DeathSignal {
    /// Conventional signal name, or `""` when the run was not signalled.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            DeathSignal::None => "",
            DeathSignal::Int => "SIGINT",
            DeathSignal::Term => "SIGTERM",
            DeathSignal::Hup => "SIGHUP",
        }
    }

    #[must_use]
    pub const fn is_signalled(self) -> bool {
        !matches!(self, DeathSignal::None)
    }

    pub(crate) const fn raw(self) -> Option<i32> {
        match self {
            DeathSignal::None => None,
            DeathSignal::Int => Some(SIGINT),
            DeathSignal::Term => Some(SIGTERM),
            DeathSignal::Hup => Some(SIGHUP),
        }
    }
}

/// Signals whose default action must come back once the loop is gone.
const RESTORED_ON_DROP: [i32; 4] = [SIGINT, SIGTERM, SIGHUP, SIGTSTP];

/// Process-wide bookkeeping shared by every bridge.
struct Dispositions {
    live_bridges: usize,
    /// Set while no bridge is alive; `None` until the first install.
    restore_default: Option<Arc<AtomicBool>>,
}

static DISPOSITIONS: Mutex<Dispositions> = Mutex::new(Dispositions {
    live_bridges: 0,
    restore_default: None,
});

impl Dispositions {
    fn acquire(&mut self) -> io::Result<()> {
        let flag = match &self.restore_default {
            Some(flag) => Arc::clone(flag),
            None => {
                let flag = Arc::new(AtomicBool::new(false));
                for signal in RESTORED_ON_DROP {
                    signal_hook::flag::register_conditional_default(signal, Arc::clone(&flag))?;
                }
                self.restore_default = Some(Arc::clone(&flag));
                flag
            }
        };
        flag.store(false, Ordering::SeqCst);
        self.live_bridges += 1;
        Ok(())
    }

    fn release(&mut self) {
        self.live_bridges -= 1;
        if self.live_bridges == 0 {
            if let Some(flag) = &self.restore_default {
                flag.store(true, Ordering::SeqCst);
            }
        }
    }
}

/// Counts one live bridge for as long as it exists.
#[derive(Debug)]
struct DispositionLease(());

impl DispositionLease {
    fn acquire() -> io::Result<Self> {
        DISPOSITIONS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .acquire()?;
        Ok(Self(()))
    }
}

impl Drop for DispositionLease {
    fn drop(&mut self) {
        DISPOSITIONS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release();
    }
}

/// Owns the signal relay thread and the socket pair it writes to.
///
/// Dropping the bridge unregisters the handlers, joins the thread and, if it
/// was the last live bridge, re-arms the default signal actions.
#[derive(Debug)]
pub(crate) struct SignalBridge {
    reader: UnixStream,
    writer: UnixStream,
    handle: signal_hook::iterator::Handle,
    thread: Option<std::thread::JoinHandle<()>>,
    // Dropped after the handle is closed, so defaults are re-armed only once
    // the relay no longer receives anything.
    _lease: DispositionLease,
}

impl SignalBridge {
    pub(crate) fn install() -> io::Result<Self> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;

        let mut signals = Signals::new([SIGINT, SIGTERM, SIGTSTP, SIGHUP, SIGWINCH, SIGPIPE])
            .map_err(io::Error::other)?;
        let lease = DispositionLease::acquire()?;
        let handle = signals.handle();
        let mut relay = writer.try_clone()?;
        let thread = std::thread::Builder::new()
            .name("ktui-signals".into())
            .spawn(move || {
                for raw in signals.forever() {
                    let Some(signal) = LoopSignal::from_raw(raw) else {
                        continue;
                    };
                    if relay.write_all(&[signal.to_byte()]).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            reader,
            writer,
            handle,
            thread: Some(thread),
            _lease: lease,
        })
    }

    pub(crate) fn reader_fd(&self) -> BorrowedFd<'_> {
        self.reader.as_fd()
    }

    /// A second handle on the write end, for injecting signals from the loop
    /// thread itself.
    pub(crate) fn sender(&self) -> io::Result<UnixStream> {
        self.writer.try_clone()
    }

    /// Read every pending signal record.
    ///
    /// Each distinct signal is reported once, in order of first arrival.
    pub(crate) fn drain(&self) -> io::Result<Vec<LoopSignal>> {
        let mut pending = Vec::new();
        let mut buf = [0u8; 64];
        let mut reader = &self.reader;
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    for signal in buf[..n].iter().filter_map(|&b| LoopSignal::from_byte(b)) {
                        if !pending.contains(&signal) {
                            pending.push(signal);
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(pending)
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
