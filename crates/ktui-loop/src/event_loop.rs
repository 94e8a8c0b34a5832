#![forbid(unsafe_code)]

//! The event loop: boot, iterate, shut down.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──run──▶ Running ──keep_going=false / error──▶ ShuttingDown ──▶ Stopped
//! ```
//!
//! Boot installs the signal bridge, switches the terminal to raw mode, queues
//! the enter codes and runs the initialize hook. Each iteration dispatches due
//! timers, waits for readiness, writes pending output, reads and decodes
//! input, then handles signal records. Shutdown runs on every exit path once
//! the loop is running, including hook failures:
//!
//! 1. flush pending output (skipped after SIGHUP)
//! 2. discard whatever could not be written
//! 3. queue the initialize hook's finalizer and the exit codes
//! 4. flush again, restore the terminal, remove the signal bridge

use std::fmt;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

use ktui_core::escape_decoder::EscapeDecoder;
use ktui_core::event::KeyEvent;

use crate::dispatch::InputDispatcher;
use crate::error::{HandlerResult, LoopError};
use crate::handlers::{Handlers, KeyOutcome, TextOrigin};
use crate::modes::{BEL, MouseTracking, TerminalStateOptions};
use crate::output::OutputBuffer;
use crate::selector::Selector;
use crate::signals::{DeathSignal, LoopSignal, SignalBridge};
use crate::terminal::{ScreenSize, Terminal, Tty};
use crate::timers::{TimerId, TimerQueue};

/// Timer callbacks receive the context and their own id.
pub type TimerCallback = Box<dyn FnMut(&mut LoopContext, TimerId) -> HandlerResult>;

/// Where a loop is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Running,
    ShuttingDown,
    Stopped,
}

/// Tunables for a [`Loop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Time allowed for each output flush during shutdown.
    pub flush_budget: Duration,
    /// Size of the terminal read buffer. Zero is treated as one byte.
    pub read_buffer_size: usize,
    /// Pause after re-raising a death signal, giving it time to land.
    pub kill_grace: Duration,
    /// Initial number of descriptor slots reserved in the selector.
    pub selector_capacity: usize,
    /// Terminal modes enabled for the run and undone at shutdown.
    pub terminal: TerminalStateOptions,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            flush_budget: Duration::from_secs(2),
            read_buffer_size: 64 * 1024,
            kill_grace: Duration::from_millis(20),
            selector_capacity: 8,
            terminal: TerminalStateOptions::default(),
        }
    }
}

impl LoopConfig {
    #[must_use]
    pub fn with_flush_budget(mut self, budget: Duration) -> Self {
        self.flush_budget = budget;
        self
    }

    #[must_use]
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    #[must_use]
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    #[must_use]
    pub fn with_terminal_options(mut self, options: TerminalStateOptions) -> Self {
        self.terminal = options;
        self
    }
}

/// Loop state visible to hooks and timer callbacks.
pub struct LoopContext {
    terminal: Option<Box<dyn Terminal>>,
    screen_size: ScreenSize,
    screen_size_stale: bool,
    pub(crate) keep_going: bool,
    pub(crate) flush_on_shutdown: bool,
    death_signal: DeathSignal,
    exit_code: i32,
    output: OutputBuffer,
    timers: TimerQueue<TimerCallback>,
    signal_sender: Option<UnixStream>,
    phase: Phase,
}

impl fmt::Debug for LoopContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopContext")
            .field("phase", &self.phase)
            .field("has_terminal", &self.terminal.is_some())
            .field("screen_size", &self.screen_size)
            .field("keep_going", &self.keep_going)
            .field("death_signal", &self.death_signal)
            .field("exit_code", &self.exit_code)
            .field("pending_output", &self.output.len())
            .field("timers", &self.timers.len())
            .finish()
    }
}

impl LoopContext {
    fn new() -> Self {
        Self {
            terminal: None,
            screen_size: ScreenSize::default(),
            screen_size_stale: true,
            keep_going: true,
            flush_on_shutdown: true,
            death_signal: DeathSignal::None,
            exit_code: 0,
            output: OutputBuffer::new(),
            timers: TimerQueue::new(),
            signal_sender: None,
            phase: Phase::Idle,
        }
    }

    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self::new()
    }

    /// Schedule `callback` to run after `interval`, and again every
    /// `interval` if `repeats`.
    pub fn add_timer(
        &mut self,
        interval: Duration,
        repeats: bool,
        callback: impl FnMut(&mut LoopContext, TimerId) -> HandlerResult + 'static,
    ) -> TimerId {
        let id = self
            .timers
            .add(interval, repeats, Box::new(callback), Instant::now());
        tracing::trace!(timer = id.get(), ?interval, repeats, "timer added");
        id
    }

    pub fn remove_timer(&mut self, id: TimerId) -> bool {
        self.timers.remove(id)
    }

    pub fn queue_write_string(&mut self, text: &str) {
        self.output.queue(text.as_bytes());
    }

    pub fn queue_write_bytes(&mut self, bytes: &[u8]) {
        self.output.queue(bytes);
    }

    /// Stop after the current callback returns, reporting `exit_code`.
    pub fn quit(&mut self, exit_code: i32) {
        self.exit_code = exit_code;
        self.keep_going = false;
    }

    pub fn beep(&mut self) {
        self.queue_write_string(BEL);
    }

    /// Current screen size, queried from the terminal if a resize made the
    /// cached value stale.
    pub fn screen_size(&mut self) -> Result<ScreenSize, LoopError> {
        if !self.screen_size_stale {
            return Ok(self.screen_size);
        }
        let terminal = self.terminal.as_ref().ok_or(LoopError::NoTerminal)?;
        let size = ScreenSize::from(terminal.window_size()?);
        self.screen_size = size;
        self.screen_size_stale = false;
        Ok(size)
    }

    #[must_use]
    pub fn death_signal(&self) -> DeathSignal {
        self.death_signal
    }

    /// `"SIGINT"`, `"SIGTERM"`, `"SIGHUP"`, or `""` if the run was not
    /// ended by a signal.
    #[must_use]
    pub fn death_signal_name(&self) -> &'static str {
        self.death_signal.name()
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Deliver `signal` to the running loop as if the OS had sent it.
    ///
    /// Returns false when no run is in progress.
    pub fn post_signal(&mut self, signal: LoopSignal) -> bool {
        match self.signal_sender.as_mut() {
            Some(sender) => sender.write_all(&[signal.to_byte()]).is_ok(),
            None => false,
        }
    }

    pub fn debug_print(&mut self, msg: &str) {
        match self.terminal.as_mut() {
            Some(terminal) => terminal.debug_print(msg),
            None => tracing::debug!(target: "ktui_loop::app", "{msg}"),
        }
    }

    pub(crate) fn terminate(&mut self, signal: DeathSignal) {
        self.death_signal = signal;
        self.keep_going = false;
    }

    pub(crate) fn invalidate_screen_size(&mut self) {
        self.screen_size_stale = true;
    }

    /// The last computed size, stale or not.
    pub(crate) fn cached_screen_size(&self) -> ScreenSize {
        self.screen_size
    }

    fn begin(&mut self, terminal: Box<dyn Terminal>, signal_sender: UnixStream) {
        self.terminal = Some(terminal);
        self.signal_sender = Some(signal_sender);
        self.screen_size = ScreenSize::default();
        self.screen_size_stale = true;
        self.keep_going = true;
        self.flush_on_shutdown = true;
        self.death_signal = DeathSignal::None;
        self.exit_code = 0;
        self.output.clear();
        self.phase = Phase::Running;
    }

    fn terminal_fd(&self) -> Result<OwnedFd, LoopError> {
        let terminal = self.terminal.as_ref().ok_or(LoopError::NoTerminal)?;
        terminal
            .as_fd()
            .try_clone_to_owned()
            .map_err(LoopError::Setup)
    }

    fn dispatch_timers(&mut self) -> HandlerResult {
        let now = Instant::now();
        let due = self.timers.due(now);
        if due.is_empty() {
            return Ok(());
        }
        for id in due {
            // Removed by an earlier callback in this round.
            let Some(mut callback) = self.timers.take(id) else {
                continue;
            };
            tracing::trace!(timer = id.get(), "timer fired");
            let result = callback(self, id);
            self.timers.finish(id, callback, now);
            if let Err(e) = result {
                self.timers.settle();
                return Err(e);
            }
        }
        self.timers.settle();
        Ok(())
    }

    /// Write once; true if this emptied the buffer.
    fn drain_output(&mut self) -> Result<bool, LoopError> {
        let terminal = self.terminal.as_mut().ok_or(LoopError::NoTerminal)?;
        Ok(self.output.drain_once(&mut **terminal)?.emptied)
    }

    fn read_input(&mut self, buf: &mut [u8]) -> Result<usize, LoopError> {
        let terminal = self.terminal.as_mut().ok_or(LoopError::NoTerminal)?;
        match terminal.read(buf) {
            Ok(0) => Err(LoopError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "terminal stream closed",
            ))),
            Ok(n) => Ok(n),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(e) => Err(LoopError::Io(e)),
        }
    }

    /// Best-effort flush; failures are logged, never returned.
    fn flush_output(&mut self, budget: Duration) {
        let Some(terminal) = self.terminal.as_mut() else {
            return;
        };
        if let Err(e) = self.output.flush(&mut **terminal, budget) {
            tracing::warn!(error = %e, "flushing terminal output failed");
        }
    }

    fn release_terminal(&mut self) {
        if let Some(mut terminal) = self.terminal.take() {
            if let Err(e) = terminal.restore() {
                tracing::warn!(error = %e, "restoring terminal failed");
            }
        }
        self.signal_sender = None;
    }
}

/// A single-threaded terminal event loop.
///
/// Configure hooks and options, then call [`Loop::run`]. A loop can be run
/// again after it stops; per-run state (exit code, death signal, decoder
/// state) is reset at the start of each run, timers are kept.
pub struct Loop {
    handlers: Handlers,
    cx: LoopContext,
    decoder: EscapeDecoder,
    config: LoopConfig,
}

impl fmt::Debug for Loop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loop")
            .field("handlers", &self.handlers)
            .field("cx", &self.cx)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for Loop {
    fn default() -> Self {
        Self::new()
    }
}

impl Loop {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(LoopConfig::default())
    }

    #[must_use]
    pub fn with_config(config: LoopConfig) -> Self {
        Self {
            handlers: Handlers::default(),
            cx: LoopContext::new(),
            decoder: EscapeDecoder::new(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn handlers_mut(&mut self) -> &mut Handlers {
        &mut self.handlers
    }

    #[must_use]
    pub fn context(&self) -> &LoopContext {
        &self.cx
    }

    pub fn context_mut(&mut self) -> &mut LoopContext {
        &mut self.cx
    }

    pub fn on_initialize(
        &mut self,
        hook: impl FnMut(&mut LoopContext) -> HandlerResult<Option<String>> + 'static,
    ) -> &mut Self {
        self.handlers.on_initialize = Some(Box::new(hook));
        self
    }

    pub fn on_key_event(
        &mut self,
        hook: impl FnMut(&mut LoopContext, &KeyEvent) -> HandlerResult<KeyOutcome> + 'static,
    ) -> &mut Self {
        self.handlers.on_key_event = Some(Box::new(hook));
        self
    }

    pub fn on_text(
        &mut self,
        hook: impl FnMut(&mut LoopContext, &str, TextOrigin) -> HandlerResult + 'static,
    ) -> &mut Self {
        self.handlers.on_text = Some(Box::new(hook));
        self
    }

    pub fn on_resize(
        &mut self,
        hook: impl FnMut(&mut LoopContext, ScreenSize, ScreenSize) -> HandlerResult + 'static,
    ) -> &mut Self {
        self.handlers.on_resize = Some(Box::new(hook));
        self
    }

    pub fn on_write_complete(
        &mut self,
        hook: impl FnMut(&mut LoopContext) -> HandlerResult + 'static,
    ) -> &mut Self {
        self.handlers.on_write_complete = Some(Box::new(hook));
        self
    }

    pub fn on_rc_response(
        &mut self,
        hook: impl FnMut(&mut LoopContext, &[u8]) -> HandlerResult + 'static,
    ) -> &mut Self {
        self.handlers.on_rc_response = Some(Box::new(hook));
        self
    }

    pub fn on_received_data(
        &mut self,
        hook: impl FnMut(&mut LoopContext, &[u8]) -> HandlerResult + 'static,
    ) -> &mut Self {
        self.handlers.on_received_data = Some(Box::new(hook));
        self
    }

    /// Stay on the main screen instead of switching to the alternate one.
    pub fn no_alternate_screen(&mut self) -> &mut Self {
        self.config.terminal.alternate_screen = false;
        self
    }

    pub fn mouse_tracking(&mut self, mode: MouseTracking) -> &mut Self {
        self.config.terminal.mouse_tracking = mode;
        self
    }

    pub fn add_timer(
        &mut self,
        interval: Duration,
        repeats: bool,
        callback: impl FnMut(&mut LoopContext, TimerId) -> HandlerResult + 'static,
    ) -> TimerId {
        self.cx.add_timer(interval, repeats, callback)
    }

    pub fn remove_timer(&mut self, id: TimerId) -> bool {
        self.cx.remove_timer(id)
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.cx.exit_code()
    }

    #[must_use]
    pub fn death_signal(&self) -> DeathSignal {
        self.cx.death_signal()
    }

    #[must_use]
    pub fn death_signal_name(&self) -> &'static str {
        self.cx.death_signal_name()
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.cx.phase()
    }

    /// Run on the controlling terminal until quit, a terminating signal or
    /// an error.
    pub fn run(&mut self) -> Result<(), LoopError> {
        let tty = Tty::open().map_err(LoopError::Setup)?;
        self.run_on(tty)
    }

    /// Run on an arbitrary terminal channel.
    pub fn run_on<T: Terminal + 'static>(&mut self, terminal: T) -> Result<(), LoopError> {
        let bridge = SignalBridge::install().map_err(LoopError::Setup)?;
        let sender = bridge.sender().map_err(LoopError::Setup)?;
        let mut terminal: Box<dyn Terminal> = Box::new(terminal);
        terminal.set_raw_mode().map_err(LoopError::Setup)?;

        self.decoder.reset();
        self.cx.begin(terminal, sender);
        tracing::info!(
            alternate_screen = self.config.terminal.alternate_screen,
            mouse_tracking = ?self.config.terminal.mouse_tracking,
            "event loop starting"
        );

        let mut finalizer = None;
        let result = self
            .boot(&mut finalizer)
            .and_then(|()| self.iterate(&bridge));
        if let Err(e) = &result {
            tracing::error!(error = %e, "event loop failed");
        }

        self.shutdown(finalizer);
        drop(bridge);
        self.cx.phase = Phase::Stopped;
        tracing::info!(
            exit_code = self.cx.exit_code,
            death_signal = self.cx.death_signal_name(),
            "event loop stopped"
        );
        result
    }

    /// Re-raise the signal that ended the last run, with its default
    /// disposition, so the parent sees the process die from it.
    ///
    /// Does nothing if the run ended normally. Call after [`Loop::run`]
    /// returns; the terminal has been restored by then.
    pub fn kill_if_signalled(&self) {
        let Some(raw) = self.cx.death_signal.raw() else {
            return;
        };
        tracing::info!(signal = self.cx.death_signal_name(), "re-raising death signal");
        if let Err(e) = signal_hook::low_level::emulate_default_handler(raw) {
            tracing::warn!(error = %e, "re-raising death signal failed");
            return;
        }
        std::thread::sleep(self.config.kill_grace);
    }

    fn boot(&mut self, finalizer: &mut Option<String>) -> Result<(), LoopError> {
        let enter = self.config.terminal.enter_codes();
        self.cx.queue_write_string(&enter);
        *finalizer = self.handlers.initialize(&mut self.cx)?;
        Ok(())
    }

    fn iterate(&mut self, bridge: &SignalBridge) -> Result<(), LoopError> {
        let tty_fd = self.cx.terminal_fd()?;
        let signal_fd = bridge.reader_fd();
        let mut selector = Selector::with_capacity(self.config.selector_capacity);
        selector.register_read(tty_fd.as_fd());
        selector.register_read(signal_fd);
        let mut read_buf = vec![0u8; self.config.read_buffer_size.max(1)];

        loop {
            self.cx.dispatch_timers()?;
            if !self.cx.keep_going {
                return Ok(());
            }

            if self.cx.output.is_empty() {
                selector.unregister_write(tty_fd.as_fd());
            } else {
                selector.register_write(tty_fd.as_fd());
            }
            let ready = match self.cx.timers.next_timeout(Instant::now()) {
                Some(timeout) => selector.wait(timeout),
                None => selector.wait_forever(),
            }
            .map_err(LoopError::Wait)?;
            if ready == 0 {
                continue;
            }

            if selector.is_ready_to_write(tty_fd.as_fd())
                && !self.cx.output.is_empty()
                && self.cx.drain_output()?
            {
                self.handlers.write_complete(&mut self.cx)?;
            }
            if selector.is_ready_to_read(tty_fd.as_fd()) {
                self.read_terminal(&mut read_buf)?;
            }
            if selector.is_ready_to_read(signal_fd) {
                self.handle_signals(bridge)?;
            }
        }
    }

    fn read_terminal(&mut self, buf: &mut [u8]) -> Result<(), LoopError> {
        let n = self.cx.read_input(buf)?;
        if n == 0 {
            return Ok(());
        }
        let data = &buf[..n];
        self.handlers.received_data(&mut self.cx, data)?;
        let mut dispatcher = InputDispatcher {
            handlers: &mut self.handlers,
            cx: &mut self.cx,
        };
        self.decoder.feed(data, &mut dispatcher)?;
        Ok(())
    }

    fn handle_signals(&mut self, bridge: &SignalBridge) -> Result<(), LoopError> {
        let signals = bridge.drain()?;
        let mut dispatcher = InputDispatcher {
            handlers: &mut self.handlers,
            cx: &mut self.cx,
        };
        for signal in signals {
            dispatcher.signal(signal)?;
        }
        Ok(())
    }

    fn shutdown(&mut self, finalizer: Option<String>) {
        self.cx.phase = Phase::ShuttingDown;
        let budget = self.config.flush_budget;
        if self.cx.flush_on_shutdown {
            self.cx.flush_output(budget);
        }
        self.cx.output.clear();
        if let Some(finalizer) = finalizer.filter(|f| !f.is_empty()) {
            self.cx.queue_write_string(&finalizer);
        }
        let exit = self.config.terminal.exit_codes();
        self.cx.queue_write_string(&exit);
        self.cx.flush_output(budget);
        self.cx.release_terminal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::WindowSize;
    use std::cell::{Cell, RefCell};
    use std::os::fd::BorrowedFd;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// A terminal whose other end is a socket held by the test.
    struct SocketTerminal {
        stream: UnixStream,
        size: Arc<Mutex<WindowSize>>,
        size_queries: Arc<AtomicUsize>,
        stalled_writes: Arc<AtomicUsize>,
        modes: Arc<Mutex<Vec<&'static str>>>,
    }

    struct Peer {
        stream: UnixStream,
        size: Arc<Mutex<WindowSize>>,
        size_queries: Arc<AtomicUsize>,
        stalled_writes: Arc<AtomicUsize>,
        modes: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Peer {
        fn output(mut self) -> String {
            let mut out = Vec::new();
            self.stream.read_to_end(&mut out).unwrap();
            String::from_utf8(out).unwrap()
        }

        fn modes(&self) -> Vec<&'static str> {
            self.modes.lock().unwrap().clone()
        }
    }

    fn socket_terminal() -> (SocketTerminal, Peer) {
        let (ours, theirs) = UnixStream::pair().unwrap();
        ours.set_nonblocking(true).unwrap();
        let size = Arc::new(Mutex::new(WindowSize {
            rows: 24,
            cols: 80,
            xpixel: 800,
            ypixel: 480,
        }));
        let size_queries = Arc::new(AtomicUsize::new(0));
        let stalled_writes = Arc::new(AtomicUsize::new(0));
        let modes = Arc::new(Mutex::new(Vec::new()));
        let terminal = SocketTerminal {
            stream: ours,
            size: Arc::clone(&size),
            size_queries: Arc::clone(&size_queries),
            stalled_writes: Arc::clone(&stalled_writes),
            modes: Arc::clone(&modes),
        };
        let peer = Peer {
            stream: theirs,
            size,
            size_queries,
            stalled_writes,
            modes,
        };
        (terminal, peer)
    }

    impl Terminal for SocketTerminal {
        fn window_size(&self) -> io::Result<WindowSize> {
            self.size_queries.fetch_add(1, Ordering::SeqCst);
            Ok(*self.size.lock().unwrap())
        }

        fn set_raw_mode(&mut self) -> io::Result<()> {
            self.modes.lock().unwrap().push("raw");
            Ok(())
        }

        fn restore(&mut self) -> io::Result<()> {
            self.modes.lock().unwrap().push("restore");
            Ok(())
        }
    }

    impl Read for SocketTerminal {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.stream.read(buf)
        }
    }

    impl Write for SocketTerminal {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let stalled = self.stalled_writes.load(Ordering::SeqCst);
            if stalled > 0 {
                self.stalled_writes.store(stalled - 1, Ordering::SeqCst);
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.stream.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl AsFd for SocketTerminal {
        fn as_fd(&self) -> BorrowedFd<'_> {
            self.stream.as_fd()
        }
    }

    fn quiet() -> TerminalStateOptions {
        TerminalStateOptions {
            alternate_screen: false,
            mouse_tracking: MouseTracking::None,
            bracketed_paste: false,
            kitty_keyboard_flags: 0,
            focus_tracking: false,
        }
    }

    /// Loop with a short flush budget and a watchdog so a broken test fails
    /// with exit code 99 instead of hanging.
    fn test_loop(options: TerminalStateOptions) -> Loop {
        let config = LoopConfig::default()
            .with_flush_budget(Duration::from_millis(500))
            .with_terminal_options(options);
        let mut lp = Loop::with_config(config);
        lp.add_timer(Duration::from_secs(5), false, |cx, _| {
            cx.quit(99);
            Ok(())
        });
        lp
    }

    #[test]
    fn quit_runs_full_shutdown_sequence() {
        let (terminal, peer) = socket_terminal();
        let options = TerminalStateOptions::default();
        let mut lp = test_loop(options.clone());
        lp.on_initialize(|cx| {
            cx.queue_write_string("hello");
            cx.add_timer(Duration::from_millis(1), false, |cx, _| {
                cx.quit(7);
                Ok(())
            });
            Ok(Some("FIN".to_owned()))
        });

        lp.run_on(terminal).unwrap();
        assert_eq!(lp.exit_code(), 7);
        assert_eq!(lp.death_signal(), DeathSignal::None);
        assert_eq!(lp.death_signal_name(), "");
        assert_eq!(lp.phase(), Phase::Stopped);
        assert_eq!(peer.modes(), vec!["raw", "restore"]);
        assert_eq!(
            peer.output(),
            format!("{}helloFIN{}", options.enter_codes(), options.exit_codes())
        );
    }

    #[test]
    fn terminating_signals_end_run_without_error() {
        for (signal, expected) in [
            (LoopSignal::Int, DeathSignal::Int),
            (LoopSignal::Term, DeathSignal::Term),
            (LoopSignal::Hup, DeathSignal::Hup),
        ] {
            let (terminal, _peer) = socket_terminal();
            let mut lp = test_loop(quiet());
            lp.add_timer(Duration::ZERO, false, move |cx, _| {
                assert!(cx.post_signal(signal));
                Ok(())
            });
            lp.run_on(terminal).unwrap();
            assert_eq!(lp.death_signal(), expected);
            assert_eq!(lp.death_signal_name(), signal.name());
            assert_eq!(lp.exit_code(), 0);
        }
    }

    #[test]
    fn hangup_discards_pending_output() {
        let options = TerminalStateOptions::default();
        for (signal, keeps_pending) in [(LoopSignal::Term, true), (LoopSignal::Hup, false)] {
            let (terminal, peer) = socket_terminal();
            let stalled = Arc::clone(&peer.stalled_writes);
            let mut lp = test_loop(options.clone());
            lp.add_timer(Duration::ZERO, false, move |cx, _| {
                // The next write attempt fails, so "pending" is still queued
                // when the signal is handled.
                stalled.store(1, Ordering::SeqCst);
                cx.queue_write_string("pending");
                cx.post_signal(signal);
                Ok(())
            });
            lp.run_on(terminal).unwrap();

            let expected = if keeps_pending {
                format!("{}pending{}", options.enter_codes(), options.exit_codes())
            } else {
                options.exit_codes()
            };
            assert_eq!(peer.output(), expected, "{}", signal.name());
        }
    }

    #[test]
    fn window_changes_are_coalesced() {
        let (terminal, peer) = socket_terminal();
        let size = Arc::clone(&peer.size);
        let resizes = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&resizes);
        let mut lp = test_loop(quiet());
        lp.on_initialize(|cx| {
            assert_eq!(cx.screen_size()?.width_cells, 80);
            Ok(None)
        });
        lp.on_resize(move |cx, old, new| {
            seen.borrow_mut().push((old, new));
            cx.quit(0);
            Ok(())
        });
        lp.add_timer(Duration::ZERO, false, move |cx, _| {
            *size.lock().unwrap() = WindowSize {
                rows: 40,
                cols: 100,
                xpixel: 1000,
                ypixel: 800,
            };
            for _ in 0..3 {
                cx.post_signal(LoopSignal::Winch);
            }
            Ok(())
        });

        lp.run_on(terminal).unwrap();
        let resizes = resizes.borrow();
        assert_eq!(resizes.len(), 1);
        let (old, new) = resizes[0];
        assert_eq!((old.width_cells, old.height_cells), (80, 24));
        assert_eq!((new.width_cells, new.height_cells), (100, 40));
        assert_eq!((new.cell_width, new.cell_height), (10, 20));
        assert_eq!(peer.size_queries.load(Ordering::SeqCst), 2);
        assert_eq!(lp.exit_code(), 0);
    }

    #[test]
    fn unhandled_ctrl_c_acts_like_sigint() {
        let (terminal, mut peer) = socket_terminal();
        peer.stream.write_all(b"\x1b[99;5u").unwrap();
        let mut lp = test_loop(quiet());
        lp.run_on(terminal).unwrap();
        assert_eq!(lp.death_signal(), DeathSignal::Int);
    }

    #[test]
    fn handled_ctrl_c_keeps_running() {
        let (terminal, mut peer) = socket_terminal();
        peer.stream.write_all(b"\x1b[99;5u").unwrap();
        let mut lp = test_loop(quiet());
        lp.on_key_event(|cx, event| {
            assert!(event.matches("ctrl+c"));
            cx.quit(3);
            Ok(KeyOutcome::Handled)
        });
        lp.run_on(terminal).unwrap();
        assert_eq!(lp.death_signal(), DeathSignal::None);
        assert_eq!(lp.exit_code(), 3);
    }

    #[test]
    fn typed_text_and_raw_data_reach_hooks() {
        let (terminal, mut peer) = socket_terminal();
        peer.stream.write_all(b"hi").unwrap();
        let text = Rc::new(RefCell::new(String::new()));
        let raw = Rc::new(RefCell::new(Vec::new()));
        let (t, r) = (Rc::clone(&text), Rc::clone(&raw));
        let mut lp = test_loop(quiet());
        lp.on_received_data(move |_, data| {
            r.borrow_mut().extend_from_slice(data);
            Ok(())
        });
        lp.on_text(move |cx, s, origin| {
            assert_eq!(origin, TextOrigin::Typed);
            t.borrow_mut().push_str(s);
            if t.borrow().len() == 2 {
                cx.quit(0);
            }
            Ok(())
        });
        lp.run_on(terminal).unwrap();
        assert_eq!(*text.borrow(), "hi");
        assert_eq!(*raw.borrow(), b"hi");
    }

    #[test]
    fn zero_read_buffer_still_reads_input() {
        let (terminal, mut peer) = socket_terminal();
        peer.stream.write_all(b"ok").unwrap();
        let config = LoopConfig {
            read_buffer_size: 0,
            ..LoopConfig::default()
        }
        .with_flush_budget(Duration::from_millis(500))
        .with_terminal_options(quiet());
        let mut lp = Loop::with_config(config);
        lp.add_timer(Duration::from_secs(5), false, |cx, _| {
            cx.quit(99);
            Ok(())
        });
        let text = Rc::new(RefCell::new(String::new()));
        let t = Rc::clone(&text);
        lp.on_text(move |cx, s, _| {
            t.borrow_mut().push_str(s);
            if t.borrow().len() == 2 {
                cx.quit(0);
            }
            Ok(())
        });
        lp.run_on(terminal).unwrap();
        assert_eq!(*text.borrow(), "ok");
        assert_eq!(lp.exit_code(), 0);
    }

    #[test]
    fn rc_response_is_delivered_without_marker() {
        let (terminal, mut peer) = socket_terminal();
        peer.stream
            .write_all(b"\x1bP@kitty-cmd{\"ok\":true}\x1b\\")
            .unwrap();
        let got = Rc::new(RefCell::new(Vec::new()));
        let g = Rc::clone(&got);
        let mut lp = test_loop(quiet());
        lp.on_rc_response(move |cx, payload| {
            g.borrow_mut().extend_from_slice(payload);
            cx.quit(0);
            Ok(())
        });
        lp.run_on(terminal).unwrap();
        assert_eq!(*got.borrow(), b"{\"ok\":true}");
    }

    #[test]
    fn write_complete_fires_once_per_drain() {
        let (terminal, _peer) = socket_terminal();
        let completions = Rc::new(Cell::new(0));
        let c = Rc::clone(&completions);
        let mut lp = test_loop(quiet());
        lp.on_initialize(|cx| {
            cx.queue_write_string("frame");
            Ok(None)
        });
        lp.on_write_complete(move |cx| {
            c.set(c.get() + 1);
            cx.add_timer(Duration::from_millis(20), false, |cx, _| {
                cx.quit(0);
                Ok(())
            });
            Ok(())
        });
        lp.run_on(terminal).unwrap();
        assert_eq!(completions.get(), 1);
    }

    #[test]
    fn repeating_and_one_shot_timers() {
        let (terminal, _peer) = socket_terminal();
        let ticks = Rc::new(Cell::new(0));
        let once = Rc::new(Cell::new(0));
        let (t, o) = (Rc::clone(&ticks), Rc::clone(&once));
        let mut lp = test_loop(quiet());
        lp.add_timer(Duration::from_millis(1), false, move |_, _| {
            o.set(o.get() + 1);
            Ok(())
        });
        lp.add_timer(Duration::from_millis(2), true, move |cx, id| {
            t.set(t.get() + 1);
            if t.get() == 3 {
                assert!(cx.remove_timer(id));
                cx.quit(0);
            }
            Ok(())
        });
        lp.run_on(terminal).unwrap();
        assert_eq!(ticks.get(), 3);
        assert_eq!(once.get(), 1);
        assert_eq!(lp.exit_code(), 0);
    }

    #[test]
    fn timer_error_stops_the_loop_after_cleanup() {
        let (terminal, peer) = socket_terminal();
        let mut lp = test_loop(quiet());
        lp.add_timer(Duration::ZERO, false, |_, _| Err("timer broke".into()));
        let err = lp.run_on(terminal).unwrap_err();
        assert!(matches!(err, LoopError::Handler(_)));
        assert_eq!(err.to_string(), "callback failed: timer broke");
        assert_eq!(lp.phase(), Phase::Stopped);
        assert_eq!(peer.modes(), vec!["raw", "restore"]);
    }

    #[test]
    fn initialize_error_still_restores_terminal() {
        let (terminal, peer) = socket_terminal();
        let options = TerminalStateOptions::default();
        let mut lp = test_loop(options.clone());
        lp.on_initialize(|_| Err("no config".into()));
        let err = lp.run_on(terminal).unwrap_err();
        assert!(matches!(err, LoopError::Handler(_)));
        assert_eq!(peer.modes(), vec!["raw", "restore"]);
        assert_eq!(
            peer.output(),
            format!("{}{}", options.enter_codes(), options.exit_codes())
        );
    }

    #[test]
    fn closed_terminal_is_end_of_stream() {
        let (terminal, peer) = socket_terminal();
        let modes = Arc::clone(&peer.modes);
        drop(peer);
        let mut lp = test_loop(quiet());
        let err = lp.run_on(terminal).unwrap_err();
        assert!(err.is_end_of_stream(), "{err}");
        assert_eq!(*modes.lock().unwrap(), vec!["raw", "restore"]);
    }

    #[test]
    fn second_run_resets_per_run_state() {
        let mut lp = test_loop(quiet());

        let (terminal, _peer) = socket_terminal();
        lp.add_timer(Duration::ZERO, false, |cx, _| {
            cx.post_signal(LoopSignal::Int);
            Ok(())
        });
        lp.run_on(terminal).unwrap();
        assert_eq!(lp.death_signal(), DeathSignal::Int);

        let (terminal, _peer) = socket_terminal();
        lp.add_timer(Duration::ZERO, false, |cx, _| {
            assert_eq!(cx.phase(), Phase::Running);
            cx.quit(4);
            Ok(())
        });
        lp.run_on(terminal).unwrap();
        assert_eq!(lp.death_signal(), DeathSignal::None);
        assert_eq!(lp.exit_code(), 4);
    }

    #[test]
    fn idle_loop_has_no_session() {
        let mut lp = Loop::new();
        assert_eq!(lp.phase(), Phase::Idle);
        assert!(!lp.context_mut().post_signal(LoopSignal::Int));
        assert!(matches!(
            lp.context_mut().screen_size(),
            Err(LoopError::NoTerminal)
        ));
        lp.context_mut().debug_print("no terminal yet");
        // Not signalled, so this returns immediately.
        lp.kill_if_signalled();
    }

    #[test]
    fn loop_options_reach_enter_codes() {
        let mut lp = Loop::new();
        lp.no_alternate_screen().mouse_tracking(MouseTracking::Buttons);
        let enter = lp.config().terminal.enter_codes();
        assert!(!enter.contains("1049"));
        assert!(enter.contains("\x1b[?1000;1006h"));
    }

    #[test]
    fn beep_queues_bell() {
        let (terminal, peer) = socket_terminal();
        let mut lp = test_loop(quiet());
        lp.on_initialize(|cx| {
            cx.beep();
            cx.quit(0);
            Ok(None)
        });
        lp.run_on(terminal).unwrap();
        assert_eq!(peer.output(), format!("\x07{}", quiet().exit_codes()));
    }
}
