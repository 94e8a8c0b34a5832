#![forbid(unsafe_code)]
//! Single-threaded event loop for terminal applications.
//!
//! A [`Loop`] owns one terminal session from start to finish. It puts the
//! terminal into raw mode, waits on the terminal and a signal pipe with
//! `poll(2)`, runs software timers, decodes input into key events and text,
//! and hands everything to application hooks. On the way out it always
//! restores the terminal, whether the run ended by [`LoopContext::quit`], a
//! terminating signal or an error.
//!
//! ```no_run
//! use std::time::Duration;
//! use ktui_loop::{KeyOutcome, Loop};
//!
//! let mut lp = Loop::new();
//! lp.on_key_event(|cx, event| {
//!     if event.matches("q") {
//!         cx.quit(0);
//!         return Ok(KeyOutcome::Handled);
//!     }
//!     Ok(KeyOutcome::Unhandled)
//! });
//! lp.add_timer(Duration::from_secs(1), true, |cx, _| {
//!     cx.beep();
//!     Ok(())
//! });
//! lp.run()?;
//! lp.kill_if_signalled();
//! # Ok::<(), ktui_loop::LoopError>(())
//! ```
//!
//! ## Signals
//!
//! | Signal    | Effect                                              |
//! |-----------|-----------------------------------------------------|
//! | SIGINT    | stop, death signal recorded                         |
//! | SIGTERM   | stop, death signal recorded                         |
//! | SIGHUP    | stop, death signal recorded, pending output dropped |
//! | SIGWINCH  | screen size refreshed, resize hook called           |
//! | SIGTSTP   | ignored                                             |
//! | SIGPIPE   | ignored                                             |
//!
//! Unhandled ctrl+c behaves like SIGINT and unhandled ctrl+z like SIGTSTP.

mod dispatch;
pub mod error;
pub mod event_loop;
pub mod handlers;
pub mod modes;
pub mod output;
pub mod selector;
pub mod signals;
pub mod terminal;
pub mod timers;

pub use error::{HandlerError, HandlerResult, LoopError};
pub use event_loop::{Loop, LoopConfig, LoopContext, Phase, TimerCallback};
pub use handlers::{Handlers, KeyOutcome, TextOrigin};
pub use modes::{MouseTracking, TerminalStateOptions};
pub use signals::{DeathSignal, LoopSignal};
pub use terminal::{ScreenSize, Terminal, Tty, WindowSize};
pub use timers::TimerId;

pub use ktui_core::event::{KeyCode, KeyEvent, KeyEventKind, Modifiers};
