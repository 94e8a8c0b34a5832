#![forbid(unsafe_code)]

//! Error types for the event loop.

use std::fmt;
use std::io;

/// Error type returned by application callbacks and timer callbacks.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by application callbacks and timer callbacks.
pub type HandlerResult<T = ()> = Result<T, HandlerError>;

/// Errors that terminate [`Loop::run`](crate::Loop::run).
///
/// Every variant is fatal: the loop stops iterating, runs its shutdown
/// sequence and returns the error.
#[derive(Debug)]
pub enum LoopError {
    /// The signal pipe, the terminal or raw mode could not be set up.
    /// No callback has run.
    Setup(io::Error),
    /// The readiness wait failed.
    Wait(io::Error),
    /// Reading from or writing to the terminal failed, including the
    /// end-of-stream case (see [`LoopError::is_end_of_stream`]).
    Io(io::Error),
    /// An application callback or timer callback failed.
    Handler(HandlerError),
    /// The screen size was requested while no terminal session is active.
    NoTerminal,
}

impl LoopError {
    /// True when the terminal channel was closed (a zero-byte read or write).
    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, LoopError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

impl fmt::Display for LoopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopError::Setup(e) => write!(f, "failed to set up terminal session: {e}"),
            LoopError::Wait(e) => write!(f, "failed to wait for terminal readiness: {e}"),
            LoopError::Io(e) => write!(f, "terminal I/O error: {e}"),
            LoopError::Handler(e) => write!(f, "callback failed: {e}"),
            LoopError::NoTerminal => write!(f, "no controlling terminal is active"),
        }
    }
}

impl std::error::Error for LoopError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoopError::Setup(e) | LoopError::Wait(e) | LoopError::Io(e) => Some(e),
            LoopError::Handler(e) => Some(e.as_ref()),
            LoopError::NoTerminal => None,
        }
    }
}

impl From<io::Error> for LoopError {
    fn from(e: io::Error) -> Self {
        LoopError::Io(e)
    }
}

impl From<HandlerError> for LoopError {
    fn from(e: HandlerError) -> Self {
        LoopError::Handler(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_of_stream_is_detected() {
        let err = LoopError::from(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(err.is_end_of_stream());
        let err = LoopError::from(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(!err.is_end_of_stream());
        assert!(!LoopError::NoTerminal.is_end_of_stream());
    }

    #[test]
    fn handler_errors_keep_their_source() {
        let err = LoopError::from(HandlerError::from("boom"));
        assert_eq!(err.to_string(), "callback failed: boom");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn loop_error_converts_into_handler_error() {
        // Loop errors (e.g. from `screen_size`) convert into callback errors.
        fn callback() -> HandlerResult {
            Err(LoopError::NoTerminal.into())
        }
        let err = callback().unwrap_err();
        assert_eq!(err.to_string(), "no controlling terminal is active");
    }
}
