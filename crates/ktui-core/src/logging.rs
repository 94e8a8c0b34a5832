#![forbid(unsafe_code)]

//! Logging and tracing support.
//!
//! Re-exports the tracing macros the decoder uses when the `tracing` feature is
//! enabled. Without the feature the same names expand to nothing, so call sites
//! never need their own `cfg` gates.

#[cfg(feature = "tracing")]
pub use tracing::{debug, trace, warn};

#[cfg(not(feature = "tracing"))]
mod noop_macros {
    /// No-op debug macro when tracing is disabled.
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }

    /// No-op trace macro when tracing is disabled.
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }

    /// No-op warn macro when tracing is disabled.
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {};
    }
}
