#![forbid(unsafe_code)]

//! Core: key events, CSI key decoding, and the escape sequence decoder.

pub mod csi_key;
pub mod escape_decoder;
pub mod event;
pub mod logging;

// Re-export tracing macros at crate root for ergonomic use.
#[cfg(feature = "tracing")]
pub use logging::{debug, trace, warn};
