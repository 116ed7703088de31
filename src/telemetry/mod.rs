//! Process-level logging setup.
//!
//! Report lines from `TracingSink` and the crate's own diagnostics flow
//! through whichever `tracing` subscriber is installed here.

mod logging;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
