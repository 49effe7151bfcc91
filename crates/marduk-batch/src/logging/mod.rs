//! Logging utilities.
//!
//! The crate only emits through the `log` facade. Binaries and tests that want
//! output call [`init_logging`] once.

mod init;

pub use init::{init_logging, LoggingConfig};
