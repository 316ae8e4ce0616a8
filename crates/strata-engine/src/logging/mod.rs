//! Logger setup for binaries built on the engine.
//!
//! Library code only uses the `log` facade; `env_logger` is installed here.

mod init;

pub use init::{init_logging, LoggingConfig, DEFAULT_FILTER};
