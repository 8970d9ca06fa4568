//! admind-utils: Common utilities shared across admind crates
//!
//! This crate provides:
//! - Unified error types ([`AdmindError`], [`Result`])
//! - Logging infrastructure ([`init_logging`], [`LogConfig`])
//! - XDG-compliant path utilities ([`paths`] module)

pub mod error;
pub mod logging;
pub mod paths;

// Re-export main types at crate root for convenience
pub use error::{AdmindError, Result};
pub use logging::{
    init_logging, init_logging_with_config, init_logging_with_tap, LogConfig, LogOutput, TapLayer,
};

// Re-export commonly used path functions
pub use paths::{config_dir, config_file, log_dir, runtime_dir, socket_path, state_dir};
