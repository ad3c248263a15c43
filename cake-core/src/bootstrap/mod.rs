//! Bootstrap helpers for the `cake` server
//!
//! Currently this only covers configuration loading; logging is started by
//! [`crate::logging::init_logging`] once the configuration is known.

pub mod config;

pub use config::load_config;
