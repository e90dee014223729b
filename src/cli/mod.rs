//! Command line interface module
//!
//! Argument parsing, layered application configuration, and the runner that
//! drives `kubectl image pull`.

pub mod args;
pub mod config;
pub mod runner;

pub use args::{Args, Command, PullArgs};
pub use config::AppConfig;
pub use runner::Runner;
