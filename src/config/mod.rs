//! Configuration module for the recognizer.
//!
//! Provides CLI argument parsing and the tuned constant tables.

#[allow(clippy::module_inception)]
mod config;
pub mod tuning;

pub use config::{AppConfig, Provider};
pub use tuning::Tuning;
