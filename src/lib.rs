//! ISL Recognizer - real-time Indian Sign Language finger-spelling recognition.
//!
//! Frames go through hand localization, a candle CNN letter classifier,
//! temporal stabilization and an activation gate before accepted letters are
//! assembled into spell-corrected words. Web handlers and the bundled
//! JSON-lines driver call in through [`Recognizer`] and its [`Session`] handles.

pub mod config;
pub mod error;
pub mod language;
pub mod model;
pub mod recognition;
pub mod samples;
pub mod translate;
pub mod vision;

pub use config::{AppConfig, Provider, Tuning};
pub use error::{RecognitionError, Result};
pub use recognition::{RecognitionResult, Recognizer, Session};
