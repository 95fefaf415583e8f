//! Configuration module
//!
//! Loads application settings from TOML with environment fallbacks.

mod settings;

pub use settings::*;
