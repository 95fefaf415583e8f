//! Session management module
//!
//! Owns the registry of managed CLI sessions, their output history and the
//! status classifier fed by their output.

mod buffer;
mod manager;
mod model;
mod status;

pub use buffer::*;
pub use manager::*;
pub use model::*;
pub use status::*;
