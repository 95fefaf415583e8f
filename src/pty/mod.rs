//! PTY management module
//!
//! Spawns session commands inside a login shell attached to a pseudo-terminal.
//! Uses portable-pty for cross-platform compatibility.

mod env;
mod process;

pub use env::*;
pub use process::*;
