//! Session summaries
//!
//! Turns a session's recent output into a short title and summary through the
//! Anthropic Messages API. Requests go through a single-worker queue so at
//! most one call is in flight and rate-limit responses are retried later.

mod client;
mod queue;
mod transcript;

pub use client::*;
pub use queue::*;
pub use transcript::*;

use serde::{Deserialize, Serialize};

/// Title used when the model omits one
pub const FALLBACK_TITLE: &str = "New session";
/// Summary used when the model omits one
pub const FALLBACK_SUMMARY: &str = "No summary available";
/// Summary reported for a session with no output
pub const EMPTY_SESSION_SUMMARY: &str = "Session output is empty";
/// Placeholder after retries for a rate limit ran out
pub const RATE_LIMITED_SUMMARY: &str = "API rate limited, please retry later";
/// Placeholder for every other failure
pub const FAILED_SUMMARY: &str = "Summary generation failed";

/// A generated title and summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub title: String,
    pub summary: String,
}

impl Summary {
    pub fn new(title: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            summary: summary.into(),
        }
    }
}
