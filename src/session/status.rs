//! Session status detection
//!
//! Infers whether the wrapped CLI is idle, busy or waiting for a yes/no answer
//! from its raw output. The CLI-specific conventions (spinner glyphs, activity
//! keywords, prompt markers) live in [`StatusRules`] so they can be replaced
//! from configuration.
//!
//! Busy is sticky: once a spinner glyph is seen, the session stays busy for
//! the debounce interval even when the following frames carry no spinner.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::buffer::OutputBuffer;

/// Task label before the first classification
pub const TASK_STARTING: &str = "starting";
/// Task label while idle
pub const TASK_IDLE: &str = "idle";
/// Task label while a confirmation prompt is open
pub const TASK_AWAITING_INPUT: &str = "awaiting input";
/// Task label when busy without a recognised activity keyword
pub const TASK_PROCESSING: &str = "processing";

/// Live state of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Nothing happening, or the initial state
    #[default]
    Idle,
    /// The CLI is working
    Busy,
    /// The CLI is blocked on a yes/no confirmation
    Waiting,
}

/// Activity keywords mapped to a task label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskKeyword {
    /// Any of these substrings selects the label
    pub keywords: Vec<String>,
    /// Label reported as the current task
    pub label: String,
}

impl TaskKeyword {
    fn new(keywords: &[&str], label: &str) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            label: label.to_string(),
        }
    }
}

/// Rule table driving the classifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusRules {
    /// Glyphs the CLI animates while working
    pub spinner_glyphs: Vec<char>,
    /// Checked in order; the first match wins
    pub task_keywords: Vec<TaskKeyword>,
    /// Substrings that mark an open yes/no prompt
    pub prompt_patterns: Vec<String>,
    /// Chunks searched for prompt patterns
    pub prompt_window: usize,
    /// Chunks searched for task keywords
    pub task_window: usize,
    /// How long busy is held after the last spinner glyph
    pub debounce_ms: u64,
    /// Extra delay before the post-busy recheck fires
    pub recheck_grace_ms: u64,
}

impl Default for StatusRules {
    fn default() -> Self {
        Self {
            spinner_glyphs: vec!['✻', '✽', '✶', '✳', '✢', '·', '⠂', '⠐'],
            task_keywords: vec![
                TaskKeyword::new(&["Read"], "reading files"),
                TaskKeyword::new(&["Write", "Edit"], "editing files"),
                TaskKeyword::new(&["Search", "Grep"], "searching"),
                TaskKeyword::new(&["Bash", "Run"], "running command"),
                TaskKeyword::new(&["Think"], "thinking"),
            ],
            prompt_patterns: ["[Y/n]", "[y/N]", "(y/n)", "(Y/n)"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
            prompt_window: 10,
            task_window: 20,
            debounce_ms: 1500,
            recheck_grace_ms: 100,
        }
    }
}

impl StatusRules {
    /// Busy hold interval
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Delay from entering busy to the demotion recheck
    pub fn recheck_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_ms + self.recheck_grace_ms)
    }

    fn has_spinner(&self, chunk: &str) -> bool {
        chunk.chars().any(|c| self.spinner_glyphs.contains(&c))
    }

    fn task_for(&self, window: &str) -> &str {
        self.task_keywords
            .iter()
            .find(|task| task.keywords.iter().any(|k| window.contains(k.as_str())))
            .map(|task| task.label.as_str())
            .unwrap_or(TASK_PROCESSING)
    }

    fn has_prompt(&self, window: &str) -> bool {
        self.prompt_patterns
            .iter()
            .any(|p| window.contains(p.as_str()))
    }
}

/// Per-session timing memory carried between classifications
#[derive(Debug, Clone, Default)]
pub struct ClassifierMemory {
    last_busy_at: Option<Instant>,
    last_task: Option<String>,
}

impl ClassifierMemory {
    /// When a spinner glyph was last observed
    pub fn last_busy_at(&self) -> Option<Instant> {
        self.last_busy_at
    }
}

/// Result of one classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: SessionStatus,
    pub task: String,
}

impl Classification {
    fn new(status: SessionStatus, task: impl Into<String>) -> Self {
        Self {
            status,
            task: task.into(),
        }
    }
}

/// Classify a session from its newest chunk and trailing history
///
/// `history` is expected to already contain `chunk`. Rechecks pass an empty
/// chunk so only the debounce and prompt rules apply.
pub fn classify(
    rules: &StatusRules,
    memory: &mut ClassifierMemory,
    chunk: &str,
    history: &OutputBuffer,
    now: Instant,
) -> Classification {
    if rules.has_spinner(chunk) {
        let window = history.recent_text(rules.task_window);
        let task = rules.task_for(&window).to_string();
        memory.last_busy_at = Some(now);
        memory.last_task = Some(task.clone());
        return Classification::new(SessionStatus::Busy, task);
    }

    let within_debounce = memory
        .last_busy_at
        .is_some_and(|at| now.saturating_duration_since(at) < rules.debounce());
    if within_debounce {
        let task = memory.last_task.as_deref().unwrap_or(TASK_PROCESSING);
        return Classification::new(SessionStatus::Busy, task);
    }

    if rules.has_prompt(&history.recent_text(rules.prompt_window)) {
        return Classification::new(SessionStatus::Waiting, TASK_AWAITING_INPUT);
    }

    Classification::new(SessionStatus::Idle, TASK_IDLE)
}
