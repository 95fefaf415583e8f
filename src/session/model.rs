//! Session metadata
//!
//! The client-visible description of one managed CLI process. The process
//! handle and output history are owned next to it by the session manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use super::status::{SessionStatus, TASK_STARTING};

/// Title shown until the first summary completes
pub const DEFAULT_TITLE: &str = "New session";
/// Summary shown until the first summary completes
pub const DEFAULT_SUMMARY: &str = "New session, no conversation yet";

/// One managed interactive session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Unique identifier, fixed at creation
    pub id: Uuid,
    /// Directory the process was spawned in
    pub working_directory: String,
    /// Last component of the working directory
    pub display_name: String,
    /// Command run inside the login shell
    pub launch_command: String,
    /// Live status derived from output
    pub status: SessionStatus,
    /// Human-readable current activity
    pub current_task: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Short title from the last summary
    pub title: String,
    /// Summary text from the last summary
    pub summary: String,
}

impl Session {
    /// Create the metadata for a freshly spawned session
    pub fn new(id: Uuid, working_directory: impl Into<String>, launch_command: impl Into<String>) -> Self {
        let working_directory = working_directory.into();
        let display_name = display_name_for(&working_directory);
        let now = Utc::now();

        Self {
            id,
            working_directory,
            display_name,
            launch_command: launch_command.into(),
            status: SessionStatus::Idle,
            current_task: TASK_STARTING.to_string(),
            created_at: now,
            last_activity_at: now,
            title: DEFAULT_TITLE.to_string(),
            summary: DEFAULT_SUMMARY.to_string(),
        }
    }

    /// Record output activity
    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    /// Apply a new status and task; returns whether anything changed
    pub fn set_status(&mut self, status: SessionStatus, task: &str) -> bool {
        if self.status == status && self.current_task == task {
            return false;
        }
        self.status = status;
        self.current_task = task.to_string();
        true
    }
}

/// Last path component, or the path itself when there is none
pub fn display_name_for(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_defaults() {
        let id = Uuid::new_v4();
        let session = Session::new(id, "/home/me/projects/app", "claude");
        assert_eq!(session.id, id);
        assert_eq!(session.display_name, "app");
        assert_eq!(session.status, SessionStatus::Idle);
        assert_eq!(session.current_task, TASK_STARTING);
        assert_eq!(session.title, DEFAULT_TITLE);
        assert_eq!(session.summary, DEFAULT_SUMMARY);
        assert_eq!(session.created_at, session.last_activity_at);
    }

    #[test]
    fn test_display_name_edge_cases() {
        assert_eq!(display_name_for("/home/me/app/"), "app");
        assert_eq!(display_name_for("/"), "/");
        assert_eq!(display_name_for("relative"), "relative");
    }

    #[test]
    fn test_set_status_reports_changes_only() {
        let mut session = Session::new(Uuid::new_v4(), "/tmp", "claude");
        assert!(session.set_status(SessionStatus::Busy, "thinking"));
        assert!(!session.set_status(SessionStatus::Busy, "thinking"));
        assert!(session.set_status(SessionStatus::Busy, "reading files"));
        assert!(session.set_status(SessionStatus::Idle, "reading files"));
    }

    #[test]
    fn test_serializes_camel_case() {
        let session = Session::new(Uuid::new_v4(), "/tmp/demo", "claude");
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["workingDirectory"], "/tmp/demo");
        assert_eq!(json["displayName"], "demo");
        assert_eq!(json["currentTask"], "starting");
        assert_eq!(json["status"], "idle");
        assert!(json.get("lastActivityAt").is_some());
    }
}
