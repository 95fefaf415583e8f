//! Protocol message definitions
//!
//! Defines the message types exchanged between dashboard clients and the
//! manager server. All messages are JSON-encoded and include version
//! information for compatibility.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::events::SessionEvent;
use crate::session::Session;

/// Current protocol version
/// Increment when making breaking changes to message format
pub const PROTOCOL_VERSION: u32 = 1;

/// Minimum supported protocol version
pub const MIN_PROTOCOL_VERSION: u32 = 1;

/// Maximum terminal dimensions
pub const MAX_TERMINAL_COLS: u16 = 500;
pub const MAX_TERMINAL_ROWS: u16 = 200;

/// Maximum input length (1MB)
pub const MAX_INPUT_LENGTH: usize = 1024 * 1024;

/// Maximum path length
pub const MAX_PATH_LENGTH: usize = 4096;

// ============================================================================
// Error Types
// ============================================================================

/// Protocol-related errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Protocol version {0} not supported (min: {MIN_PROTOCOL_VERSION}, current: {PROTOCOL_VERSION})")]
    UnsupportedVersion(u32),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

// ============================================================================
// Message Envelope
// ============================================================================

/// Protocol envelope wrapping all client messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEnvelope {
    /// Protocol version used by the client
    #[serde(default = "default_version")]
    pub version: u32,
    /// The actual message payload
    #[serde(flatten)]
    pub message: ClientMessage,
}

/// Protocol envelope wrapping all server messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEnvelope {
    /// Protocol version used by the server
    pub version: u32,
    /// The actual message payload
    #[serde(flatten)]
    pub message: ServerMessage,
}

fn default_version() -> u32 {
    PROTOCOL_VERSION
}

impl ClientEnvelope {
    pub fn new(message: ClientMessage) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            message,
        }
    }

    /// Parse and validate a client envelope from JSON
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        let envelope: Self = serde_json::from_str(json)?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Validate the envelope and its contents
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.version < MIN_PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(self.version));
        }

        self.message.validate()
    }

    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerEnvelope {
    pub fn new(message: ServerMessage) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            message,
        }
    }

    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a server envelope from JSON (primarily for testing)
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

// ============================================================================
// Client Messages
// ============================================================================

/// Messages sent from a client to the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Connection keepalive ping
    Ping {
        /// Sequence number for tracking round-trip time
        seq: u64,
    },

    /// Start a new session in a directory
    CreateSession {
        /// Working directory for the session
        path: String,
        /// Command to run instead of the configured default
        #[serde(default, skip_serializing_if = "Option::is_none")]
        launch_command: Option<String>,
    },

    /// Send keystrokes to a session
    WriteInput { session_id: Uuid, data: String },

    /// Resize a session's terminal
    Resize {
        session_id: Uuid,
        cols: u16,
        rows: u16,
    },

    /// Terminate and remove a session
    DeleteSession { session_id: Uuid },

    /// Fetch the buffered output of a session
    GetHistory { session_id: Uuid },

    /// Queue a title/summary refresh
    RequestSummary { session_id: Uuid },

    /// List all active sessions
    ListSessions,

    /// List subdirectories, defaulting to the home directory
    BrowseDirectory {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },

    /// Check whether the launch command is installed
    CheckCli,

    /// Check whether Node.js is installed
    CheckNode,
}

impl ClientMessage {
    /// Validate message contents
    pub fn validate(&self) -> ProtocolResult<()> {
        match self {
            ClientMessage::CreateSession {
                path,
                launch_command,
            } => {
                validate_path(path)?;
                if let Some(command) = launch_command {
                    if command.trim().is_empty() {
                        return Err(ProtocolError::ValidationError(
                            "launch_command cannot be empty when specified".to_string(),
                        ));
                    }
                }
                Ok(())
            }

            ClientMessage::WriteInput { data, .. } => {
                if data.len() > MAX_INPUT_LENGTH {
                    return Err(ProtocolError::ValidationError(format!(
                        "input exceeds maximum length of {} bytes",
                        MAX_INPUT_LENGTH
                    )));
                }
                Ok(())
            }

            ClientMessage::Resize { cols, rows, .. } => {
                if *cols == 0 || *cols > MAX_TERMINAL_COLS {
                    return Err(ProtocolError::ValidationError(format!(
                        "cols must be between 1 and {}",
                        MAX_TERMINAL_COLS
                    )));
                }
                if *rows == 0 || *rows > MAX_TERMINAL_ROWS {
                    return Err(ProtocolError::ValidationError(format!(
                        "rows must be between 1 and {}",
                        MAX_TERMINAL_ROWS
                    )));
                }
                Ok(())
            }

            ClientMessage::BrowseDirectory { path: Some(path) } => validate_path(path),

            ClientMessage::Ping { .. }
            | ClientMessage::DeleteSession { .. }
            | ClientMessage::GetHistory { .. }
            | ClientMessage::RequestSummary { .. }
            | ClientMessage::ListSessions
            | ClientMessage::BrowseDirectory { path: None }
            | ClientMessage::CheckCli
            | ClientMessage::CheckNode => Ok(()),
        }
    }

    pub fn ping(seq: u64) -> Self {
        ClientMessage::Ping { seq }
    }

    pub fn create_session(path: impl Into<String>) -> Self {
        ClientMessage::CreateSession {
            path: path.into(),
            launch_command: None,
        }
    }

    pub fn create_session_with_command(path: impl Into<String>, command: impl Into<String>) -> Self {
        ClientMessage::CreateSession {
            path: path.into(),
            launch_command: Some(command.into()),
        }
    }

    pub fn write_input(session_id: Uuid, data: impl Into<String>) -> Self {
        ClientMessage::WriteInput {
            session_id,
            data: data.into(),
        }
    }

    pub fn resize(session_id: Uuid, cols: u16, rows: u16) -> Self {
        ClientMessage::Resize {
            session_id,
            cols,
            rows,
        }
    }
}

fn validate_path(path: &str) -> ProtocolResult<()> {
    if path.is_empty() {
        return Err(ProtocolError::ValidationError(
            "path cannot be empty".to_string(),
        ));
    }
    if path.len() > MAX_PATH_LENGTH {
        return Err(ProtocolError::ValidationError(format!(
            "path exceeds maximum length of {} characters",
            MAX_PATH_LENGTH
        )));
    }
    Ok(())
}

// ============================================================================
// Server Messages
// ============================================================================

/// Messages sent from the server to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Welcome message sent on connection
    Welcome {
        /// Command used when a create request names none
        launch_command: String,
    },

    /// Response to Ping
    Pong { seq: u64 },

    /// Reply to the client that asked for a new session
    SessionSpawned { session: Session },

    /// A session was registered (broadcast)
    SessionCreated { session: Session },

    /// Status, task, title or summary of a session changed
    SessionUpdated { session: Session },

    /// A session was removed
    SessionDeleted { session_id: Uuid },

    /// Terminal output (may contain ANSI escape sequences)
    SessionOutput { session_id: Uuid, data: String },

    /// A summary request resolved
    SummaryUpdated {
        session_id: Uuid,
        summary: String,
        title: String,
    },

    /// Buffered output of a session
    History { session_id: Uuid, data: String },

    /// All active sessions, oldest first
    SessionList { sessions: Vec<Session> },

    /// Subdirectories of a path
    DirectoryListing {
        current_path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        parent_path: Option<String>,
        items: Vec<DirectoryEntry>,
    },

    /// Result of a launch command check
    CliStatus {
        installed: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },

    /// Result of a Node.js check
    NodeStatus {
        installed: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },

    /// Error response
    Error {
        message: String,
        /// Error code for programmatic handling
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
    },
}

/// One subdirectory in a directory listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub path: String,
    pub is_git_repo: bool,
}

/// Error codes for programmatic error handling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Invalid message format or arguments
    InvalidMessage,
    /// Failed to start the session process
    SpawnFailed,
    /// Path does not exist or is not a directory
    InvalidPath,
    /// Internal server error
    InternalError,
    /// Unsupported protocol version
    UnsupportedVersion,
}

impl ServerMessage {
    pub fn welcome(launch_command: impl Into<String>) -> Self {
        ServerMessage::Welcome {
            launch_command: launch_command.into(),
        }
    }

    pub fn pong(seq: u64) -> Self {
        ServerMessage::Pong { seq }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            code: None,
        }
    }

    pub fn error_with_code(message: impl Into<String>, code: ErrorCode) -> Self {
        ServerMessage::Error {
            message: message.into(),
            code: Some(code),
        }
    }
}

// ============================================================================
// Conversion Traits
// ============================================================================

impl From<ProtocolError> for ServerMessage {
    fn from(err: ProtocolError) -> Self {
        let code = match &err {
            ProtocolError::SerializationError(_) => ErrorCode::InvalidMessage,
            ProtocolError::UnsupportedVersion(_) => ErrorCode::UnsupportedVersion,
            ProtocolError::ValidationError(_) => ErrorCode::InvalidMessage,
        };
        ServerMessage::error_with_code(err.to_string(), code)
    }
}

impl From<SessionEvent> for ServerMessage {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::Created(session) => ServerMessage::SessionCreated { session },
            SessionEvent::Updated(session) => ServerMessage::SessionUpdated { session },
            SessionEvent::Deleted { session_id } => ServerMessage::SessionDeleted { session_id },
            SessionEvent::Output { session_id, data } => {
                ServerMessage::SessionOutput { session_id, data }
            }
            SessionEvent::SummaryUpdated {
                session_id,
                summary,
                title,
            } => ServerMessage::SummaryUpdated {
                session_id,
                summary,
                title,
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
