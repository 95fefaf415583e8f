//! Client message dispatch
//!
//! Turns one validated client message into calls on the session manager and
//! summary queue. Replies go only to the requesting client; everything else
//! reaches clients as broadcast session events.

use tracing::{debug, warn};

use super::discovery::{self, BrowseError};
use super::protocol::{ClientEnvelope, ClientMessage, ErrorCode, ServerMessage};
use crate::pty::PtyError;
use crate::session::{SessionError, SessionManager};
use crate::summary::SummaryQueue;

/// Routes client requests for one server instance
#[derive(Clone)]
pub struct MessageHandler {
    manager: SessionManager,
    summaries: SummaryQueue,
}

impl MessageHandler {
    pub fn new(manager: SessionManager, summaries: SummaryQueue) -> Self {
        Self { manager, summaries }
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Parse, validate and handle a raw text frame
    pub async fn handle_text(&self, text: &str) -> Option<ServerMessage> {
        match ClientEnvelope::from_json(text) {
            Ok(envelope) => self.handle_message(envelope.message).await,
            Err(e) => {
                debug!("Rejected client message: {}", e);
                Some(ServerMessage::from(e))
            }
        }
    }

    /// Handle a client message and return the reply, if any
    pub async fn handle_message(&self, message: ClientMessage) -> Option<ServerMessage> {
        match message {
            ClientMessage::Ping { seq } => {
                debug!("Received ping with seq {}", seq);
                Some(ServerMessage::pong(seq))
            }

            ClientMessage::CreateSession {
                path,
                launch_command,
            } => {
                debug!(
                    "CreateSession request: path={}, command={:?}",
                    path, launch_command
                );
                match self.manager.create(&path, launch_command.as_deref()).await {
                    Ok(session) => Some(ServerMessage::SessionSpawned { session }),
                    Err(e) => {
                        warn!("Failed to create session in {}: {}", path, e);
                        let code = match &e {
                            SessionError::Spawn(PtyError::InvalidDirectory(_)) => ErrorCode::InvalidPath,
                            _ => ErrorCode::SpawnFailed,
                        };
                        Some(ServerMessage::error_with_code(e.to_string(), code))
                    }
                }
            }

            ClientMessage::WriteInput { session_id, data } => {
                self.manager.write(session_id, data.as_bytes()).await;
                None
            }

            ClientMessage::Resize {
                session_id,
                cols,
                rows,
            } => {
                self.manager.resize(session_id, cols, rows).await;
                None
            }

            ClientMessage::DeleteSession { session_id } => {
                debug!("DeleteSession request: session={}", session_id);
                self.manager.delete(session_id).await;
                None
            }

            ClientMessage::GetHistory { session_id } => {
                let data = self.manager.history(session_id).await;
                Some(ServerMessage::History { session_id, data })
            }

            ClientMessage::RequestSummary { session_id } => {
                let handle = self.summaries.enqueue(session_id);
                tokio::spawn(async move {
                    let outcome = handle.wait().await;
                    debug!("Summary for {} resolved: {:?}", session_id, outcome);
                });
                None
            }

            ClientMessage::ListSessions => Some(ServerMessage::SessionList {
                sessions: self.manager.list().await,
            }),

            ClientMessage::BrowseDirectory { path } => {
                let result =
                    tokio::task::spawn_blocking(move || discovery::browse_directory(path.as_deref()))
                        .await;
                Some(match result {
                    Ok(Ok(listing)) => ServerMessage::DirectoryListing {
                        current_path: listing.current_path,
                        parent_path: listing.parent_path,
                        items: listing.items,
                    },
                    Ok(Err(e @ (BrowseError::NotFound(_) | BrowseError::NotADirectory(_)))) => {
                        ServerMessage::error_with_code(e.to_string(), ErrorCode::InvalidPath)
                    }
                    Ok(Err(e)) => ServerMessage::error_with_code(e.to_string(), ErrorCode::InternalError),
                    Err(e) => ServerMessage::error_with_code(e.to_string(), ErrorCode::InternalError),
                })
            }

            ClientMessage::CheckCli => {
                let status = discovery::check_cli(
                    self.manager.shell(),
                    self.manager.default_launch_command(),
                )
                .await;
                Some(ServerMessage::CliStatus {
                    installed: status.installed,
                    version: status.version,
                })
            }

            ClientMessage::CheckNode => {
                let status = discovery::check_node(self.manager.shell()).await;
                Some(ServerMessage::NodeStatus {
                    installed: status.installed,
                    version: status.version,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use uuid::Uuid;

    use crate::config::{SessionSettings, SummarySettings};
    use crate::events::testing::RecordingSink;
    use crate::events::SessionEvent;
    use crate::session::StatusRules;
    use crate::summary::{Summarizer, Summary, SummaryError};

    struct FixedSummarizer;

    #[async_trait]
    impl Summarizer for FixedSummarizer {
        async fn summarize(&self, _transcript: &str) -> Result<Summary, SummaryError> {
            Ok(Summary::new("Echo", "Echoing input"))
        }
    }

    fn handler() -> (MessageHandler, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let settings = SessionSettings {
            shell: Some("/bin/sh".to_string()),
            launch_command: "cat".to_string(),
            ..SessionSettings::default()
        };
        let manager = SessionManager::new(settings, StatusRules::default(), sink.clone());
        let summary_settings = SummarySettings {
            queue_delay_ms: 10,
            ..SummarySettings::default()
        };
        let queue = SummaryQueue::start(
            &summary_settings,
            Arc::new(FixedSummarizer),
            Arc::new(manager.clone()),
        );
        (MessageHandler::new(manager, queue), sink)
    }

    #[tokio::test]
    async fn test_handle_ping_message() {
        let (handler, _sink) = handler();
        let response = handler.handle_text(r#"{"type": "ping", "seq": 42}"#).await;
        assert_eq!(response, Some(ServerMessage::pong(42)));
    }

    #[tokio::test]
    async fn test_invalid_json_yields_error() {
        let (handler, _sink) = handler();
        match handler.handle_text("not json").await {
            Some(ServerMessage::Error { code, .. }) => assert_eq!(code, Some(ErrorCode::InvalidMessage)),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_validation_failure_yields_error() {
        let (handler, _sink) = handler();
        let id = Uuid::new_v4();
        let text = format!(r#"{{"type": "resize", "session_id": "{id}", "cols": 0, "rows": 24}}"#);
        match handler.handle_text(&text).await {
            Some(ServerMessage::Error { code, .. }) => assert_eq!(code, Some(ErrorCode::InvalidMessage)),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_session_in_missing_directory() {
        let (handler, sink) = handler();
        let response = handler
            .handle_message(ClientMessage::create_session("/nonexistent/dir/for/session"))
            .await;
        match response {
            Some(ServerMessage::Error { code, .. }) => assert_eq!(code, Some(ErrorCode::InvalidPath)),
            other => panic!("expected error, got {other:?}"),
        }
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let (handler, sink) = handler();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_string_lossy().to_string();

        let session = match handler.handle_message(ClientMessage::create_session(&path)).await {
            Some(ServerMessage::SessionSpawned { session }) => session,
            other => panic!("expected session_spawned, got {other:?}"),
        };
        assert_eq!(sink.count(|e| matches!(e, SessionEvent::Created(_))), 1);

        let reply = handler
            .handle_message(ClientMessage::write_input(session.id, "ping-pong\n"))
            .await;
        assert!(reply.is_none());

        // Wait for the echo to land in history
        let mut history = String::new();
        for _ in 0..50 {
            if let Some(ServerMessage::History { data, .. }) = handler
                .handle_message(ClientMessage::GetHistory {
                    session_id: session.id,
                })
                .await
            {
                history = data;
            }
            if history.contains("ping-pong") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(history.contains("ping-pong"));

        match handler.handle_message(ClientMessage::ListSessions).await {
            Some(ServerMessage::SessionList { sessions }) => {
                assert_eq!(sessions.len(), 1);
                assert_eq!(sessions[0].id, session.id);
            }
            other => panic!("expected session_list, got {other:?}"),
        }

        let reply = handler
            .handle_message(ClientMessage::RequestSummary {
                session_id: session.id,
            })
            .await;
        assert!(reply.is_none());
        for _ in 0..50 {
            if sink.count(|e| matches!(e, SessionEvent::SummaryUpdated { .. })) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let updated = handler.manager().get(session.id).await.unwrap();
        assert_eq!(updated.title, "Echo");

        handler
            .handle_message(ClientMessage::DeleteSession {
                session_id: session.id,
            })
            .await;
        handler
            .handle_message(ClientMessage::DeleteSession {
                session_id: session.id,
            })
            .await;
        assert_eq!(
            sink.count(|e| matches!(e, SessionEvent::Deleted { session_id } if *session_id == session.id)),
            1
        );
    }

    #[tokio::test]
    async fn test_history_for_unknown_session_is_empty() {
        let (handler, _sink) = handler();
        let id = Uuid::new_v4();
        let response = handler
            .handle_message(ClientMessage::GetHistory { session_id: id })
            .await;
        assert_eq!(
            response,
            Some(ServerMessage::History {
                session_id: id,
                data: String::new()
            })
        );
    }

    #[tokio::test]
    async fn test_check_node_replies_with_node_status() {
        let (handler, _sink) = handler();
        let response = handler.handle_text(r#"{"type": "check_node"}"#).await;
        assert!(matches!(response, Some(ServerMessage::NodeStatus { .. })));
    }

    #[tokio::test]
    async fn test_browse_directory() {
        let (handler, _sink) = handler();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("project")).unwrap();

        let response = handler
            .handle_message(ClientMessage::BrowseDirectory {
                path: Some(dir.path().to_string_lossy().to_string()),
            })
            .await;
        match response {
            Some(ServerMessage::DirectoryListing { items, .. }) => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].name, "project");
            }
            other => panic!("expected directory_listing, got {other:?}"),
        }

        let response = handler
            .handle_message(ClientMessage::BrowseDirectory {
                path: Some("/nonexistent/browse/target".to_string()),
            })
            .await;
        assert!(matches!(
            response,
            Some(ServerMessage::Error {
                code: Some(ErrorCode::InvalidPath),
                ..
            })
        ));
    }
}
