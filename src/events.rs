//! Session event sink
//!
//! Everything the session manager and summary queue report to clients goes
//! through an [`EventSink`]. The server plugs in a broadcast channel; tests
//! plug in a recorder.

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::session::Session;

/// Capacity of the broadcast channel used by the server
pub const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Events pushed to every attached client
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A session was registered
    Created(Session),
    /// Status, task, title or summary changed
    Updated(Session),
    /// A session was removed (deleted or its process exited)
    Deleted { session_id: Uuid },
    /// A chunk of terminal output
    Output { session_id: Uuid, data: String },
    /// A summary job resolved
    SummaryUpdated {
        session_id: Uuid,
        summary: String,
        title: String,
    },
}

/// Destination for session events
///
/// `emit` is called while the session registry is locked, so implementations
/// must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SessionEvent);
}

impl EventSink for broadcast::Sender<SessionEvent> {
    fn emit(&self, event: SessionEvent) {
        // No subscribers is not an error
        let _ = self.send(event);
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Sink that records every event in order
    #[derive(Default)]
    pub struct RecordingSink {
        events: Mutex<Vec<SessionEvent>>,
    }

    impl RecordingSink {
        pub fn events(&self) -> Vec<SessionEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn count(&self, predicate: impl Fn(&SessionEvent) -> bool) -> usize {
            self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
        }
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: SessionEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_sink_delivers_events() {
        let (tx, mut rx) = broadcast::channel(16);
        let id = Uuid::new_v4();
        tx.emit(SessionEvent::Deleted { session_id: id });

        let event = rx.recv().await.unwrap();
        assert_eq!(event, SessionEvent::Deleted { session_id: id });
    }

    #[test]
    fn test_broadcast_sink_without_subscribers() {
        let (tx, rx) = broadcast::channel::<SessionEvent>(16);
        drop(rx);
        tx.emit(SessionEvent::Deleted {
            session_id: Uuid::new_v4(),
        });
    }
}
