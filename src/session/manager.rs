//! Session manager
//!
//! The single owner of all live sessions. Each session record holds the PTY
//! process, the bounded output history, the status classifier memory and the
//! pending status recheck. All mutation goes through one mutex, which keeps
//! removal of a session and termination of its process atomic and keeps
//! events of one session in output order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::buffer::OutputBuffer;
use super::model::Session;
use super::status::{classify, ClassifierMemory, SessionStatus, StatusRules};
use crate::config::SessionSettings;
use crate::events::{EventSink, SessionEvent};
use crate::pty::{ProcessExit, PtyError, PtyEvent, PtyProcess, SpawnOptions, TerminalSize};
use crate::summary::{Summary, SummaryTarget};

/// Errors that can occur while creating a session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to create session: {0}")]
    Spawn(#[from] PtyError),

    #[error("Spawn task failed: {0}")]
    Join(String),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Everything owned on behalf of one live session
struct SessionEntry {
    session: Session,
    process: Arc<PtyProcess>,
    output: OutputBuffer,
    memory: ClassifierMemory,
    recheck: Option<CancellationToken>,
}

impl SessionEntry {
    fn cancel_recheck(&mut self) {
        if let Some(token) = self.recheck.take() {
            token.cancel();
        }
    }
}

/// Manages all active sessions
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct SessionManager {
    /// Registry of active sessions
    sessions: Arc<Mutex<HashMap<Uuid, SessionEntry>>>,
    /// Where lifecycle, status and output events go
    sink: Arc<dyn EventSink>,
    settings: Arc<SessionSettings>,
    rules: Arc<StatusRules>,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(settings: SessionSettings, rules: StatusRules, sink: Arc<dyn EventSink>) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            sink,
            settings: Arc::new(settings),
            rules: Arc::new(rules),
        }
    }

    /// Launch command used when a request does not name one
    pub fn default_launch_command(&self) -> &str {
        &self.settings.launch_command
    }

    /// Shell used to run launch commands
    pub fn shell(&self) -> Option<&str> {
        self.settings.shell.as_deref()
    }

    /// Get the number of active sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Spawn a new session
    ///
    /// Starts `launch_command` (or the configured default) in a login shell
    /// inside `working_dir`. Nothing is registered when spawning fails.
    pub async fn create(
        &self,
        working_dir: &str,
        launch_command: Option<&str>,
    ) -> SessionResult<Session> {
        let command = launch_command
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(self.settings.launch_command.as_str())
            .to_string();

        let size = TerminalSize::new(self.settings.initial_cols, self.settings.initial_rows);
        let mut options = SpawnOptions::new(command.clone(), working_dir).with_size(size);
        if let Some(shell) = &self.settings.shell {
            options = options.with_shell(shell.clone());
        }

        let (process, events) = tokio::task::spawn_blocking(move || PtyProcess::spawn(options))
            .await
            .map_err(|e| SessionError::Join(e.to_string()))??;

        let id = Uuid::new_v4();
        let session = Session::new(id, working_dir, command);

        info!(
            "Session {} started `{}` in {} (pid {:?})",
            id,
            session.launch_command,
            working_dir,
            process.pid()
        );

        {
            let mut sessions = self.sessions.lock().await;
            sessions.insert(
                id,
                SessionEntry {
                    session: session.clone(),
                    process: Arc::new(process),
                    output: OutputBuffer::new(self.settings.buffer_capacity),
                    memory: ClassifierMemory::default(),
                    recheck: None,
                },
            );
            self.sink.emit(SessionEvent::Created(session.clone()));
        }

        self.start_output_pump(id, events);
        Ok(session)
    }

    /// Forward process events into the registry until the process exits
    fn start_output_pump(&self, id: Uuid, mut events: mpsc::Receiver<PtyEvent>) {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    PtyEvent::Output(chunk) => manager.handle_output(id, chunk).await,
                    PtyEvent::Exited(exit) => {
                        manager.handle_exit(id, exit).await;
                        break;
                    }
                }
            }
        });
    }

    async fn handle_output(&self, id: Uuid, chunk: String) {
        let mut sessions = self.sessions.lock().await;
        let Some(entry) = sessions.get_mut(&id) else {
            return;
        };

        entry.output.append(chunk.as_str());
        entry.session.touch();
        entry.cancel_recheck();

        let result = classify(
            &self.rules,
            &mut entry.memory,
            &chunk,
            &entry.output,
            Instant::now(),
        );
        if result.status == SessionStatus::Busy {
            self.schedule_recheck(id, entry);
        }

        if entry.session.set_status(result.status, &result.task) {
            debug!(
                "Session {} status: {:?}, task: {}",
                id, result.status, result.task
            );
            self.sink.emit(SessionEvent::Updated(entry.session.clone()));
        }

        self.sink.emit(SessionEvent::Output {
            session_id: id,
            data: chunk,
        });
    }

    /// Arrange for the busy state to be re-evaluated once the debounce
    /// interval has passed, replacing any pending recheck
    fn schedule_recheck(&self, id: Uuid, entry: &mut SessionEntry) {
        entry.cancel_recheck();

        let token = CancellationToken::new();
        entry.recheck = Some(token.clone());

        let manager = self.clone();
        let delay = self.rules.recheck_delay();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => manager.recheck(id, &token).await,
            }
        });
    }

    async fn recheck(&self, id: Uuid, token: &CancellationToken) {
        let mut sessions = self.sessions.lock().await;
        // Replaced or cancelled while waiting for the lock
        if token.is_cancelled() {
            return;
        }
        let Some(entry) = sessions.get_mut(&id) else {
            return;
        };
        entry.recheck = None;

        let result = classify(&self.rules, &mut entry.memory, "", &entry.output, Instant::now());
        if result.status == SessionStatus::Busy {
            self.schedule_recheck(id, entry);
        }

        if entry.session.set_status(result.status, &result.task) {
            debug!(
                "Session {} recheck: {:?}, task: {}",
                id, result.status, result.task
            );
            self.sink.emit(SessionEvent::Updated(entry.session.clone()));
        }
    }

    async fn handle_exit(&self, id: Uuid, exit: ProcessExit) {
        let mut sessions = self.sessions.lock().await;
        if let Some(mut entry) = sessions.remove(&id) {
            entry.cancel_recheck();
            info!(
                "Session {} exited ({:?}, code {:?}), removed from registry",
                id, exit.reason, exit.exit_code
            );
            self.sink.emit(SessionEvent::Deleted { session_id: id });
        }
    }

    /// Send input to a session; unknown ids are ignored
    pub async fn write(&self, id: Uuid, data: &[u8]) {
        let process = {
            let sessions = self.sessions.lock().await;
            sessions.get(&id).map(|entry| Arc::clone(&entry.process))
        };

        let Some(process) = process else {
            debug!("Ignoring input for unknown session {}", id);
            return;
        };

        if let Err(e) = process.write(data).await {
            warn!("Failed to write to session {}: {}", id, e);
        }
    }

    /// Resize a session's terminal; unknown ids are ignored
    pub async fn resize(&self, id: Uuid, cols: u16, rows: u16) {
        let sessions = self.sessions.lock().await;
        let Some(entry) = sessions.get(&id) else {
            debug!("Ignoring resize for unknown session {}", id);
            return;
        };

        match entry.process.resize(cols, rows) {
            Ok(true) => debug!("Session {} resized to {}x{}", id, cols, rows),
            Ok(false) => {}
            Err(e) => warn!("Failed to resize session {}: {}", id, e),
        }
    }

    /// Kill a session and remove it from the registry
    ///
    /// Returns `false` if the session was already gone.
    pub async fn delete(&self, id: Uuid) -> bool {
        let mut sessions = self.sessions.lock().await;
        let Some(mut entry) = sessions.remove(&id) else {
            debug!("Delete for unknown session {}", id);
            return false;
        };

        entry.cancel_recheck();
        entry.process.kill();
        self.sink.emit(SessionEvent::Deleted { session_id: id });

        info!("Session {} deleted", id);
        true
    }

    /// Kill every session. Used during shutdown.
    pub async fn destroy_all(&self) {
        let mut sessions = self.sessions.lock().await;
        info!("Destroying all sessions ({} total)", sessions.len());

        for (id, mut entry) in sessions.drain() {
            entry.cancel_recheck();
            entry.process.kill();
            self.sink.emit(SessionEvent::Deleted { session_id: id });
        }
    }

    /// Get a session snapshot
    pub async fn get(&self, id: Uuid) -> Option<Session> {
        let sessions = self.sessions.lock().await;
        sessions.get(&id).map(|entry| entry.session.clone())
    }

    /// List all sessions, oldest first
    pub async fn list(&self) -> Vec<Session> {
        let sessions = self.sessions.lock().await;
        let mut list: Vec<Session> = sessions.values().map(|e| e.session.clone()).collect();
        list.sort_by_key(|s| s.created_at);
        list
    }

    /// Buffered output of a session, concatenated; empty for unknown ids
    pub async fn history(&self, id: Uuid) -> String {
        let sessions = self.sessions.lock().await;
        sessions
            .get(&id)
            .map(|entry| entry.output.snapshot())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SummaryTarget for SessionManager {
    async fn transcript(&self, id: Uuid, max_chunks: usize) -> Option<Vec<String>> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(&id)
            .map(|entry| entry.output.recent(max_chunks).map(str::to_string).collect())
    }

    async fn apply_summary(&self, id: Uuid, summary: &Summary) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(&id) {
            Some(entry) => {
                entry.session.title = summary.title.clone();
                entry.session.summary = summary.summary.clone();
                self.sink.emit(SessionEvent::SummaryUpdated {
                    session_id: id,
                    summary: summary.summary.clone(),
                    title: summary.title.clone(),
                });
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::broadcast;
    use tokio::time::timeout;

    fn test_settings() -> SessionSettings {
        SessionSettings {
            shell: Some("/bin/sh".to_string()),
            launch_command: "cat".to_string(),
            ..SessionSettings::default()
        }
    }

    fn fast_rules() -> StatusRules {
        StatusRules {
            debounce_ms: 300,
            recheck_grace_ms: 50,
            ..StatusRules::default()
        }
    }

    fn manager_with(rules: StatusRules) -> (SessionManager, broadcast::Receiver<SessionEvent>) {
        let (tx, rx) = broadcast::channel(4096);
        let manager = SessionManager::new(test_settings(), rules, Arc::new(tx));
        (manager, rx)
    }

    fn manager() -> (SessionManager, broadcast::Receiver<SessionEvent>) {
        manager_with(StatusRules::default())
    }

    /// Wait for the first event matching `predicate`
    async fn next_matching(
        rx: &mut broadcast::Receiver<SessionEvent>,
        predicate: impl Fn(&SessionEvent) -> bool,
    ) -> Option<SessionEvent> {
        timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Ok(event) if predicate(&event) => return Some(event),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    /// Drain whatever arrives within `window`
    async fn drain(rx: &mut broadcast::Receiver<SessionEvent>, window: Duration) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(Ok(event)) = timeout(window, rx.recv()).await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_manager_new() {
        let (manager, _rx) = manager();
        assert_eq!(manager.session_count().await, 0);
        assert_eq!(manager.default_launch_command(), "cat");
        assert!(manager.list().await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_create_with_non_utf8_environment() {
        use std::ffi::OsString;
        use std::os::unix::ffi::OsStringExt;

        let key = "CLAUDE_MANAGER_TEST_NON_UTF8_CREATE";
        std::env::set_var(key, OsString::from_vec(vec![0x66, 0xff, 0x6f]));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_string_lossy().to_string();
        let (manager, _rx) = manager();
        let result = manager.create(&path, None).await;
        std::env::remove_var(key);

        let session = result.unwrap();
        assert_eq!(manager.session_count().await, 1);
        assert!(manager.delete(session.id).await);
    }

    #[tokio::test]
    async fn test_create_invalid_path_leaves_no_state() {
        let (manager, mut rx) = manager();
        let result = manager
            .create("/nonexistent/path/that/does/not/exist", None)
            .await;

        assert!(matches!(
            result,
            Err(SessionError::Spawn(PtyError::InvalidDirectory(_)))
        ));
        assert_eq!(manager.session_count().await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_create_write_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_string_lossy().to_string();
        let (manager, mut rx) = manager();

        let session = manager.create(&path, None).await.unwrap();
        assert_eq!(session.launch_command, "cat");
        assert_eq!(
            session.display_name,
            dir.path().file_name().unwrap().to_string_lossy()
        );

        let created = rx.recv().await.unwrap();
        assert_eq!(created, SessionEvent::Created(session.clone()));

        manager.write(session.id, b"hello bridge\n").await;
        let output = next_matching(&mut rx, |e| {
            matches!(e, SessionEvent::Output { data, .. } if data.contains("hello bridge"))
        })
        .await;
        assert!(output.is_some());
        assert!(manager.history(session.id).await.contains("hello bridge"));

        let listed = manager.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, session.id);

        manager.destroy_all().await;
    }

    #[tokio::test]
    async fn test_explicit_launch_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_string_lossy().to_string();
        let (manager, mut rx) = manager();

        let session = manager
            .create(&path, Some("echo custom-command; sleep 30"))
            .await
            .unwrap();
        assert_eq!(session.launch_command, "echo custom-command; sleep 30");

        let output = next_matching(&mut rx, |e| {
            matches!(e, SessionEvent::Output { data, .. } if data.contains("custom-command"))
        })
        .await;
        assert!(output.is_some());

        manager.destroy_all().await;
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_string_lossy().to_string();
        let (manager, mut rx) = manager();

        let session = manager.create(&path, None).await.unwrap();
        assert!(manager.delete(session.id).await);
        assert!(!manager.delete(session.id).await);
        assert_eq!(manager.session_count().await, 0);

        // Input and resize after deletion are silent no-ops
        manager.write(session.id, b"ignored\n").await;
        manager.resize(session.id, 100, 30).await;

        let events = drain(&mut rx, Duration::from_millis(500)).await;
        let deleted = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::Deleted { session_id } if *session_id == session.id))
            .count();
        assert_eq!(deleted, 1);
        assert!(manager.get(session.id).await.is_none());
        assert_eq!(manager.history(session.id).await, "");
    }

    #[tokio::test]
    async fn test_process_exit_removes_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_string_lossy().to_string();
        let (manager, mut rx) = manager();

        let session = manager.create(&path, Some("echo bye")).await.unwrap();
        let deleted = next_matching(&mut rx, |e| {
            matches!(e, SessionEvent::Deleted { session_id } if *session_id == session.id)
        })
        .await;

        assert!(deleted.is_some());
        assert_eq!(manager.session_count().await, 0);
        assert!(!manager.delete(session.id).await);
    }

    #[tokio::test]
    async fn test_spinner_output_goes_busy_then_idle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_string_lossy().to_string();
        let (manager, mut rx) = manager_with(fast_rules());

        let session = manager
            .create(&path, Some("printf '✻ Read file.ts\\n'; sleep 30"))
            .await
            .unwrap();

        let busy = next_matching(&mut rx, |e| {
            matches!(e, SessionEvent::Updated(s) if s.status == SessionStatus::Busy)
        })
        .await;
        match busy {
            Some(SessionEvent::Updated(s)) => assert_eq!(s.current_task, "reading files"),
            other => panic!("expected busy update, got {other:?}"),
        }

        let started = Instant::now();
        let idle = next_matching(&mut rx, |e| {
            matches!(e, SessionEvent::Updated(s) if s.status == SessionStatus::Idle)
        })
        .await;
        match idle {
            Some(SessionEvent::Updated(s)) => assert_eq!(s.current_task, "idle"),
            other => panic!("expected idle update, got {other:?}"),
        }
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(
            manager.get(session.id).await.map(|s| s.status),
            Some(SessionStatus::Idle)
        );

        manager.destroy_all().await;
    }

    #[tokio::test]
    async fn test_prompt_output_goes_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_string_lossy().to_string();
        let (manager, mut rx) = manager_with(fast_rules());

        let session = manager
            .create(&path, Some("printf 'Apply changes? (y/n) '; sleep 30"))
            .await
            .unwrap();

        let waiting = next_matching(&mut rx, |e| {
            matches!(e, SessionEvent::Updated(s) if s.status == SessionStatus::Waiting)
        })
        .await;
        match waiting {
            Some(SessionEvent::Updated(s)) => {
                assert_eq!(s.id, session.id);
                assert_eq!(s.current_task, "awaiting input");
            }
            other => panic!("expected waiting update, got {other:?}"),
        }

        manager.destroy_all().await;
    }

    #[tokio::test]
    async fn test_delete_cancels_pending_recheck() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_string_lossy().to_string();
        let (manager, mut rx) = manager_with(fast_rules());

        let session = manager
            .create(&path, Some("printf '✻ Thinking\\n'; sleep 30"))
            .await
            .unwrap();
        next_matching(&mut rx, |e| {
            matches!(e, SessionEvent::Updated(s) if s.status == SessionStatus::Busy)
        })
        .await
        .expect("busy update");

        manager.delete(session.id).await;
        let events = drain(&mut rx, Duration::from_millis(800)).await;
        assert!(!events
            .iter()
            .any(|e| matches!(e, SessionEvent::Updated(s) if s.id == session.id)));
    }

    #[tokio::test]
    async fn test_destroy_all() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_string_lossy().to_string();
        let (manager, mut rx) = manager();

        let first = manager.create(&path, None).await.unwrap();
        let second = manager.create(&path, None).await.unwrap();
        assert_eq!(manager.session_count().await, 2);

        manager.destroy_all().await;
        assert_eq!(manager.session_count().await, 0);

        let events = drain(&mut rx, Duration::from_millis(500)).await;
        for id in [first.id, second.id] {
            let deleted = events
                .iter()
                .filter(|e| matches!(e, SessionEvent::Deleted { session_id } if *session_id == id))
                .count();
            assert_eq!(deleted, 1);
        }
    }

    #[tokio::test]
    async fn test_summary_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_string_lossy().to_string();
        let (manager, mut rx) = manager();

        let session = manager.create(&path, None).await.unwrap();
        manager.write(session.id, b"some work\n").await;
        next_matching(&mut rx, |e| {
            matches!(e, SessionEvent::Output { data, .. } if data.contains("some work"))
        })
        .await
        .expect("echoed output");

        let transcript = manager.transcript(session.id, 100).await.unwrap();
        assert!(transcript.concat().contains("some work"));

        let summary = Summary::new("Refactor", "Working on the parser");
        assert!(manager.apply_summary(session.id, &summary).await);
        let updated = manager.get(session.id).await.unwrap();
        assert_eq!(updated.title, "Refactor");
        assert_eq!(updated.summary, "Working on the parser");
        let announced = next_matching(&mut rx, |e| matches!(e, SessionEvent::SummaryUpdated { .. })).await;
        assert_eq!(
            announced,
            Some(SessionEvent::SummaryUpdated {
                session_id: session.id,
                summary: "Working on the parser".to_string(),
                title: "Refactor".to_string(),
            })
        );

        let unknown = Uuid::new_v4();
        assert!(manager.transcript(unknown, 100).await.is_none());
        assert!(!manager.apply_summary(unknown, &summary).await);

        manager.destroy_all().await;
    }

    #[tokio::test]
    async fn test_unknown_session_operations_are_noops() {
        let (manager, mut rx) = manager();
        let id = Uuid::new_v4();

        manager.write(id, b"data").await;
        manager.resize(id, 120, 40).await;
        assert!(!manager.delete(id).await);
        assert_eq!(manager.history(id).await, "");
        assert!(rx.try_recv().is_err());
    }
}
