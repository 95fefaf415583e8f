//! PTY process management
//!
//! Handles spawning the session command inside a login shell with PTY
//! terminal emulation, including:
//! - Configurable terminal size
//! - Incremental UTF-8 output streaming
//! - Terminal resize support
//! - Idempotent kill and cleanup on drop

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::env::{default_shell, shell_environment};

/// Capacity of the per-process output channel
const OUTPUT_CHANNEL_CAPACITY: usize = 1024;

/// Errors that can occur during PTY operations
#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Invalid working directory: {0}")]
    InvalidDirectory(String),

    #[error("Failed to open PTY: {0}")]
    OpenFailed(String),

    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("Failed to write to PTY: {0}")]
    WriteFailed(String),

    #[error("Failed to resize PTY: {0}")]
    ResizeFailed(String),

    #[error("PTY system error: {0}")]
    SystemError(String),
}

/// Result type for PTY operations
pub type PtyResult<T> = Result<T, PtyError>;

/// Terminal size configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

impl TerminalSize {
    /// Create a new terminal size
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Convert to portable-pty PtySize
    fn to_pty_size(self) -> PtySize {
        PtySize {
            rows: self.rows,
            cols: self.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

/// Everything needed to start a session process
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Shell that runs the launch command as a login shell
    pub shell: String,
    /// Command line passed to `shell -l -c`
    pub command: String,
    /// Working directory for the process
    pub working_dir: PathBuf,
    /// Full environment of the child
    pub env: HashMap<String, String>,
    /// Initial terminal size
    pub size: TerminalSize,
}

impl SpawnOptions {
    /// Options with the default shell, the augmented environment and 80x24
    pub fn new(command: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            shell: default_shell(),
            command: command.into(),
            working_dir: working_dir.into(),
            env: shell_environment(),
            size: TerminalSize::default(),
        }
    }

    /// Override the shell
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Set the initial terminal size
    pub fn with_size(mut self, size: TerminalSize) -> Self {
        self.size = size;
        self
    }

    /// Add or replace one environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Event emitted by a running process
#[derive(Debug, Clone, PartialEq)]
pub enum PtyEvent {
    /// A chunk of terminal output, in the order it was produced
    Output(String),
    /// The process exited; always the last event
    Exited(ProcessExit),
}

/// Event emitted when a process exits
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessExit {
    /// Exit code if available
    pub exit_code: Option<u32>,
    /// Exit reason
    pub reason: ExitReason,
}

/// Reason for process exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Process exited on its own
    Normal,
    /// Process was killed by request
    Killed,
    /// Exit status could not be collected
    Unknown,
}

/// Handle to a running PTY process
pub struct PtyProcess {
    /// OS process id, when the platform reports one
    pid: Option<u32>,
    /// The master PTY handle
    master: Mutex<Box<dyn MasterPty + Send>>,
    /// Writer for sending input
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    /// Handle used to terminate the child
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    /// Current terminal size
    size: Mutex<TerminalSize>,
    /// Set by the reader thread once the child has been reaped
    exited: Arc<AtomicBool>,
    /// Set on the first kill request
    killed: Arc<AtomicBool>,
}

impl PtyProcess {
    /// Spawn the configured command in a login shell attached to a new PTY
    ///
    /// Returns the handle together with the receiving end of its event
    /// stream: zero or more `Output` chunks followed by exactly one `Exited`.
    pub fn spawn(options: SpawnOptions) -> PtyResult<(Self, mpsc::Receiver<PtyEvent>)> {
        validate_working_dir(&options.working_dir)?;

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(options.size.to_pty_size())
            .map_err(|e| PtyError::OpenFailed(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&options.shell);
        cmd.args(["-l", "-c", options.command.as_str()]);
        cmd.cwd(&options.working_dir);
        cmd.env_clear();
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;

        // The child holds its own copy of the slave side
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::SystemError(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::SystemError(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let exited = Arc::new(AtomicBool::new(false));
        let killed = Arc::new(AtomicBool::new(false));

        let exited_clone = Arc::clone(&exited);
        let killed_clone = Arc::clone(&killed);
        std::thread::Builder::new()
            .name(format!("pty-reader-{}", pid.unwrap_or_default()))
            .spawn(move || reader_loop(reader, child, event_tx, exited_clone, killed_clone))
            .map_err(|e| PtyError::SystemError(e.to_string()))?;

        debug!(
            "Spawned `{}` in {} (pid {:?})",
            options.command,
            options.working_dir.display(),
            pid
        );

        Ok((
            Self {
                pid,
                master: Mutex::new(pair.master),
                writer: Arc::new(Mutex::new(writer)),
                killer: Mutex::new(killer),
                size: Mutex::new(options.size),
                exited,
                killed,
            },
            event_rx,
        ))
    }

    /// Get the OS process id
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Get the current terminal size
    pub fn size(&self) -> TerminalSize {
        *lock(&self.size)
    }

    /// Check if the process has exited
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Write input to the PTY (stdin)
    ///
    /// Writing to a process that has already exited is a no-op.
    pub async fn write(&self, data: &[u8]) -> PtyResult<()> {
        if self.has_exited() || self.killed.load(Ordering::SeqCst) {
            return Ok(());
        }

        let writer = Arc::clone(&self.writer);
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut writer = lock(&writer);
            writer.write_all(&data)?;
            writer.flush()
        })
        .await
        .map_err(|e| PtyError::SystemError(e.to_string()))?
        .map_err(|e| PtyError::WriteFailed(e.to_string()))
    }

    /// Resize the terminal
    ///
    /// Returns `false` when nothing was done because the size is unchanged or
    /// the process is gone.
    pub fn resize(&self, cols: u16, rows: u16) -> PtyResult<bool> {
        if self.has_exited() {
            return Ok(false);
        }

        let new_size = TerminalSize::new(cols, rows);
        let mut size = lock(&self.size);
        if *size == new_size {
            return Ok(false);
        }

        lock(&self.master)
            .resize(new_size.to_pty_size())
            .map_err(|e| PtyError::ResizeFailed(e.to_string()))?;
        *size = new_size;

        Ok(true)
    }

    /// Kill the process; safe to call any number of times
    pub fn kill(&self) {
        if self.killed.swap(true, Ordering::SeqCst) || self.has_exited() {
            return;
        }

        if let Err(e) = lock(&self.killer).kill() {
            debug!("Kill for pid {:?} failed (already gone?): {}", self.pid, e);
        }
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Reader loop that runs in a dedicated thread and owns the child
fn reader_loop(
    mut reader: Box<dyn Read + Send>,
    mut child: Box<dyn Child + Send + Sync>,
    events: mpsc::Sender<PtyEvent>,
    exited: Arc<AtomicBool>,
    killed: Arc<AtomicBool>,
) {
    let mut buffer = [0u8; 4096];
    let mut decoder = Utf8Decoder::default();
    let mut receiver_gone = false;

    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.decode(&buffer[..n]);
                if !text.is_empty() && events.blocking_send(PtyEvent::Output(text)).is_err() {
                    receiver_gone = true;
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(std::time::Duration::from_millis(10));
            }
            // EIO once the slave side closes; treat like EOF
            Err(e) => {
                debug!("PTY read ended: {}", e);
                break;
            }
        }
    }

    if receiver_gone {
        // Nobody is listening anymore, make sure wait() below returns
        if let Err(e) = child.kill() {
            debug!("Kill after receiver drop failed: {}", e);
        }
    } else {
        let tail = decoder.finish();
        if !tail.is_empty() {
            let _ = events.blocking_send(PtyEvent::Output(tail));
        }
    }

    let status = child.wait();
    exited.store(true, Ordering::SeqCst);

    let exit = match status {
        Ok(status) => ProcessExit {
            exit_code: Some(status.exit_code()),
            reason: if killed.load(Ordering::SeqCst) {
                ExitReason::Killed
            } else {
                ExitReason::Normal
            },
        },
        Err(e) => {
            warn!("Failed to collect exit status: {}", e);
            ProcessExit {
                exit_code: None,
                reason: ExitReason::Unknown,
            }
        }
    };

    let _ = events.blocking_send(PtyEvent::Exited(exit));
}

fn validate_working_dir(path: &Path) -> PtyResult<()> {
    if !path.exists() {
        return Err(PtyError::InvalidDirectory(format!(
            "{} does not exist",
            path.display()
        )));
    }
    if !path.is_dir() {
        return Err(PtyError::InvalidDirectory(format!(
            "{} is not a directory",
            path.display()
        )));
    }
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Incremental UTF-8 decoder that holds back incomplete trailing sequences
/// until the next read completes them.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        let mut data = std::mem::take(&mut self.pending);
        data.extend_from_slice(bytes);

        let mut out = String::with_capacity(data.len());
        let mut rest = data.as_slice();

        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    if let Ok(text) = std::str::from_utf8(valid) {
                        out.push_str(text);
                    }
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        self.pending = rest.to_vec();
        out
    }

    fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}
