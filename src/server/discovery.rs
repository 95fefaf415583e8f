//! Host probes for the dashboard
//!
//! Directory browsing for picking a session's working directory, and a check
//! that the launch command is installed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use super::protocol::DirectoryEntry;
use crate::pty::{default_shell, shell_environment};

/// How long `<command> --version` may take
pub const CLI_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur while listing a directory
#[derive(Error, Debug)]
pub enum BrowseError {
    #[error("Path does not exist: {0}")]
    NotFound(String),
    #[error("Not a directory: {0}")]
    NotADirectory(String),
    #[error("Failed to read directory: {0}")]
    Read(#[from] std::io::Error),
    #[error("No home directory available")]
    NoHome,
}

/// A listed directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryListing {
    pub current_path: String,
    pub parent_path: Option<String>,
    pub items: Vec<DirectoryEntry>,
}

/// List the non-hidden subdirectories of `path` (home when `None`)
///
/// Git repositories come first, then everything by name.
pub fn browse_directory(path: Option<&str>) -> Result<DirectoryListing, BrowseError> {
    let dir = match path {
        Some(p) => PathBuf::from(p),
        None => dirs::home_dir().ok_or(BrowseError::NoHome)?,
    };

    if !dir.exists() {
        return Err(BrowseError::NotFound(dir.display().to_string()));
    }
    if !dir.is_dir() {
        return Err(BrowseError::NotADirectory(dir.display().to_string()));
    }

    let mut items = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let Ok(entry) = entry else { continue };
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }

        // Follows symlinks; broken links are skipped
        let full_path = entry.path();
        if !full_path.is_dir() {
            continue;
        }

        items.push(DirectoryEntry {
            is_git_repo: is_git_repo(&full_path),
            path: full_path.display().to_string(),
            name,
        });
    }

    items.sort_by(|a, b| b.is_git_repo.cmp(&a.is_git_repo).then_with(|| a.name.cmp(&b.name)));

    Ok(DirectoryListing {
        current_path: dir.display().to_string(),
        parent_path: dir.parent().map(|p| p.display().to_string()),
        items,
    })
}

fn is_git_repo(path: &Path) -> bool {
    path.join(".git").exists()
}

/// Result of probing the launch command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliStatus {
    pub installed: bool,
    pub version: Option<String>,
}

/// Run `<program> --version` in a login shell
///
/// Only the program name (first word) of `launch_command` is probed.
pub async fn check_cli(shell: Option<&str>, launch_command: &str) -> CliStatus {
    let not_installed = CliStatus {
        installed: false,
        version: None,
    };

    let Some(program) = launch_command.split_whitespace().next() else {
        return not_installed;
    };

    let shell = shell.map(str::to_string).unwrap_or_else(default_shell);
    let probe = format!("{program} --version");
    let mut command = Command::new(&shell);
    command
        .args(["-l", "-c", probe.as_str()])
        .env_clear()
        .envs(shell_environment())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(CLI_CHECK_TIMEOUT, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            debug!("Failed to run `{} --version`: {}", program, e);
            return not_installed;
        }
        Err(_) => {
            debug!("`{} --version` timed out", program);
            return not_installed;
        }
    };

    if !output.status.success() {
        return not_installed;
    }

    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    CliStatus {
        installed: true,
        version: (!version.is_empty()).then_some(version),
    }
}

/// Run `node --version` in a login shell
pub async fn check_node(shell: Option<&str>) -> CliStatus {
    check_cli(shell, "node").await
}
