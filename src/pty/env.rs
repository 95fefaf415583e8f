//! Child process environment
//!
//! Processes launched from a desktop shell often inherit a minimal `PATH` that
//! does not contain the directories where the CLI is installed. The spawn
//! environment is therefore the parent's environment with the platform's
//! standard binary directories prepended to `PATH`.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use tracing::debug;

/// Terminal type advertised to the child
pub const TERM: &str = "xterm-256color";

/// Standard binary directories for the current platform
pub fn standard_bin_dirs() -> Vec<String> {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
    let local_bin = home.join(".local").join("bin").display().to_string();

    let mut paths: Vec<String> = ["/usr/local/bin", "/usr/bin", "/bin", "/usr/sbin", "/sbin"]
        .iter()
        .map(|p| p.to_string())
        .collect();

    if cfg!(target_os = "macos") {
        paths.push("/opt/homebrew/bin".to_string());
        paths.push(local_bin);
        paths.push("/usr/local/opt/node/bin".to_string());
    } else {
        paths.push(local_bin);
    }

    paths
}

/// Merge `extra` in front of an existing `PATH` value, dropping duplicates
/// and empty entries while keeping the first occurrence.
pub fn augment_path(current: Option<&str>, extra: &[String]) -> String {
    let mut seen = HashSet::new();
    let inherited = current.unwrap_or_default().split(':');

    extra
        .iter()
        .map(String::as_str)
        .chain(inherited)
        .filter(|entry| !entry.is_empty())
        .filter(|entry| seen.insert(*entry))
        .collect::<Vec<_>>()
        .join(":")
}

/// Build the environment for a spawned session process
///
/// Variables whose name or value is not valid UTF-8 are left out.
pub fn shell_environment() -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars_os()
        .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => Some((key, value)),
            (key, _) => {
                debug!("Skipping non UTF-8 environment variable {:?}", key);
                None
            }
        })
        .collect();
    let path = augment_path(env.get("PATH").map(String::as_str), &standard_bin_dirs());
    env.insert("PATH".to_string(), path);
    env.insert("TERM".to_string(), TERM.to_string());
    env
}

/// Shell used to run the launch command when none is configured
pub fn default_shell() -> String {
    if let Ok(shell) = std::env::var("SHELL") {
        if !shell.is_empty() {
            return shell;
        }
    }

    if cfg!(target_os = "macos") {
        "/bin/zsh".to_string()
    } else {
        "/bin/bash".to_string()
    }
}
