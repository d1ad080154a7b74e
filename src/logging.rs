//! Subscriber setup. `RUST_LOG` wins over `--log-level` when set.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Where log lines go for the selected output mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    /// Full-screen UI owns the terminal, so logs go to a file.
    File(PathBuf),
}

impl LogTarget {
    pub fn for_mode(tui: bool, log_file: Option<&Path>) -> Result<Self> {
        if let Some(p) = log_file {
            return Ok(Self::File(p.to_path_buf()));
        }
        if tui {
            Ok(Self::File(crate::storage::default_log_path()?))
        } else {
            Ok(Self::Stderr)
        }
    }
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"))
}

pub fn init(level: &str, target: &LogTarget) -> Result<()> {
    let filter = env_filter(level);
    let res = match target {
        LogTarget::Stderr => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init(),
        LogTarget::File(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .try_init()
        }
    };
    res.map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_log_file_wins_in_every_mode() {
        let p = Path::new("/tmp/run.log");
        assert_eq!(
            LogTarget::for_mode(false, Some(p)).unwrap(),
            LogTarget::File(p.to_path_buf())
        );
        assert_eq!(
            LogTarget::for_mode(true, Some(p)).unwrap(),
            LogTarget::File(p.to_path_buf())
        );
    }

    #[test]
    fn headless_modes_log_to_stderr() {
        assert_eq!(LogTarget::for_mode(false, None).unwrap(), LogTarget::Stderr);
    }
}
