//! Local persistence: a small key-value store for the auth token and cached
//! exercise lists, plus a directory of saved session summaries.

use crate::model::{Exercise, SessionReport, SessionSummary};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

pub const TOKEN_KEY: &str = "token";
const APP_DIR: &str = "workout-runner";

/// Storage port handed to the components that need persisted preferences.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// JSON object on disk, rewritten on every change.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("read {}", path.display()))?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// `<config_dir>/workout-runner/store.json`
    pub fn open_default() -> Result<Self> {
        let dir = dirs::config_dir()
            .context("no config directory on this platform")?
            .join(APP_DIR);
        Self::open(dir.join("store.json"))
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)
            .with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace {}", self.path.display()))?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = lock(&self.entries);
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = lock(&self.entries);
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

fn exercises_key(workout_id: i64) -> String {
    format!("exercises:{workout_id}")
}

pub fn cache_exercises(
    store: &dyn KeyValueStore,
    workout_id: i64,
    exercises: &[Exercise],
) -> Result<()> {
    let json = serde_json::to_string(exercises)?;
    store.set(&exercises_key(workout_id), &json)
}

pub fn cached_exercises(store: &dyn KeyValueStore, workout_id: i64) -> Option<Vec<Exercise>> {
    let raw = store.get(&exercises_key(workout_id))?;
    match serde_json::from_str(&raw) {
        Ok(list) => Some(list),
        Err(e) => {
            warn!(workout_id, error = %e, "dropping unreadable exercise cache entry");
            None
        }
    }
}

/// Read an exercise list from a local JSON file.
pub fn load_exercises_file(path: &Path) -> Result<Vec<Exercise>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse exercises in {}", path.display()))
}

pub fn sessions_dir() -> Result<PathBuf> {
    Ok(dirs::data_dir()
        .context("no data directory on this platform")?
        .join(APP_DIR)
        .join("sessions"))
}

pub fn default_log_path() -> Result<PathBuf> {
    Ok(dirs::data_dir()
        .context("no data directory on this platform")?
        .join(APP_DIR)
        .join("workout-runner.log"))
}

fn session_file_name(summary: &SessionSummary) -> String {
    format!(
        "session-{}-{}.json",
        summary.timestamp_utc.replace(':', "-"),
        summary.session_id
    )
}

pub fn save_session(summary: &SessionSummary) -> Result<PathBuf> {
    save_session_in(&sessions_dir()?, summary)
}

pub fn save_session_in(dir: &Path, summary: &SessionSummary) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(session_file_name(summary));
    std::fs::write(&path, serde_json::to_vec_pretty(summary)?)
        .with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

/// Most recent saved sessions, newest first.
pub fn load_recent(limit: usize) -> Result<Vec<SessionSummary>> {
    load_recent_in(&sessions_dir()?, limit)
}

pub fn load_recent_in(dir: &Path, limit: usize) -> Result<Vec<SessionSummary>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("list {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension().is_some_and(|ext| ext == "json")
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("session-"))
        })
        .collect();
    files.sort();
    files.reverse();

    let mut out = Vec::new();
    for path in files {
        if out.len() >= limit {
            break;
        }
        let parsed = std::fs::read(&path)
            .map_err(anyhow::Error::from)
            .and_then(|b| serde_json::from_slice::<SessionSummary>(&b).map_err(Into::into));
        match parsed {
            Ok(s) => out.push(s),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable session file"),
        }
    }
    Ok(out)
}

pub fn export_json(path: &Path, report: &SessionReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report)?;
    std::fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
