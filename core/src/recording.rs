//! Recording writer (spec.md §4.7): a `{log, timing, metadata}` triple per
//! session, written synchronously from the PTY reader thread so a crash
//! leaves a valid prefix. `metadata.json` is rewritten atomically (write to
//! `.tmp`, then rename) at the points spec.md §4.7 names, following the same
//! atomic-write idiom the teacher uses for `projects.json`.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RecordingError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub uuid: Uuid,
    pub name: Option<String>,
    pub agent: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub command: String,
    pub max_rows: u16,
    pub max_cols: u16,
    pub kept_at: Option<DateTime<Utc>>,
    pub visitors: Vec<String>,
}

fn log_path(root: &Path, uid: Uuid) -> PathBuf {
    root.join(format!("session-{uid}.log"))
}

fn timing_path(root: &Path, uid: Uuid) -> PathBuf {
    root.join(format!("session-{uid}.timing"))
}

fn metadata_path(root: &Path, uid: Uuid) -> PathBuf {
    root.join(format!("session-{uid}.metadata.json"))
}

struct AppendState {
    log: Option<std::fs::File>,
    timing: Option<std::fs::File>,
    last_write: Option<Instant>,
}

/// One session's recording. Cheap to construct (no files are opened until
/// the first PTY read, per spec.md §4.7); `metadata.json` is written
/// immediately so the recording is listable even before any output arrives.
pub struct Recording {
    pub uid: Uuid,
    root: PathBuf,
    append: Mutex<AppendState>,
    metadata: Mutex<RecordingMetadata>,
}

impl Recording {
    pub fn create(
        root: &Path,
        uid: Uuid,
        name: Option<String>,
        agent: String,
        command: String,
        initial_size: (u16, u16),
    ) -> Result<Self, RecordingError> {
        std::fs::create_dir_all(root).map_err(|source| RecordingError::Create {
            path: root.display().to_string(),
            source,
        })?;
        let metadata = RecordingMetadata {
            uuid: uid,
            name,
            agent,
            started_at: Utc::now(),
            ended_at: None,
            command,
            max_rows: initial_size.0,
            max_cols: initial_size.1,
            kept_at: None,
            visitors: Vec::new(),
        };
        let rec = Recording {
            uid,
            root: root.to_path_buf(),
            append: Mutex::new(AppendState { log: None, timing: None, last_write: None }),
            metadata: Mutex::new(metadata),
        };
        rec.write_metadata()?;
        Ok(rec)
    }

    fn write_metadata(&self) -> Result<(), RecordingError> {
        let metadata = self.metadata.lock().expect("metadata mutex").clone();
        let path = metadata_path(&self.root, self.uid);
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(&metadata).map_err(RecordingError::Metadata)?;
        std::fs::write(&tmp, data).map_err(|source| RecordingError::Create {
            path: tmp.display().to_string(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(|source| RecordingError::Create {
            path: path.display().to_string(),
            source,
        })?;
        Ok(())
    }

    /// Append PTY output bytes: raw bytes to `.log`, a `"<delta> <n>\n"` line
    /// to `.timing`. Opens both files lazily on first call (`O_APPEND`, so a
    /// crash mid-write leaves a valid prefix per spec.md §4.7).
    pub fn append(&self, bytes: &[u8], current_size: (u16, u16)) -> Result<(), RecordingError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let mut state = self.append.lock().expect("append state mutex");
        if state.log.is_none() {
            let f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path(&self.root, self.uid))
                .map_err(|source| RecordingError::Create {
                    path: log_path(&self.root, self.uid).display().to_string(),
                    source,
                })?;
            state.log = Some(f);
        }
        if state.timing.is_none() {
            let f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(timing_path(&self.root, self.uid))
                .map_err(|source| RecordingError::Create {
                    path: timing_path(&self.root, self.uid).display().to_string(),
                    source,
                })?;
            state.timing = Some(f);
        }

        let now = Instant::now();
        let delta = state.last_write.map(|p| now.duration_since(p)).unwrap_or_default();
        state.last_write = Some(now);

        state
            .log
            .as_mut()
            .expect("log file opened above")
            .write_all(bytes)
            .map_err(RecordingError::Write)?;
        let line = format!("{:.6} {}\n", delta.as_secs_f64(), bytes.len());
        state
            .timing
            .as_mut()
            .expect("timing file opened above")
            .write_all(line.as_bytes())
            .map_err(RecordingError::Write)?;

        let (rows, cols) = current_size;
        let mut meta = self.metadata.lock().expect("metadata mutex");
        let grew = rows > meta.max_rows || cols > meta.max_cols;
        meta.max_rows = meta.max_rows.max(rows);
        meta.max_cols = meta.max_cols.max(cols);
        drop(meta);
        if grew {
            self.write_metadata()?;
        }
        Ok(())
    }

    pub fn add_visitor(&self, name: &str) -> Result<(), RecordingError> {
        {
            let mut meta = self.metadata.lock().expect("metadata mutex");
            if meta.visitors.iter().any(|v| v == name) {
                return Ok(());
            }
            meta.visitors.push(name.to_string());
        }
        self.write_metadata()
    }

    pub fn set_command(&self, command: String) -> Result<(), RecordingError> {
        {
            let mut meta = self.metadata.lock().expect("metadata mutex");
            meta.command = command;
        }
        self.write_metadata()
    }

    /// Pin the recording so the sweeper never deletes it (spec.md §4.7,
    /// §8 property 7). Idempotent.
    pub fn keep(&self) -> Result<(), RecordingError> {
        {
            let mut meta = self.metadata.lock().expect("metadata mutex");
            if meta.kept_at.is_some() {
                return Ok(());
            }
            meta.kept_at = Some(Utc::now());
        }
        self.write_metadata()
    }

    pub fn close(&self) -> Result<(), RecordingError> {
        {
            let mut meta = self.metadata.lock().expect("metadata mutex");
            meta.ended_at = Some(Utc::now());
        }
        self.write_metadata()
    }

    pub fn metadata(&self) -> RecordingMetadata {
        self.metadata.lock().expect("metadata mutex").clone()
    }
}

/// Read a persisted recording's metadata from disk (used by the REST API and
/// the sweeper, which do not hold a live `Recording` handle).
pub fn read_metadata(root: &Path, uid: Uuid) -> Option<RecordingMetadata> {
    let data = std::fs::read_to_string(metadata_path(root, uid)).ok()?;
    serde_json::from_str(&data).ok()
}

/// List every recording under `root` by scanning `*.metadata.json` files.
pub fn list_all(root: &Path) -> Vec<RecordingMetadata> {
    let Ok(entries) = std::fs::read_dir(root) else { return Vec::new() };
    let mut out = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        if !name.ends_with(".metadata.json") {
            continue;
        }
        if let Ok(data) = std::fs::read_to_string(&path) {
            if let Ok(meta) = serde_json::from_str::<RecordingMetadata>(&data) {
                out.push(meta);
            }
        }
    }
    out
}

pub fn recording_files(root: &Path, uid: Uuid) -> (PathBuf, PathBuf, PathBuf) {
    (log_path(root, uid), timing_path(root, uid), metadata_path(root, uid))
}

/// Delete a recording's three files. Idempotent (missing files are ignored).
pub fn delete(root: &Path, uid: Uuid) -> std::io::Result<()> {
    for path in [log_path(root, uid), timing_path(root, uid), metadata_path(root, uid)] {
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Sweep unpinned, not-in-use recordings for one assistant: keep at most
/// `max_per_agent`, oldest (by `ended_at` then file mtime) deleted first, and
/// delete anything older than `max_age` regardless of count (spec.md §4.7,
/// §8 property 7, seed test 6). `in_use` reports whether a recording's
/// session is still `Running` (excluded from sweeping entirely).
pub fn sweep(
    root: &Path,
    agent: &str,
    max_per_agent: usize,
    max_age: std::time::Duration,
    in_use: impl Fn(Uuid) -> bool,
) -> Vec<Uuid> {
    let now = Utc::now();
    let all_for_agent: Vec<RecordingMetadata> = list_all(root).into_iter().filter(|m| m.agent == agent).collect();
    let pinned_count = all_for_agent.iter().filter(|m| m.kept_at.is_some()).count();
    // Pinned recordings still occupy a slot in the retention budget, so the
    // unpinned population is only allowed to fill whatever's left of it.
    let unpinned_budget = max_per_agent.saturating_sub(pinned_count);

    let mut candidates: Vec<RecordingMetadata> = all_for_agent
        .into_iter()
        .filter(|m| m.kept_at.is_none())
        .filter(|m| !in_use(m.uuid))
        .collect();

    // Oldest-first by ended_at (None sorts as "never ended", i.e. newest).
    candidates.sort_by_key(|m| m.ended_at.unwrap_or(DateTime::<Utc>::MAX_UTC));

    let mut deleted = Vec::new();
    let max_age_chrono = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);

    for (idx, meta) in candidates.iter().enumerate() {
        let too_old = meta
            .ended_at
            .map(|ended| now.signed_duration_since(ended) > max_age_chrono)
            .unwrap_or(false);
        let over_count = candidates.len() - idx > unpinned_budget;
        if too_old || over_count {
            if delete(root, meta.uuid).is_ok() {
                deleted.push(meta.uuid);
            }
        }
    }
    deleted
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_creates_files_lazily_and_matches_timing_sum() {
        let dir = tempdir().unwrap();
        let uid = Uuid::new_v4();
        let rec = Recording::create(dir.path(), uid, None, "shell".into(), "bash".into(), (24, 80)).unwrap();
        rec.append(b"hello", (24, 80)).unwrap();
        rec.append(b" world", (24, 80)).unwrap();

        let (log, timing, _meta) = recording_files(dir.path(), uid);
        let log_bytes = std::fs::read(&log).unwrap();
        assert_eq!(log_bytes, b"hello world");

        let timing_text = std::fs::read_to_string(&timing).unwrap();
        let total: usize = timing_text
            .lines()
            .map(|l| l.split_whitespace().nth(1).unwrap().parse::<usize>().unwrap())
            .sum();
        assert_eq!(total, log_bytes.len());
    }

    #[test]
    fn keep_is_idempotent_and_pins_against_sweep() {
        let dir = tempdir().unwrap();
        let uid = Uuid::new_v4();
        let rec = Recording::create(dir.path(), uid, None, "claude".into(), "claude".into(), (24, 80)).unwrap();
        rec.keep().unwrap();
        let first = rec.metadata().kept_at.unwrap();
        rec.keep().unwrap();
        assert_eq!(rec.metadata().kept_at.unwrap(), first);
    }

    #[test]
    fn sweep_keeps_pinned_and_newest_unpinned() {
        let dir = tempdir().unwrap();
        let mut uids = Vec::new();
        for _ in 0..7 {
            let uid = Uuid::new_v4();
            let rec =
                Recording::create(dir.path(), uid, None, "claude".into(), "claude".into(), (24, 80)).unwrap();
            rec.close().unwrap();
            uids.push(uid);
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        // Pin the two oldest.
        let rec0 = Recording::create(dir.path(), uids[0], None, "claude".into(), "claude".into(), (24, 80)).unwrap();
        rec0.keep().unwrap();
        let rec1 = Recording::create(dir.path(), uids[1], None, "claude".into(), "claude".into(), (24, 80)).unwrap();
        rec1.keep().unwrap();

        let deleted = sweep(dir.path(), "claude", 5, std::time::Duration::from_secs(3600), |_| false);
        assert_eq!(deleted.len(), 2);
        let remaining = list_all(dir.path());
        assert_eq!(remaining.len(), 5);
        assert!(remaining.iter().any(|m| m.uuid == uids[0]));
        assert!(remaining.iter().any(|m| m.uuid == uids[1]));
    }

    #[test]
    fn sweep_never_deletes_in_use_recording() {
        let dir = tempdir().unwrap();
        let uid = Uuid::new_v4();
        Recording::create(dir.path(), uid, None, "claude".into(), "claude".into(), (24, 80)).unwrap();
        let deleted = sweep(dir.path(), "claude", 0, std::time::Duration::from_secs(0), |_| true);
        assert!(deleted.is_empty());
    }
}
