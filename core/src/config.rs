//! Global config singleton. Settings come from environment variables (see
//! spec.md §6 "Environment the core reads"), with the filesystem roots
//! falling back to sane defaults under the user's home directory. The first
//! caller of `ensure_loaded()` does the work; later callers get the same
//! instance. Mirrors the teacher's `config::ensure_loaded` singleton pattern.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Cached config, read once from the process environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub workspace_root: PathBuf,
    pub worktrees_root: PathBuf,
    pub repos_root: PathBuf,
    pub recordings_root: PathBuf,
    pub scaffold_dir: Option<PathBuf>,
    pub assistants_file: PathBuf,
    /// SIGTERM -> SIGKILL grace for a single session (spec.md §5 `killGrace`).
    pub kill_grace: Duration,
    /// Deadline for graceful server shutdown (spec.md §5 `shutdownGrace`).
    pub shutdown_grace: Duration,
    /// How often the reaper scans the registry (spec.md §4.1 `reapInterval`).
    pub reap_interval: Duration,
    /// Optional idle-TTL reaper; disabled by default (spec.md §9 Open Question).
    pub idle_ttl: Option<Duration>,
    /// Heartbeat staleness threshold used by proxy-facing health checks.
    pub heartbeat_stale: Duration,
    /// Per-upload size cap (spec.md §9 Open Question; default 16 MiB).
    pub max_upload_bytes: u64,
    /// Recording sweeper: unpinned recordings kept per assistant.
    pub max_recordings_per_agent: usize,
    /// Recording sweeper: max age for an unpinned recording.
    pub max_recording_age: Duration,
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_u64(key, default_secs))
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or(default)
}

fn default_data_root() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".swe-swe")
}

/// Ensure config is loaded (idempotent).
pub fn ensure_loaded() -> &'static Config {
    CONFIG.get_or_init(load_from_env)
}

fn load_from_env() -> Config {
    let data_root = default_data_root();
    let idle_ttl_secs = env_u64("SWE_IDLE_TTL", 0);

    Config {
        port: env_u16("PORT", 8765),
        workspace_root: env_path("SWE_WORKSPACE_ROOT", data_root.join("workspace")),
        worktrees_root: env_path("SWE_WORKTREES_ROOT", data_root.join("worktrees")),
        repos_root: env_path("SWE_REPOS_ROOT", data_root.join("repos")),
        recordings_root: env_path("SWE_RECORDINGS_ROOT", data_root.join("recordings")),
        scaffold_dir: std::env::var("SWE_SCAFFOLD_DIR").ok().map(PathBuf::from),
        assistants_file: env_path("SWE_ASSISTANTS_FILE", PathBuf::from("assistants.json")),
        kill_grace: env_duration_secs("PROXY_KILL_GRACE", 5),
        shutdown_grace: env_duration_secs("PROXY_SHUTDOWN_GRACE", 30),
        reap_interval: env_duration_secs("SWE_REAP_INTERVAL", 5),
        idle_ttl: if idle_ttl_secs == 0 { None } else { Some(Duration::from_secs(idle_ttl_secs)) },
        heartbeat_stale: env_duration_secs("PROXY_HEARTBEAT_STALE", 30),
        max_upload_bytes: env_u64("SWE_MAX_UPLOAD_BYTES", 16 * 1024 * 1024),
        max_recordings_per_agent: env_u64("SWE_MAX_RECORDINGS_PER_AGENT", 50) as usize,
        max_recording_age: Duration::from_secs(env_u64("SWE_MAX_RECORDING_AGE_SECS", 30 * 24 * 3600)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_data_root_is_under_home() {
        let root = default_data_root();
        assert!(root.ends_with(".swe-swe"));
    }
}
