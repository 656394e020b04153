//! Session Registry (spec.md §4.1): process-wide UUID → Session map, with
//! per-UUID creation serialization, a reaper task, and one recording-sweeper
//! task per assistant. Mirrors the teacher's `DashMap`-keyed session map,
//! generalized to the spec's richer lifecycle.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::assistant::AssistantConfig;
use crate::config::Config;
use crate::error::CoreError;
use crate::recording;
use crate::session::{CreateOpts, Lifecycle, Session, SessionSummary};

pub struct GetOrCreateParams {
    pub uuid: Uuid,
    pub assistant: AssistantConfig,
    pub work_dir: PathBuf,
    pub display_name: Option<String>,
    pub branch_name: Option<String>,
    pub record: bool,
}

/// Thread-safe UUID → Session map (spec.md §4.1 "Contract"). Weakly owns its
/// Sessions: removing an entry does not itself close the PTY or recording,
/// the Session's own teardown does (spec.md §3 "Ownership").
pub struct Registry {
    sessions: DashMap<Uuid, Arc<Session>>,
    creation_cells: DashMap<Uuid, Arc<OnceCell<Result<Arc<Session>, String>>>>,
    recordings_root: Option<PathBuf>,
    max_upload_bytes: u64,
}

impl Registry {
    pub fn new(recordings_root: Option<PathBuf>, max_upload_bytes: u64) -> Arc<Self> {
        Arc::new(Registry {
            sessions: DashMap::new(),
            creation_cells: DashMap::new(),
            recordings_root,
            max_upload_bytes,
        })
    }

    pub fn get(&self, uuid: Uuid) -> Option<Arc<Session>> {
        self.sessions.get(&uuid).map(|r| r.value().clone())
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        self.sessions.iter().map(|r| r.value().summary()).collect()
    }

    /// Atomically returns the existing session for `uuid` or creates one.
    /// Creation is serialized per UUID: concurrent callers for the same
    /// UUID block on a shared cell and all observe the same outcome,
    /// success or failure (spec.md §4.1 "Tie-breaks").
    pub async fn get_or_create(&self, params: GetOrCreateParams) -> Result<(Arc<Session>, bool), CoreError> {
        if let Some(existing) = self.get(params.uuid) {
            return Ok((existing, false));
        }

        let uuid = params.uuid;
        let cell = {
            let entry = self.creation_cells.entry(uuid).or_insert_with(|| Arc::new(OnceCell::new()));
            entry.value().clone()
        };

        let recordings_root = self.recordings_root.clone();
        let max_upload_bytes = self.max_upload_bytes;
        let result = cell
            .get_or_init(|| async move {
                let opts = CreateOpts {
                    uuid: params.uuid,
                    display_name: params.display_name,
                    assistant: params.assistant,
                    work_dir: params.work_dir,
                    branch_name: params.branch_name,
                    recordings_root: if params.record { recordings_root } else { None },
                    max_upload_bytes,
                };
                Session::spawn(opts).map_err(|e| e.to_string())
            })
            .await
            .clone();

        self.creation_cells.remove(&uuid);

        match result {
            Ok(session) => {
                // Another caller may have raced us between the outer check
                // and this insert; `DashMap::entry` keeps the first winner.
                let session = self.sessions.entry(uuid).or_insert_with(|| session).value().clone();
                Ok((session.clone(), true))
            }
            Err(msg) => Err(CoreError::UnknownAssistant(msg)),
        }
    }

    /// Called only by the reaper.
    fn remove(&self, uuid: Uuid) {
        self.sessions.remove(&uuid);
    }

    /// Transition every session to `Exited` via SIGTERM→SIGKILL escalation
    /// (spec.md §5).
    pub async fn shutdown(&self, kill_grace: Duration) {
        let sessions: Vec<Arc<Session>> = self.sessions.iter().map(|r| r.value().clone()).collect();
        let handles: Vec<_> = sessions
            .into_iter()
            .map(|s| tokio::spawn(async move { s.shutdown(kill_grace).await }))
            .collect();
        for h in handles {
            let _ = h.await;
        }
    }

    /// Spawns the reaper and one sweeper per known assistant (spec.md §4.1,
    /// §4.7). Returns immediately; the tasks run for the registry's lifetime.
    pub fn spawn_background_tasks(self: &Arc<Self>, config: &'static Config) {
        tokio::spawn(reaper_loop(self.clone(), config.reap_interval, config.idle_ttl, config.kill_grace));

        if let Some(root) = self.recordings_root.clone() {
            for name in crate::assistant::ensure_loaded().names().map(str::to_string).collect::<Vec<_>>() {
                tokio::spawn(sweeper_loop(
                    self.clone(),
                    root.clone(),
                    name,
                    config.max_recordings_per_agent,
                    config.max_recording_age,
                ));
            }
        }
    }
}

async fn reaper_loop(registry: Arc<Registry>, interval: Duration, idle_ttl: Option<Duration>, kill_grace: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let snapshot: Vec<(Uuid, Arc<Session>)> =
            registry.sessions.iter().map(|r| (*r.key(), r.value().clone())).collect();

        for (uuid, session) in snapshot {
            match session.lifecycle() {
                Lifecycle::Exited => {
                    session.close_recording();
                    registry.remove(uuid);
                    session.mark_reaped();
                }
                Lifecycle::Running => {
                    if let Some(ttl) = idle_ttl {
                        if session.client_count() == 0 {
                            let idle_for = chrono::Utc::now().signed_duration_since(session.last_activity_at());
                            let ttl_chrono = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
                            if idle_for > ttl_chrono {
                                let session = session.clone();
                                tokio::spawn(async move { session.shutdown(kill_grace).await });
                            }
                        }
                    }
                }
                Lifecycle::Starting | Lifecycle::Reaped => {}
            }
        }
    }
}

async fn sweeper_loop(registry: Arc<Registry>, root: PathBuf, agent: String, max_per_agent: usize, max_age: Duration) {
    let mut ticker = tokio::time::interval(Duration::from_secs(60 * 10));
    loop {
        ticker.tick().await;
        let in_use: HashMap<Uuid, bool> = registry
            .sessions
            .iter()
            .map(|r| (*r.key(), r.value().lifecycle() == Lifecycle::Running))
            .collect();
        let deleted = recording::sweep(&root, &agent, max_per_agent, max_age, |uuid| {
            in_use.get(&uuid).copied().unwrap_or(false)
        });
        if !deleted.is_empty() {
            tracing::info!(agent = %agent, count = deleted.len(), "swept recordings");
        }
    }
}
