//! Session (spec.md §3, §4.2, §4.3): owns one PTY-backed program, the set of
//! WebSocket clients watching it, its recording, and its restart state. The
//! PTY reader loop — "the concurrency spine" (spec.md §4.3) — lives here as
//! a single tokio task per session, bridging blocking PTY reads through
//! `spawn_blocking` the way the teacher's `pty.rs` bridged its own ghost
//! reader through a dedicated OS thread.

use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::assistant::AssistantConfig;
use crate::client::{ClientConnection, ClientId, ClientTransport};
use crate::error::{CoreError, PtyError};
use crate::protocol::{ControlFrame, ExitWorktree};
use crate::pty::{Pty, SpawnSpec};
use crate::recording::Recording;
use crate::size::{self, Size};
use crate::snapshot::Vt;

const READ_CHUNK_BYTES: usize = 32 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Starting,
    Running,
    Exited,
    Reaped,
}

pub struct CreateOpts {
    pub uuid: Uuid,
    pub display_name: Option<String>,
    pub assistant: AssistantConfig,
    pub work_dir: PathBuf,
    pub branch_name: Option<String>,
    pub recordings_root: Option<PathBuf>,
    pub max_upload_bytes: u64,
}

pub struct SessionSummary {
    pub uuid: Uuid,
    pub assistant: String,
    pub display_name: Option<String>,
    pub client_count: usize,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

/// One running (or recently-exited) PTY program and its viewers.
pub struct Session {
    pub uuid: Uuid,
    display_name: Mutex<Option<String>>,
    assistant: AssistantConfig,
    work_dir: PathBuf,
    branch_name: Option<String>,
    max_upload_bytes: u64,
    /// Per-session app port, exported to the child as `PORT` (spec.md §4.2
    /// Creation). Allocated once and stable across restarts.
    port: u16,

    pty: Pty,
    vt: Vt,
    recording: Option<Recording>,

    clients: Mutex<Vec<Arc<ClientConnection>>>,
    current_size: Mutex<Size>,

    permissive_mode: AtomicBool,
    pending_restart_cmd: Mutex<Option<Vec<String>>>,
    restart_requested: AtomicBool,

    created_at: DateTime<Utc>,
    last_activity_at: Mutex<DateTime<Utc>>,
    lifecycle: Mutex<Lifecycle>,
}

impl Session {
    /// Open the PTY, spawn the assistant's start command, and start the PTY
    /// reader task (spec.md §4.2 Creation). Returns once the reader task has
    /// been scheduled; lifecycle is `Running` from that point on until the
    /// child exits for good.
    pub fn spawn(opts: CreateOpts) -> Result<Arc<Session>, CoreError> {
        let size = Size::INITIAL;
        let extra_env = crate::pty::read_env_file(&opts.work_dir);
        let argv = opts.assistant.start_cmd.clone();
        let port = crate::pty::allocate_ephemeral_port().map_err(CoreError::Pty)?;
        let pty = Pty::open(size, SpawnSpec { argv: &argv, cwd: Some(&opts.work_dir), extra_env: &extra_env, port })
            .map_err(CoreError::Pty)?;

        let recording = match &opts.recordings_root {
            Some(root) => Some(
                Recording::create(
                    root,
                    opts.uuid,
                    opts.display_name.clone(),
                    opts.assistant.name.clone(),
                    argv.join(" "),
                    (size.rows, size.cols),
                )
                .map_err(CoreError::Recording)?,
            ),
            None => None,
        };

        let session = Arc::new(Session {
            uuid: opts.uuid,
            display_name: Mutex::new(opts.display_name),
            assistant: opts.assistant,
            work_dir: opts.work_dir,
            branch_name: opts.branch_name,
            max_upload_bytes: opts.max_upload_bytes,
            port,
            pty,
            vt: Vt::new(size),
            recording,
            clients: Mutex::new(Vec::new()),
            current_size: Mutex::new(size),
            permissive_mode: AtomicBool::new(false),
            pending_restart_cmd: Mutex::new(None),
            restart_requested: AtomicBool::new(false),
            created_at: Utc::now(),
            last_activity_at: Mutex::new(Utc::now()),
            lifecycle: Mutex::new(Lifecycle::Running),
        });

        tokio::spawn(Self::reader_task(session.clone()));
        Ok(session)
    }

    // -- lifecycle / bookkeeping -------------------------------------------------

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock().expect("lifecycle mutex")
    }

    fn set_lifecycle(&self, l: Lifecycle) {
        *self.lifecycle.lock().expect("lifecycle mutex") = l;
    }

    /// Called by the registry once it has removed this session from the map
    /// (spec.md §3 "Lifecycle", §8 property 6 "Reap safety"). Terminal: a
    /// session never leaves `Reaped`.
    pub fn mark_reaped(&self) {
        self.set_lifecycle(Lifecycle::Reaped);
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        *self.last_activity_at.lock().expect("activity mutex")
    }

    fn touch_activity(&self) {
        *self.last_activity_at.lock().expect("activity mutex") = Utc::now();
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().expect("clients mutex").len()
    }

    pub fn display_name(&self) -> Option<String> {
        self.display_name.lock().expect("display_name mutex").clone()
    }

    pub fn current_size(&self) -> Size {
        *self.current_size.lock().expect("size mutex")
    }

    pub fn permissive_mode(&self) -> bool {
        self.permissive_mode.load(Ordering::SeqCst)
    }

    pub fn assistant(&self) -> &AssistantConfig {
        &self.assistant
    }

    pub fn work_dir(&self) -> &std::path::Path {
        &self.work_dir
    }

    /// Closes the recording (stamps `endedAt`), if one is attached. Called
    /// by the reaper once a session's child has exited for good.
    pub fn close_recording(&self) {
        if let Some(rec) = &self.recording {
            if let Err(e) = rec.close() {
                tracing::warn!(session = %self.uuid, error = %e, "failed to close recording");
            }
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            uuid: self.uuid,
            assistant: self.assistant.name.clone(),
            display_name: self.display_name(),
            client_count: self.client_count(),
            created_at: self.created_at,
            is_active: self.lifecycle() == Lifecycle::Running,
        }
    }

    fn snapshot_clients(&self) -> Vec<Arc<ClientConnection>> {
        self.clients.lock().expect("clients mutex").clone()
    }

    // -- size reconciliation (spec.md §4.5) --------------------------------------

    fn recompute_and_apply_size(&self) {
        let sizes: Vec<Size> = {
            let clients = self.clients.lock().expect("clients mutex");
            clients.iter().filter_map(|c| c.size()).collect()
        };
        let Some(min) = size::min_wins(sizes) else { return };
        let mut current = self.current_size.lock().expect("size mutex");
        if *current == min {
            return;
        }
        match self.pty.resize(min) {
            Ok(()) => {
                *current = min;
                drop(current);
                self.vt.resize(min);
            }
            Err(e) => {
                tracing::warn!(session = %self.uuid, error = %e, "pty resize failed, keeping previous size");
            }
        }
    }

    // -- client attach / detach / input (spec.md §4.2 public operations) --------

    /// Register a client and hand it the VT snapshot *before* it becomes a
    /// live broadcast destination (spec.md §4.6). The snapshot capture and
    /// the registration happen under one `clients` lock with no `await` in
    /// between, so no PTY byte processed by the reader task can fall into
    /// the gap between "snapshot taken" and "now receiving live broadcasts"
    /// (spec.md §3 "every byte ... was also enqueued ... or received via
    /// snapshot").
    pub async fn attach(self: &Arc<Self>, transport: Box<dyn ClientTransport>) -> Arc<ClientConnection> {
        let client = Arc::new(ClientConnection::new(transport));
        let snapshot = {
            let mut clients = self.clients.lock().expect("clients mutex");
            let snapshot = self.vt.snapshot();
            clients.push(client.clone());
            snapshot
        };
        let _ = client.send_binary(Bytes::from(snapshot)).await;

        // Slash-command MOTD (SPEC_FULL.md §4.2): assistants that support
        // permissive mode get one status frame up front, ahead of the
        // regular viewer-count broadcast below, so the client's first
        // control frame already names the assistant and its yolo state.
        if self.assistant.supports_permissive {
            let _ = client.send_text(self.status_frame().to_json()).await;
        }

        self.recompute_and_apply_size();
        self.touch_activity();
        self.broadcast_status().await;
        client
    }

    pub async fn detach(&self, id: ClientId) {
        {
            let mut clients = self.clients.lock().expect("clients mutex");
            clients.retain(|c| c.id != id);
        }
        self.recompute_and_apply_size();
        self.broadcast_status().await;
    }

    pub async fn resize(&self, id: ClientId, size: Size) {
        {
            let clients = self.clients.lock().expect("clients mutex");
            if let Some(c) = clients.iter().find(|c| c.id == id) {
                c.set_size(size);
            }
        }
        self.recompute_and_apply_size();
        self.touch_activity();
        self.broadcast_status().await;
    }

    /// Raw bytes to the PTY, no interpretation (spec.md §4.2).
    pub fn write_input(&self, bytes: &[u8]) -> Result<(), PtyError> {
        self.touch_activity();
        let result = self.pty.write_all(bytes);
        if result.is_err() {
            self.set_lifecycle(Lifecycle::Exited);
        }
        result
    }

    /// Records the viewer's chosen name on the connection and, if a
    /// recording is active, on its `visitors` list (spec.md §4.7).
    pub fn set_client_name(&self, id: ClientId, name: String) {
        {
            let clients = self.clients.lock().expect("clients mutex");
            if let Some(c) = clients.iter().find(|c| c.id == id) {
                c.set_user_name(name.clone());
            }
        }
        if let Some(rec) = &self.recording {
            let _ = rec.add_visitor(&name);
        }
    }

    /// Write an uploaded file under `{workDir}/.swe-swe/uploads/` and feed
    /// its absolute path to the PTY (spec.md §4.2, seed test 5).
    pub async fn upload_file(&self, client: &Arc<ClientConnection>, name: &str, bytes: &[u8]) {
        let safe_name = sanitize_upload_name(name);
        let outcome = self.write_upload(&safe_name, bytes);
        let frame = match outcome {
            Ok(path) => {
                let _ = self.pty.write_all(format!("{}\n", path.display()).as_bytes());
                self.touch_activity();
                ControlFrame::FileUpload { success: true, filename: safe_name, error: None }
            }
            Err(e) => ControlFrame::FileUpload { success: false, filename: safe_name, error: Some(e.to_string()) },
        };
        let _ = client.send_text(frame.to_json()).await;
    }

    fn write_upload(&self, safe_name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        if bytes.len() as u64 > self.max_upload_bytes {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "upload exceeds size cap"));
        }
        let dir = self.work_dir.join(".swe-swe").join("uploads");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(safe_name);
        std::fs::write(&path, bytes)?;
        Ok(path)
    }

    pub async fn broadcast_chat(&self, user_name: Option<String>, text: String, timestamp: Option<i64>) {
        self.broadcast_control(ControlFrame::Chat { user_name, text, timestamp }).await;
    }

    fn status_frame(&self) -> ControlFrame {
        let size = self.current_size();
        ControlFrame::Status {
            viewers: self.client_count(),
            cols: size.cols,
            rows: size.rows,
            assistant: self.assistant.name.clone(),
            yolo_mode: self.permissive_mode(),
            yolo_supported: self.assistant.supports_permissive,
        }
    }

    async fn broadcast_status(&self) {
        self.broadcast_control(self.status_frame()).await;
    }

    async fn broadcast_control(&self, frame: ControlFrame) {
        let json = frame.to_json();
        let clients = self.snapshot_clients();
        for client in clients {
            if client.send_text(json.clone()).await.is_err() {
                self.detach(client.id).await;
            }
        }
    }

    // -- restart (spec.md §4.2, §4.3 "Restart decision") -------------------------

    /// Request a restart: `new_cmd` overrides the next spawn's argv, or
    /// clears the override so the next spawn falls back to the assistant's
    /// default restart command. Sends SIGTERM; the reader task performs the
    /// actual respawn once the current child has exited.
    pub fn request_restart(&self, new_cmd: Option<Vec<String>>) {
        *self.pending_restart_cmd.lock().expect("pending cmd mutex") = new_cmd;
        self.restart_requested.store(true, Ordering::SeqCst);
        self.pty.signal_term();
    }

    pub fn toggle_permissive(&self) {
        self.permissive_mode.fetch_xor(true, Ordering::SeqCst);
        self.request_restart(None);
    }

    fn effective_restart_command(&self) -> Vec<String> {
        let mut pending = self.pending_restart_cmd.lock().expect("pending cmd mutex");
        if let Some(cmd) = pending.take() {
            return cmd;
        }
        drop(pending);
        self.assistant.restart_argv(self.permissive_mode()).to_vec()
    }

    fn worktree_info(&self) -> Option<ExitWorktree> {
        self.branch_name.as_ref().map(|branch| ExitWorktree {
            path: self.work_dir.display().to_string(),
            branch: branch.clone(),
        })
    }

    // -- shutdown (spec.md §5) ----------------------------------------------------

    /// Escalate SIGTERM -> SIGKILL with `kill_grace` in between. Does not by
    /// itself flip `lifecycle`; the reader task observes the exit and does
    /// that, so `shutdown` can safely race it without double bookkeeping.
    pub async fn shutdown(&self, kill_grace: Duration) {
        self.pty.signal_term();
        let waited = tokio::time::timeout(kill_grace, async {
            loop {
                if self.pty.try_wait_exit_code().is_some() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        if waited.is_err() {
            self.pty.signal_kill();
        }
    }

    // -- PTY reader task (spec.md §4.3) ------------------------------------------

    async fn reader_task(session: Arc<Session>) {
        let _span = tracing::info_span!("pty_reader", session = %session.uuid).entered();
        let mut reader = match session.pty.try_clone_reader() {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(session = %session.uuid, error = %e, "failed to clone pty reader");
                session.set_lifecycle(Lifecycle::Exited);
                return;
            }
        };

        'outer: loop {
            loop {
                let (returned_reader, result) = tokio::task::spawn_blocking(move || {
                    let mut buf = vec![0u8; READ_CHUNK_BYTES];
                    let outcome = reader.read(&mut buf);
                    (reader, outcome.map(|n| buf[..n].to_vec()))
                })
                .await
                .expect("pty reader blocking task panicked");
                reader = returned_reader;

                match result {
                    Ok(bytes) if !bytes.is_empty() => {
                        session.touch_activity();
                        session.vt.process(&bytes);
                        let current_size = session.current_size();
                        let clients = session.snapshot_clients();
                        let payload = Bytes::from(bytes.clone());
                        for client in &clients {
                            if client.send_binary(payload.clone()).await.is_err() {
                                session.detach(client.id).await;
                            }
                        }
                        if let Some(rec) = &session.recording {
                            if let Err(e) = rec.append(&bytes, (current_size.rows, current_size.cols)) {
                                tracing::warn!(session = %session.uuid, error = %e, "recording write failed");
                            }
                        }
                    }
                    _ => break,
                }
            }

            let waiter = session.clone();
            let exit_code = tokio::task::spawn_blocking(move || waiter.pty.wait_exit_code()).await.unwrap_or(1);

            session.broadcast_control(ControlFrame::Exit { exit_code, worktree: session.worktree_info() }).await;

            if session.lifecycle() != Lifecycle::Running {
                session.set_lifecycle(Lifecycle::Exited);
                return;
            }

            if !session.restart_requested.swap(false, Ordering::SeqCst) {
                session.set_lifecycle(Lifecycle::Exited);
                return;
            }

            let argv = session.effective_restart_command();
            let extra_env = crate::pty::read_env_file(&session.work_dir);
            let size = session.current_size();
            let spec = SpawnSpec { argv: &argv, cwd: Some(&session.work_dir), extra_env: &extra_env, port: session.port };
            match session.pty.respawn(spec, size) {
                Ok(()) => {
                    if let Some(rec) = &session.recording {
                        let _ = rec.set_command(argv.join(" "));
                    }
                    session.broadcast_status().await;
                    continue 'outer;
                }
                Err(e) => {
                    tracing::error!(session = %session.uuid, error = %e, "restart spawn failed");
                    session.set_lifecycle(Lifecycle::Exited);
                    return;
                }
            }
        }
    }
}

/// Strip any path components, keeping only the final file name (spec.md §4.2
/// "sanitized name").
fn sanitize_upload_name(name: &str) -> String {
    std::path::Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "upload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::AssistantConfig;
    use crate::client::test_support::{Frame, RecordingTransport};

    fn shell_assistant(cmd: &[&str]) -> AssistantConfig {
        AssistantConfig {
            name: "shell".into(),
            binary: cmd[0].into(),
            start_cmd: cmd.iter().map(|s| s.to_string()).collect(),
            restart_cmd: cmd.iter().map(|s| s.to_string()).collect(),
            permissive_restart_cmd: None,
            supports_permissive: false,
        }
    }

    fn opts(work_dir: PathBuf, cmd: &[&str]) -> CreateOpts {
        CreateOpts {
            uuid: Uuid::new_v4(),
            display_name: None,
            assistant: shell_assistant(cmd),
            work_dir,
            branch_name: None,
            recordings_root: None,
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }

    #[tokio::test]
    async fn clean_exit_does_not_restart() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::spawn(opts(dir.path().to_path_buf(), &["/bin/true"])).unwrap();

        for _ in 0..200 {
            if session.lifecycle() == Lifecycle::Exited {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(session.lifecycle(), Lifecycle::Exited);
    }

    #[tokio::test]
    async fn upload_writes_file_and_feeds_pty_path() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::spawn(opts(dir.path().to_path_buf(), &["/bin/cat"])).unwrap();
        let (transport, frames) = RecordingTransport::new();
        let client = session.attach(Box::new(transport)).await;

        session.upload_file(&client, "../../etc/foo.bin", b"hello").await;

        let uploaded = dir.path().join(".swe-swe").join("uploads").join("foo.bin");
        assert_eq!(std::fs::read(&uploaded).unwrap(), b"hello");

        let text_frames: Vec<_> = frames
            .lock()
            .await
            .iter()
            .filter_map(|f| match f {
                Frame::Text(t) => Some(t.clone()),
                _ => None,
            })
            .collect();
        assert!(text_frames.iter().any(|t| t.contains("\"success\":true")));
    }

    #[tokio::test]
    async fn min_wins_reconciliation_across_attach_detach() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::spawn(opts(dir.path().to_path_buf(), &["/bin/cat"])).unwrap();

        let (t_a, _) = RecordingTransport::new();
        let a = session.attach(Box::new(t_a)).await;
        session.resize(a.id, Size { rows: 24, cols: 80 }).await;

        let (t_b, _) = RecordingTransport::new();
        let b = session.attach(Box::new(t_b)).await;
        session.resize(b.id, Size { rows: 30, cols: 100 }).await;

        assert_eq!(session.current_size(), Size { rows: 24, cols: 80 });

        session.detach(b.id).await;
        assert_eq!(session.current_size(), Size { rows: 24, cols: 80 });
    }
}
