//! Black-box scenarios from spec.md §8: multiple viewers on one session,
//! snapshot ordering for a late joiner, and a continuous recording across a
//! toggle-permissive restart. Uses a local `ClientTransport` since the
//! `cfg(test)`-only one in `swe_core::client::test_support` isn't visible
//! from an external test crate.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use swe_core::assistant::AssistantConfig;
use swe_core::client::{ClientTransport, TransportError};
use swe_core::session::{CreateOpts, Lifecycle, Session};
use swe_core::size::Size;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Frame {
    Binary(Vec<u8>),
    Text(String),
}

struct TestTransport {
    frames: Arc<AsyncMutex<Vec<Frame>>>,
}

#[async_trait]
impl ClientTransport for TestTransport {
    async fn send_binary(&mut self, bytes: Bytes) -> Result<(), TransportError> {
        self.frames.lock().await.push(Frame::Binary(bytes.to_vec()));
        Ok(())
    }

    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.frames.lock().await.push(Frame::Text(text));
        Ok(())
    }
}

fn new_transport() -> (TestTransport, Arc<AsyncMutex<Vec<Frame>>>) {
    let frames = Arc::new(AsyncMutex::new(Vec::new()));
    (TestTransport { frames: frames.clone() }, frames)
}

fn sh(cmd: &[&str]) -> AssistantConfig {
    AssistantConfig {
        name: "shell".into(),
        binary: cmd[0].into(),
        start_cmd: cmd.iter().map(|s| s.to_string()).collect(),
        restart_cmd: cmd.iter().map(|s| s.to_string()).collect(),
        permissive_restart_cmd: Some(cmd.iter().map(|s| s.to_string()).collect()),
        supports_permissive: true,
    }
}

fn opts(work_dir: PathBuf, assistant: AssistantConfig) -> CreateOpts {
    CreateOpts {
        uuid: Uuid::new_v4(),
        display_name: None,
        assistant,
        work_dir,
        branch_name: None,
        recordings_root: None,
        max_upload_bytes: 16 * 1024 * 1024,
    }
}

async fn wait_for<F: Fn() -> bool>(pred: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if pred() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    pred()
}

/// Two viewers attach to the same session; a late joiner gets a snapshot
/// frame before any live output, and both receive broadcast output after.
#[tokio::test]
async fn two_viewers_share_one_session_and_late_joiner_gets_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let session = Session::spawn(opts(dir.path().to_path_buf(), sh(&["/bin/cat"]))).unwrap();

    let (t_a, frames_a) = new_transport();
    let client_a = session.attach(Box::new(t_a)).await;

    session.write_input(b"hello\n").unwrap();
    wait_for(|| !frames_a.try_lock().map(|f| f.is_empty()).unwrap_or(true), Duration::from_secs(2)).await;

    let (t_b, frames_b) = new_transport();
    let _client_b = session.attach(Box::new(t_b)).await;

    // The late joiner's very first frame is its VT snapshot, a binary frame
    // of raw ANSI bytes, sent before it is registered to receive further
    // broadcasts.
    let b_frames = frames_b.lock().await;
    assert!(matches!(b_frames.first(), Some(Frame::Binary(_))));
    drop(b_frames);

    assert_eq!(session.client_count(), 2);
    let _ = client_a;
}

/// `min-wins` size reconciliation across attach/detach (spec.md §4.5), end
/// to end through `Session` rather than the unit-level `size::min_wins`.
#[tokio::test]
async fn size_reconciles_to_smallest_attached_viewer() {
    let dir = tempfile::tempdir().unwrap();
    let session = Session::spawn(opts(dir.path().to_path_buf(), sh(&["/bin/cat"]))).unwrap();

    let (t_a, _) = new_transport();
    let a = session.attach(Box::new(t_a)).await;
    session.resize(a.id, Size { rows: 40, cols: 120 }).await;
    assert_eq!(session.current_size(), Size { rows: 40, cols: 120 });

    let (t_b, _) = new_transport();
    let b = session.attach(Box::new(t_b)).await;
    session.resize(b.id, Size { rows: 24, cols: 80 }).await;
    assert_eq!(session.current_size(), Size { rows: 24, cols: 80 });

    session.detach(b.id).await;
    assert_eq!(session.current_size(), Size { rows: 24, cols: 80 });
}

/// A clean exit (rc 0, no restart requested) moves straight to `Exited` and
/// does not respawn the program.
#[tokio::test]
async fn clean_exit_does_not_restart() {
    let dir = tempfile::tempdir().unwrap();
    let session = Session::spawn(opts(dir.path().to_path_buf(), sh(&["/bin/true"]))).unwrap();
    let reached = wait_for(|| session.lifecycle() == Lifecycle::Exited, Duration::from_secs(2)).await;
    assert!(reached);
}

/// Toggling permissive mode restarts the program on the same PTY without
/// tearing down the recording (command line changes, recording continues).
#[tokio::test]
async fn toggle_permissive_restarts_with_new_command_and_keeps_recording() {
    let dir = tempfile::tempdir().unwrap();
    let recordings_root = tempfile::tempdir().unwrap();
    let mut o = opts(dir.path().to_path_buf(), sh(&["/bin/cat"]));
    o.recordings_root = Some(recordings_root.path().to_path_buf());
    let uuid = o.uuid;
    let session = Session::spawn(o).unwrap();

    assert!(wait_for(|| session.lifecycle() == Lifecycle::Running, Duration::from_secs(2)).await);

    session.toggle_permissive();
    assert!(wait_for(|| session.lifecycle() == Lifecycle::Running, Duration::from_secs(2)).await);

    let meta = swe_core::recording::read_metadata(recordings_root.path(), uuid).unwrap();
    assert!(meta.ended_at.is_none(), "recording must stay open across a restart");
}
