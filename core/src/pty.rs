//! PTY primitives: open a pseudo-terminal, spawn/respawn a child on it, write
//! to and resize it, and signal its process group. Generalizes the teacher's
//! `pty.rs` (which spawned a fixed `bash -l` or one of a closed set of CLI
//! tools) to an arbitrary `argv` supplied by the caller (spec.md §4.2), and
//! adds the one primitive the teacher didn't need: respawning a child onto
//! an *already open* PTY master so a restart never reallocates the PTY
//! (spec.md §4.3 "Restart decision", §9 "non-portable assumption").

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Mutex;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize, SlavePty};

use crate::error::PtyError;
use crate::size::Size;

fn to_pty_size(size: Size) -> PtySize {
    PtySize { rows: size.rows, cols: size.cols, pixel_width: 0, pixel_height: 0 }
}

/// Master + slave pair plus the currently-running child. The slave is kept
/// alive across restarts so `respawn` never has to `openpty` again.
pub struct Pty {
    master: Box<dyn MasterPty + Send>,
    slave: Box<dyn SlavePty + Send>,
    writer: Mutex<Box<dyn Write + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
}

/// Env + cwd for one spawn or respawn.
pub struct SpawnSpec<'a> {
    pub argv: &'a [String],
    pub cwd: Option<&'a Path>,
    pub extra_env: &'a [(String, String)],
    /// This session's per-session app port, exported as `PORT` (spec.md §4.2
    /// Creation: "environment containing PORT (for per-session app ports
    /// where used)"). Stable across a restart, since it identifies the
    /// session rather than any one child process.
    pub port: u16,
}

fn build_command(
    argv: &[String],
    cwd: Option<&Path>,
    extra_env: &[(String, String)],
    size: Size,
    port: u16,
) -> Result<CommandBuilder, PtyError> {
    let (program, args) = argv.split_first().ok_or_else(|| PtyError::Spawn(anyhow::anyhow!("empty argv")))?;
    let mut cmd = CommandBuilder::new(program);
    for a in args {
        cmd.arg(a);
    }
    if let Some(dir) = cwd {
        cmd.cwd(dir);
    }
    cmd.env("TERM", "xterm-256color");
    cmd.env("COLORTERM", "truecolor");
    cmd.env("COLUMNS", size.cols.to_string());
    cmd.env("LINES", size.rows.to_string());
    cmd.env("PORT", port.to_string());
    for (k, v) in extra_env {
        cmd.env(k, v);
    }
    Ok(cmd)
}

/// Bind an OS-assigned ephemeral port and release it immediately, the same
/// "find a free port, then hand it to the child" idiom used for per-session
/// dev-server ports elsewhere in the pack.
pub fn allocate_ephemeral_port() -> Result<u16, PtyError> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").map_err(|e| PtyError::Open(e.into()))?;
    Ok(listener.local_addr().map_err(|e| PtyError::Open(e.into()))?.port())
}

impl Pty {
    /// Open a PTY and spawn the first child on it (spec.md §4.2 Creation).
    pub fn open(size: Size, spec: SpawnSpec<'_>) -> Result<Self, PtyError> {
        let system = native_pty_system();
        let pair = system.openpty(to_pty_size(size)).map_err(|e| PtyError::Open(e.into()))?;
        let cmd = build_command(spec.argv, spec.cwd, spec.extra_env, size, spec.port)?;
        let child = pair.slave.spawn_command(cmd).map_err(|e| PtyError::Spawn(e.into()))?;
        let writer = pair.master.take_writer().map_err(|e| PtyError::Open(e.into()))?;
        Ok(Pty {
            master: pair.master,
            slave: pair.slave,
            writer: Mutex::new(writer),
            child: Mutex::new(child),
        })
    }

    /// Spawn a new child on the *same* master/slave pair, replacing the old
    /// child handle. Callers must have already confirmed the old child
    /// exited (spec.md §4.3 "Restart decision").
    pub fn respawn(&self, spec: SpawnSpec<'_>, size: Size) -> Result<(), PtyError> {
        let cmd = build_command(spec.argv, spec.cwd, spec.extra_env, size, spec.port)?;
        let child = self.slave.spawn_command(cmd).map_err(|e| PtyError::Spawn(e.into()))?;
        *self.child.lock().expect("child mutex") = child;
        Ok(())
    }

    pub fn try_clone_reader(&self) -> Result<Box<dyn Read + Send>, PtyError> {
        self.master.try_clone_reader().map_err(|e| PtyError::Open(e.into()))
    }

    pub fn write_all(&self, bytes: &[u8]) -> Result<(), PtyError> {
        let mut w = self.writer.lock().expect("writer mutex");
        w.write_all(bytes).map_err(PtyError::Write)?;
        w.flush().map_err(PtyError::Write)
    }

    pub fn resize(&self, size: Size) -> Result<(), PtyError> {
        self.master.resize(to_pty_size(size)).map_err(|e| PtyError::Resize(e.into()))
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.lock().expect("child mutex").process_id()
    }

    /// Non-blocking exit check. `Some(code)` once the child has exited.
    pub fn try_wait_exit_code(&self) -> Option<u32> {
        let mut child = self.child.lock().expect("child mutex");
        match child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code()),
            _ => None,
        }
    }

    /// Blocking wait for the current child to exit; returns its exit code.
    pub fn wait_exit_code(&self) -> u32 {
        let mut child = self.child.lock().expect("child mutex");
        match child.wait() {
            Ok(status) => status.exit_code(),
            Err(_) => 1,
        }
    }

    /// Send SIGTERM to the child's process group (spec.md §5). `portable_pty`
    /// spawns each child as its own session/process-group leader on Unix, so
    /// `pid == pgid`.
    #[cfg(unix)]
    pub fn signal_term(&self) {
        if let Some(pid) = self.pid() {
            let _ = nix::sys::signal::killpg(
                nix::unistd::Pid::from_raw(pid as i32),
                nix::sys::signal::Signal::SIGTERM,
            );
        }
    }

    #[cfg(unix)]
    pub fn signal_kill(&self) {
        if let Some(pid) = self.pid() {
            let _ = nix::sys::signal::killpg(
                nix::unistd::Pid::from_raw(pid as i32),
                nix::sys::signal::Signal::SIGKILL,
            );
        }
    }

    #[cfg(not(unix))]
    pub fn signal_term(&self) {
        let _ = self.child.lock().expect("child mutex").kill();
    }

    #[cfg(not(unix))]
    pub fn signal_kill(&self) {
        let _ = self.child.lock().expect("child mutex").kill();
    }
}

/// Build the `extra_env` list from a `KEY=VALUE` env file in the working
/// directory (spec.md §4.2: "any caller-supplied env from a `swe-swe/env`
/// file in workDir"). Missing file is not an error.
pub fn read_env_file(work_dir: &Path) -> Vec<(String, String)> {
    let path = work_dir.join("swe-swe").join("env");
    let Ok(contents) = std::fs::read_to_string(&path) else { return Vec::new() };
    let mut map: HashMap<String, String> = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    map.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    #[test]
    fn open_and_read_output_and_exit() {
        let pty = Pty::open(
            Size { rows: 24, cols: 80 },
            SpawnSpec { argv: &["/bin/echo".to_string(), "hi".to_string()], cwd: None, extra_env: &[], port: 0 },
        )
        .expect("open pty");
        let mut reader = pty.try_clone_reader().expect("reader");
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).ok();
        assert!(String::from_utf8_lossy(&buf).contains("hi"));
        assert_eq!(pty.wait_exit_code(), 0);
    }

    #[test]
    fn read_env_file_parses_key_value_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("swe-swe")).unwrap();
        std::fs::write(dir.path().join("swe-swe").join("env"), "FOO=bar\n# comment\nBAZ=qux\n").unwrap();
        let mut env = read_env_file(dir.path());
        env.sort();
        assert_eq!(env, vec![("BAZ".to_string(), "qux".to_string()), ("FOO".to_string(), "bar".to_string())]);
    }
}
