//! Worktree / Repository Preparer (spec.md §4.8): resolves a working
//! directory for a new session before the PTY is opened. Independent of the
//! PTY loop — called once per new-session request. Shells out to the `git`
//! CLI via `std::process::Command`, the idiom the pack's terminal-multiplexer
//! examples use for repository management rather than a git library crate.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::WorktreeError;

/// How a session's working directory was prepared; carried forward so the
/// Exit control frame can report `{path, branch}` (spec.md §6).
#[derive(Debug, Clone)]
pub struct PreparedWorkspace {
    pub work_dir: PathBuf,
    pub branch_name: Option<String>,
}

fn run_git(args: &[&str], cwd: Option<&Path>) -> Result<(), WorktreeError> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let output = cmd.output().map_err(WorktreeError::Io)?;
    if !output.status.success() {
        return Err(WorktreeError::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

fn git_output(args: &[&str], cwd: Option<&Path>) -> Result<String, WorktreeError> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let output = cmd.output().map_err(WorktreeError::Io)?;
    if !output.status.success() {
        return Err(WorktreeError::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn branch_exists(repo: &Path, branch: &str) -> bool {
    git_output(&["rev-parse", "--verify", "--quiet", branch], Some(repo)).is_ok()
}

/// Create or reuse `worktreesRoot/B`: checks out an existing local or
/// `origin/B` branch, else branches from HEAD (spec.md §4.8 mode 2/3).
fn prepare_worktree(repo: &Path, worktrees_root: &Path, branch: &str) -> Result<PathBuf, WorktreeError> {
    let target = worktrees_root.join(branch);
    if target.exists() {
        return Ok(target);
    }
    std::fs::create_dir_all(worktrees_root).map_err(WorktreeError::Io)?;

    if branch_exists(repo, branch) {
        run_git(&["worktree", "add", &target.display().to_string(), branch], Some(repo))?;
    } else if branch_exists(repo, &format!("origin/{branch}")) {
        run_git(
            &["worktree", "add", "-b", branch, &target.display().to_string(), &format!("origin/{branch}")],
            Some(repo),
        )?;
    } else {
        run_git(&["worktree", "add", "-b", branch, &target.display().to_string(), "HEAD"], Some(repo))?;
    }
    Ok(target)
}

/// Replace anything that is not filesystem-safe with `-` (spec.md §4.8
/// "Sanitize URL").
fn sanitize_url(url: &str) -> String {
    url.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' { c } else { '-' })
        .collect()
}

fn synthesize_git_identity(repo: &Path) -> Result<(), WorktreeError> {
    if git_output(&["config", "user.email"], Some(repo)).is_ok() {
        return Ok(());
    }
    let user = std::env::var("USER").or_else(|_| std::env::var("USERNAME")).unwrap_or_else(|_| "swe-swe".to_string());
    let host = std::fs::read_to_string("/etc/hostname").unwrap_or_else(|_| "localhost".to_string());
    let host = host.trim();
    run_git(&["config", "user.name", &user], Some(repo))?;
    run_git(&["config", "user.email", &format!("{user}@{host}")], Some(repo))?;
    Ok(())
}

/// Mode 1: default workspace, default branch. `workDir = workspaceRoot`.
pub fn prepare_default_workspace(workspace_root: &Path) -> Result<PreparedWorkspace, WorktreeError> {
    std::fs::create_dir_all(workspace_root).map_err(WorktreeError::Io)?;
    Ok(PreparedWorkspace { work_dir: workspace_root.to_path_buf(), branch_name: None })
}

/// Mode 2: default workspace, named branch B.
pub fn prepare_named_branch(
    workspace_root: &Path,
    worktrees_root: &Path,
    branch: &str,
) -> Result<PreparedWorkspace, WorktreeError> {
    let work_dir = prepare_worktree(workspace_root, worktrees_root, branch)?;
    Ok(PreparedWorkspace { work_dir, branch_name: Some(branch.to_string()) })
}

/// Mode 3: external URL, optionally a branch off it.
pub fn prepare_external_url(
    repos_root: &Path,
    url: &str,
    branch: Option<&str>,
) -> Result<PreparedWorkspace, WorktreeError> {
    if url.trim().is_empty() {
        return Err(WorktreeError::InvalidUrl(url.to_string()));
    }
    let sanitized = sanitize_url(url);
    let repo_root = repos_root.join(&sanitized);
    let workspace = repo_root.join("workspace");

    if workspace.exists() {
        run_git(&["fetch"], Some(&workspace))?;
    } else {
        std::fs::create_dir_all(&repo_root).map_err(WorktreeError::Io)?;
        run_git(&["clone", "--depth", "1", url, &workspace.display().to_string()], None)?;
    }

    match branch {
        Some(b) => {
            let worktrees_root = repo_root.join("worktrees");
            let work_dir = prepare_worktree(&workspace, &worktrees_root, b)?;
            Ok(PreparedWorkspace { work_dir, branch_name: Some(b.to_string()) })
        }
        None => Ok(PreparedWorkspace { work_dir: workspace, branch_name: None }),
    }
}

/// Mode 4: brand new project N. `git init`, synthesize identity if needed, one
/// empty initial commit, no worktree.
pub fn prepare_new_project(repos_root: &Path, name: &str) -> Result<PreparedWorkspace, WorktreeError> {
    let workspace = repos_root.join(name).join("workspace");
    std::fs::create_dir_all(&workspace).map_err(WorktreeError::Io)?;
    run_git(&["init"], Some(&workspace))?;
    synthesize_git_identity(&workspace)?;
    run_git(&["commit", "--allow-empty", "-m", "Initial commit"], Some(&workspace))?;
    Ok(PreparedWorkspace { work_dir: workspace, branch_name: None })
}

/// Copy the fixed set of "swe-swe" scaffold files into `work_dir`, skipping
/// any that already exist (spec.md §4.8, never overwrite).
pub fn copy_scaffold(scaffold_dir: Option<&Path>, work_dir: &Path) -> std::io::Result<()> {
    let Some(scaffold_dir) = scaffold_dir else { return Ok(()) };
    if !scaffold_dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(scaffold_dir)?.filter_map(|e| e.ok()) {
        let dest = work_dir.join(entry.file_name());
        if dest.exists() {
            continue;
        }
        std::fs::copy(entry.path(), dest)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_url_replaces_non_filesystem_chars() {
        assert_eq!(sanitize_url("https://github.com/foo/bar.git"), "https---github.com-foo-bar.git");
    }

    #[test]
    fn default_workspace_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("workspace");
        let prepared = prepare_default_workspace(&root).unwrap();
        assert!(root.is_dir());
        assert_eq!(prepared.work_dir, root);
        assert!(prepared.branch_name.is_none());
    }

    #[test]
    fn copy_scaffold_never_overwrites_existing_files() {
        let scaffold = tempfile::tempdir().unwrap();
        std::fs::write(scaffold.path().join("AGENTS.md"), "scaffold").unwrap();

        let work = tempfile::tempdir().unwrap();
        std::fs::write(work.path().join("AGENTS.md"), "existing").unwrap();

        copy_scaffold(Some(scaffold.path()), work.path()).unwrap();
        assert_eq!(std::fs::read_to_string(work.path().join("AGENTS.md")).unwrap(), "existing");
    }

    #[test]
    fn new_project_creates_repo_with_initial_commit() {
        if Command::new("git").arg("--version").output().map(|o| o.status.success()).unwrap_or(false) {
            let dir = tempfile::tempdir().unwrap();
            let prepared = prepare_new_project(dir.path(), "demo").unwrap();
            assert!(prepared.work_dir.join(".git").is_dir());
            let log = git_output(&["log", "--oneline"], Some(&prepared.work_dir)).unwrap();
            assert!(log.contains("Initial commit"));
        }
    }
}
