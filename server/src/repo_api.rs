//! Repository/worktree REST API (spec.md §6): prepares a working directory
//! ahead of opening `/ws/{uuid}`, and lists branches/known repos for the UI.
//! All git work happens inside `spawn_blocking` since `swe_core::workspace`
//! shells out synchronously.

use std::path::PathBuf;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use swe_core::workspace;

#[derive(Deserialize)]
pub struct PrepareRequest {
    mode: String,
    url: Option<String>,
    path: Option<String>,
    name: Option<String>,
    branch: Option<String>,
}

#[derive(Serialize)]
pub struct PrepareResponse {
    path: String,
    branch: Option<String>,
    has_env_file: bool,
    is_workspace: bool,
}

fn to_response(prepared: workspace::PreparedWorkspace, is_workspace: bool) -> PrepareResponse {
    let has_env_file = prepared.work_dir.join(".env").is_file();
    PrepareResponse {
        path: prepared.work_dir.display().to_string(),
        branch: prepared.branch_name,
        has_env_file,
        is_workspace,
    }
}

/// `POST /api/repo/prepare` (spec.md §4.8 modes 1-4).
pub async fn prepare(Json(req): Json<PrepareRequest>) -> Result<Json<PrepareResponse>, (StatusCode, String)> {
    let cfg = swe_core::config::ensure_loaded();

    let result = tokio::task::spawn_blocking(move || -> Result<(workspace::PreparedWorkspace, bool), String> {
        match req.mode.as_str() {
            "workspace" => {
                if let Some(branch) = req.branch.filter(|b| !b.is_empty()) {
                    workspace::prepare_named_branch(&cfg.workspace_root, &cfg.worktrees_root, &branch)
                        .map(|p| (p, true))
                        .map_err(|e| e.to_string())
                } else {
                    workspace::prepare_default_workspace(&cfg.workspace_root)
                        .map(|p| (p, true))
                        .map_err(|e| e.to_string())
                }
            }
            "clone" => {
                let url = req.url.ok_or_else(|| "clone mode requires url".to_string())?;
                workspace::prepare_external_url(&cfg.repos_root, &url, req.branch.as_deref())
                    .map(|p| (p, false))
                    .map_err(|e| e.to_string())
            }
            "create" => {
                let name = req.name.ok_or_else(|| "create mode requires name".to_string())?;
                workspace::prepare_new_project(&cfg.repos_root, &name)
                    .map(|p| (p, false))
                    .map_err(|e| e.to_string())
            }
            other => Err(format!("unknown mode: {other}")),
        }
        .map(|(prepared, is_workspace)| {
            let _ = req.path;
            let _ = workspace::copy_scaffold(cfg.scaffold_dir.as_deref(), &prepared.work_dir);
            (prepared, is_workspace)
        })
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    match result {
        Ok((prepared, is_workspace)) => Ok(Json(to_response(prepared, is_workspace))),
        Err(msg) => Err((StatusCode::BAD_REQUEST, msg)),
    }
}

#[derive(Deserialize)]
pub struct BranchesParams {
    path: String,
}

/// `GET /api/repo/branches?path=…` — local + remote-tracking branch names.
pub async fn branches(Query(params): Query<BranchesParams>) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let path = PathBuf::from(params.path);
    let output = tokio::task::spawn_blocking(move || {
        std::process::Command::new("git")
            .args(["branch", "-a", "--format=%(refname:short)"])
            .current_dir(&path)
            .output()
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    if !output.status.success() {
        return Err((StatusCode::BAD_REQUEST, String::from_utf8_lossy(&output.stderr).to_string()));
    }
    let branches: Vec<String> =
        String::from_utf8_lossy(&output.stdout).lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect();
    Ok(Json(serde_json::json!({ "branches": branches })))
}

#[derive(Serialize)]
struct RepoEntry {
    path: String,
    dir_name: String,
    remote_url: Option<String>,
}

/// `GET /api/repos` — every repo the preparer has cloned under `reposRoot`.
pub async fn list_repos() -> Json<serde_json::Value> {
    let cfg = swe_core::config::ensure_loaded();
    let repos_root = cfg.repos_root.clone();
    let repos = tokio::task::spawn_blocking(move || scan_repos(&repos_root)).await.unwrap_or_default();
    Json(serde_json::json!({ "repos": repos }))
}

fn scan_repos(repos_root: &std::path::Path) -> Vec<RepoEntry> {
    let Ok(entries) = std::fs::read_dir(repos_root) else { return Vec::new() };
    let mut out = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let dir_name = entry.file_name().to_string_lossy().to_string();
        let workspace = entry.path().join("workspace");
        if !workspace.is_dir() {
            continue;
        }
        let remote_url = std::process::Command::new("git")
            .args(["remote", "get-url", "origin"])
            .current_dir(&workspace)
            .output()
            .ok()
            .filter(|o| o.status.success())
            .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string());
        out.push(RepoEntry { path: workspace.display().to_string(), dir_name, remote_url });
    }
    out
}
