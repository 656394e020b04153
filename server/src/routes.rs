//! HTTP surface (spec.md §6): session pages, the `/ws/{uuid}` upgrade, and
//! `/healthz`. Recording and repo REST endpoints live in their own modules.

use std::path::PathBuf;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use swe_core::config::Config;
use swe_core::registry::GetOrCreateParams;

use crate::recording_api;
use crate::repo_api;
use crate::state::AppState;
use crate::ws::run_client;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home_page))
        .route("/session/{uuid}", get(session_page))
        .route("/recording/{uuid}", get(recording_page))
        .route("/healthz", get(healthz))
        .route("/ws/{uuid}", get(ws_upgrade))
        .route("/api/recording/list", get(recording_api::list))
        .route("/api/recording/{uuid}", delete(recording_api::delete_recording))
        .route("/api/recording/{uuid}/download", get(recording_api::download))
        .route("/api/recording/{uuid}/keep", post(recording_api::keep))
        .route("/api/repo/prepare", post(repo_api::prepare))
        .route("/api/repo/branches", get(repo_api::branches))
        .route("/api/repos", get(repo_api::list_repos))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Serialize)]
struct HomeData {
    assistants: Vec<String>,
    sessions: Vec<SessionSummaryJson>,
    recordings: Vec<serde_json::Value>,
}

#[derive(Serialize)]
struct SessionSummaryJson {
    uuid: Uuid,
    assistant: String,
    display_name: Option<String>,
    client_count: usize,
    is_active: bool,
}

/// `GET /` — the core supplies only the data (assistants, sessions,
/// recordings); rendering the actual dashboard HTML is an external concern
/// (spec.md §1 "Out of scope").
async fn home_page(State(state): State<AppState>) -> Json<HomeData> {
    let cfg = swe_core::config::ensure_loaded();
    let assistants = swe_core::assistant::ensure_loaded().names().map(str::to_string).collect();
    let sessions = state
        .registry
        .list()
        .into_iter()
        .map(|s| SessionSummaryJson {
            uuid: s.uuid,
            assistant: s.assistant,
            display_name: s.display_name,
            client_count: s.client_count,
            is_active: s.is_active,
        })
        .collect();
    let recordings = swe_core::recording::list_all(&cfg.recordings_root)
        .into_iter()
        .map(|m| serde_json::to_value(m).unwrap_or(serde_json::Value::Null))
        .collect();
    Json(HomeData { assistants, sessions, recordings })
}

async fn session_page(Path(uuid): Path<Uuid>) -> Html<String> {
    Html(format!("<!doctype html><title>session {uuid}</title><div id=\"terminal\" data-uuid=\"{uuid}\"></div>"))
}

async fn recording_page(Path(uuid): Path<Uuid>) -> Html<String> {
    Html(format!("<!doctype html><title>recording {uuid}</title><div id=\"player\" data-uuid=\"{uuid}\"></div>"))
}

#[derive(Deserialize)]
struct WsParams {
    assistant: Option<String>,
    work_dir: Option<String>,
    name: Option<String>,
    branch: Option<String>,
    #[serde(default = "default_true")]
    record: bool,
}

fn default_true() -> bool {
    true
}

/// `GET /ws/{uuid}` (spec.md §6): attaches to the existing session for
/// `uuid` or creates one, then upgrades to a WebSocket.
async fn ws_upgrade(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let cfg: &'static Config = swe_core::config::ensure_loaded();
    let assistant_name = params.assistant.unwrap_or_else(|| "shell".to_string());
    let assistant = match swe_core::assistant::ensure_loaded().get(&assistant_name) {
        Some(a) => a.clone(),
        None => return (StatusCode::BAD_REQUEST, format!("unknown assistant: {assistant_name}")).into_response(),
    };
    let work_dir = params.work_dir.map(PathBuf::from).unwrap_or_else(|| cfg.workspace_root.clone());

    let result = state
        .registry
        .get_or_create(GetOrCreateParams {
            uuid,
            assistant,
            work_dir,
            display_name: params.name,
            branch_name: params.branch,
            record: params.record,
        })
        .await;

    let session = match result {
        Ok((session, _is_new)) => session,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    ws.on_upgrade(move |socket| run_client(socket, session))
}
