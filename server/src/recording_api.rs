//! Recording REST API (spec.md §6): list, delete, download (as a zip), and
//! pin ("keep") recordings. Reads `RecordingMetadata` straight off disk —
//! there is no in-memory recording registry distinct from the filesystem.

use std::io::Write as _;

use axum::body::Body;
use axum::extract::Path;
use axum::http::{header, StatusCode};
use axum::response::{Json, Response};
use serde::Serialize;
use uuid::Uuid;

use swe_core::recording;

#[derive(Serialize)]
struct RecordingListItem {
    uuid: Uuid,
    name: Option<String>,
    agent: String,
    started_at: chrono::DateTime<chrono::Utc>,
    ended_at: Option<chrono::DateTime<chrono::Utc>>,
    has_timing: bool,
    size_bytes: u64,
    is_active: bool,
    kept_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub async fn list() -> Json<serde_json::Value> {
    let cfg = swe_core::config::ensure_loaded();
    let items: Vec<RecordingListItem> = recording::list_all(&cfg.recordings_root)
        .into_iter()
        .map(|m| {
            let (log, timing, _meta) = recording::recording_files(&cfg.recordings_root, m.uuid);
            RecordingListItem {
                uuid: m.uuid,
                name: m.name,
                agent: m.agent,
                started_at: m.started_at,
                ended_at: m.ended_at,
                has_timing: timing.is_file(),
                size_bytes: std::fs::metadata(&log).map(|md| md.len()).unwrap_or(0),
                is_active: m.ended_at.is_none(),
                kept_at: m.kept_at,
            }
        })
        .collect();
    Json(serde_json::json!({ "recordings": items }))
}

/// `DELETE /api/recording/{uuid}` — 404 unknown, 409 still running, else 204.
pub async fn delete_recording(Path(uuid): Path<Uuid>) -> Result<StatusCode, (StatusCode, String)> {
    let cfg = swe_core::config::ensure_loaded();
    let meta = recording::read_metadata(&cfg.recordings_root, uuid)
        .ok_or((StatusCode::NOT_FOUND, "recording not found".to_string()))?;
    if meta.ended_at.is_none() {
        return Err((StatusCode::CONFLICT, "recording is still active".to_string()));
    }
    recording::delete(&cfg.recordings_root, uuid).map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/recording/{uuid}/download` — zip of `.log`/`.timing`/`.metadata.json`.
pub async fn download(Path(uuid): Path<Uuid>) -> Result<Response, (StatusCode, String)> {
    let cfg = swe_core::config::ensure_loaded();
    recording::read_metadata(&cfg.recordings_root, uuid)
        .ok_or((StatusCode::NOT_FOUND, "recording not found".to_string()))?;
    let (log, timing, meta) = recording::recording_files(&cfg.recordings_root, uuid);

    let bytes = tokio::task::spawn_blocking(move || zip_recording(&log, &timing, &meta))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let short = uuid.to_string().chars().take(8).collect::<String>();
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(header::CONTENT_DISPOSITION, format!("attachment; filename=\"recording-{short}.zip\""))
        .body(Body::from(bytes))
        .unwrap())
}

fn zip_recording(log: &std::path::Path, timing: &std::path::Path, meta: &std::path::Path) -> std::io::Result<Vec<u8>> {
    let mut buf = std::io::Cursor::new(Vec::new());
    let mut writer = zip::ZipWriter::new(&mut buf);
    let options = zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (path, entry_name) in [(log, "session.log"), (timing, "session.timing"), (meta, "session.metadata.json")] {
        if let Ok(contents) = std::fs::read(path) {
            writer.start_file(entry_name, options)?;
            writer.write_all(&contents)?;
        }
    }
    writer.finish()?;
    drop(writer);
    Ok(buf.into_inner())
}

/// `POST /api/recording/{uuid}/keep` — idempotent pin against the sweeper.
pub async fn keep(Path(uuid): Path<Uuid>) -> Result<StatusCode, (StatusCode, String)> {
    let cfg = swe_core::config::ensure_loaded();
    recording::read_metadata(&cfg.recordings_root, uuid)
        .ok_or((StatusCode::NOT_FOUND, "recording not found".to_string()))?;
    let (_log, _timing, meta_path) = recording::recording_files(&cfg.recordings_root, uuid);
    let mut meta = recording::read_metadata(&cfg.recordings_root, uuid).unwrap();
    meta.kept_at = Some(chrono::Utc::now());
    let data = serde_json::to_string_pretty(&meta).map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    std::fs::write(&meta_path, data).map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}
