// Read surface over the profile store and the scrape manager.

use std::io::Write;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::AppState;
use crate::config;
use crate::models::BasicQueryParam;
use crate::version::{NAME, VERSION};

/// GET /version — service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// POST /continuous-profiling/list — timestamps per target in a time range.
pub(super) async fn query_list(
    State(state): State<AppState>,
    Json(param): Json<BasicQueryParam>,
) -> Response {
    match state.store.query_profile_list(&param).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "query profile list failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

/// POST /continuous-profiling/download — matching profiles as a zip
/// attachment, one entry per stored blob.
pub(super) async fn download(
    State(state): State<AppState>,
    Json(param): Json<BasicQueryParam>,
) -> Response {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();

    let scanned = state
        .store
        .query_profile_data(&param, |target, ts, data| {
            writer.start_file(
                format!(
                    "{}_{}_{}_{}",
                    target.kind, target.component, target.address, ts
                ),
                options,
            )?;
            writer.write_all(data)?;
            Ok(())
        })
        .await;
    if let Err(e) = scanned {
        tracing::warn!(error = %e, "query profile data failed");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        )
            .into_response();
    }

    let archive = match writer.finish() {
        Ok(cursor) => cursor.into_inner(),
        Err(e) => {
            tracing::warn!(error = %e, "finish profile archive failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "failed to build archive"})),
            )
                .into_response();
        }
    };

    let filename = format!("profile{}.zip", chrono::Local::now().format("%Y%m%d%H%M%S"));
    (
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        archive,
    )
        .into_response()
}

/// GET /continuous-profiling/components — members currently scraped.
pub(super) async fn components(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.manager.components())
}

#[derive(Debug, Deserialize)]
pub(super) struct EstimateQuery {
    days: u64,
}

/// GET /continuous-profiling/estimate_size?days=n — projected on-disk bytes
/// for keeping `days` worth of profiles at the current scrape cadence.
pub(super) async fn estimate_size(
    State(state): State<AppState>,
    Query(query): Query<EstimateQuery>,
) -> impl IntoResponse {
    let cfg = config::global_config().continuous_profiling;
    let scrapes = query.days * 86400 / (cfg.interval_seconds.max(1) as u64);
    let estimate = scrapes * state.manager.total_last_scrape_size() / 10;
    Json(estimate)
}
