// Runtime config handlers: read the current snapshot, merge overrides into
// the continuous profiling section.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use super::AppState;
use crate::config::{self, ContinuousProfilingConfig};

const RECOGNIZED_KEYS: [&str; 5] = [
    "enable",
    "profile_seconds",
    "interval_seconds",
    "timeout_seconds",
    "data_retention_seconds",
];

/// GET /config — the effective config, including the runtime profiling
/// section.
pub(super) async fn get_config() -> impl IntoResponse {
    Json(config::global_config().as_ref().clone())
}

/// POST /config — body `{"continuous_profiling": {...}}`. Equal values are
/// skipped; when anything actually changed the merged section replaces the
/// snapshot wholesale and the scrape manager is notified.
pub(super) async fn update_config(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Response {
    let Some(sections) = body.as_object() else {
        return bad_request("config body must be a JSON object");
    };
    for (section, overrides) in sections {
        if section != "continuous_profiling" {
            return bad_request(&format!("config `{section}` not support modified"));
        }
        match merge_profiling_overrides(overrides) {
            Ok(true) => state.manager.notify_reload(),
            Ok(false) => {}
            Err(e) => return bad_request(&e.to_string()),
        }
    }
    "success!".into_response()
}

/// Returns whether the global snapshot was replaced.
fn merge_profiling_overrides(overrides: &Value) -> anyhow::Result<bool> {
    let Some(overrides) = overrides.as_object() else {
        anyhow::bail!("continuous_profiling must be a JSON object");
    };

    let current = config::global_config();
    let mut merged = serde_json::to_value(current.continuous_profiling)?;
    let Some(fields) = merged.as_object_mut() else {
        anyhow::bail!("continuous_profiling is not an object");
    };

    let mut changed = false;
    for (key, value) in overrides {
        if !RECOGNIZED_KEYS.contains(&key.as_str()) {
            anyhow::bail!("unknown config `{key}`");
        }
        if fields.get(key) == Some(value) {
            continue;
        }
        fields.insert(key.clone(), value.clone());
        changed = true;
    }
    if !changed {
        return Ok(false);
    }

    let updated: ContinuousProfilingConfig = serde_json::from_value(merged)?;
    updated.validate()?;

    let mut new_config = current.as_ref().clone();
    new_config.continuous_profiling = updated;
    config::store_global_config(new_config);
    tracing::info!(
        enable = updated.enable,
        profile_seconds = updated.profile_seconds,
        interval_seconds = updated.interval_seconds,
        timeout_seconds = updated.timeout_seconds,
        data_retention_seconds = updated.data_retention_seconds,
        "continuous profiling config updated"
    );
    Ok(true)
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": message})),
    )
        .into_response()
}
