//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks SQLite and the object store

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// `GET /healthz`
///
/// Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`
///
/// 1. Runs `SELECT 1` against SQLite.
/// 2. Writes and deletes a throwaway object in the deployment bucket.
///
/// HTTP 200 when both pass, 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let sqlite = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.db)
        .await
    {
        Ok(1) => CheckStatus::ok(),
        Ok(v) => CheckStatus::error(format!("unexpected result: {v}")),
        Err(e) => CheckStatus::error(format!("error: {e}")),
    };

    let store = state.publisher.store();
    let bucket = state.publisher.config().bucket.as_str();
    let check_key = format!(".readyz/{}", Uuid::new_v4());
    let storage = match store
        .put(bucket, &check_key, Bytes::from_static(b"readyz"), "text/plain")
        .await
    {
        Ok(()) => match store.bulk_delete(bucket, &[check_key]).await {
            Ok(()) => CheckStatus::ok(),
            Err(e) => CheckStatus {
                ok: true,
                error: Some(format!("could not remove readiness object: {e}")),
            },
        },
        Err(e) => CheckStatus::error(format!("could not write readiness object: {e}")),
    };

    let overall_ok = sqlite.ok && storage.ok;
    let checks = HashMap::from([("sqlite", sqlite), ("storage", storage)]);
    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn error(message: String) -> Self {
        Self {
            ok: false,
            error: Some(message),
        }
    }
}
