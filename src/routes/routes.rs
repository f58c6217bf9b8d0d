//! HTTP surface of the deploy service.
//!
//! ## Structure
//! - **Health**
//!   - `GET    /healthz` — liveness
//!   - `GET    /readyz` — SQLite + object store readiness
//!
//! - **Account endpoints** (bearer token)
//!   - `POST   /api/deploy` — multipart publish
//!   - `GET    /api/projects` — list own projects
//!   - `POST   /api/projects` — create a project
//!
//! - **Admin endpoints** (bearer token, admin role)
//!   - `GET    /api/admin/deployments` — search, filter, paginate
//!   - `DELETE /api/admin/deployments/{id}` — delete objects and row
//!   - `POST   /api/admin/deployments/{id}/rebuild` — queue a rebuild job
//!   - `GET    /api/admin/jobs` — recent jobs
//!   - `DELETE /api/admin/jobs/{id}` — cancel a pending job
//!   - `GET    /api/admin/stats` — platform counters
//!   - `GET    /api/admin/users` — accounts with project/deployment counts
//!   - `DELETE /api/admin/users/{id}` — delete an account and its sites
//!   - `POST   /api/admin/system/clear-cache` — invalidate `/*` on the CDN
//!   - `POST   /api/admin/system/optimize-db` — `VACUUM` + `ANALYZE`
//!   - `GET    /api/admin/system/metrics` — storage, database, activity

use crate::{
    handlers::{
        admin_handlers::{
            cancel_job, clear_cache, delete_deployment, delete_user, list_deployments, list_jobs,
            list_users, optimize_database, rebuild_deployment, stats, system_metrics,
        },
        deploy_handlers::deploy,
        health_handlers::{healthz, readyz},
        project_handlers::{create_project, list_projects},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};

/// Build the router. State is attached by the caller.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Per-file and file-count limits are enforced while the body streams.
        .route(
            "/api/deploy",
            post(deploy).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/projects", get(list_projects).post(create_project))
        .nest("/api/admin", admin_routes())
}

fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/deployments", get(list_deployments))
        .route("/deployments/{id}", delete(delete_deployment))
        .route("/deployments/{id}/rebuild", post(rebuild_deployment))
        .route("/jobs", get(list_jobs))
        .route("/jobs/{id}", delete(cancel_job))
        .route("/stats", get(stats))
        .route("/users", get(list_users))
        .route("/users/{id}", delete(delete_user))
        .route("/system/clear-cache", post(clear_cache))
        .route("/system/optimize-db", post(optimize_database))
        .route("/system/metrics", get(system_metrics))
}
