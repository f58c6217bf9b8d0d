//! Operator endpoints under `/api/admin`. All require an admin token.

use crate::{
    errors::AppError,
    handlers::auth::AdminUser,
    models::{deployment::DeploymentStatus, job::{Job, JobStatus}},
    services::{
        SideEffect,
        admin_service::{
            DeploymentPage, DeploymentQuery, PlatformStats, SystemMetrics, UserDeleted, UserPage,
            UserQuery,
        },
        publish_service::DeletionOutcome,
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ListDeploymentsQuery {
    pub search: Option<String>,
    /// A status name, or `all`.
    pub status: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
}

#[derive(Serialize)]
pub struct Deleted {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: DeletionOutcome,
}

#[derive(Serialize)]
pub struct RebuildResponse {
    pub success: bool,
    pub message: &'static str,
    pub job: Job,
    pub audit: SideEffect,
}

#[derive(Serialize)]
pub struct UserRemoved {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: UserDeleted,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheClearedResponse {
    pub success: bool,
    pub invalidation_id: String,
    pub message: &'static str,
    pub audit: SideEffect,
}

#[derive(Serialize)]
pub struct Optimized {
    pub success: bool,
    pub message: &'static str,
    pub audit: SideEffect,
}

#[derive(Serialize)]
pub struct JobList {
    pub jobs: Vec<Job>,
}

#[derive(Serialize)]
pub struct Cancelled {
    pub success: bool,
    pub job: Job,
}

/// `GET /api/admin/deployments?search=&status=&page=&limit=`
pub async fn list_deployments(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(q): Query<ListDeploymentsQuery>,
) -> Result<Json<DeploymentPage>, AppError> {
    let status = parse_filter::<DeploymentStatus>(q.status.as_deref())?;
    let page = state
        .admin
        .list_deployments(DeploymentQuery {
            search: q.search,
            status,
            page: q.page,
            limit: q.limit,
        })
        .await?;
    Ok(Json(page))
}

/// `DELETE /api/admin/deployments/{id}`: remove objects (best effort) and the row.
pub async fn delete_deployment(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<Deleted>, AppError> {
    let outcome = state.publisher.delete_deployment(&admin, &id).await?;
    Ok(Json(Deleted {
        success: true,
        outcome,
    }))
}

/// `POST /api/admin/deployments/{id}/rebuild`: queue a rebuild job.
pub async fn rebuild_deployment(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<RebuildResponse>, AppError> {
    let queued = state.admin.rebuild_deployment(&admin, &id).await?;
    Ok(Json(RebuildResponse {
        success: true,
        message: "Rebuild job queued",
        job: queued.job,
        audit: queued.audit,
    }))
}

/// `GET /api/admin/jobs?status=`
pub async fn list_jobs(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(q): Query<ListJobsQuery>,
) -> Result<Json<JobList>, AppError> {
    let status = parse_filter::<JobStatus>(q.status.as_deref())?;
    let jobs = state.admin.list_jobs(status).await?;
    Ok(Json(JobList { jobs }))
}

/// `DELETE /api/admin/jobs/{id}`: cancel a pending job.
pub async fn cancel_job(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Cancelled>, AppError> {
    let job = state.admin.cancel_job(&admin, id).await?;
    Ok(Json(Cancelled { success: true, job }))
}

/// `GET /api/admin/stats`
pub async fn stats(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> Result<Json<PlatformStats>, AppError> {
    Ok(Json(state.admin.stats().await?))
}

/// `GET /api/admin/users?search=&page=&limit=`
pub async fn list_users(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(q): Query<ListUsersQuery>,
) -> Result<Json<UserPage>, AppError> {
    let page = state
        .admin
        .list_users(UserQuery {
            search: q.search,
            page: q.page,
            limit: q.limit,
        })
        .await?;
    Ok(Json(page))
}

/// `DELETE /api/admin/users/{id}`: the account and everything it owns.
pub async fn delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Json<UserRemoved>, AppError> {
    let outcome = state.admin.delete_user(&admin, id).await?;
    Ok(Json(UserRemoved {
        success: true,
        outcome,
    }))
}

/// `POST /api/admin/system/clear-cache`: invalidate `/*` on the CDN.
pub async fn clear_cache(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
) -> Result<Json<CacheClearedResponse>, AppError> {
    let cleared = state.admin.clear_cache(&admin).await?;
    Ok(Json(CacheClearedResponse {
        success: true,
        invalidation_id: cleared.invalidation_id,
        message: "Cache invalidation request sent",
        audit: cleared.audit,
    }))
}

/// `POST /api/admin/system/optimize-db`
pub async fn optimize_database(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
) -> Result<Json<Optimized>, AppError> {
    let audit = state.admin.optimize_database(&admin).await?;
    Ok(Json(Optimized {
        success: true,
        message: "Database optimization completed",
        audit,
    }))
}

/// `GET /api/admin/system/metrics`
pub async fn system_metrics(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> Result<Json<SystemMetrics>, AppError> {
    Ok(Json(state.admin.system_metrics().await?))
}

/// `None`, empty and `all` mean no filter.
fn parse_filter<T>(raw: Option<&str>) -> Result<Option<T>, AppError>
where
    T: std::str::FromStr<Err = String>,
{
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) if s.eq_ignore_ascii_case("all") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(AppError::bad_request),
    }
}
