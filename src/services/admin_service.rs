//! Operator views and actions: deployments, users, the job queue and
//! platform maintenance.

use super::{
    SideEffect,
    audit_service::{AuditEntry, AuditLogger},
    deployment_records::{self, DETAILS_SELECT},
    publish_service::PublishService,
};
use crate::{
    cdn::CdnError,
    models::{
        deployment::{DeploymentDetails, DeploymentStatus},
        job::{Job, JobStatus, REBUILD_DEPLOYMENT},
        user::User,
    },
};
use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::{FromRow, QueryBuilder, SqlitePool, sqlite::Sqlite, types::Json};
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 100;
const JOB_LIST_LIMIT: i64 = 100;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("deployment `{0}` not found")]
    DeploymentNotFound(String),
    #[error("job `{0}` not found")]
    JobNotFound(Uuid),
    #[error("can only cancel pending jobs (job is {0:?})")]
    JobNotPending(JobStatus),
    #[error("user `{0}` not found")]
    UserNotFound(Uuid),
    #[error("CDN distribution ID not configured")]
    CdnNotConfigured,
    #[error(transparent)]
    Cdn(#[from] CdnError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Filters for `list_deployments`.
#[derive(Debug, Clone, Default)]
pub struct DeploymentQuery {
    /// Case-insensitive substring of project name, owner e-mail or subdomain.
    pub search: Option<String>,
    /// `None` lists every status.
    pub status: Option<DeploymentStatus>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Pagination {
    pub total: i64,
    pub page: u32,
    pub limit: u32,
    pub pages: i64,
}

#[derive(Serialize, Debug, Clone)]
pub struct DeploymentPage {
    pub deployments: Vec<DeploymentDetails>,
    pub pagination: Pagination,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RebuildQueued {
    pub job: Job,
    pub audit: SideEffect,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentCounts {
    pub total: i64,
    pub uploading: i64,
    pub ready: i64,
    pub failed: i64,
    pub pending: i64,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStats {
    pub users: i64,
    pub projects: i64,
    pub deployments: DeploymentCounts,
    /// Bytes held by `READY` deployments.
    pub bytes_stored: i64,
    pub pending_jobs: i64,
}

/// Filters for `list_users`.
#[derive(Debug, Clone, Default)]
pub struct UserQuery {
    /// Case-insensitive substring of e-mail or name.
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Serialize, Debug, Clone, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub user: User,
    pub project_count: i64,
    pub deployment_count: i64,
}

#[derive(Serialize, Debug, Clone)]
pub struct UserPage {
    pub users: Vec<UserSummary>,
    pub pagination: Pagination,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserDeleted {
    pub user_id: Uuid,
    pub project_count: i64,
    pub deployment_count: usize,
    pub objects_removed: usize,
    pub storage: SideEffect,
    pub audit: SideEffect,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CacheCleared {
    pub invalidation_id: String,
    pub audit: SideEffect,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageUsage {
    pub objects: usize,
    pub bytes: u64,
    pub listing: SideEffect,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseUsage {
    pub size_bytes: i64,
    pub tables: i64,
    pub connections: u32,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformActivity {
    pub uptime_seconds: u64,
    pub deployments_last_24h: i64,
    pub failed_last_24h: i64,
    /// Percentage of the last day's deployments that failed.
    pub error_rate: f64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SystemMetrics {
    pub storage: StorageUsage,
    pub database: DatabaseUsage,
    pub platform: PlatformActivity,
}

#[derive(Clone)]
pub struct AdminService {
    db: SqlitePool,
    audit: AuditLogger,
    publisher: PublishService,
    started_at: Instant,
}

impl AdminService {
    pub fn new(db: SqlitePool, audit: AuditLogger, publisher: PublishService) -> Self {
        Self {
            db,
            audit,
            publisher,
            started_at: Instant::now(),
        }
    }

    /// Newest deployments first, with page-based pagination.
    pub async fn list_deployments(
        &self,
        query: DeploymentQuery,
    ) -> Result<DeploymentPage, AdminError> {
        let (page, limit) = page_window(query.page, query.limit);
        let search = query.search.as_deref().and_then(like_pattern);

        let mut count = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) FROM deployments d
             JOIN projects p ON p.id = d.project_id
             JOIN users u ON u.id = p.user_id",
        );
        push_filters(&mut count, search.as_deref(), query.status);
        let total: i64 = count.build_query_scalar().fetch_one(&self.db).await?;

        let mut select = QueryBuilder::<Sqlite>::new(DETAILS_SELECT);
        push_filters(&mut select, search.as_deref(), query.status);
        select.push(" ORDER BY d.created_at DESC LIMIT ");
        select.push_bind(i64::from(limit));
        select.push(" OFFSET ");
        select.push_bind(i64::from(page - 1) * i64::from(limit));
        let deployments: Vec<DeploymentDetails> =
            select.build_query_as().fetch_all(&self.db).await?;

        Ok(DeploymentPage {
            deployments,
            pagination: pagination(total, page, limit),
        })
    }

    /// Queue a `REBUILD_DEPLOYMENT` job. The deployment itself is untouched.
    pub async fn rebuild_deployment(
        &self,
        actor: &User,
        deployment_id: &str,
    ) -> Result<RebuildQueued, AdminError> {
        let details = deployment_records::find_details(&self.db, deployment_id)
            .await?
            .ok_or_else(|| AdminError::DeploymentNotFound(deployment_id.to_string()))?;

        let now = Utc::now();
        let job = sqlx::query_as::<_, Job>(
            "INSERT INTO job_queue (id, job_type, payload, status, scheduled_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(REBUILD_DEPLOYMENT)
        .bind(Json(json!({
            "deploymentId": details.deployment.id,
            "projectId": details.deployment.project_id,
        })))
        .bind(JobStatus::Pending)
        .bind(now)
        .bind(now)
        .fetch_one(&self.db)
        .await?;
        info!(job_id = %job.id, deployment_id, "rebuild job queued");

        let audit = self
            .audit
            .record(AuditEntry {
                actor_id: actor.id,
                action: "REBUILD_DEPLOYMENT",
                resource_type: "Deployment",
                resource_id: Some(deployment_id.to_string()),
                metadata: json!({
                    "projectName": details.project_name,
                    "userEmail": details.owner_email,
                    "subdomain": details.subdomain,
                }),
            })
            .await;

        Ok(RebuildQueued { job, audit })
    }

    /// Most recent jobs, optionally filtered by status.
    pub async fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<Job>, AdminError> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM job_queue");
        if let Some(status) = status {
            builder.push(" WHERE status = ");
            builder.push_bind(status);
        }
        builder.push(" ORDER BY created_at DESC LIMIT ");
        builder.push_bind(JOB_LIST_LIMIT);
        Ok(builder.build_query_as().fetch_all(&self.db).await?)
    }

    /// `PENDING -> CANCELLED`. Any other status is refused.
    pub async fn cancel_job(&self, actor: &User, job_id: Uuid) -> Result<Job, AdminError> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM job_queue WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(AdminError::JobNotFound(job_id))?;
        if job.status != JobStatus::Pending {
            return Err(AdminError::JobNotPending(job.status));
        }

        let cancelled = sqlx::query_as::<_, Job>(
            "UPDATE job_queue SET status = ?, completed_at = ?
             WHERE id = ? AND status = ?
             RETURNING *",
        )
        .bind(JobStatus::Cancelled)
        .bind(Utc::now())
        .bind(job_id)
        .bind(JobStatus::Pending)
        .fetch_optional(&self.db)
        .await?;
        // A worker may have claimed it between the read and the update.
        let Some(cancelled) = cancelled else {
            return Err(AdminError::JobNotPending(JobStatus::Running));
        };

        self.audit
            .record(AuditEntry {
                actor_id: actor.id,
                action: "CANCEL_JOB",
                resource_type: "JobQueue",
                resource_id: Some(job_id.to_string()),
                metadata: json!({ "jobType": cancelled.job_type }),
            })
            .await;
        Ok(cancelled)
    }

    /// Accounts with their project and deployment counts, newest first.
    pub async fn list_users(&self, query: UserQuery) -> Result<UserPage, AdminError> {
        let (page, limit) = page_window(query.page, query.limit);
        let search = query.search.as_deref().and_then(like_pattern);

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM users u WHERE 1 = 1");
        push_user_search(&mut count, search.as_deref());
        let total: i64 = count.build_query_scalar().fetch_one(&self.db).await?;

        let mut select = QueryBuilder::<Sqlite>::new(
            "SELECT u.id, u.email, u.name, u.role, u.created_at,
                    (SELECT COUNT(*) FROM projects p WHERE p.user_id = u.id) AS project_count,
                    (SELECT COUNT(*) FROM deployments d
                       JOIN projects p ON p.id = d.project_id
                      WHERE p.user_id = u.id) AS deployment_count
             FROM users u WHERE 1 = 1",
        );
        push_user_search(&mut select, search.as_deref());
        select.push(" ORDER BY u.created_at DESC LIMIT ");
        select.push_bind(i64::from(limit));
        select.push(" OFFSET ");
        select.push_bind(i64::from(page - 1) * i64::from(limit));
        let users: Vec<UserSummary> = select.build_query_as().fetch_all(&self.db).await?;

        Ok(UserPage {
            users,
            pagination: pagination(total, page, limit),
        })
    }

    /// Remove an account with its projects, deployments and tokens.
    ///
    /// Stored objects are removed first, best effort; the account row is
    /// deleted even when that cleanup fails.
    pub async fn delete_user(&self, actor: &User, user_id: Uuid) -> Result<UserDeleted, AdminError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, name, role, created_at FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AdminError::UserNotFound(user_id))?;

        let project_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM projects WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&self.db)
                .await?;
        let storage_paths: Vec<String> = sqlx::query_scalar(
            "SELECT d.storage_path FROM deployments d
             JOIN projects p ON p.id = d.project_id
             WHERE p.user_id = ?",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        let mut objects_removed = 0;
        let mut storage = SideEffect::Completed;
        for path in &storage_paths {
            let (removed, outcome) = self.publisher.remove_objects(path).await;
            objects_removed += removed;
            if outcome.is_failed() && !storage.is_failed() {
                storage = outcome;
            }
        }

        let deleted = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&self.db)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(AdminError::UserNotFound(user_id));
        }
        info!(%user_id, deployments = storage_paths.len(), objects_removed, "user deleted");

        let audit = self
            .audit
            .record(AuditEntry {
                actor_id: actor.id,
                action: "DELETE_USER",
                resource_type: "User",
                resource_id: Some(user_id.to_string()),
                metadata: json!({
                    "email": user.email,
                    "projectCount": project_count,
                    "deploymentCount": storage_paths.len(),
                }),
            })
            .await;

        Ok(UserDeleted {
            user_id,
            project_count,
            deployment_count: storage_paths.len(),
            objects_removed,
            storage,
            audit,
        })
    }

    /// Invalidate every path on the CDN distribution.
    pub async fn clear_cache(&self, actor: &User) -> Result<CacheCleared, AdminError> {
        let (distribution_id, cdn) = self.publisher.cdn().ok_or(AdminError::CdnNotConfigured)?;
        let invalidation_id = cdn.invalidate(distribution_id, &["/*".to_string()]).await?;
        info!(%invalidation_id, distribution_id, "full CDN invalidation requested");

        let audit = self
            .audit
            .record(AuditEntry {
                actor_id: actor.id,
                action: "CLEAR_CACHE",
                resource_type: "System",
                resource_id: None,
                metadata: json!({
                    "distributionId": distribution_id,
                    "invalidationId": invalidation_id,
                }),
            })
            .await;

        Ok(CacheCleared {
            invalidation_id,
            audit,
        })
    }

    /// `VACUUM` then `ANALYZE` the database.
    pub async fn optimize_database(&self, actor: &User) -> Result<SideEffect, AdminError> {
        sqlx::query("VACUUM").execute(&self.db).await?;
        sqlx::query("ANALYZE").execute(&self.db).await?;
        info!("database optimized");

        Ok(self
            .audit
            .record(AuditEntry {
                actor_id: actor.id,
                action: "OPTIMIZE_DATABASE",
                resource_type: "System",
                resource_id: None,
                metadata: json!({}),
            })
            .await)
    }

    /// Storage, database and recent-activity figures.
    ///
    /// A failed bucket listing reports zero objects with `listing` failed.
    pub async fn system_metrics(&self) -> Result<SystemMetrics, AdminError> {
        let bucket = self.publisher.config().bucket.as_str();
        let storage = match self.publisher.store().list_by_prefix(bucket, "").await {
            Ok(entries) => StorageUsage {
                objects: entries.len(),
                bytes: entries.iter().map(|entry| entry.size).sum(),
                listing: SideEffect::Completed,
            },
            Err(err) => {
                warn!(bucket, error = %err, "failed to list bucket for metrics");
                StorageUsage {
                    objects: 0,
                    bytes: 0,
                    listing: SideEffect::failed(err),
                }
            }
        };

        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.db)
            .await?;
        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&self.db)
            .await?;
        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_one(&self.db)
        .await?;
        let database = DatabaseUsage {
            size_bytes: page_count * page_size,
            tables,
            connections: self.db.size(),
        };

        let since = Utc::now() - Duration::hours(24);
        let (recent, failed): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = ? THEN 1 ELSE 0 END), 0)
             FROM deployments WHERE created_at >= ?",
        )
        .bind(DeploymentStatus::Failed)
        .bind(since)
        .fetch_one(&self.db)
        .await?;
        let error_rate = if recent == 0 {
            0.0
        } else {
            failed as f64 * 100.0 / recent as f64
        };

        Ok(SystemMetrics {
            storage,
            database,
            platform: PlatformActivity {
                uptime_seconds: self.started_at.elapsed().as_secs(),
                deployments_last_24h: recent,
                failed_last_24h: failed,
                error_rate,
            },
        })
    }

    pub async fn stats(&self) -> Result<PlatformStats, AdminError> {
        let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.db)
            .await?;
        let projects: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects")
            .fetch_one(&self.db)
            .await?;

        let by_status: Vec<(DeploymentStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM deployments GROUP BY status")
                .fetch_all(&self.db)
                .await?;
        let mut deployments = DeploymentCounts::default();
        for (status, n) in by_status {
            deployments.total += n;
            match status {
                DeploymentStatus::Uploading => deployments.uploading = n,
                DeploymentStatus::Ready => deployments.ready = n,
                DeploymentStatus::Failed => deployments.failed = n,
                DeploymentStatus::Pending => deployments.pending = n,
            }
        }

        let bytes_stored: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(total_size), 0) FROM deployments WHERE status = ?",
        )
        .bind(DeploymentStatus::Ready)
        .fetch_one(&self.db)
        .await?;
        let pending_jobs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_queue WHERE status = ?")
            .bind(JobStatus::Pending)
            .fetch_one(&self.db)
            .await?;

        Ok(PlatformStats {
            users,
            projects,
            deployments,
            bytes_stored,
            pending_jobs,
        })
    }
}

fn push_filters(
    builder: &mut QueryBuilder<'_, Sqlite>,
    search: Option<&str>,
    status: Option<DeploymentStatus>,
) {
    builder.push(" WHERE 1 = 1");
    if let Some(pattern) = search {
        builder.push(" AND (");
        push_like_any(builder, &["p.name", "u.email", "p.subdomain"], pattern);
        builder.push(")");
    }
    if let Some(status) = status {
        builder.push(" AND d.status = ");
        builder.push_bind(status);
    }
}

fn push_user_search(builder: &mut QueryBuilder<'_, Sqlite>, search: Option<&str>) {
    if let Some(pattern) = search {
        builder.push(" AND (");
        push_like_any(builder, &["u.email", "u.name"], pattern);
        builder.push(")");
    }
}

/// `LOWER(col) LIKE ? ESCAPE '\'` for each column, joined with `OR`.
fn push_like_any(builder: &mut QueryBuilder<'_, Sqlite>, columns: &[&str], pattern: &str) {
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            builder.push(" OR ");
        }
        builder.push(format!("LOWER(COALESCE({column}, '')) LIKE "));
        builder.push_bind(pattern.to_string());
        builder.push(" ESCAPE '\\'");
    }
}

/// Trimmed, lowercased substring pattern with LIKE wildcards escaped.
/// Blank input means no filter.
fn like_pattern(search: &str) -> Option<String> {
    let search = search.trim().to_lowercase();
    if search.is_empty() {
        return None;
    }
    let mut pattern = String::with_capacity(search.len() + 2);
    pattern.push('%');
    for c in search.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    Some(pattern)
}

fn page_window(page: Option<u32>, limit: Option<u32>) -> (u32, u32) {
    let page = page.unwrap_or(1).max(1);
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    (page, limit)
}

fn pagination(total: i64, page: u32, limit: u32) -> Pagination {
    Pagination {
        total,
        page,
        limit,
        pages: (total + i64::from(limit) - 1) / i64::from(limit),
    }
}
