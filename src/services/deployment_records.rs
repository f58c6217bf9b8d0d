//! Deployment rows in SQLite.
//!
//! Terminal transitions are conditional on `status = 'UPLOADING'`, so a row
//! is finalised at most once and never leaves `READY` or `FAILED`.

use crate::models::deployment::{Deployment, DeploymentDetails, DeploymentStatus};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Columns selected for `DeploymentDetails`.
pub(crate) const DETAILS_SELECT: &str = "SELECT d.id, d.project_id, d.user_id, d.status, d.storage_path, d.url,
        d.file_count, d.total_size, d.error_message, d.created_at, d.published_at, d.failed_at,
        p.name AS project_name, p.subdomain AS subdomain, u.email AS owner_email
 FROM deployments d
 JOIN projects p ON p.id = d.project_id
 JOIN users u ON u.id = p.user_id";

/// Fields of a freshly created deployment.
pub struct NewDeployment<'a> {
    pub id: &'a str,
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub storage_path: &'a str,
    pub url: &'a str,
}

pub async fn insert_uploading(
    db: &SqlitePool,
    new: NewDeployment<'_>,
) -> Result<Deployment, sqlx::Error> {
    sqlx::query_as::<_, Deployment>(
        "INSERT INTO deployments (id, project_id, user_id, status, storage_path, url, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         RETURNING *",
    )
    .bind(new.id)
    .bind(new.project_id)
    .bind(new.user_id)
    .bind(DeploymentStatus::Uploading)
    .bind(new.storage_path)
    .bind(new.url)
    .bind(Utc::now())
    .fetch_one(db)
    .await
}

/// `UPLOADING -> READY` with the final accounting. Returns whether the row
/// transitioned.
pub async fn mark_ready(
    db: &SqlitePool,
    id: &str,
    file_count: i64,
    total_size: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE deployments
         SET status = ?, file_count = ?, total_size = ?, published_at = ?
         WHERE id = ? AND status = ?",
    )
    .bind(DeploymentStatus::Ready)
    .bind(file_count)
    .bind(total_size)
    .bind(Utc::now())
    .bind(id)
    .bind(DeploymentStatus::Uploading)
    .execute(db)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// `UPLOADING -> FAILED`. Counts are left unset. Returns whether the row
/// transitioned.
pub async fn mark_failed(db: &SqlitePool, id: &str, message: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE deployments
         SET status = ?, error_message = ?, failed_at = ?
         WHERE id = ? AND status = ?",
    )
    .bind(DeploymentStatus::Failed)
    .bind(message)
    .bind(Utc::now())
    .bind(id)
    .bind(DeploymentStatus::Uploading)
    .execute(db)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn find(db: &SqlitePool, id: &str) -> Result<Option<Deployment>, sqlx::Error> {
    sqlx::query_as::<_, Deployment>("SELECT * FROM deployments WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await
}

pub async fn find_details(
    db: &SqlitePool,
    id: &str,
) -> Result<Option<DeploymentDetails>, sqlx::Error> {
    sqlx::query_as::<_, DeploymentDetails>(&format!("{DETAILS_SELECT} WHERE d.id = ?"))
        .bind(id)
        .fetch_optional(db)
        .await
}

/// Returns whether a row was removed.
pub async fn delete(db: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM deployments WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;
    Ok(result.rows_affected() == 1)
}
