//! Append-only audit trail stored in `audit_logs`.

use super::SideEffect;
use crate::models::audit::AuditLog;
use chrono::Utc;
use serde_json::Value;
use sqlx::{SqlitePool, types::Json};
use tracing::warn;
use uuid::Uuid;

/// An action about to be recorded.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub actor_id: Uuid,
    pub action: &'static str,
    pub resource_type: &'static str,
    pub resource_id: Option<String>,
    pub metadata: Value,
}

#[derive(Clone)]
pub struct AuditLogger {
    db: SqlitePool,
}

impl AuditLogger {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Insert one row. Rows are never updated or deleted.
    pub async fn append(&self, entry: AuditEntry) -> Result<AuditLog, sqlx::Error> {
        sqlx::query_as::<_, AuditLog>(
            "INSERT INTO audit_logs (id, actor_id, action, resource_type, resource_id, metadata, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING id, actor_id, action, resource_type, resource_id, metadata, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(entry.actor_id)
        .bind(entry.action)
        .bind(entry.resource_type)
        .bind(entry.resource_id)
        .bind(Json(entry.metadata))
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await
    }

    /// `append`, but a failure is logged and reported instead of returned.
    pub async fn record(&self, entry: AuditEntry) -> SideEffect {
        let action = entry.action;
        match self.append(entry).await {
            Ok(_) => SideEffect::Completed,
            Err(err) => {
                warn!(action, error = %err, "failed to write audit log entry");
                SideEffect::failed(err)
            }
        }
    }

    /// Entries for one resource, oldest first.
    pub async fn for_resource(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Vec<AuditLog>, sqlx::Error> {
        sqlx::query_as::<_, AuditLog>(
            "SELECT id, actor_id, action, resource_type, resource_id, metadata, created_at
             FROM audit_logs WHERE resource_type = ? AND resource_id = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(resource_type)
        .bind(resource_id)
        .fetch_all(&self.db)
        .await
    }
}
