//! Append-only audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use uuid::Uuid;

/// One immutable audit record.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    pub id: Uuid,

    /// User or operator that performed the action.
    pub actor_id: Uuid,

    /// Stable action identifier, e.g. `deployment.created` or `DELETE_DEPLOYMENT`.
    pub action: String,

    /// Resource kind, e.g. `Deployment`.
    pub resource_type: String,

    pub resource_id: Option<String>,

    /// Free-form context captured at the time of the action.
    pub metadata: Json<serde_json::Value>,

    pub created_at: DateTime<Utc>,
}
