//! A named deployment target addressed by its subdomain.

use super::deployment::Deployment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Project owned by exactly one user.
///
/// `subdomain` is unique across all projects and never changes after the
/// project is created.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,

    /// Owning user.
    pub user_id: Uuid,

    /// Display name.
    pub name: String,

    /// Globally unique DNS label (lowercase letters, digits, hyphens).
    pub subdomain: String,

    pub description: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Project listing entry with its most recent deployment.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    #[serde(flatten)]
    pub project: Project,

    pub deployment_count: i64,

    /// Most recent deployment by creation time, if any.
    pub latest_deployment: Option<Deployment>,
}
