//! One publish event for a project.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle of a deployment.
///
/// `Uploading -> Ready | Failed`. `Ready` and `Failed` are terminal; a new
/// publish always creates a new deployment. `Pending` is reserved for
/// manually triggered flows and is never entered by the publish pipeline.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Pending,
    Uploading,
    Ready,
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Uploading => "UPLOADING",
            Self::Ready => "READY",
            Self::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "UPLOADING" => Ok(Self::Uploading),
            "READY" => Ok(Self::Ready),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown deployment status `{other}`")),
        }
    }
}

/// Deployment row.
///
/// `file_count` and `total_size` are only set once the deployment reaches
/// `Ready`; they stay `None` while uploading and on failure.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// Caller-generated nanoid, globally unique.
    pub id: String,

    pub project_id: Uuid,

    pub user_id: Uuid,

    pub status: DeploymentStatus,

    /// Object-store key prefix, `{subdomain}/{id}`.
    pub storage_path: String,

    /// Public URL, computed from configuration and the project subdomain.
    pub url: String,

    pub file_count: Option<i64>,

    pub total_size: Option<i64>,

    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,

    pub published_at: Option<DateTime<Utc>>,

    pub failed_at: Option<DateTime<Utc>>,
}

/// Deployment joined with its project and owner, as shown to operators.
#[derive(Serialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentDetails {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub deployment: Deployment,

    pub project_name: String,

    pub subdomain: String,

    pub owner_email: String,
}

/// What a publish call hands back to its caller.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DeploymentDescriptor {
    pub id: String,
    pub url: String,
    pub status: DeploymentStatus,
}
