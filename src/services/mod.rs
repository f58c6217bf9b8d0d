//! Domain services behind the HTTP handlers.

pub mod account_service;
pub mod admin_service;
pub mod audit_service;
pub mod deployment_records;
pub mod project_service;
pub mod publish_service;

use serde::Serialize;

/// Outcome of a best-effort side effect (CDN purge, audit append, storage
/// cleanup). A failure here never changes the primary operation's result.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum SideEffect {
    Completed,
    Skipped(String),
    Failed(String),
}

impl SideEffect {
    pub fn failed(err: impl std::fmt::Display) -> Self {
        Self::Failed(err.to_string())
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}
