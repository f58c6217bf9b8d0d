//! Shared state handed to every handler.

use crate::{
    cdn::CdnInvalidator,
    config::DeployConfig,
    services::{
        account_service::AccountService, admin_service::AdminService, audit_service::AuditLogger,
        project_service::ProjectService, publish_service::PublishService,
    },
    storage::ObjectStore,
};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub accounts: AccountService,
    pub projects: ProjectService,
    pub publisher: PublishService,
    pub admin: AdminService,
}

impl AppState {
    /// Wire every service onto one pool and one object store.
    pub fn new(
        db: SqlitePool,
        store: Arc<dyn ObjectStore>,
        cdn: Option<Arc<dyn CdnInvalidator>>,
        config: DeployConfig,
    ) -> Self {
        let audit = AuditLogger::new(db.clone());
        let publisher =
            PublishService::new(db.clone(), store, cdn, audit.clone(), Arc::new(config));
        Self {
            accounts: AccountService::new(db.clone()),
            projects: ProjectService::new(db.clone(), audit.clone()),
            admin: AdminService::new(db.clone(), audit, publisher.clone()),
            publisher,
            db,
        }
    }
}
