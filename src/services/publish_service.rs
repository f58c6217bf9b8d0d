//! Upload-and-publish pipeline and its inverse, deployment deletion.
//!
//! Publish: validate the file set, create the deployment row in
//! `UPLOADING`, fan the files out to the object store, finalise the row as
//! `READY` or `FAILED`, then purge the CDN and append an audit entry. The
//! last two are best effort and reported separately from the result.
//!
//! Nothing is rolled back on failure. Objects written before an upload
//! error stay under the deployment's own prefix and are reclaimed by
//! `delete_deployment`.

use super::{
    SideEffect,
    audit_service::{AuditEntry, AuditLogger},
    deployment_records::{self, NewDeployment},
    project_service::find_owned_project,
};
use crate::{
    cdn::CdnInvalidator,
    config::DeployConfig,
    models::{
        deployment::{DeploymentDescriptor, DeploymentStatus},
        user::User,
    },
    storage::{ObjectStore, ensure_key_safe},
};
use bytes::Bytes;
use futures::{StreamExt, stream};
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use std::{collections::HashSet, sync::Arc};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// One file of a publish request.
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// Path relative to the upload root, `/`-separated.
    pub path: String,
    pub content: Bytes,
    /// MIME type supplied by the client, if any.
    pub content_type: Option<String>,
}

impl UploadFile {
    pub fn new(path: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            content_type: None,
        }
    }
}

/// Coarse classification of a `PublishError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rejected before any object-store I/O.
    Precondition,
    /// An object-store write failed; the deployment is `FAILED`.
    Upload,
    /// Persistence failure.
    Internal,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("project not found")]
    ProjectNotFound,
    #[error("no files uploaded")]
    EmptyFileSet,
    #[error("too many files: {count} (limit {max})")]
    TooManyFiles { count: usize, max: usize },
    #[error("file `{path}` is {size} bytes (limit {max})")]
    FileTooLarge { path: String, size: u64, max: u64 },
    #[error("invalid file path `{0}`")]
    InvalidPath(String),
    #[error("duplicate file path `{0}`")]
    DuplicatePath(String),
    #[error("deployment {deployment_id} failed: {message}")]
    Upload {
        deployment_id: String,
        message: String,
    },
    #[error(transparent)]
    Record(#[from] sqlx::Error),
}

impl PublishError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ProjectNotFound
            | Self::EmptyFileSet
            | Self::TooManyFiles { .. }
            | Self::FileTooLarge { .. }
            | Self::InvalidPath(_)
            | Self::DuplicatePath(_) => ErrorClass::Precondition,
            Self::Upload { .. } => ErrorClass::Upload,
            Self::Record(_) => ErrorClass::Internal,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeleteError {
    #[error("deployment `{0}` not found")]
    NotFound(String),
    #[error(transparent)]
    Record(#[from] sqlx::Error),
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct PublishSideEffects {
    pub cdn: SideEffect,
    pub audit: SideEffect,
}

/// Successful publish: the primary result plus best-effort outcomes.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutcome {
    pub deployment: DeploymentDescriptor,
    pub file_count: usize,
    pub total_size: u64,
    pub side_effects: PublishSideEffects,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeletionOutcome {
    pub deployment_id: String,
    pub objects_removed: usize,
    pub storage: SideEffect,
    pub audit: SideEffect,
}

#[derive(Clone)]
pub struct PublishService {
    db: SqlitePool,
    store: Arc<dyn ObjectStore>,
    cdn: Option<Arc<dyn CdnInvalidator>>,
    audit: AuditLogger,
    config: Arc<DeployConfig>,
}

impl PublishService {
    pub fn new(
        db: SqlitePool,
        store: Arc<dyn ObjectStore>,
        cdn: Option<Arc<dyn CdnInvalidator>>,
        audit: AuditLogger,
        config: Arc<DeployConfig>,
    ) -> Self {
        Self {
            db,
            store,
            cdn,
            audit,
            config,
        }
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    /// Distribution id and invalidator, when both are configured.
    pub(crate) fn cdn(&self) -> Option<(&str, &dyn CdnInvalidator)> {
        let distribution_id = self.config.cdn_distribution_id.as_deref()?;
        let cdn = self.cdn.as_deref()?;
        Some((distribution_id, cdn))
    }

    /// Publish `files` as a new deployment of `project_id`.
    ///
    /// The project must belong to `owner`; anything else reports
    /// `ProjectNotFound`. Limits are checked before any I/O.
    pub async fn publish(
        &self,
        owner: &User,
        project_id: Uuid,
        files: Vec<UploadFile>,
    ) -> Result<PublishOutcome, PublishError> {
        let files = self.check_file_set(files)?;
        let project = find_owned_project(&self.db, project_id, owner.id)
            .await?
            .ok_or(PublishError::ProjectNotFound)?;

        let deployment_id = nanoid::nanoid!();
        let storage_path = format!("{}/{}", project.subdomain, deployment_id);
        let url = self.config.deployment_url(&project.subdomain);

        deployment_records::insert_uploading(
            &self.db,
            NewDeployment {
                id: &deployment_id,
                project_id: project.id,
                user_id: owner.id,
                storage_path: &storage_path,
                url: &url,
            },
        )
        .await?;
        info!(
            deployment_id = %deployment_id,
            project_id = %project.id,
            files = files.len(),
            "deployment created, uploading"
        );

        let total_size = match self.upload_all(&storage_path, &files).await {
            Ok(total_size) => total_size,
            Err(message) => return Err(self.fail(&deployment_id, message).await),
        };

        let file_count = files.len();
        if let Err(err) = deployment_records::mark_ready(
            &self.db,
            &deployment_id,
            file_count as i64,
            total_size as i64,
        )
        .await
        {
            error!(deployment_id = %deployment_id, error = %err, "failed to mark deployment ready");
            let _ = self.fail(&deployment_id, err.to_string()).await;
            return Err(PublishError::Record(err));
        }
        info!(deployment_id = %deployment_id, file_count, total_size, "deployment ready");

        let cdn = self.invalidate_cache(&storage_path).await;
        let audit = self
            .audit
            .record(AuditEntry {
                actor_id: owner.id,
                action: "deployment.created",
                resource_type: "Deployment",
                resource_id: Some(deployment_id.clone()),
                metadata: json!({
                    "projectId": project.id,
                    "projectName": project.name,
                    "userEmail": owner.email,
                    "subdomain": project.subdomain,
                    "fileCount": file_count,
                    "totalSize": total_size,
                }),
            })
            .await;

        Ok(PublishOutcome {
            deployment: DeploymentDescriptor {
                id: deployment_id,
                url,
                status: DeploymentStatus::Ready,
            },
            file_count,
            total_size,
            side_effects: PublishSideEffects { cdn, audit },
        })
    }

    /// Remove a deployment, its objects and its row.
    ///
    /// Object-store cleanup is best effort: the row is deleted even when
    /// listing or deleting objects fails.
    pub async fn delete_deployment(
        &self,
        actor: &User,
        deployment_id: &str,
    ) -> Result<DeletionOutcome, DeleteError> {
        let details = deployment_records::find_details(&self.db, deployment_id)
            .await?
            .ok_or_else(|| DeleteError::NotFound(deployment_id.to_string()))?;

        let (objects_removed, storage) =
            self.remove_objects(&details.deployment.storage_path).await;

        if !deployment_records::delete(&self.db, deployment_id).await? {
            return Err(DeleteError::NotFound(deployment_id.to_string()));
        }
        info!(deployment_id, objects_removed, "deployment deleted");

        let audit = self
            .audit
            .record(AuditEntry {
                actor_id: actor.id,
                action: "DELETE_DEPLOYMENT",
                resource_type: "Deployment",
                resource_id: Some(deployment_id.to_string()),
                metadata: json!({
                    "projectName": details.project_name,
                    "userEmail": details.owner_email,
                    "subdomain": details.subdomain,
                }),
            })
            .await;

        Ok(DeletionOutcome {
            deployment_id: deployment_id.to_string(),
            objects_removed,
            storage,
            audit,
        })
    }

    /// Normalise paths and enforce count, size and path rules.
    fn check_file_set(&self, files: Vec<UploadFile>) -> Result<Vec<UploadFile>, PublishError> {
        if files.is_empty() {
            return Err(PublishError::EmptyFileSet);
        }
        if files.len() > self.config.max_files {
            return Err(PublishError::TooManyFiles {
                count: files.len(),
                max: self.config.max_files,
            });
        }

        let mut seen = HashSet::with_capacity(files.len());
        files
            .into_iter()
            .map(|mut file| {
                file.path = normalize_path(&file.path)?;
                let size = file.content.len() as u64;
                if size > self.config.max_file_size {
                    return Err(PublishError::FileTooLarge {
                        path: file.path,
                        size,
                        max: self.config.max_file_size,
                    });
                }
                if !seen.insert(file.path.clone()) {
                    return Err(PublishError::DuplicatePath(file.path));
                }
                Ok(file)
            })
            .collect()
    }

    /// Upload every file under `storage_path`, at most
    /// `max_concurrent_uploads` at a time. Returns the byte total, or the
    /// first failure; remaining uploads are dropped.
    async fn upload_all(&self, storage_path: &str, files: &[UploadFile]) -> Result<u64, String> {
        let uploads: Vec<_> = files
            .iter()
            .map(|file| {
                let store = Arc::clone(&self.store);
                let bucket = self.config.bucket.clone();
                let key = format!("{storage_path}/{}", file.path);
                let content_type = resolve_content_type(&file.path, file.content_type.as_deref());
                let path = file.path.clone();
                let content = file.content.clone();
                let size = content.len() as u64;
                async move {
                    store
                        .put(&bucket, &key, content, &content_type)
                        .await
                        .map(|()| size)
                        .map_err(|err| format!("failed to upload `{path}`: {err}"))
                }
            })
            .collect();

        let mut uploads =
            stream::iter(uploads).buffer_unordered(self.config.max_concurrent_uploads.max(1));

        let mut total_size = 0u64;
        while let Some(uploaded) = uploads.next().await {
            total_size += uploaded?;
        }
        Ok(total_size)
    }

    async fn fail(&self, deployment_id: &str, message: String) -> PublishError {
        error!(deployment_id, error = %message, "deployment upload failed");
        match deployment_records::mark_failed(&self.db, deployment_id, &message).await {
            Ok(_) => PublishError::Upload {
                deployment_id: deployment_id.to_string(),
                message,
            },
            Err(err) => {
                error!(deployment_id, error = %err, "failed to mark deployment failed");
                PublishError::Record(err)
            }
        }
    }

    async fn invalidate_cache(&self, storage_path: &str) -> SideEffect {
        let Some((distribution_id, cdn)) = self.cdn() else {
            warn!("CDN distribution not configured, skipping cache invalidation");
            return SideEffect::Skipped("no CDN distribution configured".into());
        };

        let paths = [format!("/{storage_path}/*")];
        match cdn.invalidate(distribution_id, &paths).await {
            Ok(invalidation_id) => {
                info!(%invalidation_id, path = %paths[0], "CDN invalidation requested");
                SideEffect::Completed
            }
            Err(err) => {
                error!(error = %err, path = %paths[0], "CDN invalidation failed");
                SideEffect::failed(err)
            }
        }
    }

    /// Best-effort removal of every object under `{storage_path}/`.
    pub(crate) async fn remove_objects(&self, storage_path: &str) -> (usize, SideEffect) {
        if storage_path.is_empty() {
            return (0, SideEffect::Skipped("no storage path recorded".into()));
        }
        let bucket = self.config.bucket.as_str();
        // Trailing slash so `demo/abc` never matches `demo/abcd`.
        let prefix = format!("{}/", storage_path.trim_end_matches('/'));

        let keys: Vec<String> = match self.store.list_by_prefix(bucket, &prefix).await {
            Ok(entries) => entries.into_iter().map(|entry| entry.key).collect(),
            Err(err) => {
                error!(prefix = %prefix, error = %err, "failed to list deployment objects");
                return (0, SideEffect::failed(err));
            }
        };
        if keys.is_empty() {
            return (0, SideEffect::Completed);
        }

        match self.store.bulk_delete(bucket, &keys).await {
            Ok(()) => (keys.len(), SideEffect::Completed),
            Err(err) => {
                error!(prefix = %prefix, error = %err, "failed to delete deployment objects");
                (0, SideEffect::failed(err))
            }
        }
    }
}

/// Strip leading `./`, then reject anything that could escape the
/// deployment prefix or produce an odd key.
fn normalize_path(raw: &str) -> Result<String, PublishError> {
    let mut path = raw.trim();
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    let invalid = ensure_key_safe(path).is_err()
        || path
            .split('/')
            .any(|segment| segment.is_empty() || segment == ".");
    if invalid {
        return Err(PublishError::InvalidPath(raw.to_string()));
    }
    Ok(path.to_string())
}

/// Supplied MIME type, else a guess from the extension, else
/// `application/octet-stream`.
pub fn resolve_content_type(path: &str, supplied: Option<&str>) -> String {
    supplied
        .map(str::trim)
        .filter(|ct| !ct.is_empty())
        .map(str::to_string)
        .or_else(|| mime_guess::from_path(path).first_raw().map(str::to_string))
        .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cdn::CdnError,
        db,
        models::user::UserRole,
        services::{
            account_service::AccountService,
            project_service::{NewProject, ProjectService},
        },
        storage::{ObjectEntry, StoreError, StoreResult},
    };
    use async_trait::async_trait;
    use std::{
        collections::BTreeMap,
        io,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    #[derive(Default)]
    struct MemoryStore {
        objects: Mutex<BTreeMap<String, (Bytes, String)>>,
        puts: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail_key_containing: Option<String>,
        fail_list: bool,
    }

    impl MemoryStore {
        fn keys(&self) -> Vec<String> {
            self.objects.lock().unwrap().keys().cloned().collect()
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn put(
            &self,
            bucket: &str,
            key: &str,
            body: Bytes,
            content_type: &str,
        ) -> StoreResult<()> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Some(needle) = &self.fail_key_containing {
                if key.contains(needle.as_str()) {
                    return Err(StoreError::Io(io::Error::other("disk full")));
                }
            }
            self.objects.lock().unwrap().insert(
                format!("{bucket}:{key}"),
                (body, content_type.to_string()),
            );
            Ok(())
        }

        async fn list_by_prefix(
            &self,
            bucket: &str,
            prefix: &str,
        ) -> StoreResult<Vec<ObjectEntry>> {
            if self.fail_list {
                return Err(StoreError::Io(io::Error::other("list unavailable")));
            }
            let scoped = format!("{bucket}:");
            Ok(self
                .objects
                .lock()
                .unwrap()
                .iter()
                .filter_map(|(k, (body, _))| {
                    let key = k.strip_prefix(&scoped)?;
                    key.starts_with(prefix).then(|| ObjectEntry {
                        key: key.to_string(),
                        size: body.len() as u64,
                    })
                })
                .collect())
        }

        async fn bulk_delete(&self, bucket: &str, keys: &[String]) -> StoreResult<()> {
            let mut objects = self.objects.lock().unwrap();
            for key in keys {
                objects.remove(&format!("{bucket}:{key}"));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeCdn {
        calls: Mutex<Vec<(String, Vec<String>)>>,
        fail: bool,
    }

    #[async_trait]
    impl CdnInvalidator for FakeCdn {
        async fn invalidate(
            &self,
            distribution_id: &str,
            paths: &[String],
        ) -> Result<String, CdnError> {
            self.calls
                .lock()
                .unwrap()
                .push((distribution_id.to_string(), paths.to_vec()));
            if self.fail {
                return Err(CdnError::Rejected {
                    status: 503,
                    body: "throttled".into(),
                });
            }
            Ok("I2J0".into())
        }
    }

    struct Harness {
        pool: SqlitePool,
        service: PublishService,
        store: Arc<MemoryStore>,
        cdn: Arc<FakeCdn>,
        owner: User,
        admin: User,
        project_id: Uuid,
    }

    fn site_config() -> DeployConfig {
        DeployConfig {
            domain_name: Some("sites.example.com".into()),
            use_subdomains: true,
            cdn_distribution_id: Some("E2DIST".into()),
            ..DeployConfig::default()
        }
    }

    async fn harness(store: MemoryStore, cdn: FakeCdn, config: DeployConfig) -> Harness {
        let pool = db::memory().await.unwrap();
        let accounts = AccountService::new(pool.clone());
        let owner = accounts
            .create_user("owner@example.com", None, UserRole::User)
            .await
            .unwrap();
        let admin = accounts
            .create_user("ops@example.com", None, UserRole::Admin)
            .await
            .unwrap();
        let audit = AuditLogger::new(pool.clone());
        let project = ProjectService::new(pool.clone(), audit.clone())
            .create_project(
                &owner,
                NewProject {
                    name: "demo".into(),
                    ..NewProject::default()
                },
            )
            .await
            .unwrap();

        let store = Arc::new(store);
        let cdn = Arc::new(cdn);
        let service = PublishService::new(
            pool.clone(),
            store.clone(),
            Some(cdn.clone()),
            audit,
            Arc::new(config),
        );
        Harness {
            pool,
            service,
            store,
            cdn,
            owner,
            admin,
            project_id: project.id,
        }
    }

    fn three_files() -> Vec<UploadFile> {
        vec![
            UploadFile::new("index.html", vec![b'a'; 10]),
            UploadFile::new("assets/app.js", vec![b'b'; 20]),
            UploadFile::new("./robots.txt", vec![b'c'; 5]),
        ]
    }

    #[tokio::test]
    async fn happy_path_publishes_ready_deployment() {
        let h = harness(MemoryStore::default(), FakeCdn::default(), site_config()).await;
        let outcome = h
            .service
            .publish(&h.owner, h.project_id, three_files())
            .await
            .unwrap();

        assert_eq!(outcome.deployment.status, DeploymentStatus::Ready);
        assert_eq!(outcome.deployment.url, "https://demo.sites.example.com");
        assert_eq!(outcome.deployment.id.len(), 21);
        assert_eq!(outcome.side_effects.cdn, SideEffect::Completed);
        assert_eq!(outcome.side_effects.audit, SideEffect::Completed);

        let row = deployment_records::find(&h.pool, &outcome.deployment.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, DeploymentStatus::Ready);
        assert_eq!(row.file_count, Some(3));
        assert_eq!(row.total_size, Some(35));
        assert!(row.published_at.is_some());
        assert!(row.error_message.is_none());
        assert_eq!(row.storage_path, format!("demo/{}", outcome.deployment.id));

        let prefix = format!("deployments:demo/{}/", outcome.deployment.id);
        let keys = h.store.keys();
        assert_eq!(keys.len(), 3);
        assert!(keys.iter().all(|k| k.starts_with(&prefix)));
        assert!(keys.contains(&format!("{prefix}robots.txt")));

        let calls = h.cdn.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![(
                "E2DIST".to_string(),
                vec![format!("/demo/{}/*", outcome.deployment.id)]
            )]
        );

        let audit = AuditLogger::new(h.pool.clone())
            .for_resource("Deployment", &outcome.deployment.id)
            .await
            .unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, "deployment.created");
        assert_eq!(audit[0].metadata.0["userEmail"], "owner@example.com");
        assert_eq!(audit[0].metadata.0["subdomain"], "demo");
        assert_eq!(audit[0].metadata.0["totalSize"], 35);
    }

    #[tokio::test]
    async fn content_type_is_supplied_guessed_or_fallback() {
        let h = harness(MemoryStore::default(), FakeCdn::default(), site_config()).await;
        let mut typed = UploadFile::new("data.bin", vec![0u8; 1]);
        typed.content_type = Some("application/x-custom".into());
        let files = vec![
            typed,
            UploadFile::new("style.css", vec![0u8; 1]),
            UploadFile::new("LICENSE", vec![0u8; 1]),
        ];
        let outcome = h.service.publish(&h.owner, h.project_id, files).await.unwrap();

        let objects = h.store.objects.lock().unwrap();
        let ct = |name: &str| {
            objects[&format!("deployments:demo/{}/{name}", outcome.deployment.id)]
                .1
                .clone()
        };
        assert_eq!(ct("data.bin"), "application/x-custom");
        assert_eq!(ct("style.css"), "text/css");
        assert_eq!(ct("LICENSE"), "application/octet-stream");
    }

    #[tokio::test]
    async fn oversized_file_is_rejected_before_any_write() {
        let config = DeployConfig {
            max_file_size: 8,
            ..site_config()
        };
        let h = harness(MemoryStore::default(), FakeCdn::default(), config).await;
        let err = h
            .service
            .publish(&h.owner, h.project_id, three_files())
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::FileTooLarge { ref path, size: 10, max: 8 } if path == "index.html"));
        assert_eq!(err.class(), ErrorClass::Precondition);
        assert_eq!(h.store.puts.load(Ordering::SeqCst), 0);
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deployments")
            .fetch_one(&h.pool)
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn precondition_failures_are_classified() {
        let config = DeployConfig {
            max_files: 2,
            ..site_config()
        };
        let h = harness(MemoryStore::default(), FakeCdn::default(), config).await;

        let err = h.service.publish(&h.owner, h.project_id, vec![]).await.unwrap_err();
        assert!(matches!(err, PublishError::EmptyFileSet));

        let err = h
            .service
            .publish(&h.owner, h.project_id, three_files())
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::TooManyFiles { count: 3, max: 2 }));

        for bad in ["../secret", "/abs.html", "a//b.html", "a/./b.html", ""] {
            let err = h
                .service
                .publish(&h.owner, h.project_id, vec![UploadFile::new(bad, "x")])
                .await
                .unwrap_err();
            assert!(matches!(err, PublishError::InvalidPath(_)), "{bad}");
        }

        let err = h
            .service
            .publish(
                &h.owner,
                h.project_id,
                vec![UploadFile::new("a.html", "x"), UploadFile::new("./a.html", "y")],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::DuplicatePath(_)));
        assert_eq!(err.class(), ErrorClass::Precondition);
        assert_eq!(h.store.puts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn foreign_project_reports_not_found() {
        let h = harness(MemoryStore::default(), FakeCdn::default(), site_config()).await;
        let err = h
            .service
            .publish(&h.admin, h.project_id, three_files())
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::ProjectNotFound));

        let err = h
            .service
            .publish(&h.owner, Uuid::new_v4(), three_files())
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::ProjectNotFound));
        assert_eq!(h.store.puts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn upload_failure_marks_deployment_failed() {
        let store = MemoryStore {
            fail_key_containing: Some("second".into()),
            ..MemoryStore::default()
        };
        let h = harness(store, FakeCdn::default(), site_config()).await;
        let files = vec![
            UploadFile::new("first.html", vec![1u8; 4]),
            UploadFile::new("second.html", vec![2u8; 4]),
        ];
        let err = h.service.publish(&h.owner, h.project_id, files).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Upload);

        let PublishError::Upload {
            deployment_id,
            message,
        } = err
        else {
            panic!("expected upload error");
        };
        assert!(message.contains("second.html"));

        let row = deployment_records::find(&h.pool, &deployment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, DeploymentStatus::Failed);
        assert!(!row.error_message.unwrap_or_default().is_empty());
        assert!(row.failed_at.is_some());
        assert_eq!(row.file_count, None);
        assert_eq!(row.total_size, None);
        assert!(row.published_at.is_none());

        // No cache purge or audit entry for a failed publish.
        assert!(h.cdn.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn terminal_status_is_written_once() {
        let h = harness(MemoryStore::default(), FakeCdn::default(), site_config()).await;
        let outcome = h
            .service
            .publish(&h.owner, h.project_id, three_files())
            .await
            .unwrap();
        let id = outcome.deployment.id;

        assert!(!deployment_records::mark_failed(&h.pool, &id, "late").await.unwrap());
        assert!(!deployment_records::mark_ready(&h.pool, &id, 1, 1).await.unwrap());
        let row = deployment_records::find(&h.pool, &id).await.unwrap().unwrap();
        assert_eq!(row.status, DeploymentStatus::Ready);
        assert_eq!(row.file_count, Some(3));
    }

    #[tokio::test]
    async fn side_effect_failures_do_not_change_outcome() {
        let cdn = FakeCdn {
            fail: true,
            ..FakeCdn::default()
        };
        let h = harness(MemoryStore::default(), cdn, site_config()).await;
        sqlx::query("DROP TABLE audit_logs").execute(&h.pool).await.unwrap();

        let outcome = h
            .service
            .publish(&h.owner, h.project_id, three_files())
            .await
            .unwrap();
        assert_eq!(outcome.deployment.status, DeploymentStatus::Ready);
        assert!(outcome.side_effects.cdn.is_failed());
        assert!(outcome.side_effects.audit.is_failed());
    }

    #[tokio::test]
    async fn missing_distribution_skips_invalidation() {
        let config = DeployConfig {
            cdn_distribution_id: None,
            ..site_config()
        };
        let h = harness(MemoryStore::default(), FakeCdn::default(), config).await;
        let outcome = h
            .service
            .publish(&h.owner, h.project_id, three_files())
            .await
            .unwrap();
        assert!(matches!(outcome.side_effects.cdn, SideEffect::Skipped(_)));
        assert!(h.cdn.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn uploads_respect_concurrency_cap() {
        let config = DeployConfig {
            max_concurrent_uploads: 2,
            ..site_config()
        };
        let h = harness(MemoryStore::default(), FakeCdn::default(), config).await;
        let files = (0..10)
            .map(|i| UploadFile::new(format!("page-{i}.html"), vec![0u8; i + 1]))
            .collect();
        let outcome = h.service.publish(&h.owner, h.project_id, files).await.unwrap();

        assert_eq!(outcome.file_count, 10);
        assert_eq!(outcome.total_size, (1..=10).sum::<usize>() as u64);
        assert_eq!(h.store.puts.load(Ordering::SeqCst), 10);
        assert!(h.store.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn publish_runs_on_a_spawned_task() {
        let h = harness(MemoryStore::default(), FakeCdn::default(), site_config()).await;
        let service = h.service.clone();
        let owner = h.owner.clone();
        let project_id = h.project_id;

        // Handlers and spawned tasks need the whole publish future to be `Send`.
        let outcome = tokio::spawn(async move {
            service.publish(&owner, project_id, three_files()).await
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(outcome.file_count, 3);
        assert_eq!(outcome.total_size, 35);
    }

    #[tokio::test]
    async fn each_publish_creates_a_new_deployment() {
        let h = harness(MemoryStore::default(), FakeCdn::default(), site_config()).await;
        let first = h
            .service
            .publish(&h.owner, h.project_id, three_files())
            .await
            .unwrap();
        let second = h
            .service
            .publish(&h.owner, h.project_id, three_files())
            .await
            .unwrap();
        assert_ne!(first.deployment.id, second.deployment.id);
        assert_eq!(first.deployment.url, second.deployment.url);
        assert_eq!(h.store.keys().len(), 6);
    }

    #[tokio::test]
    async fn delete_removes_only_its_own_objects() {
        let h = harness(MemoryStore::default(), FakeCdn::default(), site_config()).await;
        let keep = h
            .service
            .publish(&h.owner, h.project_id, three_files())
            .await
            .unwrap();
        let doomed = h
            .service
            .publish(&h.owner, h.project_id, three_files())
            .await
            .unwrap();

        let outcome = h
            .service
            .delete_deployment(&h.admin, &doomed.deployment.id)
            .await
            .unwrap();
        assert_eq!(outcome.objects_removed, 3);
        assert_eq!(outcome.storage, SideEffect::Completed);
        assert_eq!(outcome.audit, SideEffect::Completed);

        let keys = h.store.keys();
        assert_eq!(keys.len(), 3);
        assert!(keys.iter().all(|k| k.contains(&keep.deployment.id)));
        assert!(
            deployment_records::find(&h.pool, &doomed.deployment.id)
                .await
                .unwrap()
                .is_none()
        );

        let audit = AuditLogger::new(h.pool.clone())
            .for_resource("Deployment", &doomed.deployment.id)
            .await
            .unwrap();
        let last = audit.last().unwrap();
        assert_eq!(last.action, "DELETE_DEPLOYMENT");
        assert_eq!(last.actor_id, h.admin.id);
        assert_eq!(last.metadata.0["projectName"], "demo");
    }

    #[tokio::test]
    async fn delete_succeeds_when_storage_listing_fails() {
        let store = MemoryStore {
            fail_list: true,
            ..MemoryStore::default()
        };
        let h = harness(store, FakeCdn::default(), site_config()).await;
        let published = h
            .service
            .publish(&h.owner, h.project_id, three_files())
            .await
            .unwrap();

        let outcome = h
            .service
            .delete_deployment(&h.admin, &published.deployment.id)
            .await
            .unwrap();
        assert!(outcome.storage.is_failed());
        assert_eq!(outcome.objects_removed, 0);
        assert!(
            deployment_records::find(&h.pool, &published.deployment.id)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn delete_unknown_deployment_is_not_found() {
        let h = harness(MemoryStore::default(), FakeCdn::default(), site_config()).await;
        let err = h
            .service
            .delete_deployment(&h.admin, "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, DeleteError::NotFound(_)));
    }

    #[test]
    fn resolve_content_type_prefers_supplied_value() {
        assert_eq!(resolve_content_type("a.html", Some("text/plain")), "text/plain");
        assert_eq!(resolve_content_type("a.html", Some("  ")), "text/html");
        assert_eq!(resolve_content_type("a.unknownext", None), FALLBACK_CONTENT_TYPE);
    }
}
