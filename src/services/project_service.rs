//! Project creation and listing.
//!
//! Subdomain uniqueness is left to the UNIQUE index on `projects.subdomain`:
//! a violation appends a random suffix and retries.

use super::audit_service::{AuditEntry, AuditLogger};
use crate::models::{
    deployment::Deployment,
    project::{Project, ProjectSummary},
    user::User,
};
use chrono::Utc;
use serde_json::json;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub const MAX_SUBDOMAIN_LEN: usize = 63;
const MAX_NAME_LEN: usize = 100;
const MAX_DESCRIPTION_LEN: usize = 500;
const SUFFIX_LEN: usize = 6;
const MAX_SUBDOMAIN_ATTEMPTS: usize = 5;
const SUFFIX_ALPHABET: [char; 36] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's',
    't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("project name must be between 1 and {MAX_NAME_LEN} characters")]
    InvalidName,
    #[error("description must be at most {MAX_DESCRIPTION_LEN} characters")]
    DescriptionTooLong,
    #[error(
        "invalid subdomain `{0}`: use only lowercase letters, numbers, and hyphens (max 63 characters)"
    )]
    InvalidSubdomain(String),
    #[error("could not allocate a unique subdomain from `{0}`")]
    SubdomainExhausted(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Input for `create_project`.
#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub name: String,
    /// Requested subdomain; derived from `name` when absent.
    pub subdomain: Option<String>,
    pub description: Option<String>,
}

#[derive(Clone)]
pub struct ProjectService {
    db: SqlitePool,
    audit: AuditLogger,
}

impl ProjectService {
    pub fn new(db: SqlitePool, audit: AuditLogger) -> Self {
        Self { db, audit }
    }

    pub async fn create_project(
        &self,
        owner: &User,
        request: NewProject,
    ) -> Result<Project, ProjectError> {
        let name = request.name.trim().to_string();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(ProjectError::InvalidName);
        }
        if request
            .description
            .as_ref()
            .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN)
        {
            return Err(ProjectError::DescriptionTooLong);
        }

        let base = match request.subdomain {
            Some(requested) => requested.trim().to_string(),
            None => slugify(&name),
        };
        if !is_valid_subdomain(&base) {
            return Err(ProjectError::InvalidSubdomain(base));
        }

        let mut candidate = base.clone();
        for attempt in 0..MAX_SUBDOMAIN_ATTEMPTS {
            let now = Utc::now();
            let inserted = sqlx::query_as::<_, Project>(
                "INSERT INTO projects (id, user_id, name, subdomain, description, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 RETURNING id, user_id, name, subdomain, description, created_at, updated_at",
            )
            .bind(Uuid::new_v4())
            .bind(owner.id)
            .bind(&name)
            .bind(&candidate)
            .bind(&request.description)
            .bind(now)
            .bind(now)
            .fetch_one(&self.db)
            .await;

            match inserted {
                Ok(project) => {
                    info!(project_id = %project.id, subdomain = %project.subdomain, "project created");
                    self.audit
                        .record(AuditEntry {
                            actor_id: owner.id,
                            action: "project.created",
                            resource_type: "Project",
                            resource_id: Some(project.id.to_string()),
                            metadata: json!({ "name": project.name, "subdomain": project.subdomain }),
                        })
                        .await;
                    return Ok(project);
                }
                Err(err) if crate::db::is_unique_violation(&err) => {
                    debug!(attempt, subdomain = %candidate, "subdomain taken, retrying with suffix");
                    candidate = with_suffix(
                        &base,
                        &nanoid::nanoid!(SUFFIX_LEN, &SUFFIX_ALPHABET),
                    );
                }
                Err(err) => return Err(ProjectError::Sqlx(err)),
            }
        }

        Err(ProjectError::SubdomainExhausted(base))
    }

    /// Projects owned by `owner_id`, most recently updated first.
    pub async fn list_projects(&self, owner_id: Uuid) -> Result<Vec<ProjectSummary>, ProjectError> {
        let projects = sqlx::query_as::<_, Project>(
            "SELECT id, user_id, name, subdomain, description, created_at, updated_at
             FROM projects WHERE user_id = ? ORDER BY updated_at DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.db)
        .await?;

        let mut summaries = Vec::with_capacity(projects.len());
        for project in projects {
            let deployment_count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM deployments WHERE project_id = ?")
                    .bind(project.id)
                    .fetch_one(&self.db)
                    .await?;
            let latest_deployment = sqlx::query_as::<_, Deployment>(
                "SELECT * FROM deployments WHERE project_id = ?
                 ORDER BY created_at DESC LIMIT 1",
            )
            .bind(project.id)
            .fetch_optional(&self.db)
            .await?;
            summaries.push(ProjectSummary {
                project,
                deployment_count,
                latest_deployment,
            });
        }
        Ok(summaries)
    }
}

/// A project by id, only if `owner_id` owns it.
pub(crate) async fn find_owned_project(
    db: &SqlitePool,
    project_id: Uuid,
    owner_id: Uuid,
) -> Result<Option<Project>, sqlx::Error> {
    sqlx::query_as::<_, Project>(
        "SELECT id, user_id, name, subdomain, description, created_at, updated_at
         FROM projects WHERE id = ? AND user_id = ?",
    )
    .bind(project_id)
    .bind(owner_id)
    .fetch_optional(db)
    .await
}

/// Lowercase `name`, collapse every run of other characters into one
/// hyphen, trim hyphens and cap at 63 characters.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.truncate(MAX_SUBDOMAIN_LEN);
    slug.trim_end_matches('-').to_string()
}

pub fn is_valid_subdomain(subdomain: &str) -> bool {
    !subdomain.is_empty()
        && subdomain.len() <= MAX_SUBDOMAIN_LEN
        && subdomain
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-'))
        && !subdomain.starts_with('-')
        && !subdomain.ends_with('-')
}

/// `{base}-{suffix}`, shortening `base` so the result stays a valid label.
fn with_suffix(base: &str, suffix: &str) -> String {
    let room = MAX_SUBDOMAIN_LEN - suffix.len() - 1;
    let trimmed = base[..base.len().min(room)].trim_end_matches('-');
    format!("{trimmed}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, models::user::UserRole, services::account_service::AccountService};

    async fn setup() -> (ProjectService, User, User) {
        let pool = db::memory().await.unwrap();
        let accounts = AccountService::new(pool.clone());
        let alice = accounts
            .create_user("alice@example.com", None, UserRole::User)
            .await
            .unwrap();
        let bob = accounts
            .create_user("bob@example.com", None, UserRole::User)
            .await
            .unwrap();
        let service = ProjectService::new(pool.clone(), AuditLogger::new(pool));
        (service, alice, bob)
    }

    #[test]
    fn slugify_normalises_names() {
        assert_eq!(slugify("My Site"), "my-site");
        assert_eq!(slugify("  Hello,   World!! "), "hello-world");
        assert_eq!(slugify("déjà vu 2"), "d-j-vu-2");
        assert_eq!(slugify("!!!"), "");
        assert_eq!(slugify(&"a".repeat(80)).len(), MAX_SUBDOMAIN_LEN);
    }

    #[test]
    fn subdomain_validation() {
        assert!(is_valid_subdomain("demo"));
        assert!(is_valid_subdomain("my-site-2"));
        assert!(!is_valid_subdomain(""));
        assert!(!is_valid_subdomain("Demo"));
        assert!(!is_valid_subdomain("-demo"));
        assert!(!is_valid_subdomain("demo_site"));
        assert!(!is_valid_subdomain(&"a".repeat(64)));
    }

    #[test]
    fn suffix_keeps_label_within_limit() {
        let long = "a".repeat(63);
        let suffixed = with_suffix(&long, "x1y2z3");
        assert_eq!(suffixed.len(), MAX_SUBDOMAIN_LEN);
        assert!(suffixed.ends_with("-x1y2z3"));
        assert!(is_valid_subdomain(&suffixed));
        assert_eq!(with_suffix("demo", "abc123"), "demo-abc123");
    }

    #[tokio::test]
    async fn colliding_subdomains_get_a_suffix() {
        let (service, alice, bob) = setup().await;
        let first = service
            .create_project(
                &alice,
                NewProject {
                    name: "My Site".into(),
                    ..NewProject::default()
                },
            )
            .await
            .unwrap();
        let second = service
            .create_project(
                &bob,
                NewProject {
                    name: "my site".into(),
                    ..NewProject::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(first.subdomain, "my-site");
        assert_ne!(first.subdomain, second.subdomain);
        assert!(second.subdomain.starts_with("my-site-"));
        assert_eq!(second.subdomain.len(), "my-site-".len() + SUFFIX_LEN);
        assert!(is_valid_subdomain(&second.subdomain));
    }

    #[tokio::test]
    async fn rejects_invalid_input() {
        let (service, alice, _) = setup().await;
        let err = service
            .create_project(
                &alice,
                NewProject {
                    name: "Site".into(),
                    subdomain: Some("Not_Valid".into()),
                    ..NewProject::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectError::InvalidSubdomain(_)));

        let err = service
            .create_project(
                &alice,
                NewProject {
                    name: "   ".into(),
                    ..NewProject::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectError::InvalidName));
    }

    #[tokio::test]
    async fn list_and_ownership_are_scoped_to_owner() {
        let (service, alice, bob) = setup().await;
        let project = service
            .create_project(
                &alice,
                NewProject {
                    name: "Docs".into(),
                    subdomain: Some("docs".into()),
                    description: Some("documentation".into()),
                },
            )
            .await
            .unwrap();

        let listed = service.list_projects(alice.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].deployment_count, 0);
        assert!(listed[0].latest_deployment.is_none());
        assert!(service.list_projects(bob.id).await.unwrap().is_empty());

        let owned = find_owned_project(&service.db, project.id, alice.id)
            .await
            .unwrap();
        assert_eq!(owned.map(|p| p.subdomain).as_deref(), Some("docs"));
        assert!(
            find_owned_project(&service.db, project.id, bob.id)
                .await
                .unwrap()
                .is_none()
        );
    }
}
