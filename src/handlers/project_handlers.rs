use crate::{
    errors::AppError,
    handlers::auth::AuthUser,
    models::project::{Project, ProjectSummary},
    services::project_service::NewProject,
    state::AppState,
};
use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreateProjectReq {
    pub name: String,
    pub subdomain: Option<String>,
    pub description: Option<String>,
}

#[derive(Serialize)]
pub struct ProjectList {
    pub projects: Vec<ProjectSummary>,
}

#[derive(Serialize)]
pub struct ProjectCreated {
    pub project: Project,
}

/// `GET /api/projects`: caller's projects with their latest deployment.
pub async fn list_projects(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<ProjectList>, AppError> {
    let projects = state.projects.list_projects(user.id).await?;
    Ok(Json(ProjectList { projects }))
}

/// `POST /api/projects`: create a project; 201 on success.
pub async fn create_project(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<CreateProjectReq>,
) -> Result<(StatusCode, Json<ProjectCreated>), AppError> {
    let project = state
        .projects
        .create_project(
            &user,
            NewProject {
                name: req.name,
                subdomain: req.subdomain,
                description: req.description,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(ProjectCreated { project })))
}
