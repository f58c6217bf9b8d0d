//! `POST /api/deploy`: multipart publish.
//!
//! Expects a `projectId` text field and any number of `files` parts whose
//! filename is the path relative to the site root. File count and size are
//! enforced while the body streams in, before the pipeline touches storage.

use crate::{
    errors::AppError,
    handlers::auth::AuthUser,
    models::deployment::DeploymentDescriptor,
    services::publish_service::{PublishError, UploadFile},
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, State, multipart::Field},
};
use bytes::BytesMut;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

/// Clients that don't know a part's type send this; treat it as unset so
/// the extension decides.
const GENERIC_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Serialize)]
pub struct DeployResponse {
    pub deployment: DeploymentDescriptor,
}

pub async fn deploy(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    mut multipart: Multipart,
) -> Result<Json<DeployResponse>, AppError> {
    let config = state.publisher.config();
    let mut project_id: Option<String> = None;
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "projectId" => project_id = Some(field.text().await.map_err(malformed)?),
            "files" | "file" => {
                if files.len() >= config.max_files {
                    return Err(PublishError::TooManyFiles {
                        count: files.len() + 1,
                        max: config.max_files,
                    }
                    .into());
                }
                files.push(read_file(field, config.max_file_size).await?);
            }
            other => debug!(field = other, "ignoring unknown multipart field"),
        }
    }

    let project_id = project_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::bad_request("Project ID is required"))?;
    let project_id =
        Uuid::parse_str(&project_id).map_err(|_| AppError::bad_request("Invalid project ID"))?;
    if files.is_empty() {
        return Err(AppError::bad_request("No files uploaded"));
    }

    match state.publisher.publish(&user, project_id, files).await {
        Ok(outcome) => Ok(Json(DeployResponse {
            deployment: outcome.deployment,
        })),
        Err(err) => {
            warn!(user_id = %user.id, %project_id, error = %err, "publish rejected");
            Err(err.into())
        }
    }
}

async fn read_file(mut field: Field<'_>, max_size: u64) -> Result<UploadFile, AppError> {
    let path = field
        .file_name()
        .map(str::to_string)
        .ok_or_else(|| AppError::bad_request("file part is missing a filename"))?;
    let content_type = field
        .content_type()
        .filter(|ct| !ct.eq_ignore_ascii_case(GENERIC_CONTENT_TYPE))
        .map(str::to_string);

    let mut content = BytesMut::new();
    while let Some(chunk) = field.chunk().await.map_err(malformed)? {
        let size = (content.len() + chunk.len()) as u64;
        if size > max_size {
            return Err(PublishError::FileTooLarge {
                path,
                size,
                max: max_size,
            }
            .into());
        }
        content.extend_from_slice(&chunk);
    }

    Ok(UploadFile {
        path,
        content: content.freeze(),
        content_type,
    })
}

fn malformed(err: impl std::fmt::Display) -> AppError {
    AppError::bad_request(format!("malformed multipart body: {err}"))
}
