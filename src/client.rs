//! HTTP client and local configuration behind `deployctl`.

use crate::models::{deployment::DeploymentDescriptor, project::{Project, ProjectSummary}};
use bytes::Bytes;
use futures::{Stream, TryStreamExt, stream};
use reqwest::{
    Body, StatusCode,
    multipart::{Form, Part},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;
use walkdir::WalkDir;

pub const DEFAULT_API_URL: &str = "http://localhost:3000";
const CONFIG_FILE_NAME: &str = ".deployctl.json";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not logged in; run `deployctl login --token <token>`")]
    NotLoggedIn,
    #[error("{message} (HTTP {status})")]
    Api { status: StatusCode, message: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("invalid config file: {0}")]
    Config(#[from] serde_json::Error),
    #[error("cannot walk directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("path is not valid UTF-8: {0:?}")]
    NonUtf8Path(PathBuf),
}

/// Saved credentials. Missing file means defaults.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CliConfig {
    pub api_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            token: None,
        }
    }
}

impl CliConfig {
    /// `$DEPLOYCTL_CONFIG`, else `~/.deployctl.json`, else `./.deployctl.json`.
    pub fn path<F>(lookup: F) -> PathBuf
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("DEPLOYCTL_CONFIG") {
            return PathBuf::from(path);
        }
        lookup("HOME")
            .map(|home| Path::new(&home).join(CONFIG_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
    }

    pub async fn load(path: &Path) -> Result<Self, ClientError> {
        match fs::read(path).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<(), ClientError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        fs::write(path, serde_json::to_vec_pretty(self)?).await?;
        Ok(())
    }

    /// `DEPLOY_API_URL` and `DEPLOY_TOKEN` take precedence over the file.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DEPLOY_API_URL") {
            self.api_url = url;
        }
        if let Some(token) = lookup("DEPLOY_TOKEN") {
            self.token = Some(token);
        }
        self
    }
}

/// A file found under the deploy directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// `/`-separated path relative to the walked directory.
    pub relative: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Every regular file below `dir`, hidden ones included, sorted by
/// relative path. Symlinks are followed; a symlink loop is an error.
pub async fn collect_files(dir: &Path) -> Result<Vec<LocalFile>, ClientError> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || walk_files(&dir))
        .await
        .map_err(|err| ClientError::Io(io::Error::other(err)))?
}

fn walk_files(dir: &Path) -> Result<Vec<LocalFile>, ClientError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .ok()
            .and_then(|rel| {
                rel.components()
                    .map(|c| c.as_os_str().to_str())
                    .collect::<Option<Vec<_>>>()
            })
            .map(|segments| segments.join("/"))
            .ok_or_else(|| ClientError::NonUtf8Path(entry.path().to_path_buf()))?;
        files.push(LocalFile {
            relative,
            size: entry.metadata()?.len(),
            path: entry.into_path(),
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

/// File body that is only opened once the request starts reading it, so a
/// large deploy holds one descriptor at a time.
fn lazy_file_stream(path: PathBuf) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    stream::once(fs::File::open(path))
        .map_ok(ReaderStream::new)
        .try_flatten()
}

#[derive(Deserialize)]
struct ProjectList {
    projects: Vec<ProjectSummary>,
}

#[derive(Deserialize)]
struct ProjectCreated {
    project: Project,
}

#[derive(Deserialize)]
struct DeployResponse {
    deployment: DeploymentDescriptor,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: String,
}

#[derive(Serialize)]
struct CreateProjectBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    subdomain: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

/// Authenticated client for the deploy API.
pub struct DeployClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl DeployClient {
    pub fn new(config: &CliConfig) -> Result<Self, ClientError> {
        let token = config.token.clone().ok_or(ClientError::NotLoggedIn)?;
        Ok(Self {
            http: reqwest::Client::new(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub async fn list_projects(&self) -> Result<Vec<ProjectSummary>, ClientError> {
        let resp = self
            .http
            .get(format!("{}/api/projects", self.api_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(decode::<ProjectList>(resp).await?.projects)
    }

    pub async fn create_project(
        &self,
        name: &str,
        subdomain: Option<&str>,
        description: Option<&str>,
    ) -> Result<Project, ClientError> {
        let resp = self
            .http
            .post(format!("{}/api/projects", self.api_url))
            .bearer_auth(&self.token)
            .json(&CreateProjectBody {
                name,
                subdomain,
                description,
            })
            .send()
            .await?;
        Ok(decode::<ProjectCreated>(resp).await?.project)
    }

    /// Upload `files` as one deployment. Each file body is streamed from disk.
    pub async fn deploy(
        &self,
        project_id: Uuid,
        files: &[LocalFile],
    ) -> Result<DeploymentDescriptor, ClientError> {
        let mut form = Form::new().text("projectId", project_id.to_string());
        for file in files {
            let body = Body::wrap_stream(lazy_file_stream(file.path.clone()));
            let mut part = Part::stream_with_length(body, file.size).file_name(file.relative.clone());
            if let Some(mime) = mime_guess::from_path(&file.relative).first_raw() {
                part = part.mime_str(mime)?;
            }
            debug!(path = %file.relative, size = file.size, "adding file");
            form = form.part("files", part);
        }

        let resp = self
            .http
            .post(format!("{}/api/deploy", self.api_url))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;
        Ok(decode::<DeployResponse>(resp).await?.deployment)
    }
}

/// Decode a success body, or surface the server's `{ "error": .. }` message.
async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json::<T>().await?);
    }
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or_else(|_| {
            if text.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                text
            }
        });
    Err(ClientError::Api { status, message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn walks_nested_and_hidden_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("assets/img")).unwrap();
        std::fs::write(root.join("index.html"), b"<h1>hi</h1>").unwrap();
        std::fs::write(root.join(".well-known"), b"x").unwrap();
        std::fs::write(root.join("assets/app.js"), b"console.log(1)").unwrap();
        std::fs::write(root.join("assets/img/logo.png"), b"png").unwrap();

        let files = collect_files(root).await.unwrap();
        let names: Vec<_> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(
            names,
            [".well-known", "assets/app.js", "assets/img/logo.png", "index.html"]
        );
        assert_eq!(files[3].size, 11);
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_files(&dir.path().join("dist")).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_loop_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("site/nested")).unwrap();
        std::fs::write(dir.path().join("site/index.html"), b"x").unwrap();
        std::os::unix::fs::symlink(dir.path().join("site"), dir.path().join("site/nested/up"))
            .unwrap();

        let err = collect_files(&dir.path().join("site")).await.unwrap_err();
        assert!(matches!(err, ClientError::Walk(_)), "{err}");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn non_utf8_file_name_is_rejected() {
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let name = std::ffi::OsStr::from_bytes(b"bad-\xff.html");
        std::fs::write(dir.path().join(name), b"x").unwrap();

        let err = collect_files(dir.path()).await.unwrap_err();
        assert!(matches!(err, ClientError::NonUtf8Path(_)), "{err}");
    }

    #[tokio::test]
    async fn file_bodies_are_opened_on_first_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.txt");

        // Building the body must not touch the file.
        let body = lazy_file_stream(path.clone());
        std::fs::write(&path, b"written after").unwrap();

        let chunks: Vec<Bytes> = body.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"written after");
    }

    #[tokio::test]
    async fn missing_file_surfaces_when_read() {
        let dir = tempfile::tempdir().unwrap();
        let body = lazy_file_stream(dir.path().join("gone.txt"));
        let err = body.try_collect::<Vec<Bytes>>().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn config_round_trips_and_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deployctl.json");

        assert_eq!(CliConfig::load(&path).await.unwrap(), CliConfig::default());

        let saved = CliConfig {
            api_url: "https://deploy.example.com".into(),
            token: Some("bd_token".into()),
        };
        saved.save(&path).await.unwrap();
        assert_eq!(CliConfig::load(&path).await.unwrap(), saved);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"apiUrl\""));
    }

    #[test]
    fn environment_overrides_saved_values() {
        let env = HashMap::from([
            ("DEPLOY_API_URL", "http://api.internal:8080"),
            ("DEPLOY_TOKEN", "bd_env"),
        ]);
        let config = CliConfig::default()
            .with_overrides(|name| env.get(name).map(|v| v.to_string()));
        assert_eq!(config.api_url, "http://api.internal:8080");
        assert_eq!(config.token.as_deref(), Some("bd_env"));
    }

    #[test]
    fn config_path_prefers_explicit_variable() {
        let env = HashMap::from([("DEPLOYCTL_CONFIG", "/tmp/c.json"), ("HOME", "/home/u")]);
        assert_eq!(
            CliConfig::path(|n| env.get(n).map(|v| v.to_string())),
            PathBuf::from("/tmp/c.json")
        );
        assert_eq!(
            CliConfig::path(|n| (n == "HOME").then(|| "/home/u".to_string())),
            PathBuf::from("/home/u/.deployctl.json")
        );
    }

    #[test]
    fn client_requires_a_token() {
        assert!(matches!(
            DeployClient::new(&CliConfig::default()),
            Err(ClientError::NotLoggedIn)
        ));
    }
}
