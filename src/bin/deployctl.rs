//! Command-line uploader for the deploy API.

use anyhow::{Context, Result, bail};
use blocks_deploy::client::{CliConfig, DeployClient, collect_files};
use clap::{Parser, Subcommand};
use std::{env, path::PathBuf};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about = "Publish static sites to the deploy platform")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Save an API token (and optionally the API URL)
    Login {
        #[arg(long)]
        token: String,
        #[arg(long)]
        api_url: Option<String>,
    },
    /// Forget the saved token
    Logout,
    /// List your projects
    Projects,
    /// Create a project
    CreateProject {
        name: String,
        #[arg(long)]
        subdomain: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Upload a directory as a new deployment
    Deploy {
        #[arg(long, short)]
        project: Uuid,
        #[arg(long, short, default_value = "./dist")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let lookup = |name: &str| env::var(name).ok();
    let config_path = CliConfig::path(lookup);
    let saved = CliConfig::load(&config_path)
        .await
        .with_context(|| format!("reading {}", config_path.display()))?;

    match cli.command {
        Command::Login { token, api_url } => {
            let config = CliConfig {
                api_url: api_url.unwrap_or(saved.api_url),
                token: Some(token),
            };
            config.save(&config_path).await?;
            println!("Logged in to {} (config: {})", config.api_url, config_path.display());
        }
        Command::Logout => {
            CliConfig {
                token: None,
                ..saved
            }
            .save(&config_path)
            .await?;
            println!("Logged out");
        }
        Command::Projects => {
            let client = DeployClient::new(&saved.with_overrides(lookup))?;
            let projects = client.list_projects().await?;
            if projects.is_empty() {
                println!("No projects yet. Create one with: deployctl create-project <name>");
            }
            for summary in projects {
                let latest = summary
                    .latest_deployment
                    .map(|d| format!("{} {}", d.status.as_str(), d.url))
                    .unwrap_or_else(|| "never deployed".into());
                println!(
                    "{}  {} ({})  {} deployments  {}",
                    summary.project.id,
                    summary.project.name,
                    summary.project.subdomain,
                    summary.deployment_count,
                    latest
                );
            }
        }
        Command::CreateProject {
            name,
            subdomain,
            description,
        } => {
            let client = DeployClient::new(&saved.with_overrides(lookup))?;
            let project = client
                .create_project(&name, subdomain.as_deref(), description.as_deref())
                .await?;
            println!("Created {} ({})", project.name, project.subdomain);
            println!("Project ID: {}", project.id);
        }
        Command::Deploy { project, dir } => {
            let client = DeployClient::new(&saved.with_overrides(lookup))?;
            if !dir.is_dir() {
                bail!("directory not found: {}", dir.display());
            }
            let files = collect_files(&dir).await?;
            if files.is_empty() {
                bail!("no files found in {}", dir.display());
            }
            let total: u64 = files.iter().map(|f| f.size).sum();
            tracing::info!(files = files.len(), bytes = total, dir = %dir.display(), "uploading");

            let deployment = client.deploy(project, &files).await?;
            println!("Your site is live: {}", deployment.url);
            println!("Deployment ID: {}", deployment.id);
        }
    }
    Ok(())
}
