use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, fmt::Display, str::FromStr};

/// Default per-file upload ceiling (100 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 104_857_600;
/// Default number of files accepted by one publish request.
pub const DEFAULT_MAX_FILES: usize = 1000;
/// Default number of object-store writes in flight for one publish.
pub const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 16;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub storage: StorageBackend,
    pub cdn: CdnConfig,
    pub deploy: DeployConfig,
}

/// Where deployment objects are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Local directory, one sub-directory per bucket.
    Disk { root: String },
    /// S3-compatible service; credentials come from the usual `AWS_*` variables.
    S3 {
        region: Option<String>,
        endpoint: Option<String>,
    },
}

/// Connection settings for the CDN purge API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CdnConfig {
    pub api_url: Option<String>,
    pub api_token: Option<String>,
}

/// Settings consumed by the publish pipeline. Built once at start-up and
/// handed to the services explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployConfig {
    /// Bucket holding every deployment, keyed `{subdomain}/{deployment}/{path}`.
    pub bucket: String,
    pub domain_name: Option<String>,
    pub use_subdomains: bool,
    pub cdn_domain: Option<String>,
    pub cdn_distribution_id: Option<String>,
    pub max_file_size: u64,
    pub max_files: usize,
    pub max_concurrent_uploads: usize,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            bucket: "deployments".into(),
            domain_name: None,
            use_subdomains: false,
            cdn_domain: None,
            cdn_distribution_id: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_files: DEFAULT_MAX_FILES,
            max_concurrent_uploads: DEFAULT_MAX_CONCURRENT_UPLOADS,
        }
    }
}

impl DeployConfig {
    /// Public URL for a project's deployments.
    ///
    /// Pure function of this configuration and the subdomain; it does not
    /// depend on whether any upload succeeded.
    pub fn deployment_url(&self, subdomain: &str) -> String {
        match (&self.domain_name, &self.cdn_domain) {
            (Some(domain), _) if self.use_subdomains => format!("https://{subdomain}.{domain}"),
            (_, Some(cdn)) => format!("https://{cdn}/{subdomain}"),
            _ => format!("https://{subdomain}.your-domain.com"),
        }
    }
}

/// What the server binary should do once configuration is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupAction {
    Serve,
    Migrate,
    CreateUser { email: String, admin: bool },
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Static-site deployment platform API")]
pub struct Args {
    /// Host to bind to (overrides DEPLOY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DEPLOY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides DEPLOY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory for the disk object store (overrides DEPLOY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Use the S3 backend with this bucket (overrides DEPLOY_S3_BUCKET)
    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// Public domain for subdomain URLs (overrides DEPLOY_DOMAIN_NAME)
    #[arg(long)]
    pub domain_name: Option<String>,

    /// CDN domain for path-style URLs (overrides DEPLOY_CDN_DOMAIN)
    #[arg(long)]
    pub cdn_domain: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Create a user, print a fresh API token and exit
    #[arg(long, value_name = "EMAIL")]
    pub create_user: Option<String>,

    /// Give the user created with --create-user the admin role
    #[arg(long, requires = "create_user")]
    pub admin: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the start-up action.
    pub fn from_env_and_args() -> Result<(Self, StartupAction)> {
        Self::from_sources(Args::parse(), |name| env::var(name).ok())
    }

    /// Merge parsed arguments with values obtained from `lookup`.
    pub fn from_sources<F>(args: Args, lookup: F) -> Result<(Self, StartupAction)>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Environment fallback ---
        let env_host = lookup("DEPLOY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_var(&lookup, "DEPLOY_PORT", 3000u16)?;
        let env_db =
            lookup("DEPLOY_DATABASE_URL").unwrap_or_else(|| "sqlite://./data/deploy.db".into());
        let env_storage = lookup("DEPLOY_STORAGE_DIR").unwrap_or_else(|| "./data/objects".into());

        let s3_bucket = args.s3_bucket.or_else(|| lookup("DEPLOY_S3_BUCKET"));
        let storage = match &s3_bucket {
            Some(_) => StorageBackend::S3 {
                region: lookup("DEPLOY_S3_REGION"),
                endpoint: lookup("DEPLOY_S3_ENDPOINT"),
            },
            None => StorageBackend::Disk {
                root: args.storage_dir.unwrap_or(env_storage),
            },
        };

        let deploy = DeployConfig {
            bucket: s3_bucket.unwrap_or_else(|| DeployConfig::default().bucket),
            domain_name: args.domain_name.or_else(|| lookup("DEPLOY_DOMAIN_NAME")),
            use_subdomains: parse_var(&lookup, "DEPLOY_USE_SUBDOMAINS", false)?,
            cdn_domain: args.cdn_domain.or_else(|| lookup("DEPLOY_CDN_DOMAIN")),
            cdn_distribution_id: lookup("DEPLOY_CDN_DISTRIBUTION_ID"),
            max_file_size: parse_var(&lookup, "DEPLOY_MAX_UPLOAD_SIZE", DEFAULT_MAX_FILE_SIZE)?,
            max_files: parse_var(&lookup, "DEPLOY_MAX_FILES", DEFAULT_MAX_FILES)?,
            max_concurrent_uploads: parse_var(
                &lookup,
                "DEPLOY_MAX_CONCURRENT_UPLOADS",
                DEFAULT_MAX_CONCURRENT_UPLOADS,
            )?,
        };
        if deploy.max_files == 0 {
            bail!("DEPLOY_MAX_FILES must be at least 1");
        }
        if deploy.max_concurrent_uploads == 0 {
            bail!("DEPLOY_MAX_CONCURRENT_UPLOADS must be at least 1");
        }

        let cdn = CdnConfig {
            api_url: lookup("DEPLOY_CDN_API_URL"),
            api_token: lookup("DEPLOY_CDN_API_TOKEN"),
        };
        if deploy.cdn_distribution_id.is_some() && cdn.api_url.is_none() {
            bail!("DEPLOY_CDN_DISTRIBUTION_ID is set but DEPLOY_CDN_API_URL is missing");
        }

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            storage,
            cdn,
            deploy,
        };

        let action = match (args.migrate, args.create_user) {
            (true, _) => StartupAction::Migrate,
            (false, Some(email)) => StartupAction::CreateUser {
                email,
                admin: args.admin,
            },
            (false, None) => StartupAction::Serve,
        };

        Ok((cfg, action))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{err}"))
            .with_context(|| format!("parsing {name} value `{value}`")),
        None => Ok(default),
    }
}
