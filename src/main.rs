use anyhow::{Context, Result};
use blocks_deploy::{
    cdn::{CdnInvalidator, HttpCdnInvalidator},
    config::{AppConfig, StartupAction, StorageBackend},
    db,
    models::user::UserRole,
    services::account_service::AccountService,
    state::AppState,
    storage::{DiskObjectStore, ObjectStore, S3ObjectStore},
};
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + start-up action ---
    let (cfg, action) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting blocks-deploy with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db = db::connect(&cfg.database_url, 5).await?;

    match action {
        StartupAction::Migrate => {
            db::run_migrations(&db).await?;
            tracing::info!("Database migration complete.");
            return Ok(());
        }
        StartupAction::CreateUser { email, admin } => {
            let role = if admin { UserRole::Admin } else { UserRole::User };
            let accounts = AccountService::new(db);
            let user = accounts
                .create_user(&email, None, role)
                .await
                .with_context(|| format!("creating user {email}"))?;
            let token = accounts.issue_token(user.id).await?;
            tracing::info!(user_id = %user.id, ?role, "user created");
            println!("{token}");
            return Ok(());
        }
        StartupAction::Serve => {}
    }

    // --- Object store ---
    let store: Arc<dyn ObjectStore> = match &cfg.storage {
        StorageBackend::Disk { root } => {
            if !Path::new(root).exists() {
                fs::create_dir_all(root)?;
                tracing::info!("Created storage directory at {}", root);
            }
            Arc::new(DiskObjectStore::new(root))
        }
        StorageBackend::S3 { region, endpoint } => {
            tracing::info!(bucket = %cfg.deploy.bucket, "using S3 object store");
            Arc::new(S3ObjectStore::new(region.clone(), endpoint.clone()))
        }
    };

    // --- CDN purge client ---
    let cdn: Option<Arc<dyn CdnInvalidator>> = cfg.cdn.api_url.as_ref().map(|url| {
        Arc::new(HttpCdnInvalidator::new(url.clone(), cfg.cdn.api_token.clone()))
            as Arc<dyn CdnInvalidator>
    });
    if cfg.deploy.cdn_distribution_id.is_none() {
        tracing::warn!("DEPLOY_CDN_DISTRIBUTION_ID not set, cache invalidation disabled");
    }

    // --- Build router ---
    let app = blocks_deploy::app(AppState::new(db, store, cdn, cfg.deploy.clone()));

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
