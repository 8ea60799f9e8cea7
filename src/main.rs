// homeboard - home dashboard backend with an encrypted OAuth credential cache

use anyhow::{Context, Result};
use clap::Parser;
use homeboard::calendar::CalendarService;
use homeboard::cli::Args;
use homeboard::config::AppConfig;
use homeboard::credentials::{Provider, SecretStore, TokenCacheManager, Vault};
use homeboard::oauth::{GoogleInteractive, MicrosoftClientCredentials, ProviderAdapter};
use homeboard::photos::PhotoService;
use homeboard::server::{create_router, AppState};
use homeboard::services::{ApiDescriptor, ServiceClientFactory};
use homeboard::utils::logging;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Phase 1: Load configuration
    let config = AppConfig::load(args.config.as_deref())?;

    // Phase 2: Initialize logging
    logging::init(&config.logging)?;
    info!("Starting homeboard v{}", env!("CARGO_PKG_VERSION"));

    // Phase 3: Secrets. Every one of these is required; a gap stops startup.
    let secrets = SecretStore::from_env(&config.credentials);
    let key = secrets.get_encryption_key()?;
    let google_app = secrets.get_client_secret_config(Provider::GoogleInteractive)?;
    let microsoft_app = secrets.get_client_secret_config(Provider::MicrosoftClientCredentials)?;

    // Phase 4: Credential stack
    let vault = Vault::new(&config.credentials.vault_dir, key)?;
    info!("Token vault at {}", vault.dir().display());

    let google: Arc<dyn ProviderAdapter> = Arc::new(GoogleInteractive::new(
        &google_app,
        &config.google,
        &config.credentials,
    )?);
    let microsoft: Arc<dyn ProviderAdapter> =
        Arc::new(MicrosoftClientCredentials::new(&microsoft_app, &config.microsoft)?);
    let manager = TokenCacheManager::new(
        vault,
        vec![google, microsoft],
        config.credentials.refresh_buffer_seconds,
    );

    let calendar_binding = config
        .bindings
        .calendar
        .bind(Provider::GoogleInteractive, &google_app.scopes)?;
    let photos_binding = config
        .bindings
        .photos
        .bind(Provider::MicrosoftClientCredentials, &microsoft_app.scopes)?;

    if args.login {
        manager
            .reauthorize(&calendar_binding)
            .await
            .context("Google authorization failed")?;
        info!("Google authorization stored for {}", calendar_binding);
    }

    // Phase 5: Collaborators
    let factory = ServiceClientFactory::new(manager.clone())?;
    let calendar = Arc::new(CalendarService::new(
        factory.clone(),
        ApiDescriptor::google_calendar(&config.google),
        calendar_binding,
        config.calendar.clone(),
    ));
    let photos = Arc::new(PhotoService::new(
        factory,
        ApiDescriptor::microsoft_graph(&config.microsoft),
        photos_binding,
        config.photos.clone(),
    ));

    let calendar_poller = calendar.clone().spawn_poller();
    let photo_refresher = photos.clone().spawn_refresher();

    // Phase 6: HTTP server
    let app = create_router(AppState {
        manager,
        calendar,
        photos,
    });
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    calendar_poller.abort();
    photo_refresher.abort();
    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
