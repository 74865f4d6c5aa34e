use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use authgate_access::{CredentialStore, EmailValidator, HtpasswdFile};
use authgate_providers::build_provider;
use authgate_server::config::ServerConfig;
use authgate_server::dispatch::router;
use authgate_server::error::ServerError;
use authgate_server::state::ProxyState;
use authgate_server::watcher::CredentialWatcher;
use rootcause::prelude::Report;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "authgate stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Report<ServerError>> {
    // AUTHGATE_CONFIG wins over the first argument.
    let config_file = std::env::var_os("AUTHGATE_CONFIG")
        .or_else(|| std::env::args_os().nth(1))
        .map(PathBuf::from);
    let config = ServerConfig::load(config_file.as_deref()).map_err(|e| ServerError::Config {
        reason: e.to_string(),
    })?;
    let options = config.validate().map_err(|e| ServerError::Config {
        reason: e.to_string(),
    })?;
    tracing::info!("loaded configuration");

    let provider = build_provider(&options.provider)
        .await
        .map_err(|e| ServerError::Provider {
            reason: e.to_string(),
        })?;

    let mut watcher = CredentialWatcher::new();

    let mut emails = EmailValidator::new(&options.email_domains);
    if let Some(path) = &options.authenticated_emails_file {
        emails = emails
            .with_emails_file(path)
            .map_err(|e| ServerError::Credentials {
                reason: e.to_string(),
            })?;
    }
    let emails = Arc::new(emails);
    if let Some(path) = emails.emails_file() {
        let watched = Arc::clone(&emails);
        watcher = watcher.watch(path, move || watched.reload());
    }

    let credentials: Option<Arc<dyn CredentialStore>> = match &options.htpasswd_file {
        Some(path) => {
            let file = Arc::new(HtpasswdFile::load(path).map_err(|e| ServerError::Credentials {
                reason: e.to_string(),
            })?);
            let watched = Arc::clone(&file);
            watcher = watcher.watch(path, move || watched.reload());
            let store: Arc<dyn CredentialStore> = file;
            Some(store)
        }
        None => None,
    };

    if !watcher.is_empty() {
        watcher.spawn(options.credentials_poll_interval);
    }

    let address = options.http_address.clone();
    let state = Arc::new(ProxyState::new(options, provider, emails, credentials)?);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|e| ServerError::Bind {
            address: address.clone(),
            reason: e.to_string(),
        })?;
    tracing::info!("listening on http://{}", address);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| ServerError::Serve {
        reason: e.to_string(),
    })?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
    tracing::info!("shutting down");
}
