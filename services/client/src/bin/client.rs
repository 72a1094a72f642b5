//! services/client/src/bin/client.rs

use client_lib::{
    adapters::{AuthToken, BackendHttpAdapter, FilePreviewRegistry, JsonFileStore},
    config::Config,
    error::ClientError,
    projects::ProjectsClient,
    shell::Shell,
};
use gutachter_core::{Assistant, SessionState, UploadCoordinator};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Connecting to {}", config.api_base_url);

    // --- 2. Build the Local Resource Adapters ---
    let store = Arc::new(JsonFileStore::new(&config.storage_dir)?);
    let previews = Arc::new(FilePreviewRegistry::new(
        config.storage_dir.join("previews"),
    )?);

    // --- 3. Build the Backend Adapters ---
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let auth = Arc::new(AuthToken::default());
    let backend = Arc::new(
        BackendHttpAdapter::new(config.api_base_url.clone(), timeout, auth.clone())
            .map_err(|e| ClientError::Internal(e.to_string()))?,
    );
    let projects = ProjectsClient::new(config.api_base_url.clone(), timeout, auth)
        .map_err(|e| ClientError::Internal(e.to_string()))?;

    // --- 4. Rehydrate Session State & Assemble the Operation Set ---
    let state = Arc::new(SessionState::new(store, previews));
    let uploads = Arc::new(UploadCoordinator::new(
        backend.clone(),
        config.upload_limits,
    ));
    let assistant = Arc::new(Assistant::new(
        backend.clone(),
        backend.clone(),
        backend,
        uploads,
        state,
    ));

    // --- 5. Run the Shell ---
    Shell::new(assistant, projects).run().await?;
    info!("Session ended.");

    Ok(())
}
