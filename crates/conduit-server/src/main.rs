mod configuration;
mod error;
mod routes;
mod state;

use configuration::Settings;
use conduit::agent::Agent;
use conduit::resolver::ModelResolver;
use conduit::tools::{builtin_registry, LocalVfs};
use state::AppState;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for logging, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::new()?;
    let store = settings.config_store()?;

    let workspace = &settings.agent.workspace_root;
    std::fs::create_dir_all(workspace)?;
    info!("serving workspace {}", workspace.display());

    let registry = builtin_registry(
        Arc::new(LocalVfs::new(workspace.clone())),
        reqwest::Client::new(),
    )?;
    let agent = Agent::new(ModelResolver::new(Arc::new(store)), Arc::new(registry))
        .with_max_loops(settings.agent.max_loops)
        .with_temperature(settings.agent.temperature)
        .with_timeout(Some(settings.agent.timeout()));

    // Create router with CORS support
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::configure(AppState::new(agent)).layer(cors);

    let listener = tokio::net::TcpListener::bind(settings.server.socket_addr()?).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
