use git_hook_router::error::RouterError;
use git_hook_router::identity::InstanceIdentity;
use git_hook_router::logging::{FileLogger, setup_logging};
use git_hook_router::{AppState, api, load_config};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8888";
const DEFAULT_CONFIG_PATH: &str = "router_config.toml";

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal: {}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), RouterError> {
    dotenv::dotenv().ok();

    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string());
    let config_path = PathBuf::from(
        std::env::var("ROUTER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
    );

    let config = load_config(&config_path)?;

    let file_logger = config.log_directory.clone().map(FileLogger::new);
    // Hold the guard so buffered file logs are flushed on exit
    let (recent_logs, _log_guard) = setup_logging(file_logger.as_ref())?;

    let identity = match &config.identity_key_file {
        Some(path) => InstanceIdentity::load_or_create(path)?,
        None => {
            warn!("No identity_key_file configured; instance identity changes on every restart");
            InstanceIdentity::generate()?
        }
    };
    info!("Instance identity: {}", identity.encoded_public_key());

    let state = Arc::new(AppState::new(
        &config,
        config_path.clone(),
        identity,
        recent_logs,
    )?);
    info!(
        "Loaded {} job(s), {} subscriber(s)",
        state.jobs.len(),
        state.subscribers.len()
    );

    let app = api::router(state);

    info!("Listening on {}", bind_address);
    info!("Using config at {:?}", config_path);
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
