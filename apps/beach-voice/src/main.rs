use beach_voice::{build_router, cli::Cli, config::AppConfig, RelayState};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; the platform usually injects variables.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let config = cli.apply(AppConfig::from_env());
    if config.openai_api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY not set; ephemeral key requests will fail");
    }
    info!(
        auth_timeout_secs = config.auth_timeout_secs,
        stun_url = %config.stun_url,
        "starting beach-voice"
    );

    let state = RelayState::from_config(&config);
    let registry = state.registry.clone();
    let app = build_router(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server running on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.clear().await;
    info!("beach-voice stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
