use anyhow::Context;
use meme_studio::{config::Config, routes::create_router, startup};
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    startup::init_tracing("meme_studio=debug,tower_http=debug");

    // Load .env file if present (optional, good for development)
    match dotenvy::dotenv() {
        Ok(path) => tracing::info!(".env file loaded from path: {}", path.display()),
        Err(_) => tracing::info!(".env file not found, relying on environment variables"),
    };

    // --- Configuration ---
    let config = Config::load().context("Failed to load configuration")?;
    let addr = config.bind_address;

    // --- Application State ---
    let state = startup::build_state(&config)
        .await
        .context("Failed to initialize application state")?;

    // --- Router Definition ---
    let app = create_router(state);

    // --- Server Startup ---
    tracing::info!("Server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
