use std::sync::Arc;

use nicoproxy::{
    common::{http::HttpClient, logger, types::AnyResult},
    configs::Config,
    log_println,
    server::AppState,
    transport,
};
use tracing::info;

#[tokio::main]
async fn main() -> AnyResult<()> {
    let config = Config::load()?;
    logger::init(config.logging.as_ref());

    log_println!("nicoproxy v{}", env!("CARGO_PKG_VERSION"));

    let http = HttpClient::new(&config.niconico)?;
    let address = config.server.socket_addr();
    let state = Arc::new(AppState::new(config, http));

    let app = transport::router(state.clone());

    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("Listening on {}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C once every live stream has been torn down, so open
/// bodies end and the server can drain.
async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
    state.shutdown_streams().await;
}
