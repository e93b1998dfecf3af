//! HTTP server setup

use crate::api::{create_router, AppContext};
use crate::error::Result;
use crate::session::SessionManager;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Serve the API on `port` until `shutdown` resolves, then reset every
/// session
pub async fn run(
    port: u16,
    sessions: Arc<SessionManager>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = create_router(AppContext {
        sessions: sessions.clone(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Resetting {} sessions", sessions.len());
    sessions.shutdown_all().await;
    Ok(())
}
