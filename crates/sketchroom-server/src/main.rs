//! Sketchroom WebSocket Relay Server

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use sketchroom_server::{AppState, router};
use tracing::{info, warn};

const DEFAULT_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 3030);

/// Listen address from `SKETCHROOM_ADDR`, falling back to the default.
fn listen_addr() -> SocketAddr {
    match std::env::var("SKETCHROOM_ADDR") {
        Ok(raw) => raw.parse().unwrap_or_else(|e| {
            warn!("Ignoring SKETCHROOM_ADDR={:?}: {}", raw, e);
            DEFAULT_ADDR
        }),
        Err(_) => DEFAULT_ADDR,
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sketchroom_server=info,tower_http=info".into()),
        )
        .init();

    let addr = listen_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Sketchroom relay server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router(Arc::new(AppState::new()))).await
}
