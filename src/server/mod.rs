//! Carrier WebSocket server (spec.md §6).
//!
//! Grounded on the teacher's own `server/mod.rs`: an [`axum::Router`] built
//! from shared [`ServerState`], `tower-http`'s tracing/CORS layers, and a
//! plain `start(host, port)` entry point. The teacher's JWT/device-registry
//! routes have no counterpart here — the carrier authenticates calls at the
//! telephony layer, not this service — so only the carrier WebSocket route
//! and a liveness check remain.

pub mod carrier_ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::llm::OpenRouterClient;
use crate::nlg::templates::TemplateTable;
use crate::nlg::TemplateNlg;

/// State shared across every carrier connection this process accepts.
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub llm: Arc<OpenRouterClient>,
    pub nlg: TemplateNlg,
    pub clock: Arc<dyn Clock>,
}

async fn health() -> &'static str {
    "ok"
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/carrier-ws", get(carrier_ws::handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the shared state and bind the carrier WebSocket server.
pub async fn start() -> anyhow::Result<()> {
    let config = Config::load()?;
    let templates = TemplateTable::load(&config.templates.dialogue_path)?;
    let nlg = TemplateNlg::new(Arc::new(templates));
    let llm = Arc::new(OpenRouterClient::new(config.llm.clone()));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let state = ServerState { config: Arc::new(config), llm, nlg, clock: Arc::new(SystemClock) };

    info!(%addr, "starting carrier WebSocket server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_builds_without_panicking() {
        let config = Config::default();
        let templates =
            TemplateTable::load(std::path::Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/dialogue.json"))).unwrap();
        let state = ServerState {
            config: Arc::new(config),
            llm: Arc::new(OpenRouterClient::new(crate::config::LlmConfig::default())),
            nlg: TemplateNlg::new(Arc::new(templates)),
            clock: Arc::new(SystemClock),
        };
        let _ = router(state);
    }
}
