use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;

use aid_relay::api::{ApiState, ResponseService, api_routes};
use aid_relay::config::AppConfig;
use aid_relay::dispatch::Messenger;
use aid_relay::gateway::{DevGateway, HttpGateway, MessagingGateway};
use aid_relay::pipeline::processor::{self, ResponseProcessor};
use aid_relay::pipeline::RequestLocks;
use aid_relay::poller::{LeaseRegistry, spawn_inbound_poller};
use aid_relay::store::{LibSqlStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env();

    eprintln!("Aid Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path);
    eprintln!("   API: http://{}", config.api.bind_addr);

    // ── Store ────────────────────────────────────────────────────────
    let store: Arc<dyn Store> = Arc::new(
        LibSqlStore::new_local(std::path::Path::new(&config.db_path))
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path))?,
    );

    // ── Gateway ──────────────────────────────────────────────────────
    let gateway: Arc<dyn MessagingGateway> = match config.gateway.clone() {
        Some(gateway_config) => {
            eprintln!("   Gateway: {}", gateway_config.base_url);
            Arc::new(HttpGateway::new(gateway_config))
        }
        None => {
            eprintln!("   Gateway: dev (set GATEWAY_BASE_URL for a real provider)");
            Arc::new(DevGateway::new())
        }
    };

    // ── Pipeline ─────────────────────────────────────────────────────
    let locks = Arc::new(RequestLocks::new());
    let messenger = Arc::new(Messenger::new(Arc::clone(&store), Arc::clone(&gateway)));
    let response_processor = Arc::new(ResponseProcessor::new(
        Arc::clone(&store),
        Arc::clone(&messenger),
        Arc::clone(&locks),
        config.mark_read,
    ));

    let (work_tx, work_rx) = mpsc::unbounded_channel();
    let _worker = processor::spawn_response_worker(
        Arc::clone(&store),
        Arc::clone(&response_processor),
        work_rx,
    );

    // Replies that arrived before a restart are picked up again.
    processor::recover_unread(&store, &work_tx)
        .await
        .map_err(|e| anyhow::anyhow!("Startup recovery failed: {e}"))?;

    // ── Inbound poller ───────────────────────────────────────────────
    let leases = Arc::new(LeaseRegistry::new());
    let (_poller, _poller_shutdown) = spawn_inbound_poller(
        config.poller.clone(),
        Arc::clone(&gateway),
        Arc::clone(&store),
        leases,
        work_tx.clone(),
    );

    // ── API ──────────────────────────────────────────────────────────
    let service = Arc::new(ResponseService::new(
        Arc::clone(&store),
        Arc::clone(&locks),
        work_tx,
    ));
    let app = api_routes(ApiState { service }).layer(tower_http::cors::CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.api.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.api.bind_addr))?;
    axum::serve(listener, app)
        .await
        .context("API server failed")?;

    Ok(())
}
