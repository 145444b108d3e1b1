use anyhow::Result;
use sight_hoster_node::{
    api, config, metrics,
    bridge::{MessagePublisher, TunnelBridge},
    identity::FileKeyProvider,
    relay::{InboundRouter, RelayForwarder},
    selector::BackendSelector,
    settings::JsonFileSettings,
    transport::TransportNode,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with filters
    // Iroh is chatty about connection attempts; keep it to warnings
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info")
                    .add_directive("iroh=warn".parse().unwrap())
                    .add_directive("iroh_gossip=warn".parse().unwrap())
            }),
        )
        .init();

    tracing::info!("Starting Sight AI hoster node...");

    metrics::init_metrics();
    tracing::info!("Metrics system initialized");

    let config = config::Config::load()?;
    tracing::info!(
        role = ?config.p2p_config.role,
        settings = %config.settings_path.display(),
        "Configuration loaded"
    );

    let settings = Arc::new(JsonFileSettings::new(&config.settings_path));
    let selector = Arc::new(BackendSelector::new(settings, config.backend_config.clone())?);
    let active = selector.current_backend().await;
    tracing::info!("Active backend at startup: {} ({})", active.kind, active.base_url);

    let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();

    // Without a provisioned key the node still serves the local API
    let keys = FileKeyProvider::new(&config.p2p_config.key_path);
    let transport = match TransportNode::start(&keys, &config.p2p_config).await {
        Ok(node) => Some(Arc::new(node)),
        Err(e) => {
            tracing::error!("Overlay transport unavailable, serving local API only: {}", e);
            None
        }
    };

    let publisher: Option<Arc<dyn MessagePublisher>> = transport
        .clone()
        .map(|t| t as Arc<dyn MessagePublisher>);

    if let (Some(node), Some(publisher)) = (transport.clone(), publisher.clone()) {
        let forwarder = RelayForwarder::new(config.p2p_config.relay_url.clone())?;
        tracing::info!("Relaying addressed messages to {}", forwarder.url());
        let inbound = InboundRouter::new(publisher.local_id().clone(), forwarder);

        tokio::spawn(async move {
            if let Err(e) = node.run(inbound).await {
                tracing::error!("Transport error: {}", e);
            }
        });

        let bridge = Arc::new(TunnelBridge::new(selector.clone(), publisher));
        bridge.spawn_event_loop(event_rx);
        tracing::info!("Tunnel bridge started");
    } else {
        drop(event_rx);
    }

    let app = api::create_router(api::AppState {
        selector,
        events: event_tx,
        publisher,
    });

    tracing::info!("Local API listening on http://{}:{}", config.api_host, config.api_port);
    let listener =
        tokio::net::TcpListener::bind(format!("{}:{}", config.api_host, config.api_port)).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    if let Some(node) = transport {
        node.shutdown().await;
    }
    tracing::info!("Node stopped");
    Ok(())
}
