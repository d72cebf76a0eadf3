mod api;

use axum::Router;
use spinfeed::types::{Channel, ClientEvent};
use spinfeed::{Config, StreamClient};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub client: Arc<StreamClient>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spinfeed=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env());
    info!("Starting spinfeed on {}:{}", config.host, config.port);
    info!("Spin stream: {}", config.stream.url);

    let client = StreamClient::new(config.as_ref().clone());

    // Log lifecycle events; the handles live as long as the server.
    let _lifecycle = [
        client.on(Channel::Connect, |_| info!("Spin stream connected")),
        client.on(Channel::Disconnect, |_| warn!("Spin stream disconnected")),
        client.on(Channel::Reconnecting, |event| {
            if let ClientEvent::Reconnecting { attempt } = event {
                warn!("Spin stream reconnecting (attempt {})", attempt);
            }
        }),
        client.on(Channel::Error, |event| {
            if let ClientEvent::Error { message } = event {
                error!("Spin stream error: {}", message);
            }
        }),
        client.on(Channel::AccessRequired, |_| {
            warn!("Server is withholding data; POST a credential to /api/access")
        }),
        client.on(Channel::NewSpins, |event| {
            if let ClientEvent::NewSpins {
                display_name, spins, ..
            } = event
            {
                if let Some(latest) = spins.first() {
                    debug!("{}: {} ({})", display_name, latest.number, latest.color);
                }
            }
        }),
    ];

    client.connect_stream();

    let state = AppState {
        config: config.clone(),
        client: client.clone(),
    };

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the router
    let app = Router::new()
        .merge(api::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start the server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Status API listening on {}", addr);

    axum::serve(listener, app).await?;

    client.disconnect();
    Ok(())
}
