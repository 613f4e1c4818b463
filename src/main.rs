use roomsync::config::RelayConfig;
use roomsync::routes;
use roomsync::state::RelayState;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = RelayConfig::from_env();
    let state = RelayState::new(config);
    let app = routes::app(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, client_queue = config.client_queue, "roomsync relay listening");
    axum::serve(listener, app).await
}
