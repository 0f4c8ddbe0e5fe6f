use agency_chat_server::{app, config::AppConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("agency_chat_server=info,tower_http=info")),
        )
        .init();

    if let Err(err) = app::run(config).await {
        tracing::error!(error = %err, "server stopped");
        std::process::exit(1);
    }
}
