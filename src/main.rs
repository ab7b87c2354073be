use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use keeper::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::load()?;

    // RUST_LOG wins over the configured level when set
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .or_else(|_| EnvFilter::try_new("info"))?;
    let subscriber = fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(
        target: "startup",
        "{} {} starting: address='{}'",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        config.address
    );

    keeper::server::run(config).await
}
