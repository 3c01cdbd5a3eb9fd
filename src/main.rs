use burrow::{ApplicationConfig, entrypoint};
use clap::Parser;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt::time::ChronoLocal, layer::SubscriberExt, util::SubscriberInitExt,
};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_timer(ChronoLocal::rfc_3339()))
        .with(ErrorLayer::default())
        .init();
    let config = ApplicationConfig::parse();
    entrypoint(config).await
}
