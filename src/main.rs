use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use streetlights::channel::MqttChannel;
use streetlights::config::AppConfig;
use streetlights::StreetlightService;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load_or_default(config_path.as_deref())
        .map_err(|e| eyre!("Failed to load configuration: {}", e))?;

    let channel = Arc::new(MqttChannel::start(
        &config.broker,
        config.service.channel_capacity,
    ));

    let service = StreetlightService::create(&config, channel.clone())
        .start()
        .map_err(|e| eyre!("Failed to start streetlight service: {}", e))?;

    info!("Streetlight service running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for shutdown signal: {}", e))?;

    let stopped = service.shutdown().await;
    info!("Tracked {} streetlights this session", stopped.store().len());
    channel.shutdown().await;

    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
