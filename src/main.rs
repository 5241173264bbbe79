use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meshgossip::cli;
use meshgossip::connection_maker::TcpConnectionMaker;
use meshgossip::router::{Router, RouterParts};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meshgossip=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse args and env vars
    let args = cli::Cli::parse();
    let config = args.into_config()?;
    let name = args.peer_name()?;
    let nickname = args.nickname();

    let connection_maker = Arc::new(TcpConnectionMaker::new(
        args.peers.clone(),
        config.peer_discovery,
    ));
    let parts = RouterParts::new(&config, name, &nickname).with_connection_maker(connection_maker);
    let router = Router::new(config, parts)?;

    info!("Starting {} as {}({})", meshgossip::settings::APP_NAME, name, nickname);
    router.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("{}", serde_json::to_string_pretty(&router.status())?);
    router.stop()?;

    Ok(())
}
