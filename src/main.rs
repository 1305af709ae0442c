use tracing_subscriber::EnvFilter;

use stitchgate::GatewayServer;

mod args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_filter)?)
        .with_target(false)
        .init();

    let config = args.gateway_config()?;
    tracing::info!("stitchgate {}", env!("CARGO_PKG_VERSION"));

    let server = GatewayServer::new(config);
    server.initialize().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    server.close().await?;

    Ok(())
}
