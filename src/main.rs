use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rustbng::{Config, ForwardingPlane, Gateway, Result};

#[derive(Parser)]
#[command(name = "rustbngd")]
#[command(author, version, about = "BNG control-plane daemon", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "/etc/rustbng.toml")]
    config: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = Config::load_or_create(&cli.config).await?;
    let plane = build_plane(&config).await?;

    let gateway = Gateway::start(&config, plane).await?;
    info!(socket = %config.misc.kea_socket.display(), "rustbngd running");

    let mut sigterm = signal(SignalKind::terminate())?;
    gateway
        .run_until(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        })
        .await?;

    info!("rustbngd exited");
    Ok(())
}

#[cfg(feature = "netlink")]
async fn build_plane(config: &Config) -> Result<Arc<dyn ForwardingPlane>> {
    Ok(Arc::new(
        rustbng::netlink::NetlinkPlane::new(&config.ifaces).await?,
    ))
}

#[cfg(not(feature = "netlink"))]
async fn build_plane(config: &Config) -> Result<Arc<dyn ForwardingPlane>> {
    tracing::warn!("built without netlink support; forwarding-plane calls are logged only");
    Ok(Arc::new(rustbng::LoggingPlane::new(&config.ifaces)))
}
