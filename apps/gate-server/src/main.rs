//! wsgate standalone gateway entry point.

mod config;
mod echo;
mod envelope;

use tracing_subscriber::EnvFilter;
use wsgate_gate::{GateConfig, Gateway};

use crate::echo::EchoProcessor;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting wsgate");

    let path = config::config_path(
        std::env::args().nth(1),
        std::env::var(config::CONFIG_ENV).ok(),
    );
    let config = config::load(&path)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))?;

    tracing::info!("wsgate shut down cleanly");
    Ok(())
}

async fn run(config: GateConfig) -> anyhow::Result<()> {
    log_listeners(&config);
    let gateway = Gateway::new(config, EchoProcessor)?;

    let gateway_run = std::sync::Arc::clone(&gateway);
    let mut handle = tokio::spawn(async move { gateway_run.run().await });

    tokio::select! {
        result = &mut handle => {
            // Only a startup failure ends run() before shutdown.
            return Ok(result??);
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
        }
    }

    gateway.shutdown();
    handle.await??;
    Ok(())
}

/// wsgate never terminates TLS itself.
fn log_listeners(config: &GateConfig) {
    if config.tls_requested() {
        tracing::error!(
            cert = %config.cert_file,
            key = %config.key_file,
            "TLS is not terminated by wsgate; clear cert_file/key_file and put a TLS proxy in front"
        );
    } else {
        tracing::info!(
            ws = %config.ws_addr,
            tcp = %config.tcp_addr,
            "listeners serve plain text; terminate TLS in a fronting proxy"
        );
    }
}
