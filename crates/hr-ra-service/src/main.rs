mod config;
mod interface;

use std::time::Duration;

use anyhow::{Context, Result};
use hr_radvd::{RaDaemon, RaParams, deprecated_params};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

use crate::config::{RaServiceConfig, config_path};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hr_ra_service=info,hr_radvd=info".parse().unwrap()),
        )
        .init();

    info!("hr-ra-service starting...");

    let path = config_path();
    let mut config = RaServiceConfig::load_or_default(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    let iface = interface::resolve_interface(&config.interface)?;
    let mut current = config.to_params()?;

    info!(
        "Config loaded: interface {} (index {}), {} prefixes, {} DNS servers, default route {}",
        iface.name,
        iface.index,
        current.prefixes.len(),
        current.dnses.len(),
        if current.has_default_route { "yes" } else { "no" },
    );

    let mut signals = Signals::new([SIGHUP, SIGINT, SIGTERM])?;

    let mut daemon = RaDaemon::new(iface);
    daemon.start().context("Failed to start RA daemon")?;
    daemon.install(None, Some(current.clone())).await;

    info!("hr-ra-service started successfully");

    while let Some(signal) = signals.next().await {
        match signal {
            SIGHUP => {
                info!("Received SIGHUP, reloading config...");
                match reload(&daemon, &current).await {
                    Ok((new_config, Some(new_params))) => {
                        config = new_config;
                        current = new_params;
                        info!("Config reloaded successfully");
                    }
                    Ok((new_config, None)) => {
                        config = new_config;
                        info!("Advertised parameters unchanged");
                    }
                    Err(e) => error!("Failed to reload config: {:#}", e),
                }
            }
            _ => break,
        }
    }

    info!("Shutting down...");

    if config.withdraw_on_exit && !current.is_empty() {
        daemon
            .install(Some(deprecated_params(Some(&current), None)), None)
            .await;
        info!(
            "Withdrawing {} prefixes and {} DNS servers, waiting {}s",
            current.prefixes.len(),
            current.dnses.len(),
            config.exit_grace_secs
        );
        tokio::time::sleep(Duration::from_secs(config.exit_grace_secs)).await;
    }

    daemon.stop();
    Ok(())
}

/// Re-read the config and install the new parameters if they changed.
async fn reload(
    daemon: &RaDaemon,
    current: &RaParams,
) -> Result<(RaServiceConfig, Option<RaParams>)> {
    let new_config = RaServiceConfig::load_from_file(&config_path())?;
    if new_config.interface != daemon.interface().name {
        warn!(
            "Interface change {} -> {} requires a restart, ignoring",
            daemon.interface().name,
            new_config.interface
        );
    }

    let new_params = new_config.to_params()?;
    if &new_params == current {
        return Ok((new_config, None));
    }

    let deprecated = deprecated_params(Some(current), Some(&new_params));
    if !deprecated.is_empty() {
        info!(
            "Deprecating {} prefixes and {} DNS servers",
            deprecated.prefixes.len(),
            deprecated.dnses.len()
        );
    }
    daemon.install(Some(deprecated), Some(new_params.clone())).await;

    Ok((new_config, Some(new_params)))
}
