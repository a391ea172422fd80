//! csi-lvm node agent
//!
//! `createlv`/`deletelv` perform one volume action and exit; a failure exits
//! non-zero so the execution unit is reported as failed. `revivelvs` runs
//! until terminated.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use csi_lvm_cluster::{KubeClient, KubeConfig};
use csi_lvm_node_agent::{
    agent,
    config::{Cli, Command, ReviveArgs},
    HealthMonitor, Reconciler,
};
use csi_lvm_volume::{HostExecutor, VolumeManager};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let cli = Cli::parse();
    let manager = VolumeManager::new(HostExecutor::new());

    match cli.command {
        Command::Createlv(args) => agent::create_volume(&manager, &args)
            .await
            .with_context(|| format!("unable to create logical volume {}", args.lvname)),
        Command::Deletelv(args) => agent::delete_volume(&manager, &args)
            .await
            .with_context(|| format!("unable to delete logical volume {}", args.lvname)),
        Command::Revivelvs(args) => revive(manager, args).await,
    }
}

async fn revive(manager: VolumeManager, args: ReviveArgs) -> Result<()> {
    info!(
        node = %args.nodename,
        vg = %args.vgname,
        directory = %args.directory.display(),
        lvmtype = %args.lvmtype,
        devices = ?args.devices,
        "Starting csi-lvm reviver"
    );

    let reconciler = Reconciler::new(manager.clone(), args.reconciler_settings());
    reconciler
        .revive()
        .await
        .context("unable to revive logical volumes")?;

    let kube_config = match &args.kube_api {
        Some(url) => KubeConfig::new(url.clone()),
        None => KubeConfig::in_cluster()?,
    };
    let client = Arc::new(KubeClient::new(kube_config)?);
    let monitor = HealthMonitor::new(manager, client, args.health_settings());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reconciler_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { reconciler.run(shutdown_rx).await }
    });
    let health_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { monitor.run(shutdown_rx).await }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = reconciler_handle => {
            if let Err(e) = result {
                error!(error = %e, "Reconciler task panicked");
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!(error = %e, "Health monitor task panicked");
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Reviver shutdown complete");
    Ok(())
}
