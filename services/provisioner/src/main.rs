//! csi-lvm controller
//!
//! Serves provisioning and reclaim requests and runs the resulting volume
//! actions on their nodes.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use csi_lvm_cluster::{KubeClient, KubeConfig};
use csi_lvm_provisioner::{
    api::{self, AppState},
    config::Config,
    Dispatcher, LvmProvisioner,
};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Config::parse();

    info!("Starting csi-lvm controller");
    info!(
        provisioner = %config.provisioner_name,
        namespace = %config.namespace,
        vg = %config.vg_name,
        device_pattern = %config.device_pattern,
        default_lvm_type = %config.default_lvm_type,
        mountpoint = %config.mountpoint.display(),
        timeout_secs = config.timeout_secs,
        "Configuration loaded"
    );

    let kube_config = match &config.kube_api {
        Some(url) => KubeConfig::new(url.clone()),
        None => KubeConfig::in_cluster()?,
    };
    let client = Arc::new(KubeClient::new(kube_config)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher = Dispatcher::new(client.clone(), config.dispatch_settings(), shutdown_rx.clone());
    let provisioner = LvmProvisioner::new(dispatcher, client, config.provisioner_settings());

    let app = api::create_router(AppState {
        provisioner: Arc::new(provisioner),
        provisioner_name: config.provisioner_name.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Controller shutdown complete");
    Ok(())
}
