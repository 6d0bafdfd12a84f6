//! Prometheus exec receiver for execsight.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use execsight_common::{LoggingConfig, connect, init_tracing};
use execsight_receiver::{
    ExecBridgeConfig, ExecReceiver, ReceiverArgs, StatusPublisher, ZenohIntake,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ReceiverArgs::parse();

    let config = ExecBridgeConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    let logging = match &args.log_level {
        Some(level) => LoggingConfig {
            level: level.clone(),
            ..config.logging.clone()
        },
        None => config.logging.clone(),
    };
    init_tracing(&logging).context("Failed to initialize logging")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        receivers = config.exec.receivers.len(),
        "Starting execsight receiver"
    );

    let session = Arc::new(
        connect(&config.zenoh)
            .await
            .context("Failed to connect to Zenoh")?,
    );
    info!(zid = %session.zid(), "Connected to Zenoh");

    let intake = ZenohIntake::new(session.clone(), &config.exec.key_prefix, config.serialization);

    let (status_shutdown, status_shutdown_rx) = watch::channel(false);
    let mut trackers = Vec::with_capacity(config.exec.receivers.len());

    let mut running = Vec::with_capacity(config.exec.receivers.len());
    for receiver_config in &config.exec.receivers {
        let job = receiver_config.job_name();
        let mut receiver = ExecReceiver::new(receiver_config.clone(), intake.clone())
            .with_context(|| format!("Invalid receiver '{}'", receiver_config.name))?;
        let port = receiver
            .start()
            .await
            .with_context(|| format!("Failed to start receiver '{}'", receiver_config.name))?;

        // the child is not up yet; the tracker republishes with a pid once it is
        let status = StatusPublisher::new(intake.clone(), &receiver_config.name, job);
        if let Err(e) = status.publish_running(port, None).await {
            warn!(receiver = %receiver_config.name, error = %e, "Failed to publish running status");
        }

        if let Some(process) = receiver.status() {
            let tracker = status.clone();
            let shutdown = status_shutdown_rx.clone();
            trackers.push(tokio::spawn(async move {
                tracker.track(port, process, shutdown).await;
            }));
        }

        running.push((receiver, status));
    }

    info!(receivers = running.len(), "Receivers running. Press Ctrl+C to stop.");
    wait_for_signal().await;
    info!("Received shutdown signal");

    // stop status updates first so nothing lands after "offline"
    let _ = status_shutdown.send(true);
    for tracker in trackers {
        let _ = tracker.await;
    }

    for (receiver, status) in &mut running {
        receiver.shutdown().await;
        if let Err(e) = status.publish_offline().await {
            warn!(receiver = %receiver.name(), error = %e, "Failed to publish offline status");
        }
    }

    if let Err(e) = session.close().await {
        warn!(error = %e, "Error closing Zenoh session");
    }

    info!("Goodbye!");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM, waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
