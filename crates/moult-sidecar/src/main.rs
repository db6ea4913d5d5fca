use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

use moult_sidecar::acquire::{self, Acquisition};
use moult_sidecar::config::{SidecarConfig, SidecarMode};
use moult_sidecar::readiness;
use moult_sidecar::server::{self, AppState};
use moult_sidecar::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init().map_err(|e| anyhow::anyhow!("failed to initialize telemetry: {e}"))?;

    info!("Moult sidecar starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = SidecarConfig::from_env();
    config.log_config();

    if config.mode == SidecarMode::Idle {
        info!("idle mode: staying alive without serving");
        std::future::pending::<()>().await;
        return Ok(());
    }

    let role = moult_handoff::negotiate(
        Some(config.generation.as_str()),
        config.sibling_generation.as_deref(),
    );
    info!(?role, "negotiated upgrade role");

    let acquisition = acquire::acquire(&config, role)
        .await
        .context("listener acquisition failed")?;

    let (listener, origin) = match acquisition {
        Acquisition::Yielded => {
            info!("yield complete, exiting");
            return Ok(());
        }
        Acquisition::Serving { listener, origin } => (listener, origin),
    };
    info!(?origin, addr = ?listener.local_addr().ok(), "listener acquired");

    let state = Arc::new(AppState::new(&config, &listener).context("listener custody failed")?);
    spawn_sigterm_handler(state.clone());

    let serve_done = server::spawn(listener, state);

    readiness::supervise(&config, serve_done)
        .await
        .context("supervision failed")?;

    info!(wait = ?config.drain_wait, "listener relinquished, draining before exit");
    tokio::time::sleep(config.drain_wait).await;
    info!("drain complete, exiting");
    Ok(())
}

/// SIGTERM reuses the relinquish path: stop accepting, let the supervisor
/// observe a clean end, drain, exit 0.
fn spawn_sigterm_handler(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        sigterm.recv().await;
        info!("received SIGTERM, stopping the accept loop");
        state.slot.close();
    });
}
