//! The HTTP service loop.
//!
//! One router regardless of where the listener came from:
//!
//! - `GET /serve`: health/version endpoint; answers with this process's
//!   generation after a small artificial delay
//! - `GET /migrate`: transfer trigger; hands the listening socket to the
//!   successor waiting on the rendezvous socket and answers with the
//!   literal body `success` or `failed`
//!
//! The loop runs until the listener is relinquished (transfer-out or
//! SIGTERM) or a fatal serve error occurs; either way the outcome is
//! reported to the readiness supervisor through the returned channel.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, warn, Level};

use moult_handoff::ListenerSlot;

use crate::config::SidecarConfig;

/// Literal body for a completed transfer.
const MIGRATE_OK: &str = "success";
/// Literal body for a failed or repeated transfer.
const MIGRATE_FAILED: &str = "failed";

/// Server application state.
pub struct AppState {
    /// Generation identity shown by the health endpoint
    pub generation: String,
    /// Custody of the listening socket for transfer-out
    pub slot: ListenerSlot,
    /// Rendezvous socket path a successor will wait on
    pub handoff_socket: PathBuf,
    /// Artificial latency on the health endpoint
    pub serve_delay: Duration,
}

impl AppState {
    /// Build the state for a service loop about to serve on `listener`.
    pub fn new(config: &SidecarConfig, listener: &TcpListener) -> io::Result<Self> {
        Ok(Self {
            generation: config.generation.clone(),
            slot: ListenerSlot::new(listener)?,
            handoff_socket: config.handoff_socket.clone(),
            serve_delay: config.serve_delay,
        })
    }
}

/// Spawn the service loop on `listener`.
///
/// The returned channel yields `Ok(())` once the listener has been
/// relinquished and in-flight connections have wound down, or the fatal
/// serve error.
pub fn spawn(listener: TcpListener, state: Arc<AppState>) -> oneshot::Receiver<io::Result<()>> {
    let app = create_router(state.clone());
    let relinquished = state.slot.relinquish_token();
    let (done_tx, done_rx) = oneshot::channel();

    tokio::spawn(async move {
        info!(
            addr = ?listener.local_addr().ok(),
            generation = %state.generation,
            "service loop starting"
        );
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(relinquished.cancelled_owned())
            .await;
        let _ = done_tx.send(result);
    });

    done_rx
}

/// Create the router with both control endpoints and request tracing.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/serve", get(serve_handler))
        .route("/migrate", get(migrate_handler))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

/// Health/version endpoint, with a small delay to model request latency.
async fn serve_handler(State(state): State<Arc<AppState>>) -> String {
    tokio::time::sleep(state.serve_delay).await;
    format!("This is version({}) sidecar", state.generation)
}

/// Transfer trigger. Hands the listener to the waiting successor; once it
/// has been given away there is nothing left to send and every further
/// call reports `failed`.
async fn migrate_handler(State(state): State<Arc<AppState>>) -> &'static str {
    match state.slot.hand_over(&state.handoff_socket).await {
        Ok(()) => {
            // Second close; hand_over already stopped the accept loop.
            state.slot.close();
            MIGRATE_OK
        }
        Err(error) => {
            warn!(error = %error, "listener handoff failed");
            MIGRATE_FAILED
        }
    }
}
