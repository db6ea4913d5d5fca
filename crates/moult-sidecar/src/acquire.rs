//! Listener acquisition.
//!
//! Every process gets its listening socket exactly once, by one of two
//! paths chosen from its negotiated upgrade role: bind the well-known
//! port fresh, or take over the predecessor's listener through the
//! rendezvous socket. A stale older generation gets neither: it must not
//! race the successor for the port, so it yields and exits.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

use moult_handoff::{HandoffError, Rendezvous, UpgradeRole};

use crate::config::SidecarConfig;

/// Where the acquired listener came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerOrigin {
    /// Bound fresh by this process.
    FreshBind,
    /// Received from the predecessor generation.
    TakenOver,
}

/// Outcome of listener acquisition.
pub enum Acquisition {
    /// This process owns a listener and should serve on it.
    Serving {
        /// The acquired listener
        listener: TcpListener,
        /// How it was acquired
        origin: ListenerOrigin,
    },
    /// Older generation during an upgrade: the yield pause has elapsed
    /// and the process should exit cleanly without ever serving.
    Yielded,
}

/// Fatal acquisition failure. The process cannot serve and must exit
/// non-zero.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// Fresh bind of the well-known port failed, e.g. the predecessor
    /// never released it
    #[error("bind {addr}: {source}")]
    Bind {
        /// Address the bind was attempted on
        addr: SocketAddr,
        /// Underlying error
        source: io::Error,
    },
}

/// Recoverable takeover failure; the caller falls back to a fresh bind.
#[derive(Debug, Error)]
pub enum TakeoverError {
    /// The transfer-trigger control call failed or the predecessor did
    /// not answer `success`
    #[error("transfer request failed: {0}")]
    Request(String),

    /// Receiving or reconstructing the transferred listener failed
    #[error(transparent)]
    Transfer(#[from] HandoffError),
}

/// Acquire the service listener according to the negotiated role.
pub async fn acquire(
    config: &SidecarConfig,
    role: UpgradeRole,
) -> Result<Acquisition, AcquireError> {
    match role {
        UpgradeRole::Standalone => {
            let listener = bind_fresh(config).await?;
            Ok(Acquisition::Serving {
                listener,
                origin: ListenerOrigin::FreshBind,
            })
        }

        // The successor owns or will own the port; binding here could
        // steal it out from under the in-flight upgrade.
        UpgradeRole::OlderGeneration => {
            info!(
                wait = ?config.yield_wait,
                "older generation during an upgrade, yielding without binding"
            );
            tokio::time::sleep(config.yield_wait).await;
            Ok(Acquisition::Yielded)
        }

        UpgradeRole::NewerGeneration => match take_over(config).await {
            Ok(listener) => Ok(Acquisition::Serving {
                listener,
                origin: ListenerOrigin::TakenOver,
            }),
            Err(error) => {
                warn!(error = %error, "takeover failed, falling back to a fresh bind");
                let listener = bind_fresh(config).await?;
                Ok(Acquisition::Serving {
                    listener,
                    origin: ListenerOrigin::FreshBind,
                })
            }
        },
    }
}

/// Take over the predecessor's listener.
///
/// The rendezvous socket starts waiting before the control call goes out,
/// so the predecessor always finds a recipient; the envelope wait is only
/// joined once the predecessor has answered `success`.
pub async fn take_over(config: &SidecarConfig) -> Result<TcpListener, TakeoverError> {
    let rendezvous = Rendezvous::bind(&config.handoff_socket)?;
    let envelope = tokio::spawn(rendezvous.recv_listener(config.handoff_timeout));

    let url = format!("http://127.0.0.1:{}/migrate", config.service_port);
    info!(url = %url, "requesting listener transfer from predecessor");

    if let Err(error) = request_transfer(&url, config.handoff_timeout).await {
        envelope.abort();
        // Let the rendezvous wind down (and unlink its socket file)
        // before handing control back to the fallback path.
        let _ = envelope.await;
        return Err(error);
    }

    let listener = envelope
        .await
        .map_err(|e| TakeoverError::Transfer(HandoffError::Receive(io::Error::other(e))))??;
    Ok(listener)
}

async fn request_transfer(url: &str, timeout: Duration) -> Result<(), TakeoverError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| TakeoverError::Request(e.to_string()))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| TakeoverError::Request(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(TakeoverError::Request(format!("status {status}")));
    }

    let body = response
        .text()
        .await
        .map_err(|e| TakeoverError::Request(e.to_string()))?;
    if body != "success" {
        return Err(TakeoverError::Request(format!(
            "predecessor answered {body:?}"
        )));
    }

    Ok(())
}

async fn bind_fresh(config: &SidecarConfig) -> Result<TcpListener, AcquireError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.service_port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| AcquireError::Bind { addr, source })?;
    info!(addr = %addr, "bound service port");
    Ok(listener)
}
