//! Readiness supervision.
//!
//! Races a confirmation timer against the service loop's outcome. If the
//! loop runs cleanly for the whole interval, a marker file is written for
//! the external readiness check and the process stays up; if the loop
//! fails first, the process dies without ever looking ready. There is no
//! third possibility: a loop that ends cleanly was relinquishing its
//! listener, and the caller drains and exits 0.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tracing::info;

use crate::config::SidecarConfig;

/// Marker content the external readiness check looks for.
const READY_CONTENT: &[u8] = b"success";

/// Fatal supervision failure; the process must exit non-zero.
#[derive(Debug, Error)]
pub enum ReadinessError {
    /// The readiness marker could not be persisted
    #[error("write readiness marker {path}: {source}")]
    Marker {
        /// Marker path
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// The service loop failed
    #[error("service loop failed: {0}")]
    Serve(#[source] io::Error),
}

/// Supervise the service loop whose outcome arrives on `serve_done`.
///
/// Returns `Ok(())` once the loop has ended cleanly (the listener was
/// relinquished) so the caller can drain and exit 0. A loop that ends
/// cleanly before the confirmation interval skips the marker: a process
/// that existed only to shed its listener never became ready.
pub async fn supervise(
    config: &SidecarConfig,
    mut serve_done: oneshot::Receiver<io::Result<()>>,
) -> Result<(), ReadinessError> {
    tokio::select! {
        _ = tokio::time::sleep(config.confirm_after) => {
            write_marker(&config.ready_file)
                .await
                .map_err(|source| ReadinessError::Marker {
                    path: config.ready_file.clone(),
                    source,
                })?;
            info!(
                path = %config.ready_file.display(),
                "service loop confirmed, readiness marker written"
            );
        }
        outcome = &mut serve_done => return serve_ended(outcome),
    }

    serve_ended(serve_done.await)
}

fn serve_ended(
    outcome: Result<io::Result<()>, oneshot::error::RecvError>,
) -> Result<(), ReadinessError> {
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(ReadinessError::Serve(error)),
        Err(_) => Err(ReadinessError::Serve(io::Error::other(
            "service loop task vanished",
        ))),
    }
}

async fn write_marker(path: &Path) -> io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(READY_CONTENT).await?;
    file.flush().await?;
    Ok(())
}
