//! The transient rendezvous socket the successor waits on.
//!
//! One envelope per handoff: the successor binds the well-known path,
//! asks the predecessor to transfer, and receives a single listening
//! descriptor. The path is unlinked before binding so a previous crashed
//! attempt cannot leave the address occupied, and unlinked again on drop
//! so a failed attempt leaves nothing behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::{TcpListener, UnixListener};
use tracing::{debug, info};

use crate::error::HandoffError;
use crate::transfer;

/// A bound rendezvous socket waiting for exactly one envelope.
pub struct Rendezvous {
    path: PathBuf,
    listener: UnixListener,
}

impl Rendezvous {
    /// Remove any stale socket file at `path` and bind a fresh listener.
    ///
    /// Only one recipient may own the address at a time; a second bind
    /// while another successor is waiting fails.
    pub fn bind(path: impl Into<PathBuf>) -> Result<Self, HandoffError> {
        let path = path.into();

        match fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed stale rendezvous socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(HandoffError::Bind { path, source }),
        }

        let listener = UnixListener::bind(&path).map_err(|source| HandoffError::Bind {
            path: path.clone(),
            source,
        })?;

        Ok(Self { path, listener })
    }

    /// Path the rendezvous socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the envelope and reconstruct the transferred listener.
    ///
    /// The whole wait (accept, receive, reconstruct) is bounded by
    /// `wait`; expiry converts a hung predecessor into a handoff failure
    /// instead of blocking the successor forever.
    pub async fn recv_listener(self, wait: Duration) -> Result<TcpListener, HandoffError> {
        let receive = async {
            let (stream, _) = self.listener.accept().await.map_err(HandoffError::Receive)?;
            let fd = transfer::recv_fd(&stream)
                .await
                .map_err(HandoffError::Receive)?
                .ok_or(HandoffError::EmptyEnvelope)?;
            transfer::listener_from_fd(fd)
        };

        let listener = match tokio::time::timeout(wait, receive).await {
            Ok(result) => result?,
            Err(_) => return Err(HandoffError::TimedOut(wait)),
        };

        info!(
            addr = ?listener.local_addr().ok(),
            "received listener over rendezvous socket"
        );
        Ok(listener)
    }
}

impl Drop for Rendezvous {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
