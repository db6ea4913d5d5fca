//! Predecessor-side listener custody.
//!
//! While the service loop owns the listening socket, the slot keeps a
//! duplicate of its descriptor (same open socket description) so the
//! transfer-trigger endpoint can hand the listener to a successor without
//! reaching into the accept loop. Ordering invariant: the accept loop is
//! stopped strictly after the send succeeds, so the port is never unbound
//! on both sides.

use std::io;
use std::os::fd::{AsFd, OwnedFd};
use std::path::Path;

use tokio::net::{TcpListener, UnixStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::HandoffError;
use crate::transfer;

/// Custody of a listening socket that can be handed over exactly once.
pub struct ListenerSlot {
    /// Duplicate of the listening descriptor; `None` once handed over.
    fd: Mutex<Option<OwnedFd>>,

    /// Cancelled when the accept loop must stop. Wire this into the
    /// server's graceful shutdown.
    relinquish: CancellationToken,
}

impl ListenerSlot {
    /// Take custody of `listener` by duplicating its descriptor.
    pub fn new(listener: &TcpListener) -> io::Result<Self> {
        let fd = listener.as_fd().try_clone_to_owned()?;
        Ok(Self {
            fd: Mutex::new(Some(fd)),
            relinquish: CancellationToken::new(),
        })
    }

    /// Token that fires once the listener has been relinquished.
    pub fn relinquish_token(&self) -> CancellationToken {
        self.relinquish.clone()
    }

    /// Whether the listener has already been handed over.
    pub async fn is_handed_over(&self) -> bool {
        self.fd.lock().await.is_none()
    }

    /// Transfer the listener to the successor waiting at `path`.
    ///
    /// On any failure before the send completes the slot is left intact
    /// and still serving, so the handoff is retryable. After a successful
    /// send the duplicate is closed and the relinquish token fires; a
    /// second call finds nothing left to give and fails.
    pub async fn hand_over(&self, path: &Path) -> Result<(), HandoffError> {
        let mut guard = self.fd.lock().await;
        let fd = guard.as_ref().ok_or(HandoffError::AlreadyHandedOver)?;

        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| HandoffError::ChannelUnreachable {
                path: path.to_path_buf(),
                source,
            })?;

        transfer::send_fd(&stream, fd.as_fd())
            .await
            .map_err(HandoffError::Send)?;

        // The successor holds a working duplicate from here on; now it is
        // safe to stop accepting on this side.
        drop(guard.take());
        self.relinquish.cancel();

        info!(path = %path.display(), "listener handed over, accept loop stopping");
        Ok(())
    }

    /// Stop the accept loop without a transfer. Idempotent; used both as
    /// the defensive second close after a handoff and as the SIGTERM
    /// shutdown path.
    pub fn close(&self) {
        self.relinquish.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendezvous::Rendezvous;
    use std::time::Duration;

    async fn bound_listener() -> TcpListener {
        TcpListener::bind("127.0.0.1:0").await.unwrap()
    }

    #[tokio::test]
    async fn hand_over_transfers_and_fires_the_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handoff.sock");

        let listener = bound_listener().await;
        let addr = listener.local_addr().unwrap();
        let slot = ListenerSlot::new(&listener).unwrap();
        let token = slot.relinquish_token();

        let rendezvous = Rendezvous::bind(&path).unwrap();
        let wait = tokio::spawn(rendezvous.recv_listener(Duration::from_secs(5)));

        slot.hand_over(&path).await.unwrap();

        let received = wait.await.unwrap().unwrap();
        assert_eq!(received.local_addr().unwrap(), addr);
        assert!(token.is_cancelled());
        assert!(slot.is_handed_over().await);
    }

    #[tokio::test]
    async fn second_hand_over_has_nothing_to_give() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handoff.sock");

        let listener = bound_listener().await;
        let slot = ListenerSlot::new(&listener).unwrap();

        let rendezvous = Rendezvous::bind(&path).unwrap();
        let wait = tokio::spawn(rendezvous.recv_listener(Duration::from_secs(5)));
        slot.hand_over(&path).await.unwrap();
        wait.await.unwrap().unwrap();

        let again = slot.hand_over(&path).await;
        assert!(matches!(again, Err(HandoffError::AlreadyHandedOver)));
    }

    #[tokio::test]
    async fn unreachable_channel_leaves_the_slot_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nobody-listening.sock");

        let listener = bound_listener().await;
        let slot = ListenerSlot::new(&listener).unwrap();
        let token = slot.relinquish_token();

        let result = slot.hand_over(&path).await;
        assert!(matches!(
            result,
            Err(HandoffError::ChannelUnreachable { .. })
        ));
        assert!(!token.is_cancelled());
        assert!(!slot.is_handed_over().await);

        // A retry once the successor is waiting succeeds.
        let rendezvous = Rendezvous::bind(&path).unwrap();
        let wait = tokio::spawn(rendezvous.recv_listener(Duration::from_secs(5)));
        slot.hand_over(&path).await.unwrap();
        wait.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let listener = bound_listener().await;
        let slot = ListenerSlot::new(&listener).unwrap();
        let token = slot.relinquish_token();

        slot.close();
        slot.close();
        assert!(token.is_cancelled());
        // Closing stops the accept loop but does not consume the slot.
        assert!(!slot.is_handed_over().await);
    }
}
