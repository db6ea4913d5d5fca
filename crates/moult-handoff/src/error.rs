//! Error types for the handoff protocol.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Handoff protocol errors.
///
/// Every variant is recoverable from the caller's point of view: a failed
/// handoff leaves the predecessor serving and sends the successor down
/// the fresh-bind fallback path.
#[derive(Debug, Error)]
pub enum HandoffError {
    /// Binding the rendezvous socket failed
    #[error("bind rendezvous socket {path}: {source}")]
    Bind {
        /// Rendezvous socket path
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// The rendezvous socket is not reachable (no successor is waiting,
    /// or the predecessor is gone)
    #[error("rendezvous socket {path} unreachable: {source}")]
    ChannelUnreachable {
        /// Rendezvous socket path
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// Sending the listening descriptor failed
    #[error("send listening descriptor: {0}")]
    Send(#[source] io::Error),

    /// Accepting or reading the envelope failed
    #[error("receive listening descriptor: {0}")]
    Receive(#[source] io::Error),

    /// The envelope carried no descriptor
    #[error("envelope carried no descriptor")]
    EmptyEnvelope,

    /// The received descriptor is not a listening TCP socket
    #[error("received descriptor is not a listening socket")]
    NotAListener,

    /// The listener was already handed over; there is nothing left to send
    #[error("listener already handed over")]
    AlreadyHandedOver,

    /// A handoff-phase wait exceeded its deadline
    #[error("handoff timed out after {0:?}")]
    TimedOut(Duration),
}
