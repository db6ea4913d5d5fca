//! Generation role negotiation.
//!
//! The orchestrator gives every process two integer identifiers: its own
//! generation and the generation of its sibling (the other half of an
//! upgrade pair). Comparing them decides whether the process is mid-upgrade
//! and, if so, which side of the handoff it plays.

use tracing::warn;

/// Role this process plays in a listening-socket upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeRole {
    /// No upgrade in progress: bind the port fresh and serve.
    Standalone,
    /// Mid-upgrade, this process is the newer generation: take over the
    /// sibling's listener.
    NewerGeneration,
    /// Mid-upgrade, this process is the older generation: it must not
    /// touch the port, only yield to the successor.
    OlderGeneration,
}

impl UpgradeRole {
    /// Whether an upgrade is in progress.
    pub fn in_upgrade(&self) -> bool {
        !matches!(self, UpgradeRole::Standalone)
    }

    /// Whether this process is the newer generation of an upgrade pair.
    pub fn is_newer(&self) -> bool {
        matches!(self, UpgradeRole::NewerGeneration)
    }
}

/// Sibling identifier value meaning "no upgrade pair".
const STANDALONE_SENTINEL: &str = "0";

/// Negotiate the upgrade role from the two generation identifiers.
///
/// - Sibling absent, empty, or `"0"` means standalone.
/// - Identifiers that fail to parse as integers degrade to standalone
///   with a warning; a garbled environment must never keep the process
///   from serving.
/// - Equal identifiers resolve to [`UpgradeRole::OlderGeneration`]: the
///   tie favors the incumbent, so two colliding generations cannot fight
///   over one port.
pub fn negotiate(own: Option<&str>, sibling: Option<&str>) -> UpgradeRole {
    let sibling = match sibling {
        Some(s) if !s.is_empty() && s != STANDALONE_SENTINEL => s,
        _ => return UpgradeRole::Standalone,
    };

    let own = own.unwrap_or("");
    let own_num: i64 = match own.parse() {
        Ok(n) => n,
        Err(_) => {
            warn!(value = own, "own generation is not an integer, treating as standalone");
            return UpgradeRole::Standalone;
        }
    };
    let sibling_num: i64 = match sibling.parse() {
        Ok(n) => n,
        Err(_) => {
            warn!(value = sibling, "sibling generation is not an integer, treating as standalone");
            return UpgradeRole::Standalone;
        }
    };

    if own_num > sibling_num {
        UpgradeRole::NewerGeneration
    } else {
        UpgradeRole::OlderGeneration
    }
}
