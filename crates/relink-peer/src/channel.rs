//! Private channel lifecycle.
//!
//! Each successful pairing cycle gets a freshly minted channel generation.
//! At most one generation is alive per link; minting a new one is always
//! preceded by closing the previous, so a superseded channel can never leak
//! traffic into the new cycle.

use relink_transport::{port_pair, PortEnd};
use tracing::debug;

/// One generation of the private duplex channel.
///
/// The local end stays bound to the owning link; the remote end is taken
/// exactly once, to ride along in the first acknowledgement of the cycle.
pub(crate) struct ChannelGeneration {
    local: PortEnd,
    remote: Option<PortEnd>,
}

impl ChannelGeneration {
    pub fn mint() -> Self {
        let (local, remote) = port_pair();
        debug!(local = local.id(), remote = remote.id(), "minted channel generation");
        Self {
            local,
            remote: Some(remote),
        }
    }

    pub fn local(&self) -> &PortEnd {
        &self.local
    }

    /// Move the transferable end out. Returns `None` once transferred; the
    /// end must never be sent twice.
    pub fn take_remote(&mut self) -> Option<PortEnd> {
        self.remote.take()
    }

    /// Close both known ends. The remote end is only closed if it was never
    /// transferred out. Idempotent.
    pub fn close(&mut self) {
        self.local.close();
        if let Some(remote) = self.remote.take() {
            remote.close();
        }
    }
}
