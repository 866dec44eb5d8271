use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};

/// Control-plane signals exchanged on the handshake receiver.
///
/// Exactly two kinds exist; the enum is closed so adding a third forces
/// every consumer to be updated. Transferred channel ends never appear in
/// the JSON body — they ride in the envelope's transfer list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    /// Pairing request. Carries no resources.
    Handshake,
    /// Acknowledgement. The first ack of a cycle carries one channel end in
    /// the transfer list; the closing ack carries none.
    HandshakeAck,
}

impl Signal {
    pub fn encode(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(LinkError::from)
    }

    /// Decode an inbound control signal.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::UnknownSignal`] for any kind outside the closed
    /// set — a fatal protocol violation for the caller to escalate.
    pub fn decode(data: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(data.clone()).map_err(|_| {
            let kind = data
                .get("type")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("<missing type tag>");
            LinkError::UnknownSignal(kind.to_string())
        })
    }
}
