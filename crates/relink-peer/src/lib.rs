//! Peer pairing over an unreliable, broadcast-style message substrate.
//!
//! A [`PeerLink`] discovers its counterpart (explicitly or by adopting the
//! first handshake source), completes a three-step exchange that mints a
//! private duplex channel, and relays application payloads over it. If the
//! counterpart is destroyed and recreated — the substrate's version of a
//! reload — its fresh handshake request silently supersedes the old channel
//! generation on the surviving side; nothing restarts.
//!
//! The substrate offers no delivery guarantee and none is added here: a lost
//! signal leaves the [`Completion`] pending forever, and callers that need a
//! deadline race it against their own timer.

pub mod completion;
pub mod error;
pub mod link;
pub mod signal;

mod channel;
mod relay;

pub use completion::Completion;
pub use error::{LinkError, Result};
pub use link::{HandshakeState, LinkConfig, PeerLink};
pub use signal::Signal;
