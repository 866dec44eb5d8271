//! Endpoint abstraction for unreliable, broadcast-style message substrates.
//!
//! Provides the capabilities the relink pairing core is written against:
//! - a subscribe/unsubscribe receiver interface ([`MessageReceiver`]),
//! - a tagged send-target with a scoped and an unscoped flavor
//!   ([`SendTarget`]),
//! - transferable duplex channel ports ([`PortEnd`]),
//! - an in-memory origin-scoped endpoint ([`OriginEndpoint`]).
//!
//! Delivery is send-and-forget: posting never waits for the peer, a message
//! to a destroyed or scope-mismatched destination is silently dropped, and
//! nothing here retries.
//!
//! Everything in this crate is single-threaded by design. Handles are backed
//! by `Rc` and are not `Send`; delivery happens synchronously on the calling
//! thread as one cooperative reaction per message.

pub mod error;
pub mod origin;
pub mod port;
pub mod traits;

pub use error::{Result, TransportError};
pub use origin::OriginEndpoint;
pub use port::{port_pair, PortEnd};
pub use traits::{
    DirectSender, Envelope, HandlerId, MessageHandler, MessageReceiver, ScopedSender, SendTarget,
    SourceId, WILDCARD_SCOPE,
};
