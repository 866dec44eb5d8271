use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::origin::{scoped_sender, OriginEndpoint};
use crate::port::PortEnd;

/// Scope value that matches any destination.
pub const WILDCARD_SCOPE: &str = "*";

/// Transport-level identity of an endpoint or channel-port end.
///
/// This is "the sender as observed by the receiver": all peer matching in
/// the layers above compares these ids, never application-level names.
pub type SourceId = u64;

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_source_id() -> SourceId {
    NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Opaque handle returned by [`MessageReceiver::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(pub(crate) u64);

/// One delivered message.
///
/// `source` is a live reply handle: its [`SendTarget::peer_id`] identifies
/// the sender, and posting on it reaches the sender back. Transferred channel
/// ports ride in `ports`, never inside `data`.
#[derive(Clone)]
pub struct Envelope {
    pub source: SendTarget,
    pub data: serde_json::Value,
    pub ports: Vec<PortEnd>,
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("source", &self.source.peer_id())
            .field("data", &self.data)
            .field("ports", &self.ports.len())
            .finish()
    }
}

/// Callback invoked for each delivered envelope.
pub type MessageHandler = Rc<dyn Fn(&Envelope)>;

/// The narrow add/remove-listener capability the pairing core listens
/// through. Satisfied by [`OriginEndpoint`] and [`PortEnd`].
pub trait MessageReceiver {
    fn subscribe(&self, handler: MessageHandler) -> HandlerId;
    fn unsubscribe(&self, handler: HandlerId);
}

/// A sender that requires a security scope attached to every post.
pub trait ScopedSender {
    /// Post a message. A scope other than [`WILDCARD_SCOPE`] must match the
    /// destination's origin or the message is silently dropped.
    fn post(&self, data: serde_json::Value, ports: Vec<PortEnd>, scope: &str) -> Result<()>;

    /// Identity of the destination endpoint.
    fn peer_id(&self) -> SourceId;
}

/// A scope-less sender, e.g. one end of a direct channel-port pair.
pub trait DirectSender {
    fn post(&self, data: serde_json::Value, ports: Vec<PortEnd>) -> Result<()>;

    /// Identity of the opposite end.
    fn peer_id(&self) -> SourceId;
}

/// A remote endpoint that messages can be posted to.
///
/// The two flavors carry exactly what their send operation needs: the scoped
/// arm checks the per-post scope against the destination origin, the direct
/// arm has nothing to check.
#[derive(Clone)]
pub enum SendTarget {
    Scoped(Rc<dyn ScopedSender>),
    Direct(Rc<dyn DirectSender>),
}

impl SendTarget {
    /// Target an origin-scoped endpoint. Replies delivered through the
    /// resulting envelopes are attributed to `reply_to`.
    pub fn scoped(dest: &OriginEndpoint, reply_to: &OriginEndpoint) -> Self {
        SendTarget::Scoped(Rc::new(scoped_sender(dest, reply_to)))
    }

    /// Target the opposite end of a channel port.
    pub fn direct(port: &PortEnd) -> Self {
        SendTarget::Direct(Rc::new(port.clone()))
    }

    /// Post a message to this target. The scope is consulted only by the
    /// scoped flavor.
    pub fn post(&self, data: serde_json::Value, ports: Vec<PortEnd>, scope: &str) -> Result<()> {
        match self {
            SendTarget::Scoped(sender) => sender.post(data, ports, scope),
            SendTarget::Direct(sender) => sender.post(data, ports),
        }
    }

    /// Identity of the endpoint this target reaches.
    pub fn peer_id(&self) -> SourceId {
        match self {
            SendTarget::Scoped(sender) => sender.peer_id(),
            SendTarget::Direct(sender) => sender.peer_id(),
        }
    }
}

impl fmt::Debug for SendTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendTarget::Scoped(sender) => {
                f.debug_tuple("Scoped").field(&sender.peer_id()).finish()
            }
            SendTarget::Direct(sender) => {
                f.debug_tuple("Direct").field(&sender.peer_id()).finish()
            }
        }
    }
}
