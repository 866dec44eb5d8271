//! In-memory origin-scoped endpoints.
//!
//! An [`OriginEndpoint`] models a broadcast-style receiver that carries an
//! origin string. Posting through [`SendTarget::scoped`] checks the per-post
//! scope against the destination origin and silently drops on mismatch,
//! which is the substrate's only notion of security.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::error::Result;
use crate::traits::{
    next_source_id, Envelope, HandlerId, MessageHandler, MessageReceiver, ScopedSender,
    SendTarget, SourceId, WILDCARD_SCOPE,
};
use crate::port::PortEnd;

struct OriginState {
    id: SourceId,
    origin: String,
    handlers: RefCell<Vec<(HandlerId, MessageHandler)>>,
    next_handler: Cell<u64>,
}

/// An addressable, origin-carrying endpoint.
///
/// Cheap to clone; dropping every clone destroys the endpoint, after which
/// posts addressed to it are silent drops (the surviving peer only notices
/// through protocol-level silence).
#[derive(Clone)]
pub struct OriginEndpoint {
    state: Rc<OriginState>,
}

impl OriginEndpoint {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            state: Rc::new(OriginState {
                id: next_source_id(),
                origin: origin.into(),
                handlers: RefCell::new(Vec::new()),
                next_handler: Cell::new(1),
            }),
        }
    }

    pub fn id(&self) -> SourceId {
        self.state.id
    }

    pub fn origin(&self) -> &str {
        &self.state.origin
    }
}

impl MessageReceiver for OriginEndpoint {
    fn subscribe(&self, handler: MessageHandler) -> HandlerId {
        let id = HandlerId(self.state.next_handler.get());
        self.state.next_handler.set(id.0 + 1);
        self.state.handlers.borrow_mut().push((id, handler));
        id
    }

    fn unsubscribe(&self, handler: HandlerId) {
        self.state.handlers.borrow_mut().retain(|(id, _)| *id != handler);
    }
}

impl fmt::Debug for OriginEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OriginEndpoint")
            .field("id", &self.state.id)
            .field("origin", &self.state.origin)
            .finish()
    }
}

/// Scoped sender between two origin endpoints. Holds both sides weakly so a
/// destroyed endpoint is observed as delivery silence, never kept alive by a
/// stale target handle.
pub(crate) struct OriginSender {
    dest: Weak<OriginState>,
    dest_id: SourceId,
    reply_to: Weak<OriginState>,
    reply_id: SourceId,
}

pub(crate) fn scoped_sender(dest: &OriginEndpoint, reply_to: &OriginEndpoint) -> OriginSender {
    OriginSender {
        dest: Rc::downgrade(&dest.state),
        dest_id: dest.state.id,
        reply_to: Rc::downgrade(&reply_to.state),
        reply_id: reply_to.state.id,
    }
}

impl ScopedSender for OriginSender {
    fn post(&self, data: serde_json::Value, ports: Vec<PortEnd>, scope: &str) -> Result<()> {
        let Some(dest) = self.dest.upgrade() else {
            debug!(dest = self.dest_id, "dropping message for destroyed endpoint");
            return Ok(());
        };
        if scope != WILDCARD_SCOPE && scope != dest.origin {
            debug!(scope, origin = %dest.origin, "dropping message with mismatched scope");
            return Ok(());
        }

        let source = SendTarget::Scoped(Rc::new(OriginSender {
            dest: self.reply_to.clone(),
            dest_id: self.reply_id,
            reply_to: Rc::downgrade(&dest),
            reply_id: self.dest_id,
        }));
        let envelope = Envelope { source, data, ports };

        let handlers: Vec<MessageHandler> = dest
            .handlers
            .borrow()
            .iter()
            .map(|(_, h)| Rc::clone(h))
            .collect();
        for handler in handlers {
            handler(&envelope);
        }
        Ok(())
    }

    fn peer_id(&self) -> SourceId {
        self.dest_id
    }
}
