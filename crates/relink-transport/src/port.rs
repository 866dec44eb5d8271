//! Transferable duplex channel ports.
//!
//! [`port_pair`] mints two linked ends. Whatever one end posts is delivered
//! to handlers subscribed on the other end, synchronously; envelopes that
//! arrive before any handler is bound are buffered and flushed on the first
//! subscription. A [`PortEnd`] is a cheap-clone handle — exclusivity of a
//! transferred end is a protocol obligation of the layer above, not
//! something the type system enforces.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{
    next_source_id, DirectSender, Envelope, HandlerId, MessageHandler, MessageReceiver, SendTarget,
    SourceId,
};

struct PortState {
    id: SourceId,
    /// Identity of the opposite end; fixed at mint time so matching keeps
    /// working after the pair is unlinked.
    peer_id: SourceId,
    peer: RefCell<Weak<PortState>>,
    handlers: RefCell<Vec<(HandlerId, MessageHandler)>>,
    buffer: RefCell<VecDeque<Envelope>>,
    closed: Cell<bool>,
    next_handler: Cell<u64>,
}

/// One end of a duplex channel.
pub struct PortEnd {
    state: Rc<PortState>,
}

impl Clone for PortEnd {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

/// Mint a linked pair of channel ends.
pub fn port_pair() -> (PortEnd, PortEnd) {
    let id_a = next_source_id();
    let id_b = next_source_id();

    let make = |id, peer_id| {
        Rc::new(PortState {
            id,
            peer_id,
            peer: RefCell::new(Weak::new()),
            handlers: RefCell::new(Vec::new()),
            buffer: RefCell::new(VecDeque::new()),
            closed: Cell::new(false),
            next_handler: Cell::new(1),
        })
    };

    let a = make(id_a, id_b);
    let b = make(id_b, id_a);
    *a.peer.borrow_mut() = Rc::downgrade(&b);
    *b.peer.borrow_mut() = Rc::downgrade(&a);

    (PortEnd { state: a }, PortEnd { state: b })
}

impl PortEnd {
    /// Transport identity of this end.
    pub fn id(&self) -> SourceId {
        self.state.id
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.get()
    }

    /// Post a message to the opposite end.
    ///
    /// Fails only if this end has been closed locally. Delivery to a closed
    /// or dropped opposite end is a silent drop.
    pub fn post(&self, data: serde_json::Value, ports: Vec<PortEnd>) -> Result<()> {
        if self.state.closed.get() {
            return Err(TransportError::PortClosed);
        }

        let Some(peer) = self.state.peer.borrow().upgrade() else {
            debug!(port = self.state.id, "dropping message for unlinked port");
            return Ok(());
        };
        if peer.closed.get() {
            debug!(port = self.state.id, "dropping message for closed port");
            return Ok(());
        }

        // The reply handle posts through the destination end, which reaches
        // back to this side.
        let envelope = Envelope {
            source: SendTarget::Direct(Rc::new(PortEnd { state: Rc::clone(&peer) })),
            data,
            ports,
        };
        deliver(&peer, envelope);
        Ok(())
    }

    /// Close this end. Idempotent; also unlinks the pair so the opposite
    /// end's posts become silent drops.
    pub fn close(&self) {
        if self.state.closed.get() {
            return;
        }
        self.state.closed.set(true);
        self.state.handlers.borrow_mut().clear();
        self.state.buffer.borrow_mut().clear();
        if let Some(peer) = self.state.peer.borrow().upgrade() {
            *peer.peer.borrow_mut() = Weak::new();
        }
        *self.state.peer.borrow_mut() = Weak::new();
        debug!(port = self.state.id, "channel port closed");
    }
}

fn deliver(state: &Rc<PortState>, envelope: Envelope) {
    // Snapshot so a handler mutating the subscription list mid-dispatch
    // cannot invalidate the iteration.
    let handlers: Vec<MessageHandler> = state
        .handlers
        .borrow()
        .iter()
        .map(|(_, h)| Rc::clone(h))
        .collect();

    if handlers.is_empty() {
        state.buffer.borrow_mut().push_back(envelope);
        return;
    }
    for handler in handlers {
        handler(&envelope);
    }
}

impl MessageReceiver for PortEnd {
    fn subscribe(&self, handler: MessageHandler) -> HandlerId {
        let id = HandlerId(self.state.next_handler.get());
        self.state.next_handler.set(id.0 + 1);
        self.state.handlers.borrow_mut().push((id, handler));

        // Flush anything that arrived before a handler was bound.
        loop {
            let Some(envelope) = self.state.buffer.borrow_mut().pop_front() else {
                break;
            };
            deliver(&self.state, envelope);
        }
        id
    }

    fn unsubscribe(&self, handler: HandlerId) {
        self.state.handlers.borrow_mut().retain(|(id, _)| *id != handler);
    }
}

impl DirectSender for PortEnd {
    fn post(&self, data: serde_json::Value, ports: Vec<PortEnd>) -> Result<()> {
        PortEnd::post(self, data, ports)
    }

    fn peer_id(&self) -> SourceId {
        self.state.peer_id
    }
}

impl fmt::Debug for PortEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortEnd")
            .field("id", &self.state.id)
            .field("closed", &self.state.closed.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::json;

    use super::*;

    fn collector() -> (Rc<RefCell<Vec<serde_json::Value>>>, MessageHandler) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let handler: MessageHandler = Rc::new(move |env: &Envelope| {
            sink.borrow_mut().push(env.data.clone());
        });
        (seen, handler)
    }

    #[test]
    fn post_delivers_to_subscribed_end() {
        let (a, b) = port_pair();
        let (seen, handler) = collector();
        b.subscribe(handler);

        a.post(json!({"n": 1}), vec![]).unwrap();
        assert_eq!(seen.borrow().as_slice(), &[json!({"n": 1})]);
    }

    #[test]
    fn buffered_until_first_subscription() {
        let (a, b) = port_pair();
        a.post(json!(1), vec![]).unwrap();
        a.post(json!(2), vec![]).unwrap();

        let (seen, handler) = collector();
        b.subscribe(handler);
        assert_eq!(seen.borrow().as_slice(), &[json!(1), json!(2)]);
    }

    #[test]
    fn close_is_idempotent_and_unlinks() {
        let (a, b) = port_pair();
        b.close();
        b.close();
        assert!(b.is_closed());

        // Peer closed: silent drop, not an error.
        a.post(json!("gone"), vec![]).unwrap();

        // Locally closed: caller error.
        assert!(matches!(
            b.post(json!("x"), vec![]),
            Err(TransportError::PortClosed)
        ));
    }

    #[test]
    fn envelope_source_replies_to_sender() {
        let (a, b) = port_pair();
        let (seen_a, handler_a) = collector();
        a.subscribe(handler_a);

        let reply_through: Rc<RefCell<Option<SendTarget>>> = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&reply_through);
        b.subscribe(Rc::new(move |env: &Envelope| {
            *slot.borrow_mut() = Some(env.source.clone());
        }));

        a.post(json!("ping"), vec![]).unwrap();
        let source = reply_through.borrow().clone().unwrap();
        assert_eq!(source.peer_id(), a.id());

        source.post(json!("pong"), vec![], "*").unwrap();
        assert_eq!(seen_a.borrow().as_slice(), &[json!("pong")]);
    }

    #[test]
    fn unsubscribe_detaches_handler() {
        let (a, b) = port_pair();
        let (seen, handler) = collector();
        let id = b.subscribe(handler);
        b.unsubscribe(id);

        a.post(json!(1), vec![]).unwrap();
        assert!(seen.borrow().is_empty());
    }
}
