//! Handshake coordination and re-pairing.
//!
//! A [`PeerLink`] drives the three-step exchange that pairs two peers over a
//! broadcast-style substrate and mints a private channel per cycle:
//!
//! ```text
//! requester                            responder
//!     │ ─────────── handshake ────────────> │   mints channel, keeps one end
//!     │ <──── handshake_ack + port ──────── │   marks the end dirty
//!     │ ─────────── handshake_ack ────────> │   both sides complete
//! ```
//!
//! Either side may restart the exchange at any time — a recreated peer sends
//! a fresh `handshake` and the survivor silently supersedes its channel
//! generation without being restarted itself.
//!
//! # Architecture
//!
//! The coordinator is an event-driven state machine: mutations and inbound
//! signals become [`LinkEvent`]s fed into one transition function, which
//! updates state and returns actions (emit a signal, bind a channel end,
//! resolve the completion). Actions run only after the exclusive borrow of
//! link state is released, so the synchronous delivery cascade between two
//! links on one thread can never double-borrow.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use relink_transport::{
    Envelope, HandlerId, MessageHandler, MessageReceiver, PortEnd, SendTarget, WILDCARD_SCOPE,
};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::channel::ChannelGeneration;
use crate::completion::Completion;
use crate::error::{LinkError, Result};
use crate::relay::Relay;
use crate::signal::Signal;

/// Pairing progress of the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Waiting for the exchange to finish; [`PeerLink::send`] is refused.
    Pending,
    /// Paired; the private channel is live.
    Complete,
}

/// Construction options for [`PeerLink`].
///
/// Every field has a usable default: wildcard scope, no-op consumer, no
/// inference, nothing attached.
pub struct LinkConfig {
    /// Security scope attached to every outbound signal. Only consulted when
    /// the target is scope-requiring.
    pub scope: String,
    /// Consumer invoked for every inbound application payload.
    pub on_message: Option<MessageHandler>,
    /// Adopt the source of the first unmatched handshake request as the
    /// permanent target.
    pub infer_target: bool,
    /// Remote endpoint to pair with; setting it fires the first request.
    pub target: Option<SendTarget>,
    /// Endpoint to listen on for handshake signals.
    pub receiver: Option<Rc<dyn MessageReceiver>>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            scope: WILDCARD_SCOPE.to_string(),
            on_message: None,
            infer_target: false,
            target: None,
            receiver: None,
        }
    }
}

impl fmt::Debug for LinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkConfig")
            .field("scope", &self.scope)
            .field("on_message", &self.on_message.is_some())
            .field("infer_target", &self.infer_target)
            .field("target", &self.target.as_ref().map(SendTarget::peer_id))
            .field("receiver", &self.receiver.is_some())
            .finish()
    }
}

pub(crate) struct LinkInner {
    receiver: Option<Rc<dyn MessageReceiver>>,
    receiver_handler: Option<HandlerId>,
    target: Option<SendTarget>,
    scope: String,
    infer_target: bool,
    channel: Option<ChannelGeneration>,
    relay: Relay,
    state: HandshakeState,
    /// True exactly between "ack sent carrying a fresh end" and "ack
    /// received back"; guards a still-valid end against redundant adoption.
    port_dirty: bool,
    completion: Completion,
}

enum LinkEvent {
    SetReceiver(Option<Rc<dyn MessageReceiver>>),
    SetTarget(Option<SendTarget>),
    Inbound { signal: Signal, envelope: Envelope },
}

enum Action {
    Emit {
        target: SendTarget,
        signal: Signal,
        ports: Vec<PortEnd>,
        scope: String,
    },
    Bind(PortEnd),
    Attach(Rc<dyn MessageReceiver>),
    Detach {
        receiver: Rc<dyn MessageReceiver>,
        handler: HandlerId,
    },
    Resolve(Completion),
}

/// One side of a paired duplex link.
///
/// Cheap-clone handle; clones share state. Single-threaded by design (the
/// handle is `!Send`): every reaction to an inbound signal runs to
/// completion before the next one starts, which is what makes the handshake
/// transitions atomic without locking.
pub struct PeerLink {
    inner: Rc<RefCell<LinkInner>>,
}

impl Clone for PeerLink {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl PeerLink {
    pub fn new(config: LinkConfig) -> Self {
        let LinkConfig {
            scope,
            on_message,
            infer_target,
            target,
            receiver,
        } = config;

        let consumer = on_message.unwrap_or_else(Relay::noop_consumer);
        let link = Self {
            inner: Rc::new(RefCell::new(LinkInner {
                receiver: None,
                receiver_handler: None,
                target: None,
                scope,
                infer_target,
                channel: None,
                relay: Relay::new(consumer),
                state: HandshakeState::Pending,
                port_dirty: false,
                completion: Completion::new(),
            })),
        };
        if let Some(receiver) = receiver {
            link.set_receiver(Some(receiver));
        }
        if let Some(target) = target {
            link.set_target(Some(target));
        }
        link
    }

    pub(crate) fn from_inner(inner: Rc<RefCell<LinkInner>>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<RefCell<LinkInner>> {
        Rc::downgrade(&self.inner)
    }

    /// Completion of the current pairing cycle. Re-pairing replaces this
    /// with a fresh unresolved handle; previously taken handles keep the
    /// state of their own cycle.
    pub fn completion(&self) -> Completion {
        self.inner.borrow().completion.clone()
    }

    pub fn state(&self) -> HandshakeState {
        self.inner.borrow().state
    }

    pub fn is_paired(&self) -> bool {
        self.state() == HandshakeState::Complete
    }

    pub fn scope(&self) -> String {
        self.inner.borrow().scope.clone()
    }

    pub fn infer_target(&self) -> bool {
        self.inner.borrow().infer_target
    }

    pub fn target(&self) -> Option<SendTarget> {
        self.inner.borrow().target.clone()
    }

    pub fn receiver(&self) -> Option<Rc<dyn MessageReceiver>> {
        self.inner.borrow().receiver.clone()
    }

    pub fn on_message(&self) -> MessageHandler {
        self.inner.borrow().relay.consumer()
    }

    /// Swap the payload consumer. The swap carries over to whichever channel
    /// end is currently bound: the old callback is detached before the new
    /// one attaches, so neither two live callbacks nor a dropped binding can
    /// result.
    pub fn set_on_message(&self, consumer: MessageHandler) {
        let rebind = {
            let mut inner = self.inner.borrow_mut();
            inner.relay.set_consumer(Rc::clone(&consumer));
            inner.relay.take_binding()
        };
        if let Some((port, old)) = rebind {
            port.unsubscribe(old);
            let fresh = port.subscribe(consumer);
            self.inner.borrow_mut().relay.set_binding(port, fresh);
        }
    }

    /// Attach to a new receiver, detaching from the previous one. No
    /// handshake is triggered.
    pub fn set_receiver(&self, receiver: Option<Rc<dyn MessageReceiver>>) {
        self.apply(LinkEvent::SetReceiver(receiver));
    }

    /// Point the link at a remote endpoint.
    ///
    /// A non-null target tears down any existing channel, re-arms the
    /// completion, and emits a fresh handshake request. `None` tears down
    /// only.
    pub fn set_target(&self, target: Option<SendTarget>) {
        self.apply(LinkEvent::SetTarget(target));
    }

    /// Send an application payload over the private channel.
    ///
    /// # Errors
    ///
    /// [`LinkError::NoTarget`] if no remote endpoint was ever configured or
    /// adopted, [`LinkError::NotPaired`] until the handshake completes.
    /// Callers are expected to wait on [`PeerLink::completion`] first;
    /// nothing is queued.
    pub fn send(&self, data: Value) -> Result<()> {
        self.send_with_ports(data, Vec::new())
    }

    /// Like [`PeerLink::send`], transferring channel ends along with the
    /// payload.
    pub fn send_with_ports(&self, data: Value, ports: Vec<PortEnd>) -> Result<()> {
        let port = {
            let inner = self.inner.borrow();
            if inner.target.is_none() {
                return Err(LinkError::NoTarget);
            }
            if inner.state != HandshakeState::Complete {
                return Err(LinkError::NotPaired);
            }
            inner.relay.bound_port().ok_or(LinkError::NotPaired)?
        };
        // Posted outside the borrow: delivery is synchronous and the peer's
        // consumer may call straight back into this link.
        port.post(data, ports).map_err(LinkError::from)
    }

    fn apply(&self, event: LinkEvent) {
        let actions = {
            let mut inner = self.inner.borrow_mut();
            transition(&mut inner, event)
        };
        self.execute(actions);
    }

    fn execute(&self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Emit {
                    target,
                    signal,
                    ports,
                    scope,
                } => match signal.encode() {
                    Ok(data) => {
                        if let Err(err) = target.post(data, ports, &scope) {
                            // Send-and-forget substrate: a failed control
                            // signal leaves the completion pending, which is
                            // the caller's deadline to notice.
                            warn!(%err, ?signal, "failed to post control signal");
                        }
                    }
                    Err(err) => warn!(%err, ?signal, "failed to encode control signal"),
                },
                Action::Bind(port) => {
                    let (consumer, stale) = {
                        let mut inner = self.inner.borrow_mut();
                        (inner.relay.consumer(), inner.relay.take_binding())
                    };
                    if let Some((old_port, old_handler)) = stale {
                        old_port.unsubscribe(old_handler);
                    }
                    // Subscribing may flush buffered traffic into the
                    // consumer, hence outside the borrow.
                    let handler = port.subscribe(consumer);
                    self.inner.borrow_mut().relay.set_binding(port, handler);
                }
                Action::Attach(receiver) => {
                    let handler = receiver.subscribe(dispatcher(self.downgrade()));
                    self.inner.borrow_mut().receiver_handler = Some(handler);
                }
                Action::Detach { receiver, handler } => {
                    receiver.unsubscribe(handler);
                }
                Action::Resolve(completion) => {
                    completion.resolve(self);
                }
            }
        }
    }
}

impl fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("PeerLink")
            .field("state", &inner.state)
            .field("target", &inner.target.as_ref().map(SendTarget::peer_id))
            .field("infer_target", &inner.infer_target)
            .field("port_dirty", &inner.port_dirty)
            .finish()
    }
}

/// Control-stream listener installed on the receiver.
///
/// Holds the link weakly: a dropped link detaches logically even if the
/// receiver outlives it. An unknown signal kind is a protocol version
/// mismatch and unrecoverable locally, so it escalates to a panic after
/// logging — the wire-time half of the closed-enum exhaustiveness check.
fn dispatcher(weak: Weak<RefCell<LinkInner>>) -> MessageHandler {
    Rc::new(move |envelope: &Envelope| {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let link = PeerLink::from_inner(inner);
        match Signal::decode(&envelope.data) {
            Ok(signal) => link.apply(LinkEvent::Inbound {
                signal,
                envelope: envelope.clone(),
            }),
            Err(err) => {
                error!(%err, data = %envelope.data, "fatal violation on control stream");
                panic!("relink control stream: {err}");
            }
        }
    })
}

fn transition(inner: &mut LinkInner, event: LinkEvent) -> Vec<Action> {
    match event {
        LinkEvent::SetReceiver(next) => {
            let mut actions = Vec::new();
            if let (Some(old), Some(handler)) =
                (inner.receiver.take(), inner.receiver_handler.take())
            {
                actions.push(Action::Detach {
                    receiver: old,
                    handler,
                });
            }
            inner.receiver = next;
            if let Some(receiver) = &inner.receiver {
                actions.push(Action::Attach(Rc::clone(receiver)));
            }
            actions
        }

        LinkEvent::SetTarget(next) => {
            // Any target change invalidates the cycle outright: channel
            // gone, dirty flag gone, completion re-armed.
            inner.teardown_channel();
            inner.port_dirty = false;
            inner.state = HandshakeState::Pending;
            inner.completion = Completion::new();
            inner.target = next;

            match &inner.target {
                Some(target) => {
                    debug!(peer = target.peer_id(), "requesting handshake");
                    vec![Action::Emit {
                        target: target.clone(),
                        signal: Signal::Handshake,
                        ports: Vec::new(),
                        scope: inner.scope.clone(),
                    }]
                }
                None => Vec::new(),
            }
        }

        LinkEvent::Inbound { signal, envelope } => match signal {
            Signal::Handshake => inner.on_handshake(envelope),
            Signal::HandshakeAck => inner.on_handshake_ack(envelope),
        },
    }
}

impl LinkInner {
    fn on_handshake(&mut self, envelope: Envelope) -> Vec<Action> {
        if self.infer_target && self.target.is_none() {
            debug!(peer = envelope.source.peer_id(), "adopting handshake source as target");
            self.target = Some(envelope.source.clone());
        }
        let Some(target) = self.target.clone() else {
            return Vec::new();
        };
        if target.peer_id() != envelope.source.peer_id() {
            debug!(
                peer = envelope.source.peer_id(),
                target = target.peer_id(),
                "ignoring handshake from non-matching source"
            );
            return Vec::new();
        }

        // A request landing on a completed link means the peer was recreated:
        // invalidate the finished cycle before pairing again.
        if self.state == HandshakeState::Complete {
            self.state = HandshakeState::Pending;
            self.completion = Completion::new();
        }
        self.teardown_channel();

        let mut generation = ChannelGeneration::mint();
        let local = generation.local().clone();
        let remote = generation.take_remote();
        self.channel = Some(generation);
        self.port_dirty = true;

        vec![
            Action::Bind(local),
            Action::Emit {
                target,
                signal: Signal::HandshakeAck,
                ports: remote.into_iter().collect(),
                scope: self.scope.clone(),
            },
        ]
    }

    fn on_handshake_ack(&mut self, envelope: Envelope) -> Vec<Action> {
        let Some(target) = self.target.clone() else {
            // Nothing to pair with; inference only adopts from requests.
            return Vec::new();
        };
        if target.peer_id() != envelope.source.peer_id() {
            debug!(
                peer = envelope.source.peer_id(),
                target = target.peer_id(),
                "ignoring ack from non-matching source"
            );
            return Vec::new();
        }

        let mut actions = Vec::new();
        let carried = envelope.ports.first().cloned();

        // Acceptance rule: adopt when nothing is bound yet, or when the end
        // we sent is still unconfirmed and the peer carried a fresh one.
        // Makes a replayed ack a no-op instead of clobbering a channel both
        // sides already agreed on.
        if !self.relay.is_bound() || (self.port_dirty && carried.is_some()) {
            match carried {
                Some(port) => {
                    debug!(port = port.id(), "adopting carried channel end");
                    // The carried end supersedes any generation minted
                    // locally in the meantime; at most one stays live.
                    if let Some(mut stale) = self.channel.take() {
                        stale.close();
                    }
                    actions.push(Action::Bind(port));
                    actions.push(Action::Emit {
                        target: target.clone(),
                        signal: Signal::HandshakeAck,
                        ports: Vec::new(),
                        scope: self.scope.clone(),
                    });
                }
                None => {
                    // A bare ack with nothing bound cannot complete a cycle.
                    debug!("ignoring ack without a channel end to adopt");
                    return actions;
                }
            }
        }

        self.port_dirty = false;
        self.state = HandshakeState::Complete;
        debug!(peer = target.peer_id(), "pairing complete");
        actions.push(Action::Resolve(self.completion.clone()));
        actions
    }

    fn teardown_channel(&mut self) {
        if let Some(mut generation) = self.channel.take() {
            generation.close();
        }
        self.relay.unbind_and_close();
    }
}
