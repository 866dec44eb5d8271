//! Application payload relay.
//!
//! Passive until the handshake hands it a channel end. Owns the consumer
//! callback and the binding of that callback to whichever end is currently
//! live, guaranteeing at most one attached handler at any time.

use std::rc::Rc;

use relink_transport::{Envelope, HandlerId, MessageHandler, MessageReceiver, PortEnd};

pub(crate) struct Relay {
    binding: Option<(PortEnd, HandlerId)>,
    consumer: MessageHandler,
}

impl Relay {
    pub fn new(consumer: MessageHandler) -> Self {
        Self {
            binding: None,
            consumer,
        }
    }

    pub fn noop_consumer() -> MessageHandler {
        Rc::new(|_: &Envelope| {})
    }

    pub fn consumer(&self) -> MessageHandler {
        Rc::clone(&self.consumer)
    }

    /// Swap the callback without touching the binding; the caller rebinds
    /// via [`Relay::take_binding`] / [`Relay::set_binding`] so subscription
    /// side effects run outside any exclusive borrow of link state.
    pub fn set_consumer(&mut self, consumer: MessageHandler) {
        self.consumer = consumer;
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    pub fn take_binding(&mut self) -> Option<(PortEnd, HandlerId)> {
        self.binding.take()
    }

    pub fn set_binding(&mut self, port: PortEnd, handler: HandlerId) {
        self.binding = Some((port, handler));
    }

    /// Detach the handler and close the bound end. Idempotent.
    pub fn unbind_and_close(&mut self) {
        if let Some((port, handler)) = self.binding.take() {
            port.unsubscribe(handler);
            port.close();
        }
    }

    /// The currently bound end, if any. Outbound traffic posts on a clone of
    /// this handle so delivery side effects run outside link borrows.
    pub fn bound_port(&self) -> Option<PortEnd> {
        self.binding.as_ref().map(|(port, _)| port.clone())
    }
}
