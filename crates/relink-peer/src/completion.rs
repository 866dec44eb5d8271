//! Single-resolution pairing completion.
//!
//! Each pairing cycle owns one [`Completion`]. The coordinator re-arms by
//! replacing it with a fresh one; handles handed out earlier keep the state
//! of the cycle they were taken from.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::link::{LinkInner, PeerLink};

type Waiter = Box<dyn FnOnce(PeerLink)>;

struct CompletionState {
    resolved: bool,
    /// Held weakly so a resolved completion outliving its link does not keep
    /// the link alive.
    link: Weak<RefCell<LinkInner>>,
    waiters: Vec<Waiter>,
}

/// A single-resolution signal that becomes satisfied exactly once per
/// successful pairing cycle.
#[derive(Clone)]
pub struct Completion {
    state: Rc<RefCell<CompletionState>>,
}

impl Completion {
    pub(crate) fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(CompletionState {
                resolved: false,
                link: Weak::new(),
                waiters: Vec::new(),
            })),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.state.borrow().resolved
    }

    /// Whether two handles belong to the same pairing cycle.
    pub(crate) fn same_cycle(&self, other: &Completion) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    /// Register a callback invoked with the paired link. Fires immediately
    /// when already resolved. There is no timeout: if the peer never answers
    /// the callback simply never runs.
    pub fn on_resolved(&self, waiter: impl FnOnce(PeerLink) + 'static) {
        let link = {
            let mut state = self.state.borrow_mut();
            if !state.resolved {
                state.waiters.push(Box::new(waiter));
                return;
            }
            state.link.upgrade()
        };
        if let Some(inner) = link {
            waiter(PeerLink::from_inner(inner));
        }
    }

    /// Resolve with the paired link. Idempotent: replayed acknowledgements
    /// must not disturb an already-satisfied cycle.
    pub(crate) fn resolve(&self, link: &PeerLink) {
        let waiters = {
            let mut state = self.state.borrow_mut();
            if state.resolved {
                return;
            }
            state.resolved = true;
            state.link = link.downgrade();
            std::mem::take(&mut state.waiters)
        };
        for waiter in waiters {
            waiter(link.clone());
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
