//! Observer lists for buffer and interpretation events
//!
//! Handlers run synchronously on the thread that triggered the event, in
//! registration order. Dispatch snapshots the handler list first, so a
//! handler may subscribe or unsubscribe (itself included) while an event is
//! being delivered; handlers added during dispatch only see later events.

use std::cell::RefCell;
use std::rc::Rc;

/// Opaque key identifying a registered handler, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventToken(u64);

type Handler<T> = Rc<RefCell<dyn FnMut(&T)>>;

/// An observer list for a single event with payload `T`.
pub struct Event<T> {
    inner: RefCell<Inner<T>>,
}

struct Inner<T> {
    handlers: Vec<(u64, Handler<T>)>,
    next_token: u64,
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Event<T> {
    pub fn new() -> Self {
        Event {
            inner: RefCell::new(Inner {
                handlers: Vec::new(),
                next_token: 0,
            }),
        }
    }

    /// Registers a handler, returning the token that removes it.
    pub fn subscribe(&self, handler: impl FnMut(&T) + 'static) -> EventToken {
        let mut inner = self.inner.borrow_mut();
        let token = inner.next_token;
        inner.next_token += 1;
        inner.handlers.push((token, Rc::new(RefCell::new(handler))));
        EventToken(token)
    }

    /// Removes a previously registered handler. Removing a token twice is a
    /// no-op.
    pub fn unsubscribe(&self, token: EventToken) {
        self.inner
            .borrow_mut()
            .handlers
            .retain(|(id, _)| *id != token.0);
    }

    /// Invokes all handlers registered at the time of the call.
    pub fn emit(&self, info: &T) {
        let snapshot: Vec<(u64, Handler<T>)> = self.inner.borrow().handlers.clone();
        for (id, handler) in snapshot {
            // skip handlers unsubscribed by an earlier handler of this event
            let still_registered = self
                .inner
                .borrow()
                .handlers
                .iter()
                .any(|(other, _)| *other == id);
            if still_registered {
                (handler.borrow_mut())(info);
            }
        }
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.inner.borrow().handlers.len()
    }
}
