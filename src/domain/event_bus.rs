//! Typed publish/subscribe bus for device events.
//!
//! [`EventBus`] keeps an ordered list of handlers. [`EventBus::subscribe`]
//! returns a [`Subscription`] handle; dropping the handle (or calling
//! [`Subscription::unsubscribe`]) removes the handler. Publishing invokes
//! every handler synchronously on the publisher's task, in subscription
//! order, so events from one device socket reach subscribers in the order
//! the device sent them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use super::DeviceEvent;

/// Callback invoked for every published [`DeviceEvent`].
///
/// Handlers run on the publishing task and must not block.
pub type EventHandler = Arc<dyn Fn(&DeviceEvent) + Send + Sync>;

struct BusInner {
    handlers: RwLock<Vec<(u64, EventHandler)>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn remove(&self, id: u64) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }
}

/// Publish/subscribe bus for [`DeviceEvent`]s.
///
/// Cloning is cheap and yields a handle to the same bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                handlers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Registers a handler and returns the handle that keeps it alive.
    #[must_use = "dropping the subscription unsubscribes the handler"]
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&DeviceEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of handlers invoked. The handler list is
    /// snapshotted first, so a handler may unsubscribe while running.
    pub fn publish(&self, event: &DeviceEvent) -> usize {
        let handlers: Vec<EventHandler> = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    /// Returns the current number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Handle for one registered handler.
///
/// The handler stays registered until this handle is dropped or
/// [`Subscription::unsubscribe`] is called.
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Removes the handler. Returns `true` if it was still registered.
    pub fn unsubscribe(self) -> bool {
        // Drop runs afterwards and finds nothing left to remove.
        self.bus.upgrade().is_some_and(|bus| bus.remove(self.id))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
