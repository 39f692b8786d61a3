//! Typed, synchronous event emitter.
//!
//! Listeners run on the emitting thread, in registration order. The listener
//! list is copied before dispatch, so a listener may register or remove
//! listeners (or emit further events) without deadlocking.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identifies a registered listener for later removal.
pub type ListenerId = u64;

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Reports whether a listener still has somewhere to deliver to.
type Liveness = Box<dyn Fn() -> bool + Send + Sync>;

struct Registration<E> {
    id: ListenerId,
    listener: Listener<E>,
    alive: Option<Liveness>,
}

impl<E> Registration<E> {
    fn is_alive(&self) -> bool {
        self.alive.as_ref().map_or(true, |alive| alive())
    }
}

pub struct EventEmitter<E> {
    listeners: Mutex<Vec<Registration<E>>>,
    next_id: AtomicU64,
}

impl<E> EventEmitter<E> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener.
    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(Arc::new(listener), None)
    }

    fn register(&self, listener: Listener<E>, alive: Option<Liveness>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push(Registration {
            id,
            listener,
            alive,
        });
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|registration| registration.id != id);
        listeners.len() != before
    }

    /// Deliver an event to every listener. Subscriptions whose receiver is
    /// gone are dropped first.
    pub fn emit(&self, event: &E) {
        let listeners: Vec<Listener<E>> = {
            let mut registrations = self.listeners.lock();
            registrations.retain(Registration::is_alive);
            registrations
                .iter()
                .map(|registration| Arc::clone(&registration.listener))
                .collect()
        };

        for listener in listeners {
            listener(event);
        }
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        let mut registrations = self.listeners.lock();
        registrations.retain(Registration::is_alive);
        registrations.len()
    }
}

impl<E: Clone + Send + 'static> EventEmitter<E> {
    /// Receive events through a channel instead of a callback.
    ///
    /// The listener is removed by [`off`](Self::off) or, once the receiver
    /// is dropped, on the next emit.
    pub fn subscribe(&self) -> (ListenerId, mpsc::UnboundedReceiver<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let watch = tx.clone();
        let id = self.register(
            Arc::new(move |event: &E| {
                let _ = tx.send(event.clone());
            }),
            Some(Box::new(move || !watch.is_closed())),
        );
        (id, rx)
    }
}

impl<E> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventEmitter<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
