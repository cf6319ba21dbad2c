//! Change notifications
//!
//! A zero-payload "catalog updated" signal. Consumers either register a
//! callback (kept alive by the returned [`Subscription`]) or take a channel
//! receiver and block on it; either way they re-read the catalog themselves.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, Weak};

type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    callbacks: Vec<(u64, Listener)>,
    channels: Vec<Sender<()>>,
}

/// Fan-out of the update signal to every subscriber
#[derive(Clone, Default)]
pub struct ChangeNotifier {
    listeners: Arc<Mutex<Listeners>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback; it stays registered until the subscription drops
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut listeners = lock(&self.listeners);
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.callbacks.push((id, Arc::new(callback)));

        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Create a receiver that gets one `()` per update.
    ///
    /// Dropping the receiver unsubscribes it on the next update.
    pub fn channel(&self) -> Receiver<()> {
        let (tx, rx) = channel();
        lock(&self.listeners).channels.push(tx);
        rx
    }

    /// Signal every subscriber once
    pub fn fire(&self) {
        let callbacks: Vec<Listener> = {
            let mut listeners = lock(&self.listeners);
            listeners.channels.retain(|tx| tx.send(()).is_ok());
            listeners.callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };

        // Called outside the lock so a callback may subscribe or read freely.
        for callback in callbacks {
            callback();
        }
    }

    pub fn listener_count(&self) -> usize {
        let listeners = lock(&self.listeners);
        listeners.callbacks.len() + listeners.channels.len()
    }
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Handle for a registered callback; dropping it unsubscribes
#[must_use = "the callback is removed when the subscription is dropped"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            lock(&listeners).callbacks.retain(|(id, _)| *id != self.id);
        }
    }
}

fn lock(listeners: &Mutex<Listeners>) -> std::sync::MutexGuard<'_, Listeners> {
    listeners.lock().unwrap_or_else(PoisonError::into_inner)
}
