//! A minimal in-process publish/subscribe hub.
//!
//! Grounded on `utils/event/emitter.go` and `utils/event/handler.go`: a
//! handler holds an ordered list of subscriber slots guarded by a lock, an
//! emitter walks that list to fire callbacks, synchronously or by spawning.
//! The Go version unsubscribes by splicing the backing slice under the same
//! lock used for iteration, which serializes dispatch against mutation. This
//! port avoids that by cloning the callback `Arc`s out of the slot list
//! under a read lock, then dispatching from that snapshot after releasing
//! the lock; `unsubscribe` takes the write lock and `Vec::retain`s the slot
//! out. A dispatch already in flight holds its own snapshot, so a concurrent
//! unsubscribe either applies starting with the next `emit`/`emit_sync` call
//! or not at all — it never mutates a round that's already running.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::contact::Contact;
use crate::identifier::Identifier;

/// Emitted by a leaf's lookup timer: `id` is a probe identifier that lies
/// within that leaf's zone, meant to seed an iterative lookup against it.
#[derive(Debug, Clone)]
pub struct LookupRequest {
    pub id: Identifier,
}

/// Emitted by a leaf's maintenance timer for a stale, protocol-version-2+
/// contact that should be re-pinged out of band.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub contact: Contact,
}

/// Opaque handle returned by [`EventHub::subscribe`], required to
/// [`EventHub::unsubscribe`] again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle(u64);

struct Slot<T> {
    id: u64,
    callback: Arc<dyn Fn(T) + Send + Sync>,
}

/// Pub/sub hub for one event type `T`. `T` must be `Clone` because
/// [`EventHub::emit_sync`]/[`EventHub::emit`] hand a copy of the payload to
/// every subscriber.
pub struct EventHub<T> {
    slots: RwLock<Vec<Slot<T>>>,
    next_id: AtomicU64,
}

impl<T> Default for EventHub<T> {
    fn default() -> Self {
        EventHub {
            slots: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T: Clone + Send + 'static> EventHub<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots.write().push(Slot {
            id,
            callback: Arc::new(callback),
        });
        SubscriptionHandle(id)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.slots.write().retain(|slot| slot.id != handle.0);
    }

    /// Runs every subscriber on the caller's stack, in registration order.
    /// Subscribers are snapshotted under the read lock before any callback
    /// runs, so an `unsubscribe` racing with this call never observes (or is
    /// observed by) a half-dispatched round: it either applies to the next
    /// `emit_sync`/`emit` call or not at all.
    pub fn emit_sync(&self, args: T) {
        let callbacks: Vec<_> = self
            .slots
            .read()
            .iter()
            .map(|slot| slot.callback.clone())
            .collect();
        for callback in callbacks {
            callback(args.clone());
        }
    }

    /// Dispatches asynchronously via `tokio::spawn`; does not block the
    /// caller.
    pub fn emit(&self, args: T) {
        let callbacks: Vec<_> = self
            .slots
            .read()
            .iter()
            .map(|slot| slot.callback.clone())
            .collect();
        tokio::spawn(async move {
            for callback in callbacks {
                callback(args.clone());
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn subscribers_fire_in_registration_order() {
        let hub: EventHub<u32> = EventHub::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..5u32 {
            let order = order.clone();
            hub.subscribe(move |v| order.lock().push((i, v)));
        }
        hub.emit_sync(42);
        let seen = order.lock().clone();
        assert_eq!(
            seen,
            vec![(0, 42), (1, 42), (2, 42), (3, 42), (4, 42)]
        );
    }

    #[test]
    fn unsubscribe_stops_future_dispatch() {
        let hub: EventHub<u32> = EventHub::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c2 = count.clone();
        let handle = hub.subscribe(move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        });
        hub.emit_sync(1);
        hub.unsubscribe(handle);
        hub.emit_sync(1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
