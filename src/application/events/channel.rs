//! Synchronous publish/subscribe channel
//!
//! Each entity owns one channel per event kind. A channel may be chained to
//! the parent entity's channel of the same kind when it is built, so an event
//! raised at a supply point is also seen by subscribers of its station, pool,
//! operator and network. The chain is cut with [`EventChannel::detach`] when
//! the entity leaves the hierarchy.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::error;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    pub(crate) fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub struct EventChannel<T> {
    name: &'static str,
    listeners: RwLock<Vec<(ListenerId, Listener<T>)>>,
    upstream: RwLock<Option<Arc<EventChannel<T>>>>,
}

impl<T> EventChannel<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            listeners: RwLock::new(Vec::new()),
            upstream: RwLock::new(None),
        }
    }

    /// Channel that forwards every published event to `upstream` after its
    /// own listeners ran.
    pub fn chained_to(name: &'static str, upstream: Arc<EventChannel<T>>) -> Self {
        Self {
            upstream: RwLock::new(Some(upstream)),
            ..Self::new(name)
        }
    }

    /// Stop forwarding to the upstream channel. Returns `false` when the
    /// channel was not chained.
    pub fn detach(&self) -> bool {
        self.upstream.write().take().is_some()
    }

    pub fn is_chained(&self) -> bool {
        self.upstream.read().is_some()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ListenerId::next();
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Returns `false` when `id` was not subscribed here.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Run local listeners in registration order, then the upstream chain.
    /// A panicking listener is logged and skipped.
    pub fn publish(&self, event: &T) {
        // Listeners may subscribe or publish re-entrantly; never hold the
        // lock while they run.
        let snapshot: Vec<Listener<T>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!(channel = self.name, "Event listener panicked");
            }
        }

        let upstream = self.upstream.read().clone();
        if let Some(upstream) = upstream {
            upstream.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn listeners_run_in_registration_order_then_upstream() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let parent = Arc::new(EventChannel::<u32>::new("parent"));
        let child = EventChannel::chained_to("child", Arc::clone(&parent));

        let l = Arc::clone(&log);
        parent.subscribe(move |v| l.lock().unwrap().push(format!("parent:{v}")));
        let l = Arc::clone(&log);
        child.subscribe(move |v| l.lock().unwrap().push(format!("first:{v}")));
        let l = Arc::clone(&log);
        child.subscribe(move |v| l.lock().unwrap().push(format!("second:{v}")));

        child.publish(&7);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:7", "second:7", "parent:7"]
        );
    }

    #[test]
    fn panicking_listener_does_not_stop_delivery() {
        let hits = Arc::new(AtomicU64::new(0));
        let channel = EventChannel::<()>::new("test");
        channel.subscribe(|_| panic!("listener failure"));
        let h = Arc::clone(&hits);
        channel.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        channel.publish(&());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_removes_listener() {
        let hits = Arc::new(AtomicU64::new(0));
        let channel = EventChannel::<()>::new("test");
        let h = Arc::clone(&hits);
        let id = channel.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert!(channel.unsubscribe(id));
        assert!(!channel.unsubscribe(id));
        channel.publish(&());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(channel.listener_count(), 0);
    }

    #[test]
    fn detached_channel_stops_forwarding() {
        let hits = Arc::new(AtomicU64::new(0));
        let parent = Arc::new(EventChannel::<()>::new("parent"));
        let child = EventChannel::chained_to("child", Arc::clone(&parent));
        let h = Arc::clone(&hits);
        parent.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        child.publish(&());
        assert!(child.detach());
        assert!(!child.is_chained());
        child.publish(&());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!child.detach());
    }

    #[test]
    fn parent_events_do_not_reach_children() {
        let hits = Arc::new(AtomicU64::new(0));
        let parent = Arc::new(EventChannel::<()>::new("parent"));
        let child = EventChannel::chained_to("child", Arc::clone(&parent));
        let h = Arc::clone(&hits);
        child.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        parent.publish(&());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
