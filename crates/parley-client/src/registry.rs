use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::error;

use crate::frame::Envelope;

pub type Handler = Arc<dyn Fn(&Envelope) + Send + Sync>;

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    topics: HashMap<String, Vec<(u64, Handler)>>,
}

/// Topic -> handlers, invoked in registration order.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let mut inner = lock(&self.inner);
        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .topics
            .entry(topic.clone())
            .or_default()
            .push((id, Arc::new(handler)));

        Subscription {
            registry: Arc::downgrade(&self.inner),
            topic,
            id,
        }
    }

    /// Invoke every handler of the envelope's topic. Handlers run against a
    /// snapshot taken before the first call, so they may subscribe or
    /// unsubscribe freely. A handler that panics is logged and skipped; the
    /// rest still run. Returns how many ran.
    pub fn dispatch(&self, envelope: &Envelope) -> usize {
        let handlers: Vec<Handler> = lock(&self.inner)
            .topics
            .get(envelope.kind())
            .map(|entries| entries.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        for handler in &handlers {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(envelope))).is_err() {
                error!("Handler for {} panicked", envelope.kind());
            }
        }
        handlers.len()
    }

    pub fn handler_count(&self, topic: &str) -> usize {
        lock(&self.inner).topics.get(topic).map_or(0, Vec::len)
    }
}

fn lock(inner: &Mutex<RegistryInner>) -> MutexGuard<'_, RegistryInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle for one registered handler. Dropping it leaves the handler in place.
#[must_use = "keep the Subscription to be able to unsubscribe"]
pub struct Subscription {
    registry: Weak<Mutex<RegistryInner>>,
    topic: String,
    id: u64,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Remove the handler. Returns false if it was already removed.
    pub fn unsubscribe(&self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut inner = lock(&registry);
        let Some(entries) = inner.topics.get_mut(&self.topic) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|(id, _)| *id != self.id);
        let removed = entries.len() != before;
        let empty = entries.is_empty();
        if empty {
            inner.topics.remove(&self.topic);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn frame(kind: &str) -> Envelope {
        Envelope::parse(&format!(r#"{{"type":"{kind}"}}"#)).unwrap()
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let registry = HandlerRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut subs = Vec::new();
        for n in 0..3 {
            let calls = calls.clone();
            subs.push(registry.subscribe("A", move |_| calls.lock().unwrap().push(n)));
        }

        assert_eq!(registry.dispatch(&frame("A")), 3);
        assert_eq!(*calls.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn topics_are_isolated() {
        let registry = HandlerRegistry::new();
        let a = Arc::new(AtomicUsize::new(0));
        let counter = a.clone();
        let _sub = registry.subscribe("A", move |env| {
            assert_eq!(env.kind(), "A");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(registry.dispatch(&frame("B")), 0);
        registry.dispatch(&frame("A"));
        assert_eq!(a.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let registry = HandlerRegistry::new();
        let sub = registry.subscribe("A", |_| {});
        let other = registry.subscribe("A", |_| {});
        assert_eq!(registry.handler_count("A"), 2);

        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert_eq!(registry.handler_count("A"), 1);

        assert!(other.unsubscribe());
        assert_eq!(registry.handler_count("A"), 0);
    }

    #[test]
    fn unsubscribe_during_dispatch_keeps_current_pass() {
        let registry = HandlerRegistry::new();
        let second_calls = Arc::new(AtomicUsize::new(0));
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot = victim.clone();
        let _first = registry.subscribe("A", move |_| {
            if let Some(sub) = slot.lock().unwrap().as_ref() {
                sub.unsubscribe();
            }
        });
        let counter = second_calls.clone();
        let second = registry.subscribe("A", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        *victim.lock().unwrap() = Some(second);

        assert_eq!(registry.dispatch(&frame("A")), 2);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);

        assert_eq!(registry.dispatch(&frame("A")), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_does_not_stop_the_others() {
        let registry = HandlerRegistry::new();
        let _bad = registry.subscribe("A", |_| panic!("handler bug"));
        let after = Arc::new(AtomicUsize::new(0));
        let counter = after.clone();
        let _good = registry.subscribe("A", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(registry.dispatch(&frame("A")), 2);
        assert_eq!(registry.dispatch(&frame("A")), 2);
        assert_eq!(after.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn subscription_outliving_registry_is_harmless() {
        let registry = HandlerRegistry::new();
        let sub = registry.subscribe("A", |_| {});
        drop(registry);
        assert!(!sub.unsubscribe());
    }
}
