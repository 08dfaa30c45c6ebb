//! In-process publish/subscribe bus shared by the pipeline agent and its callers.
//!
//! Two independent registries live side by side:
//! - broadcast topics (`"cv:distill"`, `"agent:status"`, ...)
//! - direct addresses, subscribed as `"@<name>"` and reached via `publish_direct(name, ..)`
//!
//! Dispatch is synchronous: `publish` runs every handler in subscription order before
//! returning. The registry lock is released before handlers run, so a handler may
//! publish or subscribe re-entrantly. A handler that returns an error or panics is
//! logged and skipped; the remaining handlers still run.
//!
//! The bus is generic over its payload type. It is an explicit dependency: construct
//! one and clone the handle into every component that needs it.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, error};

/// Marker that routes a subscription to the direct-address registry.
pub const DIRECT_PREFIX: char = '@';

/// Result returned by every bus handler. Errors are logged by the bus, never propagated.
pub type HandlerResult = anyhow::Result<()>;

type Handler<P> = Arc<dyn Fn(&P) -> HandlerResult + Send + Sync>;
type HandlerSet<P> = Vec<(u64, Handler<P>)>;

struct Registry<P> {
    topics: HashMap<String, HandlerSet<P>>,
    direct: HashMap<String, HandlerSet<P>>,
}

impl<P> Registry<P> {
    fn map_for(&mut self, key: &str) -> &mut HashMap<String, HandlerSet<P>> {
        if is_direct(key) {
            &mut self.direct
        } else {
            &mut self.topics
        }
    }
}

struct Inner<P> {
    registry: Mutex<Registry<P>>,
    next_id: AtomicU64,
}

impl<P> Inner<P> {
    fn lock(&self) -> MutexGuard<'_, Registry<P>> {
        // A handler never runs under this lock, so a poisoned registry is still consistent.
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, key: &str, id: u64) {
        let mut registry = self.lock();
        let map = registry.map_for(key);
        let Some(handlers) = map.get_mut(key) else {
            return;
        };
        handlers.retain(|(handler_id, _)| *handler_id != id);
        let remaining = handlers.len();
        if remaining == 0 {
            map.remove(key);
        }
        debug!(topic = key, remaining, "Unsubscribed");
    }
}

/// Cloneable handle to a shared publish/subscribe registry.
pub struct MessageBus<P> {
    inner: Arc<Inner<P>>,
}

impl<P> Clone for MessageBus<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: 'static> Default for MessageBus<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: 'static> MessageBus<P> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry {
                    topics: HashMap::new(),
                    direct: HashMap::new(),
                }),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Registers `handler` for `topic`. A topic starting with `@` is a direct address.
    ///
    /// The returned [`Subscription`] must be kept to unsubscribe later; dropping it
    /// leaves the handler registered.
    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> Subscription<P>
    where
        F: Fn(&P) -> HandlerResult + Send + Sync + 'static,
    {
        let topic = topic.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut registry = self.inner.lock();
        let handlers = registry.map_for(&topic).entry(topic.clone()).or_default();
        handlers.push((id, Arc::new(handler)));
        debug!(
            topic = %topic,
            direct = is_direct(&topic),
            handlers = handlers.len(),
            "Subscribed"
        );
        drop(registry);

        Subscription {
            bus: Arc::downgrade(&self.inner),
            topic,
            id,
        }
    }

    /// Delivers `payload` to every handler of the broadcast `topic`, in subscription order.
    pub fn publish(&self, topic: &str, payload: P) {
        let handlers = self.snapshot(|registry| registry.topics.get(topic));
        debug!(topic, handlers = handlers.len(), "Publishing");
        dispatch(topic, &handlers, &payload);
    }

    /// Delivers `payload` only to handlers subscribed under `@<address>`.
    /// Zero subscribers is not an error.
    pub fn publish_direct(&self, address: &str, payload: P) {
        let key = direct_key(address);
        let handlers = self.snapshot(|registry| registry.direct.get(&key));
        debug!(address, handlers = handlers.len(), "Publishing direct");
        dispatch(&key, &handlers, &payload);
    }

    /// Number of handlers currently registered under `topic` (either registry).
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let mut registry = self.inner.lock();
        registry.map_for(topic).get(topic).map_or(0, Vec::len)
    }

    fn snapshot(
        &self,
        select: impl FnOnce(&Registry<P>) -> Option<&HandlerSet<P>>,
    ) -> Vec<Handler<P>> {
        let registry = self.inner.lock();
        select(&registry)
            .map(|handlers| handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default()
    }
}

/// Handle returned by [`MessageBus::subscribe`].
pub struct Subscription<P> {
    bus: Weak<Inner<P>>,
    topic: String,
    id: u64,
}

impl<P> Subscription<P> {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Removes the handler. An emptied topic is pruned from the registry.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.remove(&self.topic, self.id);
        }
    }
}

fn is_direct(topic: &str) -> bool {
    topic.starts_with(DIRECT_PREFIX)
}

/// Builds the direct-address key for an agent name: `"name"` → `"@name"`.
pub fn direct_key(address: &str) -> String {
    format!("{DIRECT_PREFIX}{address}")
}

fn dispatch<P>(topic: &str, handlers: &[Handler<P>], payload: &P) {
    for handler in handlers {
        match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(topic, error = %e, "Bus handler failed"),
            Err(panic) => error!(
                topic,
                panic = panic_message(panic.as_ref()),
                "Bus handler panicked"
            ),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Log = Arc<Mutex<Vec<String>>>;

    fn new_log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[test]
    fn test_publish_reaches_every_handler_in_order() {
        let bus: MessageBus<u32> = MessageBus::new();
        let log = new_log();

        for name in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            bus.subscribe("test:topic", move |p| {
                log.lock().unwrap().push(format!("{name}:{p}"));
                Ok(())
            });
        }

        bus.publish("test:topic", 7);

        assert_eq!(entries(&log), vec!["first:7", "second:7", "third:7"]);
    }

    #[test]
    fn test_each_handler_invoked_exactly_once() {
        let bus: MessageBus<u32> = MessageBus::new();
        let hits = Arc::new(AtomicU64::new(0));
        for _ in 0..3 {
            let counter = Arc::clone(&hits);
            bus.subscribe("count:topic", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        bus.publish("count:topic", 0);

        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unsubscribed_handler_receives_nothing() {
        let bus: MessageBus<u32> = MessageBus::new();
        let hits = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&hits);
        let sub = bus.subscribe("temp:topic", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish("temp:topic", 1);
        sub.unsubscribe();
        bus.publish("temp:topic", 2);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_topic_is_pruned() {
        let bus: MessageBus<u32> = MessageBus::new();
        let a = bus.subscribe("prune:me", |_| Ok(()));
        let b = bus.subscribe("prune:me", |_| Ok(()));
        assert_eq!(bus.subscriber_count("prune:me"), 2);

        a.unsubscribe();
        assert_eq!(bus.subscriber_count("prune:me"), 1);
        b.unsubscribe();
        assert_eq!(bus.subscriber_count("prune:me"), 0);
        assert!(bus.inner.lock().topics.is_empty());
    }

    #[test]
    fn test_failing_handlers_do_not_block_siblings() {
        let bus: MessageBus<u32> = MessageBus::new();
        let hits = Arc::new(AtomicU64::new(0));

        bus.subscribe("iso:topic", |_| Err(anyhow::anyhow!("handler exploded")));
        bus.subscribe("iso:topic", |_| panic!("handler panicked"));
        let counter = Arc::clone(&hits);
        bus.subscribe("iso:topic", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish("iso:topic", 1);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_direct_and_broadcast_are_independent() {
        let bus: MessageBus<String> = MessageBus::new();
        let log = new_log();

        let topic_log = Arc::clone(&log);
        bus.subscribe("TestAgent", move |p| {
            topic_log.lock().unwrap().push(format!("topic:{p}"));
            Ok(())
        });
        let direct_log = Arc::clone(&log);
        bus.subscribe("@TestAgent", move |p| {
            direct_log.lock().unwrap().push(format!("direct:{p}"));
            Ok(())
        });

        bus.publish("TestAgent", "a".to_string());
        bus.publish_direct("TestAgent", "b".to_string());

        assert_eq!(entries(&log), vec!["topic:a", "direct:b"]);
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus: MessageBus<u32> = MessageBus::new();
        bus.publish("non:existent", 1);
        bus.publish_direct("NonExistentAgent", 2);
    }

    #[test]
    fn test_broadcast_publish_never_reaches_direct_key() {
        let bus: MessageBus<u32> = MessageBus::new();
        let hits = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&hits);
        bus.subscribe("@Agent", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish("@Agent", 1);

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(bus.subscriber_count("@Agent"), 1);
    }

    #[test]
    fn test_handler_can_publish_reentrantly() {
        let bus: MessageBus<u32> = MessageBus::new();
        let hits = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&hits);
        bus.subscribe("pong", move |p| {
            counter.fetch_add(u64::from(*p), Ordering::SeqCst);
            Ok(())
        });
        let inner_bus = bus.clone();
        bus.subscribe("ping", move |p| {
            inner_bus.publish("pong", p + 1);
            Ok(())
        });

        bus.publish("ping", 4);

        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_unsubscribe_after_bus_dropped_is_harmless() {
        let bus: MessageBus<u32> = MessageBus::new();
        let sub = bus.subscribe("gone", |_| Ok(()));
        drop(bus);
        sub.unsubscribe();
    }
}
