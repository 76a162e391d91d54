//! In-process publish/subscribe registry for changes.

use async_trait::async_trait;
use futures::FutureExt;
use oxide_core::Result;
use oxide_core::change::Change;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tracing::{debug, error, warn};

use crate::metrics::BusMetrics;

/// Receives changes published on a topic.
#[async_trait]
pub trait ChangeConsumer: Send + Sync {
    async fn on_change(&self, change: &Change) -> Result<()>;
}

struct FnConsumer<F>(F);

#[async_trait]
impl<F, Fut> ChangeConsumer for FnConsumer<F>
where
    F: Fn(Change) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn on_change(&self, change: &Change) -> Result<()> {
        (self.0)(change.clone()).await
    }
}

/// Wrap an async closure as a consumer.
pub fn consumer_fn<F, Fut>(f: F) -> Arc<dyn ChangeConsumer>
where
    F: Fn(Change) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnConsumer(f))
}

struct Registration {
    id: u64,
    consumer: Arc<dyn ChangeConsumer>,
}

struct BusInner {
    topics: RwLock<HashMap<String, Vec<Registration>>>,
    next_id: AtomicU64,
    metrics: Arc<BusMetrics>,
}

impl BusInner {
    fn remove(&self, topic: &str, id: u64) -> bool {
        let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
        let Some(registrations) = topics.get_mut(topic) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        let removed = registrations.len() != before;
        if registrations.is_empty() {
            topics.remove(topic);
        }
        if removed {
            self.metrics.record_unsubscribe();
        }
        removed
    }
}

/// Process-wide change bus. Cloning shares the same registry.
#[derive(Clone)]
pub struct ChangeBus {
    inner: Arc<BusInner>,
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                metrics: BusMetrics::new(),
            }),
        }
    }

    pub fn metrics(&self) -> &Arc<BusMetrics> {
        &self.inner.metrics
    }

    /// Register a consumer. It stays registered until the returned
    /// subscription is cancelled or dropped.
    pub fn subscribe(&self, topic: &str, consumer: Arc<dyn ChangeConsumer>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut topics = self.inner.topics.write().unwrap_or_else(|e| e.into_inner());
            topics
                .entry(topic.to_string())
                .or_default()
                .push(Registration { id, consumer });
        }
        self.inner.metrics.record_subscribe();
        debug!(topic, subscription = id, "Consumer subscribed");

        Subscription {
            bus: Arc::downgrade(&self.inner),
            topic: topic.to_string(),
            id,
            active: true,
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.inner.topics.read().unwrap_or_else(|e| e.into_inner());
        topics.get(topic).map(Vec::len).unwrap_or(0)
    }

    /// Deliver a change to every consumer of `topic`, one at a time, in
    /// registration order. Returns the number of consumers that handled it
    /// without error.
    ///
    /// Consumers registered during delivery only see later publications.
    pub async fn publish(&self, topic: &str, change: &Change) -> usize {
        let consumers: Vec<(u64, Arc<dyn ChangeConsumer>)> = {
            let topics = self.inner.topics.read().unwrap_or_else(|e| e.into_inner());
            topics
                .get(topic)
                .map(|regs| regs.iter().map(|r| (r.id, r.consumer.clone())).collect())
                .unwrap_or_default()
        };

        let metrics = &self.inner.metrics;
        metrics.record_publish();

        let mut delivered = 0;
        for (id, consumer) in consumers {
            match AssertUnwindSafe(consumer.on_change(change))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {
                    metrics.record_delivery();
                    delivered += 1;
                }
                Ok(Err(e)) => {
                    metrics.record_failure();
                    warn!(
                        topic,
                        subscription = id,
                        changeid = %change.changeid,
                        error = %e,
                        "Change consumer failed"
                    );
                }
                Err(panic) => {
                    metrics.record_panic();
                    error!(
                        topic,
                        subscription = id,
                        changeid = %change.changeid,
                        panic = %panic_message(&*panic),
                        "Change consumer panicked"
                    );
                }
            }
        }

        delivered
    }
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle for a registered consumer.
pub struct Subscription {
    bus: Weak<BusInner>,
    topic: String,
    id: u64,
    active: bool,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Remove the consumer from the bus. Calling this more than once is a
    /// no-op.
    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(bus) = self.bus.upgrade() {
            if bus.remove(&self.topic, self.id) {
                debug!(topic = %self.topic, subscription = self.id, "Consumer unsubscribed");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxide_core::change::NewChange;
    use oxide_core::{ChangeId, Error};
    use std::sync::Mutex;

    fn change(id: i64) -> Change {
        Change::from_new(
            ChangeId::new(id),
            NewChange {
                who: "dev@example.com".to_string(),
                revision: format!("rev{}", id),
                branch: Some("master".to_string()),
                repository: "repo".to_string(),
                project: String::new(),
                category: None,
                files: vec![],
                comments: "c".to_string(),
                when: None,
            },
        )
    }

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<(&'static str, i64)>>>,
    }

    #[async_trait]
    impl ChangeConsumer for Recorder {
        async fn on_change(&self, change: &Change) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push((self.name, change.changeid.get()));
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl ChangeConsumer for Failing {
        async fn on_change(&self, _change: &Change) -> Result<()> {
            Err(Error::Internal("boom".into()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl ChangeConsumer for Panicking {
        async fn on_change(&self, _change: &Change) -> Result<()> {
            panic!("consumer exploded");
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<(&'static str, i64)>>>) -> Arc<Recorder> {
        Arc::new(Recorder {
            name,
            log: log.clone(),
        })
    }

    #[tokio::test]
    async fn test_delivery_in_registration_order() {
        let bus = ChangeBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _a = bus.subscribe("changes", recorder("a", &log));
        let _b = bus.subscribe("changes", recorder("b", &log));

        assert_eq!(bus.publish("changes", &change(1)).await, 2);
        assert_eq!(bus.publish("changes", &change(2)).await, 2);

        assert_eq!(
            *log.lock().unwrap(),
            vec![("a", 1), ("b", 1), ("a", 2), ("b", 2)]
        );
    }

    #[tokio::test]
    async fn test_failing_consumers_are_isolated() {
        let bus = ChangeBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _f = bus.subscribe("changes", Arc::new(Failing));
        let _p = bus.subscribe("changes", Arc::new(Panicking));
        let _r = bus.subscribe("changes", recorder("r", &log));

        let delivered = bus.publish("changes", &change(5)).await;

        assert_eq!(delivered, 1);
        assert_eq!(*log.lock().unwrap(), vec![("r", 5)]);
        let snapshot = bus.metrics().snapshot();
        assert_eq!(snapshot.handler_failures, 1);
        assert_eq!(snapshot.handler_panics, 1);
        assert_eq!(snapshot.deliveries, 1);
    }

    #[test]
    fn test_topics_are_independent() {
        let bus = ChangeBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _s = bus.subscribe("other", recorder("o", &log));

        assert_eq!(tokio_test::block_on(bus.publish("changes", &change(1))), 0);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(bus.metrics().snapshot().changes_published, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_and_drop() {
        let bus = ChangeBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut first = bus.subscribe("changes", recorder("first", &log));
        let second = bus.subscribe("changes", recorder("second", &log));
        assert_eq!(bus.subscriber_count("changes"), 2);

        first.unsubscribe();
        first.unsubscribe();
        assert!(!first.is_active());
        assert_eq!(bus.subscriber_count("changes"), 1);

        drop(second);
        assert_eq!(bus.subscriber_count("changes"), 0);
        assert_eq!(bus.metrics().snapshot().subscriptions, 0);

        bus.publish("changes", &change(1)).await;
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_consumer_fn() {
        let bus = ChangeBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _s = bus.subscribe(
            "changes",
            consumer_fn(move |change: Change| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(change.revision);
                    Ok(())
                }
            }),
        );

        bus.publish("changes", &change(9)).await;
        assert_eq!(*seen.lock().unwrap(), vec!["rev9".to_string()]);
    }
}
