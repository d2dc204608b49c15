use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use ulid::Ulid;

type Subscribers<T> = DashMap<String, Vec<(Ulid, mpsc::UnboundedSender<T>)>>;

/// Per-equipment fan-out. Each subscriber gets its own unbounded queue, so a
/// slow reader never holds up the writer and never misses an update.
pub struct NotifyHub<T> {
    subscribers: Arc<Subscribers<T>>,
}

impl<T: Clone> Default for NotifyHub<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> NotifyHub<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
        }
    }

    pub fn subscribe(&self, key: &str) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Ulid::new();
        self.subscribers
            .entry(key.to_string())
            .or_default()
            .push((handle, tx));
        Subscription {
            key: key.to_string(),
            handle,
            rx,
            subscribers: Some(self.subscribers.clone()),
        }
    }

    /// Deliver to every subscriber of `key`. No-op if nobody is listening.
    pub fn send(&self, key: &str, value: &T) {
        if let Some(subs) = self.subscribers.get(key) {
            for (_, tx) in subs.iter() {
                let _ = tx.send(value.clone());
            }
        }
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.subscribers.get(key).map_or(0, |subs| subs.len())
    }

    /// Number of keys with at least one subscriber.
    pub fn key_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Receiving end of a subscription. Dropping it unsubscribes.
pub struct Subscription<T> {
    key: String,
    handle: Ulid,
    rx: mpsc::UnboundedReceiver<T>,
    subscribers: Option<Arc<Subscribers<T>>>,
}

impl<T> Subscription<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the next update. Returns `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving. Calling this more than once is a no-op.
    pub fn unsubscribe(&mut self) {
        let Some(subscribers) = self.subscribers.take() else {
            return;
        };
        if let Some(mut subs) = subscribers.get_mut(&self.key) {
            subs.retain(|(h, _)| *h != self.handle);
        }
        subscribers.remove_if(&self.key, |_, subs| subs.is_empty());
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut sub = hub.subscribe("eq-1");

        hub.send("eq-1", &7u32);

        assert_eq!(sub.recv().await, Some(7));
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub: NotifyHub<u32> = NotifyHub::new();
        hub.send("eq-1", &1);
        assert_eq!(hub.key_count(), 0);
    }

    #[tokio::test]
    async fn other_keys_not_delivered() {
        let hub = NotifyHub::new();
        let mut sub = hub.subscribe("eq-1");
        hub.send("eq-2", &1u32);
        assert_eq!(sub.try_recv(), None);
    }

    #[tokio::test]
    async fn unsubscribe_twice_is_noop_and_prunes_key() {
        let hub = NotifyHub::new();
        let mut a = hub.subscribe("eq-1");
        let mut b = hub.subscribe("eq-1");
        assert_eq!(hub.subscriber_count("eq-1"), 2);

        a.unsubscribe();
        a.unsubscribe();
        assert_eq!(hub.subscriber_count("eq-1"), 1);

        hub.send("eq-1", &3u32);
        assert_eq!(a.try_recv(), None);
        assert_eq!(b.try_recv(), Some(3));

        b.unsubscribe();
        assert_eq!(hub.key_count(), 0);
    }

    #[tokio::test]
    async fn drop_unsubscribes() {
        let hub: NotifyHub<u32> = NotifyHub::new();
        {
            let _sub = hub.subscribe("eq-1");
            assert_eq!(hub.subscriber_count("eq-1"), 1);
        }
        assert_eq!(hub.subscriber_count("eq-1"), 0);
    }
}
