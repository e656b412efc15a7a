//! Subscriber registry and fan-out.
//!
//! Two kinds of subscribers receive every published snapshot:
//!
//! - **streams**: one bounded queue per open `/subscribe` connection
//! - **webhooks**: absolute http(s) URLs that get a JSON `POST` per snapshot
//!
//! Each set lives behind its own `std::sync::Mutex`. Locks are only held to
//! copy or mutate membership, never while delivering, so a slow consumer
//! cannot stall registration or the tick loop.

use crate::error::RegistryError;
use crate::snapshot::SnapshotMessage;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

/// Sending half of a stream subscriber's queue.
#[derive(Debug, Clone)]
pub struct StreamSink {
    id: u64,
    tx: mpsc::Sender<SnapshotMessage>,
}

impl StreamSink {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Webhook endpoint plus the shared HTTP client used to reach it.
#[derive(Debug, Clone)]
pub struct WebhookTarget {
    url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookTarget {
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Outcome of handing one message to one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Stored in the stream queue
    Queued,
    /// Queue full or closed: the message is lost and the subscriber must go
    Dropped,
    /// Webhook `POST` started in the background
    Dispatched,
}

/// Anything that can receive a snapshot.
#[derive(Debug, Clone)]
pub enum Subscriber {
    Stream(StreamSink),
    Webhook(WebhookTarget),
}

impl Subscriber {
    /// Delivers without blocking.
    ///
    /// Webhook delivery spawns a task on the current Tokio runtime; its
    /// errors stop at the task boundary.
    pub fn deliver(&self, message: &SnapshotMessage) -> Delivery {
        match self {
            Subscriber::Stream(sink) => match sink.tx.try_send(message.clone()) {
                Ok(()) => Delivery::Queued,
                Err(_) => Delivery::Dropped,
            },
            Subscriber::Webhook(target) => {
                let target = target.clone();
                let body = message.body.clone();
                tokio::spawn(async move {
                    post_webhook(&target, body).await;
                });
                Delivery::Dispatched
            }
        }
    }
}

async fn post_webhook(target: &WebhookTarget, body: Arc<str>) {
    let result = target
        .client
        .post(&target.url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .timeout(target.timeout)
        .body(body.to_string())
        .send()
        .await;

    match result {
        Ok(resp) if resp.status().is_success() => {
            debug!(url = %target.url, "webhook delivered");
        }
        Ok(resp) => {
            debug!(url = %target.url, status = %resp.status(), "webhook answered with an error status");
        }
        Err(e) => {
            debug!(url = %target.url, error = %e, "webhook delivery failed");
        }
    }
}

/// Counters of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub queued: usize,
    pub dropped: usize,
    pub webhooks: usize,
}

/// Receiving half of a stream subscription.
///
/// Dropping it (client disconnect) unregisters the stream.
#[derive(Debug)]
pub struct StreamSubscription {
    id: u64,
    rx: mpsc::Receiver<SnapshotMessage>,
    registry: Weak<SubscriberRegistry>,
}

impl StreamSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next queued message; `None` once the broadcaster removed this stream.
    pub async fn recv(&mut self) -> Option<SnapshotMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SnapshotMessage> {
        self.rx.try_recv().ok()
    }
}

impl Drop for StreamSubscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister_stream(self.id);
        }
    }
}

/// Set of live stream subscribers and webhook URLs.
#[derive(Debug)]
pub struct SubscriberRegistry {
    streams: Mutex<HashMap<u64, StreamSink>>,
    webhooks: Mutex<BTreeSet<String>>,
    next_id: AtomicU64,
    queue_capacity: usize,
    client: reqwest::Client,
    webhook_timeout: Duration,
}

impl SubscriberRegistry {
    pub fn new(queue_capacity: usize, webhook_timeout: Duration) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            webhooks: Mutex::new(BTreeSet::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
            client: reqwest::Client::new(),
            webhook_timeout,
        }
    }

    /// Opens a bounded queue for a new stream subscriber.
    pub fn register_stream(self: &Arc<Self>) -> StreamSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_capacity);

        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, StreamSink { id, tx });
        debug!(id, "stream subscriber registered");

        StreamSubscription {
            id,
            rx,
            registry: Arc::downgrade(self),
        }
    }

    /// Idempotent
    pub fn unregister_stream(&self, id: u64) {
        let removed = self
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if removed.is_some() {
            debug!(id, "stream subscriber removed");
        }
    }

    /// Adds a webhook URL. Registering the same URL twice keeps one entry.
    ///
    /// Returns the stored (trimmed) URL.
    pub fn register_webhook(&self, raw: &str) -> Result<String, RegistryError> {
        let url = validate_webhook_url(raw)?;
        let inserted = self
            .webhooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.clone());
        if inserted {
            info!(url = %url, "webhook subscribed");
        }
        Ok(url)
    }

    /// Removes a webhook URL; unknown URLs are ignored.
    pub fn unregister_webhook(&self, raw: &str) -> String {
        let url = raw.trim().to_string();
        let removed = self
            .webhooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&url);
        if removed {
            info!(url = %url, "webhook unsubscribed");
        }
        url
    }

    pub fn stream_count(&self) -> usize {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn webhooks(&self) -> Vec<String> {
        self.webhooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Current membership, copied out of the locks.
    pub fn subscribers(&self) -> Vec<Subscriber> {
        let mut subscribers: Vec<Subscriber> = self
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .map(Subscriber::Stream)
            .collect();

        let webhooks = self.webhooks.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.extend(webhooks.iter().map(|url| {
            Subscriber::Webhook(WebhookTarget {
                url: url.clone(),
                client: self.client.clone(),
                timeout: self.webhook_timeout,
            })
        }));
        subscribers
    }

    /// Hands `message` to every subscriber without waiting on any of them.
    ///
    /// Streams whose queue is full or closed lose the message and are
    /// removed; the client will see its stream end.
    pub fn broadcast(&self, message: &SnapshotMessage) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut dead = Vec::new();

        for subscriber in self.subscribers() {
            match subscriber.deliver(message) {
                Delivery::Queued => report.queued += 1,
                Delivery::Dispatched => report.webhooks += 1,
                Delivery::Dropped => {
                    report.dropped += 1;
                    if let Subscriber::Stream(sink) = subscriber {
                        dead.push(sink.id);
                    }
                }
            }
        }

        if !dead.is_empty() {
            let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
            for id in &dead {
                streams.remove(id);
            }
            warn!(count = dead.len(), seq = message.seq, "dropped slow or closed stream subscribers");
        }

        report
    }
}

/// Accepts only absolute `http://` / `https://` URLs with a host.
pub fn validate_webhook_url(raw: &str) -> Result<String, RegistryError> {
    let trimmed = raw.trim();
    let invalid = || RegistryError::InvalidWebhookUrl(trimmed.to_string());

    let lower = trimmed.to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return Err(invalid());
    }

    let parsed = Url::parse(trimmed).map_err(|_| invalid())?;
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(trimmed.to_string()),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(capacity: usize) -> Arc<SubscriberRegistry> {
        Arc::new(SubscriberRegistry::new(capacity, Duration::from_secs(5)))
    }

    fn message(seq: u64) -> SnapshotMessage {
        SnapshotMessage {
            seq,
            body: Arc::from(format!(r#"[{{"channel":"A","viewers":"{}"}}]"#, 2000 + seq)),
        }
    }

    #[test]
    fn test_webhook_url_validation() {
        assert!(validate_webhook_url("https://example.org/hook").is_ok());
        assert_eq!(
            validate_webhook_url("  http://127.0.0.1:9000/x  ").unwrap(),
            "http://127.0.0.1:9000/x"
        );
        assert!(validate_webhook_url("ftp://example.org").is_err());
        assert!(validate_webhook_url("example.org/hook").is_err());
        assert!(validate_webhook_url("http://").is_err());
        assert!(validate_webhook_url("").is_err());
    }

    #[test]
    fn test_webhook_registration_is_idempotent() {
        let registry = registry(10);
        registry.register_webhook("https://example.org/hook").unwrap();
        registry.register_webhook(" https://example.org/hook").unwrap();
        assert_eq!(registry.webhooks(), vec!["https://example.org/hook"]);

        let err = registry.register_webhook("not a url").unwrap_err();
        assert!(matches!(err, RegistryError::InvalidWebhookUrl(_)));
        assert_eq!(registry.webhooks().len(), 1);

        registry.unregister_webhook("https://example.org/hook");
        registry.unregister_webhook("https://example.org/hook");
        assert!(registry.webhooks().is_empty());
    }

    #[tokio::test]
    async fn test_stream_receives_in_order() {
        let registry = registry(10);
        let mut sub = registry.register_stream();

        registry.broadcast(&message(1));
        registry.broadcast(&message(2));

        assert_eq!(sub.recv().await.unwrap().seq, 1);
        assert_eq!(sub.recv().await.unwrap().seq, 2);
    }

    #[tokio::test]
    async fn test_drop_unregisters_stream() {
        let registry = registry(10);
        let sub = registry.register_stream();
        assert_eq!(registry.stream_count(), 1);
        drop(sub);
        assert_eq!(registry.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_one_full_queue_among_hundred() {
        let registry = registry(1);
        let mut subs: Vec<_> = (0..100).map(|_| registry.register_stream()).collect();

        // Toutes les files sont pleines ; on en vide 99
        let first = registry.broadcast(&message(1));
        assert_eq!(first.queued, 100);
        for sub in subs.iter_mut().skip(1) {
            assert_eq!(sub.try_recv().unwrap().seq, 1);
        }

        let report = registry.broadcast(&message(2));
        assert_eq!(report.queued, 99);
        assert_eq!(report.dropped, 1);
        assert_eq!(registry.stream_count(), 99);

        for sub in subs.iter_mut().skip(1) {
            assert_eq!(sub.try_recv().unwrap().seq, 2);
        }

        // Le retardataire garde son ancien message puis voit la fin du flux
        let slow = &mut subs[0];
        assert_eq!(slow.recv().await.unwrap().seq, 1);
        assert!(slow.recv().await.is_none());
    }
}
