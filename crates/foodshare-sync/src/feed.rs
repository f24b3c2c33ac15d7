use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

use foodshare_types::ChangeEvent;

/// Decides whether a subscription wants an event.
pub type EventFilter = Arc<dyn Fn(&ChangeEvent) -> bool + Send + Sync>;

pub fn accept_all() -> EventFilter {
    Arc::new(|_| true)
}

/// Fans realtime change events out to filtered subscriptions.
#[derive(Clone, Default)]
pub struct ChangeFeed {
    inner: Arc<FeedInner>,
}

#[derive(Default)]
struct FeedInner {
    /// subscription id -> (filter, sender)
    subscribers: Mutex<HashMap<Uuid, Subscriber>>,
}

struct Subscriber {
    filter: EventFilter,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl FeedInner {
    fn subscribers(&self) -> MutexGuard<'_, HashMap<Uuid, Subscriber>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription. Events published from now on that pass
    /// `filter` are queued for it until it is dropped.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers().insert(id, Subscriber { filter, tx });

        Subscription {
            id,
            rx,
            feed: Arc::downgrade(&self.inner),
            on_release: None,
        }
    }

    /// Deliver an event to every matching subscription. Returns how many
    /// received it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let mut delivered = 0;
        self.inner.subscribers().retain(|id, sub| {
            if !(sub.filter)(&event) {
                return true;
            }
            match sub.tx.send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    trace!(subscription = %id, "dropping closed subscription");
                    false
                }
            }
        });
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers().len()
    }
}

/// Handle to a change-feed subscription. Dropping it unsubscribes and runs
/// the release hook, if any.
pub struct Subscription {
    id: Uuid,
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
    feed: Weak<FeedInner>,
    on_release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next event, or `None` once the feed is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    /// An already queued event, without waiting.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }

    /// Attach cleanup that must run when the subscription is released, such
    /// as leaving a remote channel.
    pub fn on_release(mut self, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_release = Some(Box::new(release));
        self
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(feed) = self.feed.upgrade() {
            feed.subscribers().remove(&self.id);
        }
        if let Some(release) = self.on_release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
