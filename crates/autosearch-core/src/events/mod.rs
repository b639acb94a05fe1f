//! Search lifecycle events
//!
//! Events are handed to a single delivery task through an unbounded channel.
//! `publish` returns as soon as the event is queued, and handlers always run on
//! the delivery task, never on the publisher's call stack. A handler that
//! submits a new search therefore cannot re-enter the code that emitted the
//! event.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::search::{SearchResult, SearchTrigger};

/// Kind of lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchEventKind {
    SearchStarted,
    SearchCompleted,
    SearchResultReady,
    SearchFailed,
    SearchConfigUpdated,
}

impl SearchEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SearchStarted => "search_started",
            Self::SearchCompleted => "search_completed",
            Self::SearchResultReady => "search_result_ready",
            Self::SearchFailed => "search_failed",
            Self::SearchConfigUpdated => "search_config_updated",
        }
    }
}

impl std::fmt::Display for SearchEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A lifecycle event
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchEvent {
    /// A trigger left the queue and the provider chain is starting
    SearchStarted { trigger: SearchTrigger },
    /// The provider chain finished (possibly with an empty result)
    SearchCompleted {
        trigger: SearchTrigger,
        result: SearchResult,
    },
    /// A result is available to consumers, fresh or from the cache
    SearchResultReady {
        query: String,
        result: SearchResult,
        /// Absent for cache hits
        trigger: Option<SearchTrigger>,
        cached: bool,
    },
    /// The trigger could not be executed
    SearchFailed {
        trigger: SearchTrigger,
        error: String,
    },
    SearchConfigUpdated { config: SearchConfig },
}

impl SearchEvent {
    pub fn kind(&self) -> SearchEventKind {
        match self {
            Self::SearchStarted { .. } => SearchEventKind::SearchStarted,
            Self::SearchCompleted { .. } => SearchEventKind::SearchCompleted,
            Self::SearchResultReady { .. } => SearchEventKind::SearchResultReady,
            Self::SearchFailed { .. } => SearchEventKind::SearchFailed,
            Self::SearchConfigUpdated { .. } => SearchEventKind::SearchConfigUpdated,
        }
    }

    /// Query the event is about, if any
    pub fn query(&self) -> Option<&str> {
        match self {
            Self::SearchStarted { trigger }
            | Self::SearchCompleted { trigger, .. }
            | Self::SearchFailed { trigger, .. } => Some(&trigger.query),
            Self::SearchResultReady { query, .. } => Some(query),
            Self::SearchConfigUpdated { .. } => None,
        }
    }
}

/// Event callback; runs on the delivery task
pub type EventHandler = Arc<dyn Fn(&SearchEvent) + Send + Sync>;

struct Registered {
    id: u64,
    filter: Option<SearchEventKind>,
    handler: EventHandler,
}

#[derive(Default)]
struct HandlerRegistry {
    handlers: RwLock<Vec<Registered>>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    fn add(&self, filter: Option<SearchEventKind>, handler: EventHandler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.push(Registered {
                id,
                filter,
                handler,
            });
        }
        id
    }

    fn remove(&self, id: u64) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.retain(|h| h.id != id);
        }
    }

    fn matching(&self, kind: SearchEventKind) -> Vec<EventHandler> {
        self.handlers
            .read()
            .map(|handlers| {
                handlers
                    .iter()
                    .filter(|h| h.filter.is_none_or(|f| f == kind))
                    .map(|h| h.handler.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn len(&self) -> usize {
        self.handlers.read().map(|h| h.len()).unwrap_or(0)
    }
}

/// Handle returned by `subscribe`; call `unsubscribe` to stop receiving events
#[must_use = "dropping a Subscription keeps the handler registered; call unsubscribe() to remove it"]
pub struct Subscription {
    id: u64,
    registry: Weak<HandlerRegistry>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Fire-and-forget event publisher with deferred, ordered delivery
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::UnboundedSender<SearchEvent>,
    registry: Arc<HandlerRegistry>,
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("subscribers", &self.registry.len())
            .finish()
    }
}

impl EventPublisher {
    /// Create a publisher and spawn its delivery task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(HandlerRegistry::default());
        tokio::spawn(deliver(rx, Arc::downgrade(&registry)));
        Self { tx, registry }
    }

    /// Queue an event for delivery; never waits for handlers
    pub fn publish(&self, event: SearchEvent) {
        let kind = event.kind();
        if self.tx.send(event).is_err() {
            warn!(kind = %kind, "Event delivery task has stopped; event dropped");
        }
    }

    /// Receive events of one kind
    pub fn subscribe<F>(&self, kind: SearchEventKind, handler: F) -> Subscription
    where
        F: Fn(&SearchEvent) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(handler))
    }

    /// Receive every event
    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SearchEvent) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    /// Forward matching events into a channel
    pub fn channel(
        &self,
        kind: Option<SearchEventKind>,
    ) -> (Subscription, mpsc::UnboundedReceiver<SearchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.register(
            kind,
            Arc::new(move |event: &SearchEvent| {
                let _ = tx.send(event.clone());
            }),
        );
        (subscription, rx)
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    fn register(&self, filter: Option<SearchEventKind>, handler: EventHandler) -> Subscription {
        let id = self.registry.add(filter, handler);
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }
}

async fn deliver(mut rx: mpsc::UnboundedReceiver<SearchEvent>, registry: Weak<HandlerRegistry>) {
    while let Some(event) = rx.recv().await {
        let Some(registry) = registry.upgrade() else {
            break;
        };
        let kind = event.kind();
        for handler in registry.matching(kind) {
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                warn!(kind = %kind, "Event handler panicked");
            }
        }
    }
    debug!("Event delivery task finished");
}
