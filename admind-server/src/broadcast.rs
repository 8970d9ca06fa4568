//! Log broadcasting to streaming subscribers
//!
//! Every log emission of the daemon flows through the global tracing
//! subscriber; [`BroadcastLayer`] taps that stream and hands each event to
//! the [`LogBroadcaster`], which fans it out to one bounded queue per
//! `/service/Cat` session. A slow subscriber loses its oldest events and is
//! told how many, but never stalls the daemon or other subscribers.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use admind_protocol::{LogEvent, LogLevel};

use crate::registry::SessionId;

/// Default per-subscriber queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

struct QueueInner {
    events: VecDeque<LogEvent>,
    /// Events dropped since the subscriber last caught up
    dropped: u64,
}

/// Bounded event queue for one subscriber
///
/// Producers never block: when the queue is full the oldest event is
/// discarded and counted. The next pop yields a synthetic warning naming
/// the count before any buffered events, so the gap is visible in-stream.
pub struct SubscriberQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
    notify: Notify,
}

impl SubscriberQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                events: VecDeque::with_capacity(capacity),
                dropped: 0,
            }),
            capacity,
            notify: Notify::new(),
        }
    }

    /// Enqueue an event, evicting the oldest if the queue is full
    pub fn push(&self, event: LogEvent) {
        {
            let mut inner = self.inner.lock();
            if inner.events.len() == self.capacity {
                inner.events.pop_front();
                inner.dropped += 1;
            }
            inner.events.push_back(event);
        }
        self.notify.notify_one();
    }

    /// Take the next event without waiting
    ///
    /// A pending drop count is reported first, as a warning event, before
    /// any buffered events are yielded.
    pub fn try_pop(&self) -> Option<LogEvent> {
        let mut inner = self.inner.lock();
        if inner.dropped > 0 {
            let n = inner.dropped;
            inner.dropped = 0;
            return Some(LogEvent::now(
                LogLevel::Warn,
                format!("dropped {} log events", n),
                None,
            ));
        }
        inner.events.pop_front()
    }

    /// Take the next event, waiting until one is available
    pub async fn pop(&self) -> LogEvent {
        loop {
            // Register interest before checking, so a push between the
            // check and the await is not lost
            let notified = self.notify.notified();
            if let Some(event) = self.try_pop() {
                return event;
            }
            notified.await;
        }
    }

    /// Number of buffered events
    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().events.is_empty()
    }
}

/// Fan-out hub delivering log events to all streaming subscribers
pub struct LogBroadcaster {
    subscribers: DashMap<SessionId, Arc<SubscriberQueue>>,
    queue_capacity: usize,
}

impl Default for LogBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl LogBroadcaster {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            queue_capacity,
        }
    }

    /// Attach a subscriber queue for a session
    ///
    /// The queue starts empty; subscribers see only events published after
    /// this call.
    pub fn subscribe(&self, id: SessionId) -> Arc<SubscriberQueue> {
        let queue = Arc::new(SubscriberQueue::new(self.queue_capacity));
        self.subscribers.insert(id, Arc::clone(&queue));
        queue
    }

    /// Detach a session's queue
    ///
    /// Safe to call for a session that never subscribed.
    pub fn unsubscribe(&self, id: SessionId) {
        self.subscribers.remove(&id);
    }

    /// Deliver an event to every subscriber
    ///
    /// Each subscriber gets its own copy. Per-subscriber ordering matches
    /// publish order; a full queue drops its oldest event rather than
    /// delaying anyone.
    pub fn publish(&self, event: LogEvent) {
        for entry in self.subscribers.iter() {
            entry.value().push(event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Tracing layer feeding the broadcaster
///
/// Only INFO and more severe events are forwarded; DEBUG/TRACE chatter
/// stays out of the client-visible stream.
pub struct BroadcastLayer {
    broadcaster: Arc<LogBroadcaster>,
}

impl BroadcastLayer {
    pub fn new(broadcaster: Arc<LogBroadcaster>) -> Self {
        Self { broadcaster }
    }
}

impl<S: Subscriber> Layer<S> for BroadcastLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::INFO {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let wire_level = if level == Level::ERROR {
            LogLevel::Error
        } else if level == Level::WARN {
            LogLevel::Warn
        } else {
            LogLevel::Info
        };

        self.broadcaster.publish(LogEvent::now(
            wire_level,
            visitor.message,
            visitor.request_path,
        ));
    }
}

#[derive(Default)]
struct EventVisitor {
    message: String,
    request_path: Option<String>,
}

impl tracing::field::Visit for EventVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "request_path" => self.request_path = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{:?}", value),
            "request_path" => self.request_path = Some(format!("{:?}", value)),
            _ => {}
        }
    }
}
