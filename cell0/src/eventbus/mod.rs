//! Internal pub/sub event bus (spec §4.3, C9).
//!
//! Grounded on the teacher's `chat/gateway.rs` broadcast-to-WebSocket-clients
//! pattern, generalized into a standalone bus: a rolling replay buffer for
//! new subscribers, and per-subscriber bounded queues that drop the oldest
//! event (never block the producer) under backpressure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SystemStatus,
    ChatMessage,
    ModelActivity,
    AgentEvent,
    ColEvent,
    Log,
    Heartbeat,
    ClientConnect,
    ClientDisconnect,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub ts: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            ts: Utc::now(),
            payload,
        }
    }
}

struct ReplayBuffer {
    capacity: usize,
    events: VecDeque<Event>,
}

impl ReplayBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
        }
    }

    fn push(&mut self, event: Event) {
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn snapshot(&self) -> Vec<Event> {
        self.events.iter().cloned().collect()
    }
}

/// One subscriber's bounded delivery queue, owned outright by the bus (not a
/// channel): this lets `enqueue` evict the oldest queued event directly
/// instead of approximating eviction through a channel's own send failure.
/// When full, the oldest queued event is dropped, `dropped` increments, and
/// `pending_drop_notice` is raised so the next `recv` surfaces a single
/// coalesced `log` event noting the new drop count, ahead of the queue's own
/// events -- without itself competing for queue capacity.
struct Subscriber {
    filter: Option<Vec<EventKind>>,
    queue: Mutex<VecDeque<Event>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
    pending_drop_notice: AtomicBool,
    closed: AtomicBool,
}

pub struct EventBus {
    replay: Mutex<ReplayBuffer>,
    subscribers: Mutex<Vec<Arc<Subscriber>>>,
    missed_heartbeats_before_close: u32,
}

/// Async handle onto a `Subscriber`'s queue; stands in for `mpsc::Receiver`
/// so call sites (`subscription.rx.recv().await`) read the same either way.
pub struct EventReceiver {
    subscriber: Arc<Subscriber>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            if self
                .subscriber
                .pending_drop_notice
                .swap(false, Ordering::SeqCst)
            {
                let total = self.subscriber.dropped.load(Ordering::SeqCst);
                return Some(Event::new(
                    EventKind::Log,
                    serde_json::json!({
                        "subscriber_backpressure_drop": true,
                        "dropped_total": total,
                    }),
                ));
            }
            if let Some(event) = self.subscriber.queue.lock().unwrap().pop_front() {
                return Some(event);
            }
            self.subscriber.notify.notified().await;
        }
    }
}

impl Drop for EventReceiver {
    fn drop(&mut self) {
        self.subscriber.closed.store(true, Ordering::SeqCst);
    }
}

pub struct Subscription {
    pub rx: EventReceiver,
    subscriber: Arc<Subscriber>,
}

impl Subscription {
    pub fn dropped_count(&self) -> u64 {
        self.subscriber.dropped.load(Ordering::SeqCst)
    }
}

impl EventBus {
    pub fn new(replay_buffer_size: usize, missed_heartbeats_before_close: u32) -> Self {
        Self {
            replay: Mutex::new(ReplayBuffer::new(replay_buffer_size)),
            subscribers: Mutex::new(Vec::new()),
            missed_heartbeats_before_close,
        }
    }

    pub fn missed_heartbeats_before_close(&self) -> u32 {
        self.missed_heartbeats_before_close
    }

    /// Subscribe, optionally filtered by kind. The new subscriber
    /// immediately receives the current replay buffer contents matching
    /// its filter, oldest first.
    pub fn subscribe(&self, filter: Option<Vec<EventKind>>, queue_capacity: usize) -> Subscription {
        let subscriber = Arc::new(Subscriber {
            filter: filter.clone(),
            queue: Mutex::new(VecDeque::new()),
            capacity: queue_capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            pending_drop_notice: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        let replay = self.replay.lock().unwrap().snapshot();
        for event in replay {
            if matches(&filter, &event.kind) {
                enqueue(&subscriber, event);
            }
        }

        self.subscribers.lock().unwrap().push(subscriber.clone());
        let rx = EventReceiver { subscriber: subscriber.clone() };
        Subscription { rx, subscriber }
    }

    /// Publish an event to the replay buffer and every matching subscriber.
    /// Never blocks: a subscriber whose own queue is full has its oldest
    /// queued event evicted to make room (spec §4.3 "drop the oldest
    /// buffered events for that client"), and its `pending_drop_notice` flag
    /// is raised so the next `recv` on that subscriber surfaces a coalesced
    /// `log` event noting the cumulative drop count, ahead of its queue.
    pub fn publish(&self, event: Event) {
        if !matches!(event.kind, EventKind::Log) {
            self.replay.lock().unwrap().push(event.clone());
        }

        let subscribers = self.subscribers.lock().unwrap().clone();
        for subscriber in &subscribers {
            if !matches(&subscriber.filter, &event.kind) {
                continue;
            }
            enqueue(subscriber, event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Explicit history pull (WS `get_history`), independent of the
    /// automatic replay a fresh `subscribe` call already performs.
    pub fn history(&self) -> Vec<Event> {
        self.replay.lock().unwrap().snapshot()
    }

    /// Drop closed subscribers (receiver side gone).
    pub fn prune_closed(&self) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|s| !s.closed.load(Ordering::SeqCst));
    }
}

/// Push `event` onto `subscriber`'s queue, evicting the oldest queued event
/// first if already at capacity. Returns whether an eviction happened. The
/// drop-notice log event is never itself queued here -- it would just evict
/// another real event at tight capacities -- instead `pending_drop_notice`
/// is raised and `EventReceiver::recv` synthesizes it out of band.
fn enqueue(subscriber: &Arc<Subscriber>, event: Event) -> bool {
    let evicted = {
        let mut queue = subscriber.queue.lock().unwrap();
        let evicted = if queue.len() >= subscriber.capacity {
            queue.pop_front();
            true
        } else {
            false
        };
        queue.push_back(event);
        evicted
    };
    if evicted {
        subscriber.dropped.fetch_add(1, Ordering::SeqCst);
        subscriber.pending_drop_notice.store(true, Ordering::SeqCst);
    }
    subscriber.notify.notify_one();
    evicted
}

fn matches(filter: &Option<Vec<EventKind>>, kind: &EventKind) -> bool {
    match filter {
        None => true,
        Some(kinds) => kinds.contains(kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_subscriber_receives_replay_buffer() {
        let bus = EventBus::new(10, 3);
        bus.publish(Event::new(EventKind::Heartbeat, serde_json::json!({})));
        let mut sub = bus.subscribe(None, 16);
        let event = sub.rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Heartbeat);
    }

    #[tokio::test]
    async fn filter_excludes_non_matching_kinds() {
        let bus = EventBus::new(10, 3);
        let mut sub = bus.subscribe(Some(vec![EventKind::ChatMessage]), 16);
        bus.publish(Event::new(EventKind::Heartbeat, serde_json::json!({})));
        bus.publish(Event::new(EventKind::ChatMessage, serde_json::json!({"m": 1})));
        let event = sub.rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::ChatMessage);
    }

    #[tokio::test]
    async fn full_queue_drops_oldest_and_counts_it() {
        let bus = EventBus::new(10, 3);
        let mut sub = bus.subscribe(None, 2);
        bus.publish(Event::new(EventKind::Heartbeat, serde_json::json!({"n": 1})));
        bus.publish(Event::new(EventKind::Heartbeat, serde_json::json!({"n": 2})));
        bus.publish(Event::new(EventKind::Heartbeat, serde_json::json!({"n": 3})));
        assert_eq!(sub.dropped_count(), 1);

        // n=1 was the oldest queued and must be the one evicted, not n=3.
        let first = sub.rx.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::Heartbeat);
        assert_eq!(first.payload["n"], 2);
        let second = sub.rx.recv().await.unwrap();
        assert_eq!(second.payload["n"], 3);
    }

    #[tokio::test]
    async fn drop_notice_is_delivered_once_and_ahead_of_queue() {
        let bus = EventBus::new(10, 3);
        let mut sub = bus.subscribe(None, 1);
        bus.publish(Event::new(EventKind::Heartbeat, serde_json::json!({"n": 1})));
        bus.publish(Event::new(EventKind::Heartbeat, serde_json::json!({"n": 2})));
        bus.publish(Event::new(EventKind::Heartbeat, serde_json::json!({"n": 3})));

        let notice = sub.rx.recv().await.unwrap();
        assert_eq!(notice.kind, EventKind::Log);
        assert_eq!(notice.payload["dropped_total"], 2);

        let event = sub.rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Heartbeat);
        assert_eq!(event.payload["n"], 3);
    }

    #[test]
    fn replay_buffer_evicts_oldest_past_capacity() {
        let mut buf = ReplayBuffer::new(2);
        buf.push(Event::new(EventKind::Log, serde_json::json!({"n": 1})));
        buf.push(Event::new(EventKind::Log, serde_json::json!({"n": 2})));
        buf.push(Event::new(EventKind::Log, serde_json::json!({"n": 3})));
        let snap = buf.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].payload["n"], 2);
    }
}
