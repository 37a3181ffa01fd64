//! In-process fan-out of conversation lifecycle events.
//!
//! Delivery is best effort: a subscriber whose queue is full misses the
//! event, and subscribers whose receiver was dropped are forgotten on the
//! next publish to their topic.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use jobhive_schema::BusMessage;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum Topic {
    MessageAccepted,
    WelcomeSent,
    SearchDispatched,
    ResultsDelivered,
    StaleResultDiscarded,
    TaskFailed,
}

impl Topic {
    pub const ALL: [Topic; 6] = [
        Topic::MessageAccepted,
        Topic::WelcomeSent,
        Topic::SearchDispatched,
        Topic::ResultsDelivered,
        Topic::StaleResultDiscarded,
        Topic::TaskFailed,
    ];

    pub fn of(msg: &BusMessage) -> Self {
        match msg {
            BusMessage::MessageAccepted { .. } => Topic::MessageAccepted,
            BusMessage::WelcomeSent { .. } => Topic::WelcomeSent,
            BusMessage::SearchDispatched { .. } => Topic::SearchDispatched,
            BusMessage::ResultsDelivered { .. } => Topic::ResultsDelivered,
            BusMessage::StaleResultDiscarded { .. } => Topic::StaleResultDiscarded,
            BusMessage::TaskFailed { .. } => Topic::TaskFailed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::MessageAccepted => "message_accepted",
            Topic::WelcomeSent => "welcome_sent",
            Topic::SearchDispatched => "search_dispatched",
            Topic::ResultsDelivered => "results_delivered",
            Topic::StaleResultDiscarded => "stale_result_discarded",
            Topic::TaskFailed => "task_failed",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Routes = Arc<RwLock<HashMap<Topic, Vec<mpsc::Sender<BusMessage>>>>>;

/// Topic-routed event bus. Clones share the same subscriber table.
#[derive(Clone)]
pub struct EventBus {
    routes: Routes,
    capacity: usize,
}

impl EventBus {
    /// `capacity` bounds each subscriber's queue.
    pub fn new(capacity: usize) -> Self {
        Self {
            routes: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    pub async fn subscribe(&self, topic: Topic) -> mpsc::Receiver<BusMessage> {
        self.subscribe_to(&[topic]).await
    }

    /// One receiver fed by several topics, in publish order.
    pub async fn subscribe_to(&self, topics: &[Topic]) -> mpsc::Receiver<BusMessage> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut routes = self.routes.write().await;
        for topic in topics {
            routes.entry(*topic).or_default().push(tx.clone());
        }
        rx
    }

    pub async fn subscribe_all(&self) -> mpsc::Receiver<BusMessage> {
        self.subscribe_to(&Topic::ALL).await
    }

    pub async fn subscriber_count(&self, topic: Topic) -> usize {
        self.routes.read().await.get(&topic).map_or(0, Vec::len)
    }

    /// Returns how many subscribers accepted the event.
    pub async fn publish(&self, msg: BusMessage) -> usize {
        route(&self.routes, msg).await
    }

    pub fn publisher(&self) -> BusPublisher {
        BusPublisher {
            routes: Arc::clone(&self.routes),
        }
    }
}

/// Publish-only handle for components that emit events but never listen.
#[derive(Clone)]
pub struct BusPublisher {
    routes: Routes,
}

impl BusPublisher {
    pub async fn publish(&self, msg: BusMessage) -> usize {
        route(&self.routes, msg).await
    }
}

async fn route(routes: &Routes, msg: BusMessage) -> usize {
    let topic = Topic::of(&msg);
    let mut delivered = 0;
    let mut saw_closed = false;
    {
        let routes = routes.read().await;
        for tx in routes.get(&topic).into_iter().flatten() {
            match tx.try_send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(%topic, user_id = %msg.user_id(), "subscriber queue full, event dropped");
                }
                Err(TrySendError::Closed(_)) => saw_closed = true,
            }
        }
    }

    if saw_closed {
        if let Some(senders) = routes.write().await.get_mut(&topic) {
            senders.retain(|tx| !tx.is_closed());
        }
    }
    delivered
}
