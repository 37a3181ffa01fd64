use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use jobhive_bus::{EventBus, Topic};
use jobhive_schema::BusMessage;

/// Running count of bus events per topic.
#[derive(Debug)]
pub struct EventStats {
    counts: HashMap<Topic, AtomicU64>,
}

impl Default for EventStats {
    fn default() -> Self {
        Self {
            counts: Topic::ALL
                .iter()
                .map(|topic| (*topic, AtomicU64::new(0)))
                .collect(),
        }
    }
}

impl EventStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, topic: Topic) {
        if let Some(count) = self.counts.get(&topic) {
            count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn count(&self, topic: Topic) -> u64 {
        self.counts
            .get(&topic)
            .map_or(0, |count| count.load(Ordering::Relaxed))
    }

    /// `topic=count` pairs in [`Topic::ALL`] order.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for topic in Topic::ALL {
            if !out.is_empty() {
                out.push(' ');
            }
            let _ = write!(out, "{topic}={}", self.count(topic));
        }
        out
    }
}

/// Follow every gateway event: log it and count it in `stats`.
///
/// Subscribes before returning, so nothing published afterwards is missed.
/// The task ends once every publisher for `bus` is dropped.
pub async fn spawn_event_listener(
    bus: &EventBus,
    stats: Arc<EventStats>,
) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe_all().await;
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            stats.record(Topic::of(&msg));
            log_event(&msg);
        }
        tracing::debug!("event listener stopped");
    })
}

fn log_event(msg: &BusMessage) {
    match msg {
        BusMessage::MessageAccepted { trace_id, user_id } => {
            tracing::debug!(user_id = %user_id, trace_id = %trace_id, "message accepted");
        }
        BusMessage::WelcomeSent {
            user_id,
            session_id,
        } => {
            tracing::info!(user_id = %user_id, session_id = %session_id, "welcome sent");
        }
        BusMessage::SearchDispatched {
            user_id,
            request_id,
            kind,
            query,
            offset,
        } => {
            tracing::info!(
                user_id = %user_id,
                request_id = %request_id,
                kind = ?kind,
                query = %query,
                offset,
                "search dispatched"
            );
        }
        BusMessage::ResultsDelivered {
            user_id,
            request_id,
            count,
        } => {
            tracing::info!(user_id = %user_id, request_id = %request_id, count, "results delivered");
        }
        BusMessage::StaleResultDiscarded {
            user_id,
            request_id,
        } => {
            tracing::info!(user_id = %user_id, request_id = %request_id, "stale result discarded");
        }
        BusMessage::TaskFailed { user_id, error } => {
            tracing::warn!(user_id = %user_id, error = %error, "task failed");
        }
    }
}
