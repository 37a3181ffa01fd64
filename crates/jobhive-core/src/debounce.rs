//! Per-user request coalescing.
//!
//! Users often type one query across several quick messages. Scheduling a
//! request for a user replaces whatever that user still has pending, so only
//! the last message of a burst reaches the callback.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use jobhive_schema::{RequestId, UserId};
use tokio::task::JoinHandle;

use crate::freshness::RequestIdGenerator;

pub const DEFAULT_DEBOUNCE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq)]
pub struct DebouncedRequest<P> {
    pub user_id: UserId,
    pub request_id: RequestId,
    pub payload: P,
    pub scheduled_at: DateTime<Utc>,
}

impl<P> DebouncedRequest<P> {
    pub fn new(user_id: UserId, request_id: RequestId, payload: P) -> Self {
        Self {
            user_id,
            request_id,
            payload,
            scheduled_at: Utc::now(),
        }
    }
}

struct PendingEntry {
    request_id: RequestId,
    handle: JoinHandle<()>,
}

type Registry = Arc<Mutex<HashMap<UserId, PendingEntry>>>;

/// Registry of at most one pending, cancellable task per user.
///
/// The registry mutex is never held across an `.await`. A task only runs its
/// callback after removing its own entry under that mutex, and replacement
/// happens under the same mutex, so a superseded request can never fire.
/// Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct DebounceCoordinator {
    delay: Duration,
    pending: Registry,
    ids: Arc<RequestIdGenerator>,
}

impl Default for DebounceCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_DELAY)
    }
}

impl DebounceCoordinator {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Arc::new(Mutex::new(HashMap::new())),
            ids: Arc::new(RequestIdGenerator::new()),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Supersede any pending request for `user_id` and run `callback` after
    /// the delay. Returns the new request id immediately.
    pub fn schedule<P, F, Fut>(&self, user_id: &UserId, payload: P, callback: F) -> RequestId
    where
        P: Send + 'static,
        F: FnOnce(RequestId, P) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let request = DebouncedRequest::new(user_id.clone(), self.ids.next_id(), payload);
        let request_id = request.request_id.clone();
        self.schedule_request(request, callback);
        request_id
    }

    /// Like [`schedule`](Self::schedule) but with a caller-issued request id,
    /// e.g. one already stamped into the user's stored context.
    pub fn schedule_request<P, F, Fut>(&self, request: DebouncedRequest<P>, callback: F)
    where
        P: Send + 'static,
        F: FnOnce(RequestId, P) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let DebouncedRequest {
            user_id,
            request_id,
            payload,
            scheduled_at,
        } = request;

        let mut pending = lock(&self.pending);
        if let Some(previous) = pending.remove(&user_id) {
            previous.handle.abort();
            tracing::debug!(
                user_id = %user_id,
                superseded = %previous.request_id,
                by = %request_id,
                "debounced request superseded"
            );
        }

        let registry = Arc::clone(&self.pending);
        let delay = self.delay;
        let task_user = user_id.clone();
        let task_request = request_id.clone();
        // Spawned while the registry is locked: the task cannot claim its
        // entry before it has been inserted below.
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !claim(&registry, &task_user, &task_request) {
                return;
            }
            tracing::debug!(
                user_id = %task_user,
                request_id = %task_request,
                waited_ms = (Utc::now() - scheduled_at).num_milliseconds(),
                "debounced request firing"
            );
            run_callback(task_user, task_request, payload, callback).await;
        });

        pending.insert(user_id, PendingEntry { request_id, handle });
    }

    /// Remove a pending request without running it.
    pub fn cancel(&self, user_id: &UserId) -> bool {
        let removed = lock(&self.pending).remove(user_id);
        match removed {
            Some(entry) => {
                entry.handle.abort();
                tracing::debug!(user_id = %user_id, request_id = %entry.request_id, "debounced request cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, user_id: &UserId) -> bool {
        lock(&self.pending).contains_key(user_id)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Cancel everything still waiting, e.g. on shutdown.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = lock(&self.pending).drain().collect();
        for (_, entry) in &drained {
            entry.handle.abort();
        }
        drained.len()
    }
}

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<UserId, PendingEntry>> {
    // A panicking callback never holds this lock, but recover anyway.
    registry
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn claim(registry: &Registry, user_id: &UserId, request_id: &RequestId) -> bool {
    let mut pending = lock(registry);
    match pending.get(user_id) {
        Some(entry) if entry.request_id == *request_id => {
            pending.remove(user_id);
            true
        }
        _ => false,
    }
}

async fn run_callback<P, F, Fut>(user_id: UserId, request_id: RequestId, payload: P, callback: F)
where
    F: FnOnce(RequestId, P) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let id = request_id.clone();
    let outcome = AssertUnwindSafe(async move { callback(id, payload).await })
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::warn!(
                user_id = %user_id,
                request_id = %request_id,
                error = %err,
                "debounced callback failed"
            );
        }
        Err(_) => {
            tracing::error!(
                user_id = %user_id,
                request_id = %request_id,
                "debounced callback panicked"
            );
        }
    }
}
