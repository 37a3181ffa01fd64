use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use jobhive_bus::BusPublisher;
use jobhive_core::{
    CompletionOutcome, ConversationDecision, ConversationOrchestrator, ConversationState,
    DebounceCoordinator, DebouncedRequest,
};
use jobhive_schema::*;

mod events;
mod rate_limit;

pub use events::{spawn_event_listener, EventStats};
pub use rate_limit::RateLimiter;

/// Job catalogue the assistant searches.
#[async_trait]
pub trait JobSearch: Send + Sync {
    async fn search(&self, query: &str, offset: u32, limit: u32) -> Result<JobPage>;
}

/// Outbound side of the chat channel.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_welcome(&self, user_id: &UserId) -> Result<()>;
    /// Ask the user which job they are looking for.
    async fn send_prompt(&self, user_id: &UserId) -> Result<()>;
    async fn send_results(&self, user_id: &UserId, page: &JobPage) -> Result<()>;
}

/// A search waiting out the debounce window.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchTask {
    pub kind: SearchKind,
    pub query: String,
    pub offset: u32,
}

impl SearchTask {
    fn from_decision(decision: &ConversationDecision) -> Option<Self> {
        let query = decision.search_query.clone()?;
        if decision.should_paginate {
            Some(Self {
                kind: SearchKind::NextPage,
                query,
                offset: decision.pagination_offset.unwrap_or(0),
            })
        } else if decision.should_search {
            Some(Self {
                kind: SearchKind::NewQuery,
                query,
                offset: 0,
            })
        } else {
            None
        }
    }
}

struct Collaborators {
    orchestrator: Arc<ConversationOrchestrator>,
    search: Arc<dyn JobSearch>,
    messenger: Arc<dyn Messenger>,
    bus: BusPublisher,
}

pub struct Gateway {
    shared: Arc<Collaborators>,
    debounce: DebounceCoordinator,
    rate_limiter: RateLimiter,
}

impl Gateway {
    pub fn new(
        orchestrator: Arc<ConversationOrchestrator>,
        search: Arc<dyn JobSearch>,
        messenger: Arc<dyn Messenger>,
        bus: BusPublisher,
        rate_limiter: RateLimiter,
        debounce: DebounceCoordinator,
    ) -> Self {
        Self {
            shared: Arc::new(Collaborators {
                orchestrator,
                search,
                messenger,
                bus,
            }),
            debounce,
            rate_limiter,
        }
    }

    pub fn orchestrator(&self) -> &Arc<ConversationOrchestrator> {
        &self.shared.orchestrator
    }

    pub fn pending_searches(&self) -> usize {
        self.debounce.pending_count()
    }

    pub async fn handle_inbound(&self, inbound: InboundMessage) -> Result<ConversationDecision> {
        let user_id = inbound.user_id.clone();
        if !self.rate_limiter.check(&user_id).await {
            tracing::warn!(user_id = %user_id, "rate limited");
            return Err(anyhow!("rate limited: too many requests"));
        }

        self
            .shared
            .bus
            .publish(BusMessage::MessageAccepted {
                trace_id: inbound.trace_id,
                user_id: user_id.clone(),
            })
            .await;

        match self.process(&inbound).await {
            Ok(decision) => Ok(decision),
            Err(err) => {
                tracing::error!(
                    user_id = %user_id,
                    trace_id = %inbound.trace_id,
                    message_id = inbound.message_id.as_deref().unwrap_or("-"),
                    error = %err,
                    "inbound message failed"
                );
                self
                    .shared
                    .bus
                    .publish(BusMessage::TaskFailed {
                        user_id,
                        error: err.to_string(),
                    })
                    .await;
                Err(err)
            }
        }
    }

    /// Cancel every search still waiting in the debounce window.
    pub fn shutdown(&self) -> usize {
        let cancelled = self.debounce.cancel_all();
        if cancelled > 0 {
            tracing::info!(cancelled, "cancelled pending searches");
        }
        cancelled
    }

    async fn process(&self, inbound: &InboundMessage) -> Result<ConversationDecision> {
        let user_id = &inbound.user_id;
        let shared = &self.shared;
        let decision = shared
            .orchestrator
            .handle_message(user_id, &inbound.text)
            .await?;

        if decision.should_send_welcome {
            shared.messenger.send_welcome(user_id).await?;
            shared.orchestrator.mark_welcome_sent(user_id).await?;
            shared
                .bus
                .publish(BusMessage::WelcomeSent {
                    user_id: user_id.clone(),
                    session_id: decision.session_id.clone(),
                })
                .await;
        }

        if decision.asks_for_job_title() {
            shared.messenger.send_prompt(user_id).await?;
        }

        if let (Some(task), Some(request_id)) =
            (SearchTask::from_decision(&decision), decision.request_id.clone())
        {
            self.schedule_search(user_id, request_id, task);
        } else if decision.state == ConversationState::SearchingJobs
            && decision.effects.is_empty()
            && self.debounce.is_pending(user_id)
        {
            self.coalesce(user_id, inbound.text.trim()).await?;
        }

        Ok(decision)
    }

    /// The user is still typing their query: restart the window with the
    /// newest text under a fresh request id.
    async fn coalesce(&self, user_id: &UserId, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        let request_id = self
            .shared
            .orchestrator
            .generate_and_store_request_id(user_id)
            .await?;
        tracing::debug!(user_id = %user_id, request_id = %request_id, "coalescing follow-up message");
        self.schedule_search(
            user_id,
            request_id,
            SearchTask {
                kind: SearchKind::NewQuery,
                query: text.to_string(),
                offset: 0,
            },
        );
        Ok(())
    }

    fn schedule_search(&self, user_id: &UserId, request_id: RequestId, task: SearchTask) {
        let shared = Arc::clone(&self.shared);
        let request = DebouncedRequest::new(user_id.clone(), request_id, task);
        let target = user_id.clone();
        self.debounce
            .schedule_request(request, move |request_id, task| async move {
                run_search(shared, target, request_id, task).await
            });
    }
}

async fn run_search(
    shared: Arc<Collaborators>,
    user_id: UserId,
    request_id: RequestId,
    task: SearchTask,
) -> Result<()> {
    shared
        .bus
        .publish(BusMessage::SearchDispatched {
            user_id: user_id.clone(),
            request_id: request_id.clone(),
            kind: task.kind,
            query: task.query.clone(),
            offset: task.offset,
        })
        .await;

    let page_size = shared.orchestrator.rules().page_size;
    let page = match shared.search.search(&task.query, task.offset, page_size).await {
        Ok(page) => page,
        Err(err) => {
            // Still complete the search so the conversation is not stuck.
            tracing::warn!(
                user_id = %user_id,
                request_id = %request_id,
                query = %task.query,
                error = %err,
                "job search failed"
            );
            shared
                .bus
                .publish(BusMessage::TaskFailed {
                    user_id: user_id.clone(),
                    error: err.to_string(),
                })
                .await;
            JobPage::empty(task.query.clone(), task.offset)
        }
    };

    let outcome = match task.kind {
        SearchKind::NewQuery => {
            shared
                .orchestrator
                .complete_search(&user_id, &request_id, &task.query, task.offset)
                .await?
        }
        SearchKind::NextPage => {
            shared
                .orchestrator
                .complete_pagination(&user_id, &request_id, task.offset)
                .await?
        }
    };

    match outcome {
        CompletionOutcome::Applied(_) => {
            shared.messenger.send_results(&user_id, &page).await?;
            shared
                .bus
                .publish(BusMessage::ResultsDelivered {
                    user_id,
                    request_id,
                    count: page.listings.len(),
                })
                .await;
        }
        CompletionOutcome::Stale => {
            shared
                .bus
                .publish(BusMessage::StaleResultDiscarded {
                    user_id,
                    request_id,
                })
                .await;
        }
        CompletionOutcome::Lapsed => {
            tracing::debug!(user_id = %user_id, request_id = %request_id, "session lapsed before results");
        }
    }

    Ok(())
}

/// Periodically drop expired store entries and idle per-user locks.
pub fn spawn_purge_task(
    orchestrator: Arc<ConversationOrchestrator>,
    rate_limiter: RateLimiter,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(err) = orchestrator.purge_expired().await {
                tracing::warn!(error = %err, "purge failed");
            }
            let pruned = rate_limiter.prune().await;
            if pruned > 0 {
                tracing::debug!(pruned, "pruned idle rate limit buckets");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobhive_bus::{EventBus, Topic};
    use jobhive_core::{ConversationConfig, RateLimitConfig};
    use jobhive_memory::InMemoryStore;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingMessenger {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Messenger for RecordingMessenger {
        async fn send_welcome(&self, _user_id: &UserId) -> Result<()> {
            self.sent.lock().await.push("welcome".into());
            Ok(())
        }

        async fn send_prompt(&self, _user_id: &UserId) -> Result<()> {
            self.sent.lock().await.push("prompt".into());
            Ok(())
        }

        async fn send_results(&self, _user_id: &UserId, page: &JobPage) -> Result<()> {
            self.sent.lock().await.push(format!("results:{}", page.query));
            Ok(())
        }
    }

    struct EchoSearch;

    #[async_trait]
    impl JobSearch for EchoSearch {
        async fn search(&self, query: &str, offset: u32, _limit: u32) -> Result<JobPage> {
            Ok(JobPage::empty(query, offset))
        }
    }

    fn make_gateway(
        rate_limit: RateLimitConfig,
    ) -> (Gateway, Arc<RecordingMessenger>, EventBus) {
        let config = ConversationConfig::default();
        let orchestrator = Arc::new(ConversationOrchestrator::new(
            Arc::new(InMemoryStore::new()),
            &config,
        ));
        let messenger = Arc::new(RecordingMessenger::default());
        let bus = EventBus::new(16);
        let gateway = Gateway::new(
            orchestrator,
            Arc::new(EchoSearch),
            messenger.clone(),
            bus.publisher(),
            RateLimiter::new(rate_limit),
            DebounceCoordinator::new(config.debounce_delay()),
        );
        (gateway, messenger, bus)
    }

    #[tokio::test(start_paused = true)]
    async fn first_message_sends_welcome_and_publishes() {
        let (gateway, messenger, bus) = make_gateway(RateLimitConfig::default());
        let mut accepted = bus.subscribe(Topic::MessageAccepted).await;
        let mut welcomed = bus.subscribe(Topic::WelcomeSent).await;

        let inbound = InboundMessage::whatsapp("33600000001@s.whatsapp.net", "Bonjour", None);
        let decision = gateway.handle_inbound(inbound).await.unwrap();

        assert!(decision.should_send_welcome);
        assert_eq!(*messenger.sent.lock().await, vec!["welcome".to_string()]);
        assert!(matches!(
            accepted.try_recv().unwrap(),
            BusMessage::MessageAccepted { .. }
        ));
        assert!(matches!(
            welcomed.try_recv().unwrap(),
            BusMessage::WelcomeSent { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_message_fails_fast() {
        let (gateway, _, _) = make_gateway(RateLimitConfig {
            requests_per_minute: 1,
            burst: 1,
        });
        let jid = "33600000001@s.whatsapp.net";

        gateway
            .handle_inbound(InboundMessage::whatsapp(jid, "Bonjour", None))
            .await
            .unwrap();
        let err = gateway
            .handle_inbound(InboundMessage::whatsapp(jid, "Comptable", None))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    #[tokio::test(start_paused = true)]
    async fn search_waits_for_debounce_window() {
        let (gateway, messenger, _) = make_gateway(RateLimitConfig::default());
        let jid = "33600000001@s.whatsapp.net";

        gateway
            .handle_inbound(InboundMessage::whatsapp(jid, "Bonjour", None))
            .await
            .unwrap();
        let decision = gateway
            .handle_inbound(InboundMessage::whatsapp(jid, "Comptable", None))
            .await
            .unwrap();
        assert!(decision.should_search);
        assert_eq!(gateway.pending_searches(), 1);
        assert_eq!(messenger.sent.lock().await.len(), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(gateway.pending_searches(), 0);
        assert_eq!(
            messenger.sent.lock().await.last().map(String::as_str),
            Some("results:Comptable")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_searches() {
        let (gateway, messenger, _) = make_gateway(RateLimitConfig::default());
        let jid = "33600000001@s.whatsapp.net";
        gateway
            .handle_inbound(InboundMessage::whatsapp(jid, "Bonjour", None))
            .await
            .unwrap();
        gateway
            .handle_inbound(InboundMessage::whatsapp(jid, "Comptable", None))
            .await
            .unwrap();

        assert_eq!(gateway.shutdown(), 1);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(messenger.sent.lock().await.len(), 1);
    }

    #[test]
    fn search_task_follows_decision_flags() {
        let decision = ConversationDecision {
            user_id: UserId::new("1"),
            session_id: "s".into(),
            state: ConversationState::Browsing,
            is_new_session: false,
            should_send_welcome: false,
            should_search: false,
            search_query: Some("Comptable".into()),
            should_paginate: true,
            pagination_offset: Some(10),
            request_id: Some(RequestId("r".into())),
            effects: vec![],
        };
        let task = SearchTask::from_decision(&decision).unwrap();
        assert_eq!(task.kind, SearchKind::NextPage);
        assert_eq!(task.offset, 10);
    }
}
