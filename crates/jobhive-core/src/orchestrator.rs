use std::sync::Arc;

use chrono::Utc;
use jobhive_memory::KeyValueStore;
use jobhive_schema::{RequestId, UserId};

use crate::active_token::ActiveSessionToken;
use crate::config::ConversationConfig;
use crate::error::{ConversationError, Result};
use crate::freshness::{is_latest, RequestIdGenerator};
use crate::session::SessionRepository;
use crate::state_machine::{
    transition, ConversationContext, ConversationEvent, ConversationState, Effect, Transition,
    TransitionRules,
};
use crate::user_lock::UserLockManager;

/// What the caller should do in response to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationDecision {
    pub user_id: UserId,
    pub session_id: String,
    pub state: ConversationState,
    pub is_new_session: bool,
    pub should_send_welcome: bool,
    pub should_search: bool,
    pub search_query: Option<String>,
    pub should_paginate: bool,
    pub pagination_offset: Option<u32>,
    /// Set whenever a search or page fetch was requested; completions must
    /// present it back for the freshness check.
    pub request_id: Option<RequestId>,
    pub effects: Vec<Effect>,
}

impl ConversationDecision {
    fn from_transition(
        transition: &Transition,
        is_new_session: bool,
        request_id: Option<RequestId>,
    ) -> Self {
        let mut decision = Self {
            user_id: transition.context.user_id.clone(),
            session_id: transition.context.session_id.clone(),
            state: transition.state(),
            is_new_session,
            should_send_welcome: false,
            should_search: false,
            search_query: None,
            should_paginate: false,
            pagination_offset: None,
            request_id,
            effects: transition.effects.clone(),
        };

        for effect in &transition.effects {
            match effect {
                Effect::SendWelcome => decision.should_send_welcome = true,
                Effect::AskForJobTitle => {}
                Effect::StartSearch { query, .. } => {
                    decision.should_search = true;
                    decision.search_query = Some(query.clone());
                }
                Effect::FetchNextPage { query, offset } => {
                    decision.should_paginate = true;
                    decision.search_query = Some(query.clone());
                    decision.pagination_offset = Some(*offset);
                }
            }
        }

        decision
    }

    pub fn asks_for_job_title(&self) -> bool {
        self.effects.contains(&Effect::AskForJobTitle)
    }
}

/// Result of reporting a finished search or page fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Recorded; the conversation is now in the given state.
    Applied(ConversationState),
    /// A newer request superseded this one. Its results must be dropped.
    Stale,
    /// The session expired (or was cleared) while the work was running.
    Lapsed,
}

impl CompletionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, CompletionOutcome::Applied(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub expired_entries: usize,
    pub idle_locks: usize,
}

/// Stateless façade over the session store: every call reloads the user's
/// context, so several processes can share one store.
pub struct ConversationOrchestrator {
    store: Arc<dyn KeyValueStore>,
    sessions: SessionRepository,
    token: ActiveSessionToken,
    rules: TransitionRules,
    ids: RequestIdGenerator,
    locks: UserLockManager,
}

impl ConversationOrchestrator {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &ConversationConfig) -> Self {
        let ttl = config.session_ttl();
        Self {
            sessions: SessionRepository::new(Arc::clone(&store), ttl),
            token: ActiveSessionToken::new(Arc::clone(&store), ttl),
            rules: config.rules(),
            ids: RequestIdGenerator::new(),
            locks: UserLockManager::new(),
            store,
        }
    }

    pub fn rules(&self) -> &TransitionRules {
        &self.rules
    }

    pub async fn handle_message(&self, user_id: &UserId, text: &str) -> Result<ConversationDecision> {
        let _guard = self.locks.acquire(user_id).await?;
        let now = Utc::now();

        let was_active = self
            .token
            .touch(user_id)
            .await
            .map_err(ConversationError::store)?;

        let stored = if was_active {
            let stored = self
                .sessions
                .load(user_id)
                .await
                .map_err(ConversationError::store)?;
            if stored.is_none() {
                tracing::warn!(
                    user_id = %user_id,
                    "active session without stored context, starting over"
                );
            }
            stored
        } else {
            None
        };
        let is_new_session = stored.is_none();
        let context =
            stored.unwrap_or_else(|| ConversationContext::new(user_id.clone(), now));

        if is_new_session {
            tracing::info!(
                user_id = %user_id,
                session_id = %context.session_id,
                "conversation session started"
            );
        }

        let event = ConversationEvent::UserMessage {
            text: text.to_string(),
            at: now,
        };
        let mut result = transition(&self.rules, &context, &event);

        let request_id = if result.effects.iter().any(Effect::triggers_search) {
            let id = self.ids.next_id();
            result.context.latest_request_id = Some(id.clone());
            Some(id)
        } else {
            None
        };

        self.sessions
            .save(&result.context)
            .await
            .map_err(ConversationError::store)?;

        tracing::debug!(
            user_id = %user_id,
            from = %context.current_state,
            to = %result.state(),
            effects = result.effects.len(),
            request_id = request_id.as_ref().map(|id| id.as_str()).unwrap_or("-"),
            "message handled"
        );

        Ok(ConversationDecision::from_transition(
            &result,
            is_new_session,
            request_id,
        ))
    }

    pub async fn mark_welcome_sent(&self, user_id: &UserId) -> Result<Option<ConversationContext>> {
        self.record(user_id, ConversationEvent::WelcomeSent { at: Utc::now() })
            .await
    }

    pub async fn mark_search_completed(
        &self,
        user_id: &UserId,
        query: &str,
        offset: u32,
    ) -> Result<Option<ConversationContext>> {
        let event = ConversationEvent::SearchCompleted {
            query: query.to_string(),
            offset,
            at: Utc::now(),
        };
        self.record(user_id, event).await
    }

    pub async fn mark_pagination_requested(
        &self,
        user_id: &UserId,
        offset: u32,
    ) -> Result<Option<ConversationContext>> {
        let event = ConversationEvent::PaginationRequested {
            offset,
            at: Utc::now(),
        };
        self.record(user_id, event).await
    }

    /// Freshness check and `SEARCH_COMPLETED` in one locked step, so no newer
    /// request can be stamped between the two.
    pub async fn complete_search(
        &self,
        user_id: &UserId,
        request_id: &RequestId,
        query: &str,
        offset: u32,
    ) -> Result<CompletionOutcome> {
        let event = ConversationEvent::SearchCompleted {
            query: query.to_string(),
            offset,
            at: Utc::now(),
        };
        self.complete(user_id, request_id, event).await
    }

    pub async fn complete_pagination(
        &self,
        user_id: &UserId,
        request_id: &RequestId,
        offset: u32,
    ) -> Result<CompletionOutcome> {
        let event = ConversationEvent::PaginationRequested {
            offset,
            at: Utc::now(),
        };
        self.complete(user_id, request_id, event).await
    }

    /// Issue a new request id and make it the user's latest, superseding any
    /// search still in flight.
    pub async fn generate_and_store_request_id(&self, user_id: &UserId) -> Result<RequestId> {
        let _guard = self.locks.acquire(user_id).await?;
        let id = self.ids.next_id();

        match self.load_live(user_id).await? {
            Some(mut context) => {
                context.latest_request_id = Some(id.clone());
                self.sessions
                    .save(&context)
                    .await
                    .map_err(ConversationError::store)?;
            }
            None => {
                tracing::debug!(user_id = %user_id, request_id = %id, "no live session to stamp request id into");
            }
        }

        Ok(id)
    }

    pub async fn is_latest_request(&self, user_id: &UserId, request_id: &RequestId) -> Result<bool> {
        let context = self.load_live(user_id).await?;
        Ok(is_latest(
            request_id,
            context
                .as_ref()
                .and_then(|context| context.latest_request_id.as_ref()),
        ))
    }

    pub async fn get_current_state(&self, user_id: &UserId) -> Result<Option<ConversationState>> {
        Ok(self
            .load_live(user_id)
            .await?
            .map(|context| context.current_state))
    }

    pub async fn get_session_id(&self, user_id: &UserId) -> Result<Option<String>> {
        Ok(self
            .load_live(user_id)
            .await?
            .map(|context| context.session_id))
    }

    /// The stored context, or `None` if there is none or the session lapsed.
    pub async fn get_context(&self, user_id: &UserId) -> Result<Option<ConversationContext>> {
        self.load_live(user_id).await
    }

    /// Remove both the context and the liveness token. Returns whether
    /// anything was removed.
    pub async fn clear_session(&self, user_id: &UserId) -> Result<bool> {
        let _guard = self.locks.acquire(user_id).await?;
        let had_context = self
            .sessions
            .delete(user_id)
            .await
            .map_err(ConversationError::store)?;
        let had_token = self
            .token
            .revoke(user_id)
            .await
            .map_err(ConversationError::store)?;
        tracing::info!(user_id = %user_id, "conversation session cleared");
        Ok(had_context || had_token)
    }

    /// Apply `TIMEOUT` now instead of waiting for the TTL. The next message
    /// starts a new session with a new welcome.
    pub async fn expire_session(&self, user_id: &UserId) -> Result<Option<ConversationContext>> {
        let _guard = self.locks.acquire(user_id).await?;
        let Some(context) = self
            .sessions
            .load(user_id)
            .await
            .map_err(ConversationError::store)?
        else {
            self.token
                .revoke(user_id)
                .await
                .map_err(ConversationError::store)?;
            return Ok(None);
        };

        let result = transition(
            &self.rules,
            &context,
            &ConversationEvent::Timeout { at: Utc::now() },
        );
        self.sessions
            .save(&result.context)
            .await
            .map_err(ConversationError::store)?;
        self.token
            .revoke(user_id)
            .await
            .map_err(ConversationError::store)?;

        tracing::info!(
            user_id = %user_id,
            session_id = %context.session_id,
            from = %context.current_state,
            "conversation session expired"
        );
        Ok(Some(result.context))
    }

    /// Drop expired store entries and lock slots nobody is using.
    pub async fn purge_expired(&self) -> Result<PurgeStats> {
        let expired_entries = self
            .store
            .purge_expired()
            .await
            .map_err(ConversationError::store)?;
        let idle_locks = self.locks.cleanup_unused().await;
        tracing::info!(expired_entries, idle_locks, "purged expired state");
        Ok(PurgeStats {
            expired_entries,
            idle_locks,
        })
    }

    /// Context, but only while the token says the session is alive.
    async fn load_live(&self, user_id: &UserId) -> Result<Option<ConversationContext>> {
        let active = self
            .token
            .is_active(user_id)
            .await
            .map_err(ConversationError::store)?;
        if !active {
            return Ok(None);
        }
        self.sessions
            .load(user_id)
            .await
            .map_err(ConversationError::store)
    }

    async fn record(
        &self,
        user_id: &UserId,
        event: ConversationEvent,
    ) -> Result<Option<ConversationContext>> {
        let _guard = self.locks.acquire(user_id).await?;
        let Some(context) = self.load_live(user_id).await? else {
            tracing::debug!(user_id = %user_id, event = event.name(), "no live session, event dropped");
            return Ok(None);
        };
        Ok(Some(self.apply(context, &event).await?.context))
    }

    async fn complete(
        &self,
        user_id: &UserId,
        request_id: &RequestId,
        event: ConversationEvent,
    ) -> Result<CompletionOutcome> {
        let _guard = self.locks.acquire(user_id).await?;
        let Some(context) = self.load_live(user_id).await? else {
            tracing::debug!(user_id = %user_id, request_id = %request_id, "completion for lapsed session");
            return Ok(CompletionOutcome::Lapsed);
        };

        if !is_latest(request_id, context.latest_request_id.as_ref()) {
            tracing::info!(
                user_id = %user_id,
                request_id = %request_id,
                latest = context
                    .latest_request_id
                    .as_ref()
                    .map(|id| id.as_str())
                    .unwrap_or("-"),
                "discarding stale completion"
            );
            return Ok(CompletionOutcome::Stale);
        }

        let result = self.apply(context, &event).await?;
        Ok(CompletionOutcome::Applied(result.state()))
    }

    async fn apply(
        &self,
        context: ConversationContext,
        event: &ConversationEvent,
    ) -> Result<Transition> {
        let result = transition(&self.rules, &context, event);
        if !result.applied {
            tracing::debug!(
                user_id = %context.user_id,
                state = %context.current_state,
                event = event.name(),
                "event has no edge from current state"
            );
            return Ok(result);
        }

        self.sessions
            .save(&result.context)
            .await
            .map_err(ConversationError::store)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobhive_memory::InMemoryStore;

    fn orchestrator() -> ConversationOrchestrator {
        ConversationOrchestrator::new(
            Arc::new(InMemoryStore::new()),
            &ConversationConfig::default(),
        )
    }

    #[tokio::test]
    async fn first_message_opens_session_and_welcomes() {
        let orch = orchestrator();
        let user = UserId::new("33600000001");

        let decision = orch.handle_message(&user, "Bonjour").await.unwrap();
        assert!(decision.is_new_session);
        assert!(decision.should_send_welcome);
        assert!(!decision.should_search);
        assert_eq!(decision.state, ConversationState::Welcomed);
        assert!(decision.request_id.is_none());
        assert_eq!(
            orch.get_session_id(&user).await.unwrap(),
            Some(decision.session_id)
        );
    }

    #[tokio::test]
    async fn search_decision_carries_query_and_request_id() {
        let orch = orchestrator();
        let user = UserId::new("1");
        orch.handle_message(&user, "Salut").await.unwrap();
        orch.mark_welcome_sent(&user).await.unwrap();

        let decision = orch.handle_message(&user, "  Comptable ").await.unwrap();
        assert!(decision.should_search);
        assert_eq!(decision.search_query.as_deref(), Some("Comptable"));
        assert_eq!(decision.state, ConversationState::SearchingJobs);

        let id = decision.request_id.unwrap();
        let stored = orch.get_context(&user).await.unwrap().unwrap();
        assert_eq!(stored.latest_request_id, Some(id.clone()));
        assert!(orch.is_latest_request(&user, &id).await.unwrap());
    }

    #[tokio::test]
    async fn pagination_decision_uses_next_offset() {
        let orch = orchestrator();
        let user = UserId::new("1");
        orch.handle_message(&user, "Salut").await.unwrap();
        orch.mark_welcome_sent(&user).await.unwrap();
        let search = orch.handle_message(&user, "Comptable").await.unwrap();
        let outcome = orch
            .complete_search(&user, &search.request_id.unwrap(), "Comptable", 0)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CompletionOutcome::Applied(ConversationState::DisplayingResults)
        );

        let page = orch.handle_message(&user, "Voir plus").await.unwrap();
        assert!(page.should_paginate);
        assert_eq!(page.pagination_offset, Some(5));
        assert_eq!(page.search_query.as_deref(), Some("Comptable"));
        assert_eq!(page.state, ConversationState::Browsing);

        orch.complete_pagination(&user, &page.request_id.unwrap(), 5)
            .await
            .unwrap();
        let next = orch.handle_message(&user, "plus").await.unwrap();
        assert_eq!(next.pagination_offset, Some(10));
    }

    #[tokio::test]
    async fn completion_with_superseded_id_is_stale() {
        let orch = orchestrator();
        let user = UserId::new("1");
        orch.handle_message(&user, "Salut").await.unwrap();
        orch.mark_welcome_sent(&user).await.unwrap();
        let first = orch.handle_message(&user, "Comptable").await.unwrap();
        let newer = orch.generate_and_store_request_id(&user).await.unwrap();

        let first_id = first.request_id.unwrap();
        assert!(!orch.is_latest_request(&user, &first_id).await.unwrap());
        let outcome = orch
            .complete_search(&user, &first_id, "Comptable", 0)
            .await
            .unwrap();
        assert_eq!(outcome, CompletionOutcome::Stale);
        assert_eq!(
            orch.get_current_state(&user).await.unwrap(),
            Some(ConversationState::SearchingJobs)
        );
        assert!(orch.is_latest_request(&user, &newer).await.unwrap());
    }

    #[tokio::test]
    async fn marks_are_noops_without_session() {
        let orch = orchestrator();
        let user = UserId::new("ghost");

        assert!(orch.mark_welcome_sent(&user).await.unwrap().is_none());
        assert!(orch
            .mark_search_completed(&user, "x", 0)
            .await
            .unwrap()
            .is_none());
        assert!(orch
            .mark_pagination_requested(&user, 5)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            orch.complete_search(&user, &RequestId("r".into()), "x", 0)
                .await
                .unwrap(),
            CompletionOutcome::Lapsed
        );
        assert!(orch.get_context(&user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_session_removes_everything() {
        let orch = orchestrator();
        let user = UserId::new("1");
        orch.handle_message(&user, "Salut").await.unwrap();

        assert!(orch.clear_session(&user).await.unwrap());
        assert!(orch.get_current_state(&user).await.unwrap().is_none());
        assert!(!orch.clear_session(&user).await.unwrap());

        let decision = orch.handle_message(&user, "Re").await.unwrap();
        assert!(decision.is_new_session);
        assert!(decision.should_send_welcome);
    }

    #[tokio::test]
    async fn expire_session_resets_and_revokes() {
        let orch = orchestrator();
        let user = UserId::new("1");
        let first = orch.handle_message(&user, "Salut").await.unwrap();
        orch.mark_welcome_sent(&user).await.unwrap();

        let reset = orch.expire_session(&user).await.unwrap().unwrap();
        assert_eq!(reset.current_state, ConversationState::Idle);
        assert!(reset.welcome_sent_at.is_none());
        assert!(orch.get_context(&user).await.unwrap().is_none());

        let next = orch.handle_message(&user, "Salut").await.unwrap();
        assert!(next.is_new_session);
        assert!(next.should_send_welcome);
        assert_ne!(next.session_id, first.session_id);
    }

    #[tokio::test]
    async fn purge_reports_idle_locks() {
        let orch = orchestrator();
        orch.handle_message(&UserId::new("a"), "Salut").await.unwrap();
        orch.handle_message(&UserId::new("b"), "Salut").await.unwrap();

        let stats = orch.purge_expired().await.unwrap();
        assert_eq!(stats.expired_entries, 0);
        assert_eq!(stats.idle_locks, 2);
    }
}
