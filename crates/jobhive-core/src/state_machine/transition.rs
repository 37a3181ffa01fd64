use super::{ConversationContext, ConversationEvent, ConversationState, Effect};

pub const DEFAULT_PAGE_SIZE: u32 = 5;

/// Tunables the transition table depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRules {
    pub page_size: u32,
    /// Lowercased, trimmed phrases that ask for the next page.
    pub pagination_keywords: Vec<String>,
}

impl Default for TransitionRules {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            pagination_keywords: vec!["voir plus".to_string(), "plus".to_string()],
        }
    }
}

impl TransitionRules {
    pub fn new(page_size: u32, pagination_keywords: &[String]) -> Self {
        Self {
            page_size,
            pagination_keywords: pagination_keywords
                .iter()
                .map(|keyword| keyword.trim().to_lowercase())
                .filter(|keyword| !keyword.is_empty())
                .collect(),
        }
    }

    pub fn is_pagination_request(&self, text: &str) -> bool {
        let normalized = text.trim().to_lowercase();
        self.pagination_keywords
            .iter()
            .any(|keyword| *keyword == normalized)
    }
}

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub context: ConversationContext,
    pub effects: Vec<Effect>,
    /// `false` when the event has no edge from the current state; the
    /// context is then returned untouched.
    pub applied: bool,
}

impl Transition {
    pub fn state(&self) -> ConversationState {
        self.context.current_state
    }

    fn applied(context: ConversationContext, effects: Vec<Effect>) -> Self {
        Self {
            context,
            effects,
            applied: true,
        }
    }

    fn ignored(context: &ConversationContext) -> Self {
        Self {
            context: context.clone(),
            effects: vec![],
            applied: false,
        }
    }
}

pub fn transition(
    rules: &TransitionRules,
    context: &ConversationContext,
    event: &ConversationEvent,
) -> Transition {
    use ConversationEvent as E;
    use ConversationState as S;

    let mut next = context.clone();
    next.last_message_at = event.at();

    match (context.current_state, event) {
        (_, E::Timeout { .. }) => {
            next.reset_to_idle();
            Transition::applied(next, vec![])
        }
        (S::Idle, E::UserMessage { .. }) => {
            if context.welcome_already_sent() {
                next.current_state = S::AwaitingJobTitle;
                Transition::applied(next, vec![Effect::AskForJobTitle])
            } else {
                next.current_state = S::Welcomed;
                Transition::applied(next, vec![Effect::SendWelcome])
            }
        }
        (S::Welcomed, E::WelcomeSent { at }) => {
            next.current_state = S::AwaitingJobTitle;
            if next.welcome_sent_at.is_none() {
                next.welcome_sent_at = Some(*at);
            }
            Transition::applied(next, vec![])
        }
        (S::Welcomed, E::UserMessage { .. }) => {
            next.current_state = S::AwaitingJobTitle;
            Transition::applied(next, vec![])
        }
        (state, E::UserMessage { text, .. }) if state.accepts_queries() => {
            query_message(rules, next, text)
        }
        (S::SearchingJobs, E::SearchCompleted { query, offset, .. }) => {
            next.current_state = S::DisplayingResults;
            next.last_query = Some(query.clone());
            next.last_offset = Some(*offset);
            Transition::applied(next, vec![])
        }
        (S::SearchingJobs, E::UserMessage { .. }) => Transition::applied(next, vec![]),
        (S::Browsing, E::PaginationRequested { offset, .. }) => {
            next.last_offset = Some(*offset);
            Transition::applied(next, vec![])
        }
        // Late confirmation of a welcome the user double-texted past.
        (state, E::WelcomeSent { at }) if state != S::Idle && !context.welcome_already_sent() => {
            next.welcome_sent_at = Some(*at);
            Transition::applied(next, vec![])
        }
        _ => Transition::ignored(context),
    }
}

fn query_message(
    rules: &TransitionRules,
    mut next: ConversationContext,
    text: &str,
) -> Transition {
    let text = text.trim();
    if text.is_empty() {
        return Transition::applied(next, vec![]);
    }

    if rules.is_pagination_request(text) {
        return match next.last_query.clone() {
            Some(query) => {
                let offset = next.last_offset.unwrap_or(0).saturating_add(rules.page_size);
                next.current_state = ConversationState::Browsing;
                Transition::applied(next, vec![Effect::FetchNextPage { query, offset }])
            }
            None => {
                next.current_state = ConversationState::AwaitingJobTitle;
                Transition::applied(next, vec![Effect::AskForJobTitle])
            }
        };
    }

    next.current_state = ConversationState::SearchingJobs;
    Transition::applied(
        next,
        vec![Effect::StartSearch {
            query: text.to_string(),
            offset: 0,
        }],
    )
}
