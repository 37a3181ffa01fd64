//! Conversation state machine.
//!
//! A pure transition function over a persisted [`ConversationContext`]. It
//! performs no I/O: the orchestrator loads the context, applies one event,
//! persists the result and hands the returned [`Effect`]s to the caller.

mod effect;
mod event;
mod state;
mod transition;

pub use effect::Effect;
pub use event::ConversationEvent;
pub use state::{ConversationContext, ConversationState};
pub use transition::{transition, Transition, TransitionRules, DEFAULT_PAGE_SIZE};
