pub mod active_token;
pub mod config;
pub mod debounce;
pub mod error;
pub mod freshness;
pub mod orchestrator;
pub mod session;
pub mod state_machine;
pub mod user_lock;

pub use active_token::*;
pub use config::*;
pub use debounce::*;
pub use error::*;
pub use freshness::*;
pub use orchestrator::*;
pub use session::*;
pub use state_machine::{
    transition, ConversationContext, ConversationEvent, ConversationState, Effect, Transition,
    TransitionRules,
};
pub use user_lock::*;
