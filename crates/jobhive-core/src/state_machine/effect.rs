use serde::{Deserialize, Serialize};

/// Something the caller must do after a transition. The state machine only
/// decides; sending and searching belong to other subsystems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    SendWelcome,
    AskForJobTitle,
    StartSearch { query: String, offset: u32 },
    FetchNextPage { query: String, offset: u32 },
}

impl Effect {
    /// Effects that start asynchronous downstream work and therefore need a
    /// request id for the freshness check.
    pub fn triggers_search(&self) -> bool {
        matches!(self, Effect::StartSearch { .. } | Effect::FetchNextPage { .. })
    }
}
