use serde::{Deserialize, Serialize};

/// Read-only projection of a conversation used to re-seed an interrupted
/// session. Built by `recovery::ContextBuilder`; never written back to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreContext {
    /// Conversation this context was derived from
    pub conversation_id: String,

    /// One-line human-readable summary
    pub summary: String,

    /// Short prompt quoting the last user message, suitable for re-injection
    pub restore_prompt: String,

    /// Full transcript with per-turn truncation
    pub full_transcript: String,

    /// Last user message, if any
    pub last_user_message: Option<String>,

    /// Last assistant message, if any
    pub last_assistant_message: Option<String>,
}
