use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle event kinds published on the event bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LayerEventKind {
    /// A conversation started
    LlmStart,
    /// A conversation ended
    LlmEnd,
    /// A user turn was captured
    UserInput,
    /// An assistant turn was captured
    AssistantOutput,
    /// Cleaning/extraction failed for a chunk
    ParseFailure,
    /// A parse landed below the confidence threshold
    LowConfidence,
}

impl std::fmt::Display for LayerEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LayerEventKind::LlmStart => "LLM_START",
            LayerEventKind::LlmEnd => "LLM_END",
            LayerEventKind::UserInput => "USER_INPUT",
            LayerEventKind::AssistantOutput => "ASSISTANT_OUTPUT",
            LayerEventKind::ParseFailure => "PARSE_FAILURE",
            LayerEventKind::LowConfidence => "LOW_CONFIDENCE",
        };
        write!(f, "{}", s)
    }
}

/// Transient pub/sub message describing pipeline activity.
///
/// Never persisted directly; the health monitor aggregates these into
/// counters and derived status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerEvent {
    /// What happened
    pub kind: LayerEventKind,

    /// Which pipeline layer emitted the event (e.g., "conversation_log")
    pub layer: String,

    /// Tab the event belongs to
    pub tab_id: String,

    /// Conversation the event belongs to, when applicable
    pub conversation_id: Option<String>,

    /// Provider, when applicable
    pub provider: Option<String>,

    /// When the event was emitted
    pub timestamp: DateTime<Utc>,

    /// Free-form event details (e.g., {"pid": 123, "tuiCaptureMode": true})
    pub metadata: Map<String, Value>,
}

impl LayerEvent {
    /// Create a new event for the given layer
    pub fn new(kind: LayerEventKind, layer: impl Into<String>, tab_id: impl Into<String>) -> Self {
        Self {
            kind,
            layer: layer.into(),
            tab_id: tab_id.into(),
            conversation_id: None,
            provider: None,
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }

    /// Attach the conversation ID
    pub fn for_conversation(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    /// Attach the provider
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Attach a metadata entry
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
