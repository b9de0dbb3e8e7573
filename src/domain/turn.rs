use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a turn in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// The human operator typing into the terminal
    User,
    /// The AI CLI tool responding
    Assistant,
    /// Unattributed content (e.g., reconstructed from a snapshot diff)
    System,
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnRole::User => write!(f, "user"),
            TurnRole::Assistant => write!(f, "assistant"),
            TurnRole::System => write!(f, "system"),
        }
    }
}

/// How a turn's content was obtained from the byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMethod {
    /// Cleaned from keystrokes written to the PTY
    PtyInput,
    /// Cleaned from line-buffered PTY output
    PtyOutput,
    /// Reconstructed from a full-screen snapshot
    TuiSnapshot,
    /// Seeded from an external process-detection signal
    ProcessDetection,
}

/// One attributed, cleaned message in a conversation.
///
/// Turns are append-only: once pushed onto a [`Conversation`](super::Conversation)
/// they are never mutated. Raw content is retained alongside the cleaned text
/// so low-confidence parses lose nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Who produced this turn
    pub role: TurnRole,

    /// Cleaned content (ANSI/control stripped, whitespace normalized)
    pub content: String,

    /// Original uncleaned bytes, kept when cleaning was lossy
    pub raw_content: Option<String>,

    /// When the turn was captured
    pub timestamp: DateTime<Utc>,

    /// Provider this turn belongs to (e.g., "claude", "codex")
    pub provider: String,

    /// How the content was obtained
    pub capture_method: CaptureMethod,

    /// Heuristic trust in the cleaned content, in [0, 1]
    pub parse_confidence: f64,
}

impl ConversationTurn {
    /// Create a new turn
    pub fn new(role: TurnRole, content: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            raw_content: None,
            timestamp: Utc::now(),
            provider: provider.into(),
            capture_method: CaptureMethod::PtyOutput,
            parse_confidence: 1.0,
        }
    }

    /// Attach the raw uncleaned content
    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw_content = Some(raw.into());
        self
    }

    /// Set the capture method
    pub fn via(mut self, method: CaptureMethod) -> Self {
        self.capture_method = method;
        self
    }

    /// Set the parse confidence, clamped to [0, 1]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.parse_confidence = confidence.clamp(0.0, 1.0);
        self
    }
}
