use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ConversationTurn, TurnRole};

/// Hard upper bound on turns per conversation. Reaching it ends the
/// conversation instead of appending.
pub const MAX_TURNS: usize = 500;

/// A captured full-screen buffer state from a TUI-style AI tool.
///
/// Used when line-based turn detection is unreliable. Append-only and capped
/// per conversation; see `ConversationLog::save_screen_snapshot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenSnapshot {
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,

    /// Monotonic, 0-based position within the conversation
    pub sequence_number: u64,

    /// Raw screen bytes as captured (ANSI intact)
    pub raw_content: String,

    /// ANSI-stripped, whitespace-normalized screen text
    pub cleaned_content: String,

    /// Human-readable delta against the previous cleaned snapshot
    pub diff_from_previous: String,
}

/// Environment captured once when a conversation starts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// Working directory of the session
    pub working_directory: PathBuf,

    /// Current git branch, if the directory is a repository
    pub git_branch: Option<String>,

    /// Shell reported by the environment (e.g., "zsh")
    pub shell_type: Option<String>,
}

impl Metadata {
    /// Capture metadata for the given working directory
    pub fn capture(cwd: &Path) -> Self {
        Self {
            working_directory: cwd.to_path_buf(),
            git_branch: read_git_branch(cwd),
            shell_type: std::env::var("SHELL")
                .ok()
                .and_then(|s| s.rsplit('/').next().map(str::to_string)),
        }
    }
}

/// Read the current branch from .git/HEAD without shelling out
fn read_git_branch(cwd: &Path) -> Option<String> {
    let head = std::fs::read_to_string(cwd.join(".git").join("HEAD")).ok()?;
    head.trim()
        .strip_prefix("ref: refs/heads/")
        .map(str::to_string)
}

/// The authoritative record of one captured AI-CLI conversation.
///
/// Created when the command detector (or an external process-detection signal)
/// recognizes an AI-tool invocation; mutated only while `complete == false`;
/// frozen forever once completed. At most one active conversation exists per
/// tab at any time; that invariant is enforced by `ConversationLog`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Globally unique, time-derived identifier
    pub conversation_id: String,

    /// Tab (session) this conversation belongs to
    pub tab_id: String,

    /// Provider name (e.g., "claude", "codex", "gemini", "generic")
    pub provider: String,

    /// Classified command type from the detector (e.g., "interactive", "oneshot")
    pub command_type: String,

    /// When the conversation started
    pub start_time: DateTime<Utc>,

    /// When the conversation ended; `None` while active
    pub end_time: Option<DateTime<Utc>>,

    /// Append-only turn history
    pub turns: Vec<ConversationTurn>,

    /// Whether the conversation has ended (record is immutable once true)
    pub complete: bool,

    /// Whether low-confidence parses should trigger external notification
    pub auto_respond: bool,

    /// Environment captured once at start
    pub metadata: Option<Metadata>,

    /// Whether capture runs in whole-screen snapshot mode
    pub tui_capture_mode: bool,

    /// Capped snapshot history (TUI mode only)
    pub screen_snapshots: Vec<ScreenSnapshot>,

    /// PID of the AI tool process, when known
    pub process_pid: Option<u32>,

    /// Last user turn content, kept for crash recovery
    #[serde(default)]
    pub last_saved_turn: Option<String>,

    /// Suggested prompt for restoring an interrupted session
    #[serde(default)]
    pub restore_prompt: Option<String>,
}

impl Conversation {
    /// Create a new active conversation
    pub fn new(
        tab_id: impl Into<String>,
        provider: impl Into<String>,
        command_type: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: Self::new_id(),
            tab_id: tab_id.into(),
            provider: provider.into(),
            command_type: command_type.into(),
            start_time: Utc::now(),
            end_time: None,
            turns: Vec::new(),
            complete: false,
            auto_respond: false,
            metadata: None,
            tui_capture_mode: false,
            screen_snapshots: Vec::new(),
            process_pid: None,
            last_saved_turn: None,
            restore_prompt: None,
        }
    }

    /// Generate a time-derived, globally unique conversation ID
    pub fn new_id() -> String {
        format!(
            "conv-{}-{}",
            Utc::now().timestamp_millis(),
            &Uuid::new_v4().to_string()[..8]
        )
    }

    /// Timestamp of the most recent activity (last turn, else start)
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.turns
            .last()
            .map(|t| t.timestamp)
            .unwrap_or(self.start_time)
    }

    /// Last user turn, if any
    pub fn last_user_turn(&self) -> Option<&ConversationTurn> {
        self.turns.iter().rev().find(|t| t.role == TurnRole::User)
    }

    /// Last assistant turn, if any
    pub fn last_assistant_turn(&self) -> Option<&ConversationTurn> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == TurnRole::Assistant)
    }

    /// Elapsed time from start to end (or to now while active)
    pub fn duration(&self) -> chrono::Duration {
        self.end_time.unwrap_or_else(Utc::now) - self.start_time
    }
}
