//! Restore-context construction for interrupted sessions.
//!
//! Reads persisted conversation files independently of any live session: a
//! crashed coordinator leaves an incomplete record on disk, and this module
//! turns it into a summary plus a prompt that re-seeds the next session.

use std::path::PathBuf;

use chrono::Utc;
use thiserror::Error;

use crate::domain::{Conversation, RestoreContext, TurnRole};
use crate::logger::persist;

/// Failures while manipulating persisted sessions
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("conversation {0} not found")]
    NotFound(String),

    #[error("failed to serialize conversation: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to rewrite {path}: {source}")]
    Rewrite {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Per-turn truncation in the full transcript
const TRANSCRIPT_TURN_LIMIT: usize = 1000;

/// Builds restore contexts and finds recoverable sessions on disk
pub struct ContextBuilder {
    data_dir: PathBuf,
}

impl ContextBuilder {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    /// Derive a restore context from a conversation. Returns `None` for
    /// conversations with no turns: there is nothing to restore.
    pub fn build_restore_context(&self, conversation: &Conversation) -> Option<RestoreContext> {
        if conversation.turns.is_empty() {
            return None;
        }

        let exchanges = conversation
            .turns
            .iter()
            .filter(|t| t.role == TurnRole::User)
            .count();
        let dir_name = conversation
            .metadata
            .as_ref()
            .and_then(|m| m.working_directory.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let mut summary = format!(
            "{} session, {} exchange{}, {} in {}",
            conversation.provider,
            exchanges,
            if exchanges == 1 { "" } else { "s" },
            humanize(conversation.duration()),
            dir_name,
        );
        if !conversation.complete {
            summary.push_str(" (interrupted)");
        }

        let last_user = conversation.last_user_turn().map(|t| t.content.clone());
        let last_assistant = conversation.last_assistant_turn().map(|t| t.content.clone());

        let restore_prompt = conversation.restore_prompt.clone().unwrap_or_else(|| {
            match &last_user {
                Some(message) => format!(
                    "Continue our previous session. My last message was: \"{}\"",
                    truncate(message, 200)
                ),
                None => "Continue our previous session.".to_string(),
            }
        });

        let mut transcript = String::new();
        for turn in &conversation.turns {
            transcript.push_str(&format!(
                "[{}] {}\n",
                turn.role,
                truncate(&turn.content, TRANSCRIPT_TURN_LIMIT)
            ));
        }

        Some(RestoreContext {
            conversation_id: conversation.conversation_id.clone(),
            summary,
            restore_prompt,
            full_transcript: transcript,
            last_user_message: last_user,
            last_assistant_message: last_assistant,
        })
    }

    /// Interrupted sessions worth offering for restore: incomplete, with at
    /// least one turn, most recent activity first.
    pub fn get_recoverable_sessions(&self) -> Vec<Conversation> {
        let mut sessions: Vec<Conversation> = persist::scan_conversations(&self.data_dir, None)
            .into_iter()
            .map(|(_, c)| c)
            .filter(|c| !c.complete && !c.turns.is_empty())
            .collect();
        sessions.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
        sessions
    }

    /// Mark an interrupted conversation as restored: flips it to complete,
    /// stamps the end time, and rewrites the file in place.
    pub fn mark_as_restored(&self, id: &str) -> Result<(), RecoveryError> {
        let Some((path, mut conversation)) = persist::find_by_id(&self.data_dir, id) else {
            return Err(RecoveryError::NotFound(id.to_string()));
        };
        if conversation.complete {
            return Ok(());
        }
        conversation.complete = true;
        conversation.end_time = Some(Utc::now().max(conversation.start_time));
        let json = serde_json::to_string_pretty(&conversation)?;
        std::fs::write(&path, json).map_err(|source| RecoveryError::Rewrite { path, source })?;
        Ok(())
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let cut: String = text.chars().take(limit).collect();
    format!("{}…", cut)
}

fn humanize(duration: chrono::Duration) -> String {
    let secs = duration.num_seconds().max(0);
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}
