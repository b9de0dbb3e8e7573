//! Provider-specific capture strategies.
//!
//! All provider handling is best-effort heuristics: each AI CLI draws its own
//! prompt, chrome, and layout, and none of them document a protocol. A
//! [`ProviderOps`] strategy bundles what the pipeline needs per provider
//! (prompt-end detection, chrome removal, snapshot turn extraction) and is
//! selected once per conversation from the registry.

mod claude;
mod codex;
mod gemini;
mod generic;

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;

use crate::domain::{CaptureMethod, ConversationTurn, ScreenSnapshot, TurnRole};

pub use claude::ClaudeProvider;
pub use codex::CodexProvider;
pub use gemini::GeminiProvider;
pub use generic::GenericProvider;

/// Per-provider capture strategy
pub trait ProviderOps: Send + Sync {
    /// Provider identifier (e.g., "claude")
    fn id(&self) -> &'static str;

    /// Strings whose reappearance in the output tail signals that the
    /// response finished and the tool is waiting for input again
    fn prompt_markers(&self) -> &[&'static str];

    /// TUI chrome patterns (welcome banners, status lines, footers) removed
    /// before confidence scoring
    fn chrome_patterns(&self) -> &[Regex];

    /// Whether the tail of accumulated output shows the provider's input
    /// prompt again
    fn detect_prompt_end(&self, tail: &str) -> bool {
        self.prompt_markers().iter().any(|m| tail.contains(m))
    }

    /// Extract candidate turns from one cleaned snapshot
    fn extract_turns(&self, snapshot: &ScreenSnapshot) -> Vec<ConversationTurn>;
}

/// Registry of provider strategies, selected once per conversation.
///
/// Unknown provider names fall back to the generic strategy rather than
/// failing: capture must degrade, not stop, when a new tool shows up.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn ProviderOps>>,
    generic: Arc<dyn ProviderOps>,
}

impl ProviderRegistry {
    /// Create a registry with all built-in providers
    pub fn with_defaults() -> Self {
        let mut providers: HashMap<&'static str, Arc<dyn ProviderOps>> = HashMap::new();
        for ops in [
            Arc::new(ClaudeProvider) as Arc<dyn ProviderOps>,
            Arc::new(CodexProvider) as Arc<dyn ProviderOps>,
            Arc::new(GeminiProvider) as Arc<dyn ProviderOps>,
        ] {
            providers.insert(ops.id(), ops);
        }
        Self {
            providers,
            generic: Arc::new(GenericProvider),
        }
    }

    /// Look up a strategy by provider name, falling back to generic
    pub fn get(&self, provider: &str) -> Arc<dyn ProviderOps> {
        self.providers
            .get(provider)
            .cloned()
            .unwrap_or_else(|| self.generic.clone())
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Minimum length for an assistant-content region to count as substantial
const MIN_ASSISTANT_CONTENT: usize = 20;

/// Shared line-based extraction: find the last user-prompt marker line in the
/// snapshot, emit it as a user turn, and emit the substantial non-chrome
/// region after it as an assistant turn.
pub(crate) fn extract_prompted_turns(
    snapshot: &ScreenSnapshot,
    provider: &str,
    user_markers: &[&str],
    is_chrome_line: impl Fn(&str) -> bool,
    user_confidence: f64,
    assistant_confidence: f64,
) -> Vec<ConversationTurn> {
    let lines: Vec<&str> = snapshot.cleaned_content.lines().collect();

    let marker_at = lines.iter().rposition(|line| {
        let trimmed = line.trim_start();
        user_markers
            .iter()
            .any(|m| trimmed.starts_with(m) && trimmed.len() > m.len())
    });

    let mut turns = Vec::new();

    let Some(idx) = marker_at else {
        return turns;
    };

    let trimmed = lines[idx].trim_start();
    let marker = user_markers
        .iter()
        .find(|m| trimmed.starts_with(*m))
        .copied()
        .unwrap_or("");
    let user_text = trimmed[marker.len()..].trim().to_string();
    if !user_text.is_empty() {
        turns.push(
            ConversationTurn::new(TurnRole::User, user_text, provider)
                .via(CaptureMethod::TuiSnapshot)
                .with_confidence(user_confidence),
        );
    }

    let body: Vec<&str> = lines[idx + 1..]
        .iter()
        .map(|l| l.trim_end())
        .filter(|l| !l.is_empty() && !is_chrome_line(l))
        .collect();
    let assistant_text = body.join("\n");
    if assistant_text.len() >= MIN_ASSISTANT_CONTENT {
        turns.push(
            ConversationTurn::new(TurnRole::Assistant, assistant_text, provider)
                .via(CaptureMethod::TuiSnapshot)
                .with_confidence(assistant_confidence),
        );
    }

    turns
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(cleaned: &str) -> ScreenSnapshot {
        ScreenSnapshot {
            timestamp: Utc::now(),
            sequence_number: 0,
            raw_content: cleaned.to_string(),
            cleaned_content: cleaned.to_string(),
            diff_from_previous: String::new(),
        }
    }

    #[test]
    fn registry_falls_back_to_generic() {
        let registry = ProviderRegistry::with_defaults();
        assert_eq!(registry.get("claude").id(), "claude");
        assert_eq!(registry.get("github-copilot").id(), "generic");
    }

    #[test]
    fn extracts_user_and_assistant_from_prompt_screen() {
        let screen = "\
╭─ Claude Code ─╮
> how do I revert a commit

Use git revert with the commit hash. It creates a new commit
that undoes the changes without rewriting history.

esc to interrupt";
        let ops = ClaudeProvider;
        let turns = ops.extract_turns(&snapshot(screen));
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[0].content, "how do I revert a commit");
        assert_eq!(turns[1].role, TurnRole::Assistant);
        assert!(turns[1].content.contains("git revert"));
        assert!(!turns[1].content.contains("esc to interrupt"));
        for turn in &turns {
            assert!(turn.parse_confidence >= 0.5 && turn.parse_confidence <= 0.9);
        }
    }

    #[test]
    fn bare_prompt_line_extracts_nothing() {
        let ops = ClaudeProvider;
        assert!(ops.extract_turns(&snapshot("> \n")).is_empty());
    }

    #[test]
    fn body_lines_keep_text_but_lose_trailing_whitespace() {
        let screen = "> what does this flag do\n\
                      It tells the linker to keep unused sections,   \n\
                      which matters for link-time section GC.  \n";
        let turns = ClaudeProvider.extract_turns(&snapshot(screen));
        assert_eq!(turns.len(), 2);
        assert!(turns[1].content.contains("unused sections,\nwhich matters"));
        assert!(!turns[1].content.contains("  \n"));
    }
}
