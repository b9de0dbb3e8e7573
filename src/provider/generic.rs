//! Fallback strategy for unknown providers.
//!
//! With no knowledge of the tool's layout, the only reliable signal is the
//! snapshot diff: each non-trivial set of newly appended lines becomes an
//! unattributed system turn at low confidence.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{CaptureMethod, ConversationTurn, ScreenSnapshot, TurnRole};

use super::ProviderOps;

static CHROME: Lazy<Vec<Regex>> = Lazy::new(Vec::new);

/// Generic POSIX/PowerShell prompt shapes
const PROMPT_MARKERS: &[&str] = &["$ ", "# ", "> "];

/// Appended lines shorter than this are treated as noise
const MIN_DIFF_CONTENT: usize = 10;

pub struct GenericProvider;

impl ProviderOps for GenericProvider {
    fn id(&self) -> &'static str {
        "generic"
    }

    fn prompt_markers(&self) -> &[&'static str] {
        PROMPT_MARKERS
    }

    fn chrome_patterns(&self) -> &[Regex] {
        &CHROME
    }

    fn extract_turns(&self, snapshot: &ScreenSnapshot) -> Vec<ConversationTurn> {
        // The diff records appended non-empty lines prefixed with "+ "
        let appended: Vec<&str> = snapshot
            .diff_from_previous
            .lines()
            .filter_map(|l| l.strip_prefix("+ "))
            .filter(|l| !l.trim().is_empty())
            .collect();
        let text = appended.join("\n");
        if text.len() < MIN_DIFF_CONTENT {
            return Vec::new();
        }
        vec![
            ConversationTurn::new(TurnRole::System, text, self.id())
                .via(CaptureMethod::TuiSnapshot)
                .with_confidence(0.5),
        ]
    }
}
