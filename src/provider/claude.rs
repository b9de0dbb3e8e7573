//! Claude Code capture strategy

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{ConversationTurn, ScreenSnapshot};

use super::{extract_prompted_turns, ProviderOps};

/// Welcome banner, box-drawing frames, status/footer lines
static CHROME: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?m)^.*Welcome to Claude Code.*$").expect("pattern compiles"),
        Regex::new(r"(?m)^[╭╰│─╮╯┌└├┤┬┴┼═║╔╚╗╝\s]+$").expect("pattern compiles"),
        Regex::new(r"(?mi)^.*esc to interrupt.*$").expect("pattern compiles"),
        Regex::new(r"(?m)^\s*[·✻✽✶✳✢]\s+\S.*$").expect("pattern compiles"),
        Regex::new(r"(?m)^\s*\? for shortcuts.*$").expect("pattern compiles"),
        Regex::new(r"(?m)^\s*[─━═]{3,}\s*$").expect("pattern compiles"),
    ]
});

static CHROME_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)esc to interrupt|\? for shortcuts|^[╭╰│─╮╯\s·✻✽✶✳✢]+$|^[─━═]{3,}$")
        .expect("pattern compiles")
});

pub struct ClaudeProvider;

impl ProviderOps for ClaudeProvider {
    fn id(&self) -> &'static str {
        "claude"
    }

    fn prompt_markers(&self) -> &[&'static str] {
        // The input box reappears as "│ > " (framed) or a bare "> " line
        &["│ > ", "\n> ", "❯ "]
    }

    fn chrome_patterns(&self) -> &[Regex] {
        &CHROME
    }

    fn extract_turns(&self, snapshot: &ScreenSnapshot) -> Vec<ConversationTurn> {
        extract_prompted_turns(
            snapshot,
            self.id(),
            &["> ", "❯ "],
            |line| CHROME_LINE.is_match(line),
            0.8,
            0.75,
        )
    }
}
