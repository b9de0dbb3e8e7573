//! Codex CLI capture strategy

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{ConversationTurn, ScreenSnapshot};

use super::{extract_prompted_turns, ProviderOps};

static CHROME: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?m)^.*OpenAI Codex.*$").expect("pattern compiles"),
        Regex::new(r"(?m)^\s*(model|approval|sandbox|directory):\s+\S.*$")
            .expect("pattern compiles"),
        Regex::new(r"(?mi)^.*ctrl\+c to exit.*$").expect("pattern compiles"),
        Regex::new(r"(?m)^\s*tokens used:?\s+[\d,]+.*$").expect("pattern compiles"),
        Regex::new(r"(?m)^\s*[─━═]{3,}\s*$").expect("pattern compiles"),
    ]
});

static CHROME_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)ctrl\+c to exit|^tokens used|^(model|approval|sandbox|directory):|^[─━═]{3,}$")
        .expect("pattern compiles")
});

pub struct CodexProvider;

impl ProviderOps for CodexProvider {
    fn id(&self) -> &'static str {
        "codex"
    }

    fn prompt_markers(&self) -> &[&'static str] {
        &["\n▌", "\n> ", "Ctrl+C to exit"]
    }

    fn chrome_patterns(&self) -> &[Regex] {
        &CHROME
    }

    fn extract_turns(&self, snapshot: &ScreenSnapshot) -> Vec<ConversationTurn> {
        extract_prompted_turns(
            snapshot,
            self.id(),
            &["▌ ", "> ", "You: "],
            |line| CHROME_LINE.is_match(line),
            0.75,
            0.7,
        )
    }
}
