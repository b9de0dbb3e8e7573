//! Gemini CLI capture strategy

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{ConversationTurn, ScreenSnapshot};

use super::{extract_prompted_turns, ProviderOps};

static CHROME: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?m)^.*(Gemini CLI|GEMINI).*$").expect("pattern compiles"),
        Regex::new(r"(?m)^\s*Tips for getting started.*$").expect("pattern compiles"),
        Regex::new(r"(?mi)^.*(press esc|ctrl\+c) .*$").expect("pattern compiles"),
        Regex::new(r"(?m)^\s*[─━═]{3,}\s*$").expect("pattern compiles"),
        Regex::new(r"(?m)^\s*\(.*context left\)\s*$").expect("pattern compiles"),
    ]
});

static CHROME_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)press esc|ctrl\+c|context left|tips for getting started|^[─━═]{3,}$")
        .expect("pattern compiles")
});

pub struct GeminiProvider;

impl ProviderOps for GeminiProvider {
    fn id(&self) -> &'static str {
        "gemini"
    }

    fn prompt_markers(&self) -> &[&'static str] {
        &["\n> ", "Type your message"]
    }

    fn chrome_patterns(&self) -> &[Regex] {
        &CHROME
    }

    fn extract_turns(&self, snapshot: &ScreenSnapshot) -> Vec<ConversationTurn> {
        extract_prompted_turns(
            snapshot,
            self.id(),
            &["> ", "Question: "],
            |line| CHROME_LINE.is_match(line),
            0.75,
            0.7,
        )
    }
}
