//! Command-line detection: recognizing an AI-tool invocation in typed input.
//!
//! The classifier itself is an external collaborator; this module pins down
//! its interface and ships a regex heuristic good enough to drive the
//! pipeline. Detection is pure: text in, classification out.

use once_cell::sync::Lazy;
use regex::Regex;

/// Result of classifying a typed command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedCommand {
    /// Provider the command launches (e.g., "claude")
    pub provider: String,
    /// Command classification (e.g., "interactive", "oneshot")
    pub command_type: String,
    /// Whether the tool runs a full-screen TUI (drives snapshot capture mode)
    pub tui_mode: bool,
    /// The cleaned command text that triggered detection
    pub command: String,
}

/// Classifies command lines; implementations must be pure functions
pub trait CommandDetector: Send + Sync {
    fn detect(&self, text: &str) -> Option<DetectedCommand>;
}

/// Leading invocation of a known AI CLI binary
static AI_COMMAND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|&&\s*|;\s*|\|\s*)(claude|codex|gemini|aider|cursor-agent)\b(.*)$")
        .expect("pattern compiles")
});

/// Default heuristic detector over known provider binaries
#[derive(Default)]
pub struct DefaultCommandDetector;

impl CommandDetector for DefaultCommandDetector {
    fn detect(&self, text: &str) -> Option<DetectedCommand> {
        let line = text.trim();
        let captures = AI_COMMAND.captures(line)?;
        let binary = captures.get(1)?.as_str();
        let args = captures.get(2).map(|m| m.as_str().trim()).unwrap_or("");

        let provider = match binary {
            "claude" | "cursor-agent" => "claude",
            "codex" => "codex",
            "gemini" => "gemini",
            other => other,
        };

        // Flag-style invocations with -p/--print run once and exit; a bare
        // invocation opens the interactive TUI.
        let oneshot = args.split_whitespace().any(|a| a == "-p" || a == "--print")
            || args.contains("exec");
        let (command_type, tui_mode) = if oneshot {
            ("oneshot", false)
        } else {
            ("interactive", true)
        };

        Some(DetectedCommand {
            provider: provider.to_string(),
            command_type: command_type.to_string(),
            tui_mode,
            command: line.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_bare_claude_as_interactive_tui() {
        let detector = DefaultCommandDetector;
        let detected = detector.detect("claude").unwrap();
        assert_eq!(detected.provider, "claude");
        assert_eq!(detected.command_type, "interactive");
        assert!(detected.tui_mode);
    }

    #[test]
    fn detects_print_mode_as_oneshot() {
        let detector = DefaultCommandDetector;
        let detected = detector.detect("claude -p \"explain this\"").unwrap();
        assert_eq!(detected.command_type, "oneshot");
        assert!(!detected.tui_mode);
    }

    #[test]
    fn detects_after_shell_chaining() {
        let detector = DefaultCommandDetector;
        let detected = detector.detect("cd repo && codex").unwrap();
        assert_eq!(detected.provider, "codex");
    }

    #[test]
    fn ignores_ordinary_commands() {
        let detector = DefaultCommandDetector;
        assert!(detector.detect("git status").is_none());
        assert!(detector.detect("ls -la").is_none());
    }
}
