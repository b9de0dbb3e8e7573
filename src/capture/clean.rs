//! Raw terminal text cleaning and confidence scoring.
//!
//! Everything captured from a PTY is ANSI-laden and interleaved with control
//! bytes; these helpers turn that into readable turn content. Cleaning order
//! is fixed: backspace semantics, ANSI strip, control filter, whitespace
//! normalization, prompt trim.

use once_cell::sync::Lazy;
use regex::Regex;

/// Combined ANSI pattern: CSI, OSC, DCS, and simple two-byte escapes.
static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        \x1b\[[0-9;?=<>!]*[A-Za-z@^_`{|}~]   # CSI ... final byte
      | \x1b\][^\x07\x1b]*(?:\x07|\x1b\\)    # OSC ... BEL or ST
      | \x1bP[^\x1b]*\x1b\\                  # DCS ... ST
      | \x1b[@-Z\\-_]                        # simple escape
        ",
    )
    .expect("ANSI pattern compiles")
});

/// Runs of spaces/tabs
static SPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").expect("pattern compiles"));

/// Runs of CR/LF
static NEWLINE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\r\n]+").expect("pattern compiles"));

/// Residual artifact patterns left behind by imperfect stripping: a stray
/// escape byte, a CSI-looking `[NN..X` fragment, or a bare `?NNN` mode toggle.
static ARTIFACT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"\x1b").expect("pattern compiles"),
        Regex::new(r"\[[0-9;?]+[A-Za-z]").expect("pattern compiles"),
        Regex::new(r"\?[0-9]{2,4}").expect("pattern compiles"),
    ]
});

// Confidence scoring constants. Empirically tuned; see DESIGN.md before
// changing any of these.
const RETENTION_LOW: f64 = 0.10;
const RETENTION_CLEAN: f64 = 0.98;
const RETENTION_GOOD: f64 = 0.90;
const BASE_OVERSTRIPPED: f64 = 0.5;
const BASE_ALREADY_CLEAN: f64 = 0.85;
const BASE_GOOD: f64 = 0.9;
const BASE_DEFAULT: f64 = 0.85;
const ARTIFACT_PENALTY: f64 = 0.05;
/// Floor for non-empty input; a zero score is reserved for empty input.
const MIN_CONFIDENCE: f64 = 0.05;

/// Strip all ANSI escape sequences
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// Drop control bytes except newline, tab, and carriage return
fn strip_control(text: &str) -> String {
    text.chars()
        .filter(|&c| !c.is_control() || c == '\n' || c == '\t' || c == '\r')
        .collect()
}

/// Collapse runs of spaces/tabs to one space and runs of CR/LF to one newline
fn normalize_whitespace(text: &str) -> String {
    let text = SPACE_RUN.replace_all(text, " ");
    NEWLINE_RUN.replace_all(&text, "\n").into_owned()
}

/// Apply backspace/DEL semantics: each BS/DEL removes the immediately
/// preceding accumulated character, never underflowing.
fn apply_backspaces(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '\u{7f}' || c == '\u{8}' {
            out.pop();
        } else {
            out.push(c);
        }
    }
    out
}

/// Clean raw keystrokes into user-turn text.
///
/// Idempotent: cleaning already-clean text is a no-op. The result never
/// starts or ends with whitespace and never contains BS/DEL bytes.
pub fn clean_user_input(raw: &str) -> String {
    let text = apply_backspaces(raw);
    let text = strip_ansi(&text);
    let text = strip_control(&text);
    let text = normalize_whitespace(&text);
    text.trim_start_matches(['>', '❯', ' ']).trim().to_string()
}

/// Clean raw PTY output into assistant-turn text and score how much to trust
/// it. `chrome` holds the provider's TUI chrome patterns (banners, status
/// lines, footers) to remove before scoring.
///
/// The confidence heuristic keys off the retention ratio
/// `cleaned.len() / raw.len()`: stripping almost everything suggests the
/// chunk was mostly chrome (low trust), stripping almost nothing suggests the
/// text was already clean. Residual artifacts each subtract a fixed penalty.
/// Empty raw input scores 0.
pub fn parse_assistant_output(raw: &str, chrome: &[Regex]) -> (String, f64) {
    if raw.is_empty() {
        return (String::new(), 0.0);
    }

    let mut text = strip_ansi(raw);
    for pattern in chrome {
        text = pattern.replace_all(&text, "").into_owned();
    }
    let text = strip_control(&text);
    let cleaned = normalize_whitespace(&text).trim().to_string();

    let ratio = cleaned.len() as f64 / raw.len() as f64;
    let base = if ratio < RETENTION_LOW {
        BASE_OVERSTRIPPED
    } else if ratio > RETENTION_CLEAN {
        BASE_ALREADY_CLEAN
    } else if ratio > RETENTION_GOOD {
        BASE_GOOD
    } else {
        BASE_DEFAULT
    };

    let artifacts: usize = ARTIFACT_PATTERNS
        .iter()
        .map(|p| p.find_iter(&cleaned).count())
        .sum();

    let confidence = (base - ARTIFACT_PENALTY * artifacts as f64).clamp(MIN_CONFIDENCE, 1.0);
    (cleaned, confidence)
}

/// Count residual artifact matches in already-cleaned content. Used by the
/// health monitor's standalone file validation.
pub fn count_artifacts(text: &str) -> usize {
    ARTIFACT_PATTERNS
        .iter()
        .map(|p| p.find_iter(text).count())
        .sum()
}

/// Clean a raw screen buffer for snapshot storage: strip ANSI and control
/// bytes but keep the line structure intact.
pub fn clean_screen(raw: &str) -> String {
    let text = strip_ansi(raw);
    let text: String = text
        .chars()
        .filter(|&c| !c.is_control() || c == '\n' || c == '\t')
        .collect();
    text.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backspace_removes_preceding_char() {
        assert_eq!(clean_user_input("helllo\x7f world"), "helll world");
    }

    #[test]
    fn backspace_never_underflows() {
        assert_eq!(clean_user_input("\x7f\x7f\x08abc"), "abc");
    }

    #[test]
    fn strips_bracketed_paste_and_prompt() {
        assert_eq!(
            clean_user_input("\x1b[?2004h> hello world\r\n"),
            "hello world"
        );
    }

    #[test]
    fn clean_is_idempotent() {
        let inputs = [
            "helllo\x7f world",
            "\x1b[?2004h> hello world\r\n",
            "❯  ls -la\r",
            "plain text",
            "a\tb\t\tc",
            "multi\r\n\r\nline",
            "",
        ];
        for raw in inputs {
            let once = clean_user_input(raw);
            assert_eq!(clean_user_input(&once), once, "not idempotent for {:?}", raw);
        }
    }

    #[test]
    fn clean_never_keeps_edit_bytes_or_edge_spaces() {
        let inputs = ["  x  ", "a\x08\x7f", "\x1b[2Ahi \x7f"];
        for raw in inputs {
            let cleaned = clean_user_input(raw);
            assert!(!cleaned.contains('\u{7f}'));
            assert!(!cleaned.contains('\u{8}'));
            assert_eq!(cleaned, cleaned.trim());
        }
    }

    #[test]
    fn collapses_whitespace_runs() {
        assert_eq!(clean_user_input("a   b\t\tc"), "a b c");
        assert_eq!(clean_user_input("a\r\n\r\n\nb"), "a\nb");
    }

    #[test]
    fn osc_and_dcs_sequences_are_stripped() {
        assert_eq!(clean_user_input("\x1b]0;title\x07echo hi"), "echo hi");
        assert_eq!(clean_user_input("\x1bPsomething\x1b\\echo hi"), "echo hi");
    }

    #[test]
    fn empty_output_scores_zero() {
        let (text, confidence) = parse_assistant_output("", &[]);
        assert!(text.is_empty());
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn confidence_always_in_unit_range() {
        let inputs = [
            "plain",
            "\x1b[2J\x1b[H",
            "x\x1b[1mx\x1b[0mx",
            "[?25l[?25h[?25l[?25h[?25l[?25h[?25l[?25h[?25l[?25h",
            "a",
        ];
        for raw in inputs {
            let (_, confidence) = parse_assistant_output(raw, &[]);
            assert!((0.0..=1.0).contains(&confidence), "out of range for {:?}", raw);
            assert!(confidence > 0.0, "non-empty input scored zero: {:?}", raw);
        }
    }

    #[test]
    fn screen_clear_output_keeps_text() {
        let (text, confidence) =
            parse_assistant_output("\x1b[2J\x1b[HHello World\x1b[10;5H", &[]);
        assert!(text.contains("Hello World"));
        assert!(confidence >= 0.5);
    }

    #[test]
    fn already_clean_text_scores_already_clean_base() {
        let (text, confidence) = parse_assistant_output("The answer is 42.", &[]);
        assert_eq!(text, "The answer is 42.");
        assert!((confidence - BASE_ALREADY_CLEAN).abs() < 1e-9);
    }

    #[test]
    fn overstripped_output_scores_low_base() {
        // 2 visible bytes out of a long escape-heavy chunk
        let raw = format!("{}ok", "\x1b[2J\x1b[H\x1b[3J\x1b[?25l".repeat(4));
        let (text, confidence) = parse_assistant_output(&raw, &[]);
        assert_eq!(text, "ok");
        assert!((confidence - BASE_OVERSTRIPPED).abs() < 1e-9);
    }

    #[test]
    fn residual_artifacts_are_penalized() {
        let clean = "hello there this is some plain prose for scoring";
        let dirty = "hello there this is [12m some plain prose ?2004 for scoring";
        let (_, base) = parse_assistant_output(clean, &[]);
        let (_, penalized) = parse_assistant_output(dirty, &[]);
        assert!(penalized < base);
    }

    #[test]
    fn clean_screen_preserves_lines() {
        let raw = "\x1b[2J\x1b[Hline one   \nline two\x1b[K\n\nline four";
        assert_eq!(clean_screen(raw), "line one\nline two\n\nline four");
    }
}
