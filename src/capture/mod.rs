//! Per-tab conversation capture state machine.
//!
//! Buffers raw keystrokes and PTY output, cleans them, and emits attributed
//! turns to an observer. There is no push notification for "response
//! finished" anywhere in a terminal byte stream, so response completion is
//! poll-based: callers invoke [`ConversationCapture::check_response_end`]
//! periodically (the session coordinator does this from its heartbeat task).

pub mod clean;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::domain::{CaptureMetrics, CaptureMethod, ConversationTurn, TurnRole};
use crate::provider::ProviderOps;

/// Parses below this confidence trigger the low-confidence notification in
/// auto-respond mode.
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.8;

/// How much output tail is scanned for a reappeared prompt
const PROMPT_TAIL_CHARS: usize = 100;

/// Capture state, exactly one per tab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    /// Nothing in flight
    Idle,
    /// Input arrived without a line terminator yet
    UserTyping,
    /// A user turn was flushed; no output seen yet
    WaitingResponse,
    /// Output is streaming in
    AssistantResponding,
}

/// Receives flushed turns and low-confidence alerts.
///
/// Decouples the capture machine from whoever consumes its turns; the
/// coordinator registers one observer that forwards low-confidence raw text
/// to the outbound queue.
pub trait CaptureObserver: Send + Sync {
    /// A cleaned turn was flushed
    fn on_turn(&self, tab_id: &str, turn: &ConversationTurn);

    /// A parse landed below the confidence threshold; `raw` is the uncleaned
    /// text so nothing is lost downstream
    fn on_low_confidence(&self, tab_id: &str, raw: &str, confidence: f64);
}

struct CaptureInner {
    state: CaptureState,
    input_buffer: String,
    output_buffer: String,
    last_output_at: Instant,
    metrics: CaptureMetrics,
}

/// Per-tab state machine turning raw bytes into cleaned turns
pub struct ConversationCapture {
    tab_id: String,
    provider: Arc<dyn ProviderOps>,
    observer: Option<Arc<dyn CaptureObserver>>,
    auto_respond: AtomicBool,
    inner: Mutex<CaptureInner>,
}

impl ConversationCapture {
    pub fn new(tab_id: impl Into<String>, provider: Arc<dyn ProviderOps>) -> Self {
        Self {
            tab_id: tab_id.into(),
            provider,
            observer: None,
            auto_respond: AtomicBool::new(false),
            inner: Mutex::new(CaptureInner {
                state: CaptureState::Idle,
                input_buffer: String::new(),
                output_buffer: String::new(),
                last_output_at: Instant::now(),
                metrics: CaptureMetrics::default(),
            }),
        }
    }

    /// Register the turn/low-confidence observer
    pub fn with_observer(mut self, observer: Arc<dyn CaptureObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Toggle auto-respond mode (low-confidence parses notify the observer)
    pub fn set_auto_respond(&self, enabled: bool) {
        self.auto_respond.store(enabled, Ordering::SeqCst);
    }

    /// Current state
    pub fn state(&self) -> CaptureState {
        self.lock().state
    }

    /// Snapshot of the capture counters
    pub fn metrics(&self) -> CaptureMetrics {
        self.lock().metrics
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CaptureInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Buffer raw keystrokes; flushes a user turn when a line terminator
    /// arrives. Any input moves the machine to `UserTyping`; if a response
    /// was still streaming, it is flushed first so its content is not lost.
    pub fn capture_input(&self, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        let mut inner = self.lock();
        inner.metrics.bytes_in += bytes.len() as u64;

        if inner.state == CaptureState::AssistantResponding {
            self.flush_response(&mut inner);
        }

        inner.input_buffer.push_str(&text);
        inner.state = CaptureState::UserTyping;

        if text.contains('\n') || text.contains('\r') {
            self.flush_user_turn(&mut inner);
        }
    }

    /// Buffer raw PTY output; first output after a user turn moves the
    /// machine to `AssistantResponding`.
    pub fn capture_output(&self, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        let mut inner = self.lock();
        inner.metrics.bytes_out += bytes.len() as u64;
        inner.output_buffer.push_str(&text);
        inner.last_output_at = Instant::now();
        if matches!(
            inner.state,
            CaptureState::WaitingResponse | CaptureState::Idle
        ) {
            inner.state = CaptureState::AssistantResponding;
        }
    }

    /// Poll for response completion: either the output went quiet for
    /// `timeout`, or the provider's prompt reappeared in the output tail.
    /// Returns true (and flushes the assistant turn) exactly once per
    /// response.
    pub fn check_response_end(&self, timeout: Duration) -> bool {
        let mut inner = self.lock();
        if inner.state != CaptureState::AssistantResponding {
            return false;
        }

        let quiet = inner.last_output_at.elapsed() >= timeout;
        let tail: String = {
            let buf = &inner.output_buffer;
            let start = buf
                .char_indices()
                .rev()
                .take(PROMPT_TAIL_CHARS)
                .last()
                .map(|(i, _)| i)
                .unwrap_or(0);
            buf[start..].to_string()
        };
        let prompt_back = self.provider.detect_prompt_end(&tail);

        if !quiet && !prompt_back {
            return false;
        }

        self.flush_response(&mut inner);
        true
    }

    fn flush_user_turn(&self, inner: &mut CaptureInner) {
        let raw = std::mem::take(&mut inner.input_buffer);
        inner.state = CaptureState::WaitingResponse;

        let cleaned = clean::clean_user_input(&raw);
        if cleaned.is_empty() {
            if !raw.trim().is_empty() {
                inner.metrics.input_failures += 1;
            }
            return;
        }

        inner.metrics.input_turns += 1;
        let turn = ConversationTurn::new(TurnRole::User, cleaned, self.provider.id())
            .via(CaptureMethod::PtyInput)
            .with_raw(raw);
        if let Some(observer) = &self.observer {
            observer.on_turn(&self.tab_id, &turn);
        }
    }

    fn flush_response(&self, inner: &mut CaptureInner) {
        let raw = std::mem::take(&mut inner.output_buffer);
        inner.state = CaptureState::Idle;

        let (cleaned, confidence) =
            clean::parse_assistant_output(&raw, self.provider.chrome_patterns());
        if cleaned.is_empty() {
            if !raw.trim().is_empty() {
                inner.metrics.output_failures += 1;
            }
            return;
        }

        inner.metrics.output_turns += 1;
        let turn = ConversationTurn::new(TurnRole::Assistant, cleaned, self.provider.id())
            .via(CaptureMethod::PtyOutput)
            .with_raw(raw.clone())
            .with_confidence(confidence);
        if let Some(observer) = &self.observer {
            observer.on_turn(&self.tab_id, &turn);
            if confidence < LOW_CONFIDENCE_THRESHOLD && self.auto_respond.load(Ordering::SeqCst) {
                observer.on_low_confidence(&self.tab_id, &raw, confidence);
            }
        }
    }
}
