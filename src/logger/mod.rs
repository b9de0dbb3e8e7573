//! The conversation log: authoritative per-tab conversation records.
//!
//! Owns the active conversation for a tab, enforces resource bounds, and
//! persists to disk. All mutation happens under one exclusive lock; disk
//! writes happen after the lock is released, on deep copies, so
//! keystroke-latency paths never wait on I/O.

pub mod persist;
mod registry;

pub use registry::LogRegistry;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::capture::clean;
use crate::detect::DetectedCommand;
use crate::domain::{
    CaptureMethod, Conversation, ConversationTurn, LayerEvent, LayerEventKind, Metadata,
    ScreenSnapshot, TurnRole, MAX_TURNS,
};
use crate::events::EventBus;
use crate::provider::{ProviderOps, ProviderRegistry};
use crate::snapshot;

/// Disk rescans within this window reuse the cached scan. Bounds filesystem
/// I/O when accessors are called at high frequency.
const SCAN_STALENESS_SECS: u64 = 60;

/// Escape sequences that repaint the screen; seeing one means the previous
/// screen is final and worth snapshotting.
const SCREEN_CLEAR_MARKERS: [&str; 4] = ["\x1b[2J", "\x1b[3J", "\x1b[H", "\x1b[1;1H"];

/// Provider-agnostic shell-prompt shapes. Best-effort: a trailing `$ ` in
/// assistant prose can false-positive, accepted tradeoff.
static SHELL_PROMPT_RETURN: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"PS [^\r\n]*> ?$").expect("pattern compiles"),
        Regex::new(r"[A-Za-z]:\\[^\r\n]*> ?$").expect("pattern compiles"),
        Regex::new(r"[\w.-]+@[\w.-]+:[^\r\n]*[$#] ?$").expect("pattern compiles"),
        Regex::new(r"(?m)[^\s][^\r\n]*\$ $").expect("pattern compiles"),
        Regex::new(r"(?m)[^\s][^\r\n]*# $").expect("pattern compiles"),
    ]
});

/// Snapshot resource bounds
#[derive(Debug, Clone, Copy)]
pub struct SnapshotLimits {
    /// Hard cap on stored snapshots per conversation
    pub max_snapshots: usize,
    /// How many recent snapshots survive a cap overflow
    pub keep_recent: usize,
}

impl Default for SnapshotLimits {
    fn default() -> Self {
        Self {
            max_snapshots: 50,
            keep_recent: 25,
        }
    }
}

struct LogInner {
    active: Option<Conversation>,
    provider_ops: Option<Arc<dyn ProviderOps>>,
    completed: Vec<Conversation>,
    input_buffer: String,
    output_buffer: String,
    screen_buffer: String,
    next_snapshot_seq: u64,
    disk_cache: Vec<Conversation>,
    last_scan: Option<Instant>,
}

/// Per-tab conversation log
pub struct ConversationLog {
    tab_id: String,
    data_dir: PathBuf,
    bus: Arc<EventBus>,
    providers: ProviderRegistry,
    limits: SnapshotLimits,
    persister: persist::AsyncPersister,
    inner: Mutex<LogInner>,
}

impl ConversationLog {
    pub fn new(
        tab_id: impl Into<String>,
        data_dir: PathBuf,
        bus: Arc<EventBus>,
        providers: ProviderRegistry,
        limits: SnapshotLimits,
    ) -> Self {
        let disk_cache: Vec<Conversation> =
            persist::scan_conversations(&data_dir, Some(persist::EAGER_LOAD_WINDOW))
                .into_iter()
                .map(|(_, c)| c)
                .collect();
        Self {
            tab_id: tab_id.into(),
            persister: persist::AsyncPersister::new(data_dir.clone()),
            data_dir,
            bus,
            providers,
            limits,
            inner: Mutex::new(LogInner {
                active: None,
                provider_ops: None,
                completed: Vec::new(),
                input_buffer: String::new(),
                output_buffer: String::new(),
                screen_buffer: String::new(),
                next_snapshot_seq: 0,
                disk_cache,
                last_scan: Some(Instant::now()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ========== Lifecycle ==========

    /// Start a conversation from a detected command line. Ends any active
    /// conversation first: at most one active conversation per tab.
    pub fn start_conversation(&self, detected: &DetectedCommand, cwd: &Path) -> String {
        self.start_inner(
            &detected.provider,
            &detected.command_type,
            detected.tui_mode,
            None,
            Some(&detected.command),
            cwd,
        )
    }

    /// Start a conversation from an external process-detection signal
    pub fn start_conversation_from_process(
        &self,
        provider: &str,
        command_type: &str,
        pid: u32,
        cwd: &Path,
    ) -> String {
        self.start_inner(provider, command_type, true, Some(pid), None, cwd)
    }

    fn start_inner(
        &self,
        provider: &str,
        command_type: &str,
        tui_mode: bool,
        pid: Option<u32>,
        command: Option<&str>,
        cwd: &Path,
    ) -> String {
        let mut inner = self.lock();
        if inner.active.is_some() {
            self.end_locked(&mut inner, false);
        }

        let mut conversation = Conversation::new(&self.tab_id, provider, command_type);
        conversation.metadata = Some(Metadata::capture(cwd));
        conversation.tui_capture_mode = tui_mode;
        conversation.process_pid = pid;

        let seed = match command {
            Some(cmd) => ConversationTurn::new(TurnRole::System, format!("$ {}", cmd), provider)
                .via(CaptureMethod::PtyInput),
            None => ConversationTurn::new(
                TurnRole::System,
                format!("{} session detected (pid {})", provider, pid.unwrap_or(0)),
                provider,
            )
            .via(CaptureMethod::ProcessDetection),
        };
        conversation.turns.push(seed);

        let id = conversation.conversation_id.clone();
        info!(tab = %self.tab_id, conversation = %id, provider, "conversation started");

        self.persister.persist(conversation.clone());
        self.bus.publish(
            LayerEvent::new(LayerEventKind::LlmStart, "conversation_log", &self.tab_id)
                .for_conversation(&id)
                .with_provider(provider)
                .with_meta("pid", pid.map(|p| p as i64).unwrap_or(0))
                .with_meta("tuiCaptureMode", tui_mode),
        );

        inner.provider_ops = Some(self.providers.get(provider));
        inner.next_snapshot_seq = 0;
        inner.input_buffer.clear();
        inner.output_buffer.clear();
        inner.screen_buffer.clear();
        inner.active = Some(conversation);
        id
    }

    /// Toggle auto-respond on the active conversation
    pub fn set_auto_respond(&self, enabled: bool) {
        if let Some(active) = self.lock().active.as_mut() {
            active.auto_respond = enabled;
        }
    }

    // ========== Capture ==========

    /// Feed raw PTY output. Auto-ends on a returned shell prompt; otherwise
    /// accumulates into the screen buffer (TUI mode, snapshotting on screen
    /// clears) or the line buffer.
    pub fn add_output(&self, raw: &[u8]) {
        let text = String::from_utf8_lossy(raw).into_owned();
        let mut inner = self.lock();
        if inner.active.is_none() {
            return;
        }

        let cleaned = clean::strip_ansi(&text);
        if prompt_returned(&cleaned) {
            debug!(tab = %self.tab_id, "shell prompt returned, auto-ending conversation");
            self.end_locked(&mut inner, true);
            return;
        }

        let tui = inner.active.as_ref().map(|c| c.tui_capture_mode).unwrap_or(false);
        if tui {
            match first_clear_marker(&text) {
                Some(idx) => {
                    inner.screen_buffer.push_str(&text[..idx]);
                    self.save_screen_snapshot(&mut inner);
                    inner.screen_buffer.push_str(&text[idx..]);
                }
                None => inner.screen_buffer.push_str(&text),
            }
        } else {
            inner.output_buffer.push_str(&text);
        }
    }

    /// Feed raw remote keystrokes. On a line terminator, snapshots pending
    /// screen content first (the prompt as last seen), then flushes a cleaned
    /// user turn and updates recovery metadata.
    pub fn add_user_input(&self, raw: &[u8]) {
        let text = String::from_utf8_lossy(raw).into_owned();
        let mut inner = self.lock();
        if inner.active.is_none() {
            return;
        }

        inner.input_buffer.push_str(&text);
        if !text.contains('\n') && !text.contains('\r') {
            return;
        }

        let tui = inner.active.as_ref().map(|c| c.tui_capture_mode).unwrap_or(false);
        if tui && !inner.screen_buffer.trim().is_empty() {
            self.save_screen_snapshot(&mut inner);
        }

        let raw_input = std::mem::take(&mut inner.input_buffer);
        let raw_bytes = raw_input.len();
        let cleaned = clean::clean_user_input(&raw_input);
        if cleaned.is_empty() {
            if !raw_input.trim().is_empty() {
                self.bus.publish(
                    LayerEvent::new(LayerEventKind::ParseFailure, "conversation_log", &self.tab_id)
                        .with_meta("direction", "input"),
                );
            }
            return;
        }

        let Some(active) = inner.active.as_mut() else {
            return;
        };
        active.last_saved_turn = Some(cleaned.clone());
        active.restore_prompt = Some(format!(
            "Continue our previous session. My last message was: \"{}\"",
            cleaned
        ));
        let provider = active.provider.clone();
        let id = active.conversation_id.clone();

        let turn = ConversationTurn::new(TurnRole::User, cleaned, &provider)
            .via(CaptureMethod::PtyInput)
            .with_raw(raw_input);
        self.push_turn_locked(&mut inner, turn);

        self.bus.publish(
            LayerEvent::new(LayerEventKind::UserInput, "conversation_log", &self.tab_id)
                .for_conversation(id)
                .with_provider(provider)
                .with_meta("bytes", raw_bytes),
        );
    }

    /// Explicit assistant-turn flush for line-based (non-TUI) capture
    pub fn flush_output(&self) {
        let mut inner = self.lock();
        self.flush_output_locked(&mut inner);
    }

    fn flush_output_locked(&self, inner: &mut LogInner) {
        let raw = std::mem::take(&mut inner.output_buffer);
        if raw.trim().is_empty() {
            return;
        }
        let Some(ops) = inner.provider_ops.clone() else {
            return;
        };
        let Some(active) = inner.active.as_mut() else {
            return;
        };

        let (cleaned, confidence) = clean::parse_assistant_output(&raw, ops.chrome_patterns());
        if cleaned.is_empty() {
            self.bus.publish(
                LayerEvent::new(LayerEventKind::ParseFailure, "conversation_log", &self.tab_id)
                    .with_meta("direction", "output"),
            );
            return;
        }

        let provider = active.provider.clone();
        let id = active.conversation_id.clone();
        let auto_respond = active.auto_respond;

        let turn = ConversationTurn::new(TurnRole::Assistant, cleaned, &provider)
            .via(CaptureMethod::PtyOutput)
            .with_raw(raw.clone())
            .with_confidence(confidence);
        self.push_turn_locked(inner, turn);

        self.bus.publish(
            LayerEvent::new(
                LayerEventKind::AssistantOutput,
                "conversation_log",
                &self.tab_id,
            )
            .for_conversation(&id)
            .with_provider(&provider)
            .with_meta("bytes", raw.len()),
        );
        if auto_respond && confidence < crate::capture::LOW_CONFIDENCE_THRESHOLD {
            self.bus.publish(
                LayerEvent::new(LayerEventKind::LowConfidence, "conversation_log", &self.tab_id)
                    .for_conversation(id)
                    .with_provider(provider)
                    .with_meta("confidence", confidence)
                    .with_meta("raw", raw),
            );
        }
    }

    /// Append a turn, ending the conversation instead when the turn bound is
    /// reached. Overflow is a natural conversation boundary, not an error.
    fn push_turn_locked(&self, inner: &mut LogInner, turn: ConversationTurn) {
        let Some(active) = inner.active.as_mut() else {
            return;
        };
        if active.turns.len() >= MAX_TURNS {
            warn!(tab = %self.tab_id, "turn bound reached, ending conversation");
            self.end_locked(inner, true);
            return;
        }
        active.turns.push(turn);
        let reached_cap = active.turns.len() >= MAX_TURNS;
        let copy = active.clone();
        if reached_cap {
            self.end_locked(inner, true);
        } else {
            self.persister.persist(copy);
        }
    }

    // ========== Snapshots ==========

    /// Snapshot the accumulated screen buffer: enforce the cap, compute the
    /// diff against the previous snapshot, and immediately try incremental
    /// turn extraction against just this snapshot. Persistence is async on a
    /// deep copy.
    fn save_screen_snapshot(&self, inner: &mut LogInner) {
        let raw = std::mem::take(&mut inner.screen_buffer);
        let cleaned = clean::clean_screen(&raw);
        if cleaned.trim().is_empty() {
            return;
        }
        let seq = inner.next_snapshot_seq;
        inner.next_snapshot_seq += 1;

        let ops = inner.provider_ops.clone();
        let Some(active) = inner.active.as_mut() else {
            return;
        };

        let previous = active.screen_snapshots.last().map(|s| s.cleaned_content.clone());
        let diff = describe_diff(previous.as_deref(), &cleaned);

        if active.screen_snapshots.len() >= self.limits.max_snapshots {
            let keep = self.limits.keep_recent.min(active.screen_snapshots.len());
            let drop = active.screen_snapshots.len() - keep;
            active.screen_snapshots.drain(..drop);
        }

        let snapshot = ScreenSnapshot {
            timestamp: Utc::now(),
            sequence_number: seq,
            raw_content: raw,
            cleaned_content: cleaned,
            diff_from_previous: diff,
        };

        let candidates = ops
            .map(|ops| ops.extract_turns(&snapshot))
            .unwrap_or_default();
        active.screen_snapshots.push(snapshot);

        let mut appended = false;
        for candidate in candidates {
            let fresh = {
                let Some(active) = inner.active.as_ref() else {
                    return;
                };
                !snapshot::is_duplicate(&active.turns, &candidate)
            };
            if fresh {
                self.push_turn_locked(inner, candidate);
                appended = true;
            }
        }

        if !appended {
            if let Some(active) = inner.active.as_ref() {
                self.persister.persist(active.clone());
            }
        }
    }

    // ========== Completion ==========

    /// Explicitly end the active conversation. Runs the exhaustive
    /// snapshot-to-turn reconstruction, freezes the record, persists it, and
    /// publishes `LLM_END`. Returns the completed conversation ID.
    pub fn end_conversation(&self) -> Option<String> {
        let mut inner = self.lock();
        self.end_locked(&mut inner, false)
    }

    fn end_locked(&self, inner: &mut LogInner, auto_ended: bool) -> Option<String> {
        if inner.active.is_none() {
            return None;
        }
        self.flush_output_locked(inner);

        // flush_output_locked can itself hit the turn bound and finish the job
        let Some(mut conversation) = inner.active.take() else {
            return None;
        };
        inner.provider_ops = None;
        inner.input_buffer.clear();
        inner.screen_buffer.clear();

        if conversation.tui_capture_mode && !conversation.screen_snapshots.is_empty() {
            let ops = self.providers.get(&conversation.provider);
            for candidate in snapshot::reconstruct(&conversation.screen_snapshots, ops.as_ref()) {
                if conversation.turns.len() >= MAX_TURNS {
                    break;
                }
                if !snapshot::is_duplicate(&conversation.turns, &candidate) {
                    conversation.turns.push(candidate);
                }
            }
        }

        conversation.complete = true;
        conversation.end_time = Some(Utc::now().max(conversation.start_time));

        let id = conversation.conversation_id.clone();
        info!(
            tab = %self.tab_id,
            conversation = %id,
            turns = conversation.turns.len(),
            auto_ended,
            "conversation ended"
        );

        // same queue as the turn writes: the completion record lands last
        self.persister.persist(conversation.clone());
        self.bus.publish(
            LayerEvent::new(LayerEventKind::LlmEnd, "conversation_log", &self.tab_id)
                .for_conversation(&id)
                .with_provider(&conversation.provider)
                .with_meta("tuiMode", conversation.tui_capture_mode)
                .with_meta("snapshots", conversation.screen_snapshots.len())
                .with_meta("turns", conversation.turns.len())
                .with_meta("autoEnded", auto_ended),
        );

        inner.completed.push(conversation);
        Some(id)
    }

    /// Remove a conversation from memory and disk. Targeting the active
    /// conversation discards it without completing it, so no new write is
    /// queued for a record being removed. Returns whether a disk record was
    /// removed.
    pub fn delete_conversation(&self, id: &str) -> bool {
        {
            let mut inner = self.lock();
            let is_active = inner
                .active
                .as_ref()
                .map(|c| c.conversation_id == id)
                .unwrap_or(false);
            if is_active {
                inner.active = None;
                inner.provider_ops = None;
                inner.input_buffer.clear();
                inner.output_buffer.clear();
                inner.screen_buffer.clear();
            }
            inner.completed.retain(|c| c.conversation_id != id);
            inner.disk_cache.retain(|c| c.conversation_id != id);
        }
        let Some((path, _)) = persist::find_by_id(&self.data_dir, id) else {
            return false;
        };
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(tab = %self.tab_id, conversation = %id, "conversation deleted");
                true
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "failed to delete conversation file");
                false
            }
        }
    }

    // ========== Accessors ==========

    /// ID of the active conversation, if any
    pub fn active_conversation_id(&self) -> Option<String> {
        self.lock().active.as_ref().map(|c| c.conversation_id.clone())
    }

    pub fn has_active(&self) -> bool {
        self.lock().active.is_some()
    }

    /// Number of active conversations on this tab (0 or 1)
    pub fn active_count(&self) -> usize {
        if self.has_active() { 1 } else { 0 }
    }

    pub fn completed_count(&self) -> usize {
        self.lock().completed.len()
    }

    /// Most recent capture activity on the active conversation
    pub fn last_activity(&self) -> Option<chrono::DateTime<Utc>> {
        self.lock().active.as_ref().map(|c| c.last_activity())
    }

    /// All conversations for this tab, merging memory and disk. Disk rescans
    /// within the staleness window reuse the cached scan.
    pub fn get_conversations(&self) -> Vec<Conversation> {
        let mut inner = self.lock();
        self.refresh_disk_cache(&mut inner);

        let mut out: Vec<Conversation> = Vec::new();
        if let Some(active) = &inner.active {
            out.push(active.clone());
        }
        out.extend(inner.completed.iter().cloned());
        for cached in &inner.disk_cache {
            if !out.iter().any(|c| c.conversation_id == cached.conversation_id) {
                out.push(cached.clone());
            }
        }
        out
    }

    /// Look up one conversation by ID: memory first, then the disk cache,
    /// then an on-demand full scan (reaches files older than the eager-load
    /// window). Returns `None` for unknown IDs.
    pub fn get_conversation(&self, id: &str) -> Option<Conversation> {
        {
            let mut inner = self.lock();
            if let Some(active) = &inner.active {
                if active.conversation_id == id {
                    return Some(active.clone());
                }
            }
            if let Some(found) = inner.completed.iter().find(|c| c.conversation_id == id) {
                return Some(found.clone());
            }
            self.refresh_disk_cache(&mut inner);
            if let Some(found) = inner.disk_cache.iter().find(|c| c.conversation_id == id) {
                return Some(found.clone());
            }
        }
        persist::find_by_id(&self.data_dir, id).map(|(_, c)| c)
    }

    fn refresh_disk_cache(&self, inner: &mut LogInner) {
        let stale = inner
            .last_scan
            .map(|at| at.elapsed().as_secs() > SCAN_STALENESS_SECS)
            .unwrap_or(true);
        if !stale {
            return;
        }
        inner.disk_cache = persist::scan_conversations(&self.data_dir, None)
            .into_iter()
            .map(|(_, c)| c)
            .collect();
        inner.last_scan = Some(Instant::now());
    }

    // ========== Write tracking ==========

    /// Writes queued but not yet on disk
    pub fn outstanding_writes(&self) -> usize {
        self.persister.outstanding()
    }

    /// Wait until all queued writes have hit disk
    pub async fn wait_for_writes(&self) {
        self.persister.wait_for_drain().await;
    }

    /// End any active conversation and wait for the write queue to drain
    pub async fn close(&self) {
        self.end_conversation();
        self.wait_for_writes().await;
    }
}

/// Whether the cleaned output tail shows a shell prompt again
fn prompt_returned(cleaned: &str) -> bool {
    let tail: String = {
        let chars: Vec<char> = cleaned.chars().collect();
        let start = chars.len().saturating_sub(200);
        chars[start..].iter().collect()
    };
    SHELL_PROMPT_RETURN.iter().any(|p| p.is_match(&tail))
}

/// Byte offset of the first screen-clear/home-cursor escape, if any
fn first_clear_marker(text: &str) -> Option<usize> {
    SCREEN_CLEAR_MARKERS
        .iter()
        .filter_map(|m| text.find(m))
        .min()
}

/// Lightweight, human-readable snapshot delta: line-count change plus newly
/// appended non-empty lines.
fn describe_diff(previous: Option<&str>, current: &str) -> String {
    let cur_lines: Vec<&str> = current.lines().collect();
    let Some(previous) = previous else {
        let mut out = format!("initial screen ({} lines)", cur_lines.len());
        for line in cur_lines.iter().filter(|l| !l.trim().is_empty()) {
            out.push_str("\n+ ");
            out.push_str(line);
        }
        return out;
    };

    let prev_lines: Vec<&str> = previous.lines().collect();
    let delta = cur_lines.len() as i64 - prev_lines.len() as i64;
    let mut out = format!(
        "lines {} -> {} ({:+})",
        prev_lines.len(),
        cur_lines.len(),
        delta
    );
    let shared = prev_lines.len().min(cur_lines.len());
    for line in cur_lines[shared..].iter().filter(|l| !l.trim().is_empty()) {
        out.push_str("\n+ ");
        out.push_str(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_log(dir: &Path) -> ConversationLog {
        ConversationLog::new(
            "tab-1",
            dir.to_path_buf(),
            Arc::new(EventBus::new()),
            ProviderRegistry::with_defaults(),
            SnapshotLimits {
                max_snapshots: 5,
                keep_recent: 2,
            },
        )
    }

    fn detected_interactive() -> DetectedCommand {
        DetectedCommand {
            provider: "claude".to_string(),
            command_type: "interactive".to_string(),
            tui_mode: true,
            command: "claude".to_string(),
        }
    }

    fn detected_oneshot() -> DetectedCommand {
        DetectedCommand {
            provider: "generic".to_string(),
            command_type: "oneshot".to_string(),
            tui_mode: false,
            command: "claude -p hi".to_string(),
        }
    }

    #[test]
    fn one_active_conversation_per_tab() {
        let dir = tempfile::tempdir().unwrap();
        let log = test_log(dir.path());
        let first = log.start_conversation(&detected_interactive(), dir.path());
        let second = log.start_conversation(&detected_interactive(), dir.path());
        assert_ne!(first, second);
        assert_eq!(log.active_conversation_id(), Some(second));
        // the first was ended, not dropped
        let first_record = log.get_conversation(&first).unwrap();
        assert!(first_record.complete);
    }

    #[test]
    fn process_detection_seeds_a_system_turn() {
        let dir = tempfile::tempdir().unwrap();
        let log = test_log(dir.path());
        let id = log.start_conversation_from_process("claude", "interactive", 4242, dir.path());
        let record = log.get_conversation(&id).unwrap();
        assert_eq!(record.process_pid, Some(4242));
        assert!(record.tui_capture_mode);
        assert_eq!(record.turns.len(), 1);
        assert_eq!(record.turns[0].role, TurnRole::System);
        assert_eq!(record.turns[0].capture_method, CaptureMethod::ProcessDetection);
        assert!(record.turns[0].content.contains("pid 4242"));
    }

    #[test]
    fn completed_records_are_frozen() {
        let dir = tempfile::tempdir().unwrap();
        let log = test_log(dir.path());
        let id = log.start_conversation(&detected_oneshot(), dir.path());
        log.add_user_input(b"hello there\n");
        log.end_conversation();

        let ended = log.get_conversation(&id).unwrap();
        let turns = ended.turns.len();
        let end_time = ended.end_time.unwrap();
        assert!(end_time >= ended.start_time);

        // later calls are no-ops against the frozen record
        log.add_user_input(b"more input\n");
        log.add_output(b"more output");
        assert!(log.end_conversation().is_none());
        let again = log.get_conversation(&id).unwrap();
        assert_eq!(again.turns.len(), turns);
        assert_eq!(again.end_time.unwrap(), end_time);
    }

    #[test]
    fn shell_prompt_return_auto_ends() {
        let dir = tempfile::tempdir().unwrap();
        let log = test_log(dir.path());
        let id = log.start_conversation(&detected_oneshot(), dir.path());
        log.add_user_input(b"explain this\n");
        log.add_output(b"Some explanation of the code.\nuser@host:~/project$ ");
        assert_eq!(log.active_conversation_id(), None);
        assert!(log.get_conversation(&id).unwrap().complete);
    }

    #[test]
    fn turn_bound_ends_conversation_automatically() {
        let dir = tempfile::tempdir().unwrap();
        let log = test_log(dir.path());
        let id = log.start_conversation(&detected_oneshot(), dir.path());
        for i in 0..MAX_TURNS + 10 {
            log.add_user_input(format!("message number {}\n", i).as_bytes());
            if !log.has_active() {
                break;
            }
        }
        let record = log.get_conversation(&id).unwrap();
        assert!(record.complete, "cap must end the conversation by itself");
        assert!(record.turns.len() <= MAX_TURNS);
    }

    #[test]
    fn snapshot_cap_drops_oldest_keeps_recent_tail() {
        let dir = tempfile::tempdir().unwrap();
        let log = test_log(dir.path());
        log.start_conversation(&detected_interactive(), dir.path());
        for i in 0..9 {
            log.add_output(format!("\x1b[2Jscreen number {} with some content", i).as_bytes());
        }
        // flush the trailing screen
        log.add_user_input(b"next\n");

        let record = log.get_conversation(&log.active_conversation_id().unwrap()).unwrap();
        assert!(record.screen_snapshots.len() <= 5);
        let seqs: Vec<u64> = record.screen_snapshots.iter().map(|s| s.sequence_number).collect();
        let mut sorted = seqs.clone();
        sorted.sort_unstable();
        assert_eq!(seqs, sorted, "sequence numbers stay monotonic");
        // oldest snapshots were discarded
        assert!(seqs[0] > 0);
    }

    #[test]
    fn user_input_updates_recovery_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let log = test_log(dir.path());
        let id = log.start_conversation(&detected_oneshot(), dir.path());
        log.add_user_input(b"fix the login bug\r\n");
        let record = log.get_conversation(&id).unwrap();
        assert_eq!(record.last_saved_turn.as_deref(), Some("fix the login bug"));
        assert!(record.restore_prompt.as_deref().unwrap().contains("fix the login bug"));
    }

    #[test]
    fn line_mode_flush_appends_assistant_turn() {
        let dir = tempfile::tempdir().unwrap();
        let log = test_log(dir.path());
        let id = log.start_conversation(&detected_oneshot(), dir.path());
        log.add_output(b"The fix is to check the null case before dereferencing.");
        log.flush_output();
        let record = log.get_conversation(&id).unwrap();
        let assistant = record.last_assistant_turn().unwrap();
        assert!(assistant.content.contains("null case"));
        assert!(assistant.parse_confidence > 0.0);
    }

    #[test]
    fn delete_removes_memory_and_disk_record() {
        let dir = tempfile::tempdir().unwrap();
        let log = test_log(dir.path());
        let id = log.start_conversation(&detected_oneshot(), dir.path());
        log.add_user_input(b"hello there\n");
        log.end_conversation();

        assert!(log.delete_conversation(&id));
        assert!(log.get_conversation(&id).is_none());
        assert!(persist::find_by_id(dir.path(), &id).is_none());
        assert_eq!(log.completed_count(), 0);
        // second delete has nothing left to remove
        assert!(!log.delete_conversation(&id));
    }

    #[tokio::test]
    async fn completion_record_survives_queued_turn_writes() {
        let dir = tempfile::tempdir().unwrap();
        let log = test_log(dir.path());
        let id = log.start_conversation(&detected_oneshot(), dir.path());
        log.add_user_input(b"explain the build error\n");
        log.add_output(b"The borrow checker rejects the alias.");
        log.flush_output();
        log.end_conversation();
        log.wait_for_writes().await;

        let (_, record) = persist::find_by_id(dir.path(), &id).unwrap();
        assert!(record.complete, "disk record must show completion after drain");
        assert_eq!(record.turns.len(), 3);
    }

    #[test]
    fn capture_events_feed_health_byte_counters() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(LogRegistry::new(
            dir.path().to_path_buf(),
            bus.clone(),
            ProviderRegistry::with_defaults(),
            SnapshotLimits::default(),
        ));
        let monitor = crate::events::health::HealthMonitor::attach(&bus, registry.clone());
        let log = registry.for_tab("tab-1");
        log.start_conversation(&detected_oneshot(), dir.path());
        log.add_user_input(b"explain this\n");
        log.add_output(b"An explanation with enough substance to keep.");
        log.flush_output();

        let m = monitor.metrics();
        assert_eq!(m.input_turns, 1);
        assert_eq!(m.output_turns, 1);
        assert!(m.bytes_in >= "explain this\n".len() as u64);
        assert!(m.bytes_out > 0);
    }

    #[test]
    fn prompt_detection_covers_common_shapes() {
        assert!(prompt_returned("output\nuser@host:~/project$ "));
        assert!(prompt_returned("done\nPS C:\\Users\\dev> "));
        assert!(prompt_returned("done\nC:\\Users\\dev> "));
        assert!(!prompt_returned("still streaming tokens"));
    }
}
