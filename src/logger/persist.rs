//! Conversation persistence.
//!
//! Conversations live as one JSON file each. Two filename conventions are
//! recognized when scanning: the legacy `llm-conv-{tab}-{conv}.json` shape
//! and the current `{project}-conv-{YYYY-MM-DD-HHMM}-{shortid}.json` shape.
//! Disk failures are logged and swallowed; a failed save risks losing the
//! most recent mutation, never a live session.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::domain::Conversation;

/// Legacy filename: llm-conv-{tabID}-{convID}.json
static LEGACY_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^llm-conv-.+-conv-\d+-[0-9a-f]{8}\.json$").expect("pattern compiles"));

/// Current filename: {project}-conv-{YYYY-MM-DD-HHMM}-{shortid}.json
static CURRENT_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9-]+-conv-\d{4}-\d{2}-\d{2}-\d{4}-[0-9a-f]{8}\.json$")
        .expect("pattern compiles")
});

/// Only files modified within this window are eagerly loaded at startup;
/// older conversations stay reachable on demand by ID.
pub const EAGER_LOAD_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Whether a filename matches either conversation file convention
pub fn is_conversation_file(name: &str) -> bool {
    LEGACY_FILE.is_match(name) || CURRENT_FILE.is_match(name)
}

/// Current-convention filename for a conversation
pub fn file_name_for(conversation: &Conversation) -> String {
    let project = conversation
        .metadata
        .as_ref()
        .and_then(|m| m.working_directory.file_name())
        .map(|n| sanitize_project(&n.to_string_lossy()))
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "session".to_string());
    let stamp = conversation.start_time.format("%Y-%m-%d-%H%M");
    let short_id = conversation
        .conversation_id
        .rsplit('-')
        .next()
        .unwrap_or("00000000");
    format!("{}-conv-{}-{}.json", project, stamp, short_id)
}

fn sanitize_project(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}

/// Write a conversation to its file under `dir`, creating `dir` if needed
pub fn save_conversation(dir: &Path, conversation: &Conversation) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create data dir {}", dir.display()))?;
    let path = dir.join(file_name_for(conversation));
    let json = serde_json::to_string_pretty(conversation).context("failed to serialize")?;
    std::fs::write(&path, json)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Load one conversation file
pub fn load_conversation(path: &Path) -> Result<Conversation> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("malformed JSON in {}", path.display()))
}

/// Scan `dir` for conversation files. Unreadable or malformed files are
/// skipped with a warning, never fatal. `max_age` limits by mtime when set.
pub fn scan_conversations(dir: &Path, max_age: Option<Duration>) -> Vec<(PathBuf, Conversation)> {
    let mut found = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return found,
    };
    let now = SystemTime::now();
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        if !is_conversation_file(&name) {
            continue;
        }
        if let Some(window) = max_age {
            let fresh = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|mtime| now.duration_since(mtime).ok())
                .map(|age| age <= window)
                .unwrap_or(true);
            if !fresh {
                continue;
            }
        }
        match load_conversation(&path) {
            Ok(conversation) => found.push((path, conversation)),
            Err(e) => warn!(file = %path.display(), error = %e, "skipping conversation file"),
        }
    }
    found
}

/// Look up a conversation by ID, scanning all files regardless of age.
/// Missing and malformed files are non-fatal lookup failures.
pub fn find_by_id(dir: &Path, id: &str) -> Option<(PathBuf, Conversation)> {
    scan_conversations(dir, None)
        .into_iter()
        .find(|(_, c)| c.conversation_id == id)
}

/// Out-of-band conversation writer.
///
/// Mutable state is deep-copied under the log's lock and shipped here; the
/// actual disk write happens on a dedicated task so keystroke-latency paths
/// never block on I/O. Every write for a log goes through the same FIFO
/// queue, so the completion write always lands after the turn writes that
/// preceded it. The outstanding counter lets shutdown and tests wait for
/// drain deterministically. Outside a tokio runtime, writes fall back to
/// synchronous.
pub struct AsyncPersister {
    dir: PathBuf,
    tx: Option<mpsc::UnboundedSender<Conversation>>,
    pending: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl AsyncPersister {
    pub fn new(dir: PathBuf) -> Self {
        let pending = Arc::new(AtomicUsize::new(0));
        let drained = Arc::new(Notify::new());

        let tx = match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let (tx, mut rx) = mpsc::unbounded_channel::<Conversation>();
                let dir = dir.clone();
                let pending = pending.clone();
                let drained = drained.clone();
                handle.spawn(async move {
                    while let Some(conversation) = rx.recv().await {
                        if let Err(e) = save_conversation(&dir, &conversation) {
                            warn!(error = %e, "async conversation save failed");
                        } else {
                            debug!(id = %conversation.conversation_id, "conversation persisted");
                        }
                        if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                            drained.notify_waiters();
                        }
                    }
                });
                Some(tx)
            }
            Err(_) => None,
        };

        Self {
            dir,
            tx,
            pending,
            drained,
        }
    }

    /// Queue a deep-copied conversation for writing
    pub fn persist(&self, conversation: Conversation) {
        match &self.tx {
            Some(tx) => {
                self.pending.fetch_add(1, Ordering::SeqCst);
                if tx.send(conversation).is_err() {
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                }
            }
            None => {
                if let Err(e) = save_conversation(&self.dir, &conversation) {
                    warn!(error = %e, "conversation save failed");
                }
            }
        }
    }

    /// Number of writes queued but not yet completed
    pub fn outstanding(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait until every queued write has hit disk. The waiter is registered
    /// before the counter is read, so a decrement-and-notify between the two
    /// cannot strand it.
    pub async fn wait_for_drain(&self) {
        loop {
            let drained = self.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            drained.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConversationTurn, Metadata, TurnRole};

    #[test]
    fn recognizes_both_filename_conventions() {
        assert!(is_conversation_file(
            "llm-conv-tab-7-conv-1712345678901-a1b2c3d4.json"
        ));
        assert!(is_conversation_file(
            "myproject-conv-2026-08-23-1405-a1b2c3d4.json"
        ));
        assert!(!is_conversation_file("notes.json"));
        assert!(!is_conversation_file("myproject-conv.json"));
    }

    #[test]
    fn save_load_round_trip_preserves_fields() {
        let dir = tempfile::tempdir().unwrap();
        let mut conversation = Conversation::new("tab-1", "claude", "interactive");
        conversation.metadata = Some(Metadata {
            working_directory: "/home/dev/myproject".into(),
            git_branch: Some("main".to_string()),
            shell_type: Some("zsh".to_string()),
        });
        conversation.tui_capture_mode = true;
        conversation.process_pid = Some(4242);
        conversation.turns.push(
            ConversationTurn::new(TurnRole::User, "hello", "claude").with_confidence(0.9),
        );

        let path = save_conversation(dir.path(), &conversation).unwrap();
        let loaded = load_conversation(&path).unwrap();

        assert_eq!(loaded.conversation_id, conversation.conversation_id);
        assert_eq!(loaded.tab_id, conversation.tab_id);
        assert_eq!(loaded.provider, conversation.provider);
        assert_eq!(loaded.command_type, conversation.command_type);
        assert_eq!(loaded.start_time, conversation.start_time);
        assert_eq!(loaded.complete, conversation.complete);
        assert_eq!(loaded.tui_capture_mode, true);
        assert_eq!(loaded.process_pid, Some(4242));
        assert_eq!(loaded.turns.len(), 1);
        assert_eq!(loaded.turns[0].content, "hello");
        assert_eq!(loaded.turns[0].parse_confidence, 0.9);
        assert_eq!(
            loaded.metadata.as_ref().unwrap().git_branch.as_deref(),
            Some("main")
        );
    }

    #[test]
    fn file_name_uses_project_basename() {
        let mut conversation = Conversation::new("tab-1", "claude", "interactive");
        conversation.metadata = Some(Metadata {
            working_directory: "/home/dev/My Project".into(),
            git_branch: None,
            shell_type: None,
        });
        let name = file_name_for(&conversation);
        assert!(name.starts_with("my-project-conv-"), "got {}", name);
        assert!(is_conversation_file(&name), "got {}", name);
    }

    #[test]
    fn scan_skips_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        let conversation = Conversation::new("tab-1", "codex", "oneshot");
        save_conversation(dir.path(), &conversation).unwrap();
        std::fs::write(
            dir.path().join("other-conv-2026-01-01-0000-deadbeef.json"),
            "{ not json",
        )
        .unwrap();

        let found = scan_conversations(dir.path(), None);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1.conversation_id, conversation.conversation_id);
    }

    #[test]
    fn find_by_id_misses_are_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_by_id(dir.path(), "conv-0-00000000").is_none());
    }

    #[tokio::test]
    async fn queued_writes_flush_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let persister = AsyncPersister::new(dir.path().to_path_buf());

        let mut conversation = Conversation::new("tab-1", "claude", "interactive");
        for i in 0..8 {
            conversation.turns.push(ConversationTurn::new(
                TurnRole::User,
                format!("message {}", i),
                "claude",
            ));
            persister.persist(conversation.clone());
        }
        conversation.complete = true;
        conversation.end_time = Some(conversation.start_time);
        persister.persist(conversation.clone());
        persister.wait_for_drain().await;
        assert_eq!(persister.outstanding(), 0);

        // the completion copy was queued last, so it is what survives on disk
        let (_, on_disk) = find_by_id(dir.path(), &conversation.conversation_id).unwrap();
        assert!(on_disk.complete);
        assert_eq!(on_disk.turns.len(), 8);
    }

    #[tokio::test]
    async fn drain_with_nothing_queued_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let persister = AsyncPersister::new(dir.path().to_path_buf());
        persister.wait_for_drain().await;
        assert_eq!(persister.outstanding(), 0);
    }
}
