//! Health monitoring for the capture pipeline.
//!
//! Subscribes once to the event bus, aggregates counters, and classifies
//! overall status. Conversation counts come through an injected
//! [`ConversationSource`] so tests hand in fixtures instead of flipping
//! global test-mode switches.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::capture::clean::count_artifacts;
use crate::domain::{
    CaptureMetrics, Conversation, HealthStatus, LayerEvent, LayerEventKind, LayerStatus,
    SystemHealth,
};

use super::EventBus;

/// Failure ratio above which the pipeline is FAILED
const FAILED_RATIO: f64 = 0.5;
/// Failure ratio above which the pipeline is DEGRADED
const DEGRADED_RATIO: f64 = 0.2;
/// An active conversation silent for longer than this marks the pipeline stale
const STALE_AFTER_SECS: i64 = 5 * 60;
/// Minimum total turn content for a persisted file to count as valid
const MIN_VALID_CONTENT: usize = 10;

/// The fixed set of observed pipeline layers
const LAYER_NAMES: [&str; 5] = [
    "pty_capture",
    "command_detection",
    "snapshot_capture",
    "conversation_storage",
    "health_monitor",
];

/// Supplies conversation-level facts to the monitor
pub trait ConversationSource: Send + Sync {
    /// Number of active (incomplete) conversations
    fn active_count(&self) -> usize;
    /// Number of completed conversations
    fn completed_count(&self) -> usize;
    /// Most recent capture activity across active conversations
    fn last_activity(&self) -> Option<DateTime<Utc>>;
}

/// Result of validating one persisted conversation file
#[derive(Debug, Clone, Serialize)]
pub struct FileValidation {
    pub file: String,
    pub valid: bool,
    pub reason: Option<String>,
}

struct Counters {
    metrics: CaptureMetrics,
    corrupted_files: usize,
}

/// Event-bus-fed health aggregator
pub struct HealthMonitor {
    source: Arc<dyn ConversationSource>,
    counters: Mutex<Counters>,
    started_at: Instant,
}

impl HealthMonitor {
    /// Create a monitor and subscribe it to the bus exactly once
    pub fn attach(bus: &EventBus, source: Arc<dyn ConversationSource>) -> Arc<Self> {
        let monitor = Arc::new(Self {
            source,
            counters: Mutex::new(Counters {
                metrics: CaptureMetrics::default(),
                corrupted_files: 0,
            }),
            started_at: Instant::now(),
        });
        let observer = monitor.clone();
        bus.subscribe(move |event| observer.record(&event));
        monitor
    }

    /// Standalone monitor for direct feeding (tests, CLI validation)
    pub fn new(source: Arc<dyn ConversationSource>) -> Self {
        Self {
            source,
            counters: Mutex::new(Counters {
                metrics: CaptureMetrics::default(),
                corrupted_files: 0,
            }),
            started_at: Instant::now(),
        }
    }

    /// Fold one event into the counters
    pub fn record(&self, event: &LayerEvent) {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        match event.kind {
            LayerEventKind::LlmStart => counters.metrics.conversations_started += 1,
            LayerEventKind::LlmEnd => counters.metrics.conversations_ended += 1,
            LayerEventKind::UserInput => {
                counters.metrics.input_turns += 1;
                counters.metrics.bytes_in += event_bytes(event);
            }
            LayerEventKind::AssistantOutput => {
                counters.metrics.output_turns += 1;
                counters.metrics.bytes_out += event_bytes(event);
            }
            LayerEventKind::ParseFailure => {
                let is_input = event
                    .metadata
                    .get("direction")
                    .and_then(|v| v.as_str())
                    .map(|d| d == "input")
                    .unwrap_or(false);
                if is_input {
                    counters.metrics.input_failures += 1;
                } else {
                    counters.metrics.output_failures += 1;
                }
            }
            LayerEventKind::LowConfidence => {}
        }
        if let Some(snapshots) = event.metadata.get("snapshots").and_then(|v| v.as_u64()) {
            counters.metrics.snapshots += snapshots;
        }
    }

    /// Current counter snapshot
    pub fn metrics(&self) -> CaptureMetrics {
        self.counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .metrics
    }

    /// Whether an active conversation has gone quiet past the staleness window
    fn is_stale(&self) -> bool {
        if self.source.active_count() == 0 {
            return false;
        }
        match self.source.last_activity() {
            Some(last) => (Utc::now() - last).num_seconds() > STALE_AFTER_SECS,
            None => false,
        }
    }

    /// Build the full health report
    pub fn health(&self) -> SystemHealth {
        let (metrics, corrupted_files) = {
            let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
            (counters.metrics, counters.corrupted_files)
        };
        let stale = self.is_stale();
        let status = classify(&metrics, stale);

        let layers = LAYER_NAMES
            .iter()
            .map(|&name| {
                let capture_layer = name == "pty_capture" || name == "snapshot_capture";
                if stale && capture_layer {
                    LayerStatus::degraded(name, "no capture activity on active conversation")
                } else {
                    LayerStatus::healthy(name)
                }
            })
            .collect();

        SystemHealth {
            status,
            metrics,
            layers,
            uptime_secs: self.started_at.elapsed().as_secs(),
            active_conversations: self.source.active_count(),
            completed_conversations: self.source.completed_count(),
            corrupted_files,
        }
    }

    /// Validate one persisted conversation file and fold the result into the
    /// corrupted-file counter.
    pub fn validate_conversation_content(&self, path: &Path) -> FileValidation {
        let result = validate_file(path);
        if !result.valid {
            self.counters
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .corrupted_files += 1;
        }
        result
    }
}

/// Raw byte count attached to a capture event, 0 when absent
fn event_bytes(event: &LayerEvent) -> u64 {
    event
        .metadata
        .get("bytes")
        .and_then(|v| v.as_u64())
        .unwrap_or(0)
}

/// Classify overall status from counters and staleness.
///
/// The "nothing captured yet" case is healthy: an idle pipeline is not a
/// broken one.
pub fn classify(metrics: &CaptureMetrics, stale: bool) -> HealthStatus {
    if metrics.total_captures() > 0 {
        let ratio = metrics.failure_ratio();
        if ratio > FAILED_RATIO {
            return HealthStatus::Failed;
        }
        if ratio > DEGRADED_RATIO {
            return HealthStatus::Degraded;
        }
    }
    if stale {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}

/// Standalone data-quality check, distinct from live capture confidence:
/// re-opens a persisted file and flags residual ANSI artifacts or
/// near-empty content.
pub fn validate_file(path: &Path) -> FileValidation {
    let file = path.display().to_string();
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            return FileValidation {
                file,
                valid: false,
                reason: Some(format!("unreadable: {}", e)),
            };
        }
    };
    let conversation: Conversation = match serde_json::from_str(&content) {
        Ok(c) => c,
        Err(e) => {
            return FileValidation {
                file,
                valid: false,
                reason: Some(format!("malformed JSON: {}", e)),
            };
        }
    };

    let mut total_len = 0usize;
    for turn in &conversation.turns {
        if count_artifacts(&turn.content) > 0 {
            return FileValidation {
                file,
                valid: false,
                reason: Some("residual terminal artifacts in turn content".to_string()),
            };
        }
        total_len += turn.content.len();
    }
    if !conversation.turns.is_empty() && total_len < MIN_VALID_CONTENT {
        return FileValidation {
            file,
            valid: false,
            reason: Some(format!("total content below {} bytes", MIN_VALID_CONTENT)),
        };
    }

    FileValidation {
        file,
        valid: true,
        reason: None,
    }
}

/// Validate every conversation file in a directory. Per-file failures are
/// isolated: one bad file never aborts the rest of the scan.
pub fn validate_dir(dir: &Path) -> Vec<FileValidation> {
    let pattern = dir.join("*.json");
    let mut results = Vec::new();
    let Ok(paths) = glob::glob(&pattern.to_string_lossy()) else {
        return results;
    };
    for path in paths.flatten() {
        results.push(validate_file(&path));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource {
        active: usize,
        completed: usize,
        last: Option<DateTime<Utc>>,
    }

    impl ConversationSource for FixedSource {
        fn active_count(&self) -> usize {
            self.active
        }
        fn completed_count(&self) -> usize {
            self.completed
        }
        fn last_activity(&self) -> Option<DateTime<Utc>> {
            self.last
        }
    }

    fn metrics(turns: u64, failures: u64) -> CaptureMetrics {
        CaptureMetrics {
            input_turns: turns / 2,
            output_turns: turns - turns / 2,
            input_failures: failures / 2,
            output_failures: failures - failures / 2,
            ..Default::default()
        }
    }

    #[test]
    fn ratio_over_half_is_failed() {
        assert_eq!(classify(&metrics(10, 6), false), HealthStatus::Failed);
    }

    #[test]
    fn ratio_point_three_is_degraded() {
        assert_eq!(classify(&metrics(10, 3), false), HealthStatus::Degraded);
    }

    #[test]
    fn zero_failures_is_healthy() {
        assert_eq!(classify(&metrics(10, 0), false), HealthStatus::Healthy);
    }

    #[test]
    fn nothing_captured_yet_is_healthy() {
        assert_eq!(
            classify(&CaptureMetrics::default(), false),
            HealthStatus::Healthy
        );
    }

    #[test]
    fn staleness_degrades_an_otherwise_healthy_pipeline() {
        assert_eq!(classify(&metrics(4, 0), true), HealthStatus::Degraded);
    }

    #[test]
    fn monitor_counts_events() {
        let source = Arc::new(FixedSource {
            active: 1,
            completed: 0,
            last: Some(Utc::now()),
        });
        let monitor = HealthMonitor::new(source);
        monitor.record(&LayerEvent::new(
            LayerEventKind::UserInput,
            "conversation_capture",
            "tab-1",
        ));
        monitor.record(&LayerEvent::new(
            LayerEventKind::AssistantOutput,
            "conversation_capture",
            "tab-1",
        ));
        monitor.record(
            &LayerEvent::new(LayerEventKind::ParseFailure, "conversation_capture", "tab-1")
                .with_meta("direction", "input"),
        );
        let m = monitor.metrics();
        assert_eq!(m.input_turns, 1);
        assert_eq!(m.output_turns, 1);
        assert_eq!(m.input_failures, 1);
    }

    #[test]
    fn byte_counts_accumulate_per_direction() {
        let source = Arc::new(FixedSource {
            active: 0,
            completed: 0,
            last: None,
        });
        let monitor = HealthMonitor::new(source);
        monitor.record(
            &LayerEvent::new(LayerEventKind::UserInput, "conversation_log", "tab-1")
                .with_meta("bytes", 24),
        );
        monitor.record(
            &LayerEvent::new(LayerEventKind::AssistantOutput, "conversation_log", "tab-1")
                .with_meta("bytes", 512),
        );
        monitor.record(
            &LayerEvent::new(LayerEventKind::AssistantOutput, "conversation_log", "tab-1")
                .with_meta("bytes", 100),
        );
        let m = monitor.metrics();
        assert_eq!(m.bytes_in, 24);
        assert_eq!(m.bytes_out, 612);
    }

    #[test]
    fn health_report_has_five_layers() {
        let source = Arc::new(FixedSource {
            active: 0,
            completed: 3,
            last: None,
        });
        let monitor = HealthMonitor::new(source);
        let health = monitor.health();
        assert_eq!(health.layers.len(), 5);
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.completed_conversations, 3);
    }

    #[test]
    fn stale_active_conversation_degrades_capture_layers() {
        let source = Arc::new(FixedSource {
            active: 1,
            completed: 0,
            last: Some(Utc::now() - chrono::Duration::minutes(10)),
        });
        let monitor = HealthMonitor::new(source);
        let health = monitor.health();
        assert_eq!(health.status, HealthStatus::Degraded);
        let degraded: Vec<&str> = health
            .layers
            .iter()
            .filter(|l| l.status == HealthStatus::Degraded)
            .map(|l| l.name.as_str())
            .collect();
        assert_eq!(degraded, vec!["pty_capture", "snapshot_capture"]);
    }

    mod validation {
        use super::super::*;
        use crate::domain::{Conversation, ConversationTurn, TurnRole};
        use crate::logger::persist::save_conversation;

        fn conversation_with_content(content: &str) -> Conversation {
            let mut conversation = Conversation::new("tab-1", "claude", "interactive");
            conversation
                .turns
                .push(ConversationTurn::new(TurnRole::User, content, "claude"));
            conversation
        }

        #[test]
        fn residual_artifacts_flag_the_file_invalid() {
            let dir = tempfile::tempdir().unwrap();
            let conversation = conversation_with_content("[?25l corrupted [?25h");
            let path = save_conversation(dir.path(), &conversation).unwrap();
            let result = validate_file(&path);
            assert!(!result.valid);
            assert!(result.reason.unwrap().contains("artifacts"));
        }

        #[test]
        fn plain_prose_is_valid() {
            let dir = tempfile::tempdir().unwrap();
            let conversation =
                conversation_with_content("an ordinary sentence well past the minimum");
            let path = save_conversation(dir.path(), &conversation).unwrap();
            assert!(validate_file(&path).valid);
        }

        #[test]
        fn near_empty_content_is_invalid() {
            let dir = tempfile::tempdir().unwrap();
            let conversation = conversation_with_content("hi");
            let path = save_conversation(dir.path(), &conversation).unwrap();
            let result = validate_file(&path);
            assert!(!result.valid);
            assert!(result.reason.unwrap().contains("below"));
        }

        #[test]
        fn malformed_json_is_invalid_with_reason() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("broken.json");
            std::fs::write(&path, "{ not json").unwrap();
            let result = validate_file(&path);
            assert!(!result.valid);
            assert!(result.reason.unwrap().contains("malformed"));
        }

        #[test]
        fn dir_validation_isolates_bad_files() {
            let dir = tempfile::tempdir().unwrap();
            let good = conversation_with_content("an ordinary sentence well past the minimum");
            save_conversation(dir.path(), &good).unwrap();
            std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

            let results = validate_dir(dir.path());
            assert_eq!(results.len(), 2);
            assert_eq!(results.iter().filter(|r| r.valid).count(), 1);
            assert_eq!(results.iter().filter(|r| !r.valid).count(), 1);
        }
    }
}
