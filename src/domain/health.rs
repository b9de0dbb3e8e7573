use serde::{Deserialize, Serialize};

/// Aggregated capture counters for one pipeline
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CaptureMetrics {
    /// User turns successfully captured
    pub input_turns: u64,
    /// Assistant turns successfully captured
    pub output_turns: u64,
    /// Failed user-input cleanings
    pub input_failures: u64,
    /// Failed output parses
    pub output_failures: u64,
    /// Raw bytes seen on the input path
    pub bytes_in: u64,
    /// Raw bytes seen on the output path
    pub bytes_out: u64,
    /// Screen snapshots taken
    pub snapshots: u64,
    /// Conversations started
    pub conversations_started: u64,
    /// Conversations completed
    pub conversations_ended: u64,
}

impl CaptureMetrics {
    /// Total turn attempts (successes plus failures)
    pub fn total_captures(&self) -> u64 {
        self.input_turns + self.output_turns + self.input_failures + self.output_failures
    }

    /// Failure ratio over successful turns; 0.0 when nothing was captured
    pub fn failure_ratio(&self) -> f64 {
        let turns = self.input_turns + self.output_turns;
        let failures = self.input_failures + self.output_failures;
        if turns == 0 {
            if failures == 0 { 0.0 } else { 1.0 }
        } else {
            failures as f64 / turns as f64
        }
    }
}

/// Derived overall pipeline status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Failed,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Degraded => write!(f, "DEGRADED"),
            HealthStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Status of one named pipeline layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerStatus {
    /// Layer name (e.g., "pty_capture")
    pub name: String,
    /// Current status
    pub status: HealthStatus,
    /// Optional human-readable detail
    pub detail: Option<String>,
}

impl LayerStatus {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            detail: None,
        }
    }

    pub fn degraded(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            detail: Some(detail.into()),
        }
    }
}

/// Full health report: overall status, counters, and per-layer statuses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    /// Derived overall status
    pub status: HealthStatus,
    /// Aggregated counters
    pub metrics: CaptureMetrics,
    /// Fixed list of named layer statuses
    pub layers: Vec<LayerStatus>,
    /// Seconds since the monitor started
    pub uptime_secs: u64,
    /// Active (incomplete) conversations
    pub active_conversations: usize,
    /// Completed conversations
    pub completed_conversations: usize,
    /// Persisted files that failed content validation
    pub corrupted_files: usize,
}
