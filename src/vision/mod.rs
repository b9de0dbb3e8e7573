//! Vision pattern detection interface.
//!
//! The actual detectors (git status, JSON blobs, stack traces, file paths)
//! are an external collaborator; the pipeline only needs `detect` over a raw
//! byte buffer. Matches become `VISION_OVERLAY` messages on the outbound
//! queue when vision is enabled.

use serde::Serialize;

/// One detector hit over a PTY byte chunk
#[derive(Debug, Clone, Serialize)]
pub struct VisionMatch {
    /// What was recognized (e.g., "git_status", "stack_trace")
    pub overlay_type: String,
    /// Detector-specific payload forwarded to the client as-is
    pub payload: serde_json::Value,
}

/// Black-box pattern detector over raw PTY bytes
pub trait Detector: Send + Sync {
    fn detect(&self, buffer: &[u8]) -> Option<VisionMatch>;
}

/// Detector that never matches; used when no vision backend is wired in
#[derive(Default)]
pub struct NoopDetector;

impl Detector for NoopDetector {
    fn detect(&self, _buffer: &[u8]) -> Option<VisionMatch> {
        None
    }
}
