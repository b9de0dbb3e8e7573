//! Per-tab conversation log registry.
//!
//! Owned by the session orchestrator (the composition root) and injected
//! into coordinators, deliberately not a process-wide map, so sessions and
//! tests never couple through hidden globals.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::events::health::ConversationSource;
use crate::events::EventBus;
use crate::provider::ProviderRegistry;

use super::{ConversationLog, SnapshotLimits};

/// Registry of one [`ConversationLog`] per tab
pub struct LogRegistry {
    data_dir: PathBuf,
    bus: Arc<EventBus>,
    providers: ProviderRegistry,
    limits: SnapshotLimits,
    logs: Mutex<HashMap<String, Arc<ConversationLog>>>,
}

impl LogRegistry {
    pub fn new(
        data_dir: PathBuf,
        bus: Arc<EventBus>,
        providers: ProviderRegistry,
        limits: SnapshotLimits,
    ) -> Self {
        Self {
            data_dir,
            bus,
            providers,
            limits,
            logs: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create the log for a tab
    pub fn for_tab(&self, tab_id: &str) -> Arc<ConversationLog> {
        let mut logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        logs.entry(tab_id.to_string())
            .or_insert_with(|| {
                Arc::new(ConversationLog::new(
                    tab_id,
                    self.data_dir.clone(),
                    self.bus.clone(),
                    self.providers.clone(),
                    self.limits,
                ))
            })
            .clone()
    }

    /// Drop a tab's log, ending any active conversation first
    pub async fn close_tab(&self, tab_id: &str) {
        let log = {
            let mut logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
            logs.remove(tab_id)
        };
        if let Some(log) = log {
            log.close().await;
        }
    }

    /// Registered tab IDs
    pub fn tab_ids(&self) -> Vec<String> {
        self.logs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    fn snapshot(&self) -> Vec<Arc<ConversationLog>> {
        self.logs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }
}

impl ConversationSource for LogRegistry {
    fn active_count(&self) -> usize {
        self.snapshot().iter().map(|l| l.active_count()).sum()
    }

    fn completed_count(&self) -> usize {
        self.snapshot().iter().map(|l| l.completed_count()).sum()
    }

    fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.snapshot().iter().filter_map(|l| l.last_activity()).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::DetectedCommand;

    #[test]
    fn for_tab_returns_same_instance() {
        let dir = tempfile::tempdir().unwrap();
        let registry = LogRegistry::new(
            dir.path().to_path_buf(),
            Arc::new(EventBus::new()),
            ProviderRegistry::with_defaults(),
            SnapshotLimits::default(),
        );
        let a = registry.for_tab("tab-1");
        let b = registry.for_tab("tab-1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.tab_ids().len(), 1);
    }

    #[test]
    fn source_counts_span_tabs() {
        let dir = tempfile::tempdir().unwrap();
        let registry = LogRegistry::new(
            dir.path().to_path_buf(),
            Arc::new(EventBus::new()),
            ProviderRegistry::with_defaults(),
            SnapshotLimits::default(),
        );
        let detected = DetectedCommand {
            provider: "claude".to_string(),
            command_type: "interactive".to_string(),
            tui_mode: false,
            command: "claude".to_string(),
        };
        registry.for_tab("tab-1").start_conversation(&detected, dir.path());
        registry.for_tab("tab-2").start_conversation(&detected, dir.path());
        assert_eq!(registry.active_count(), 2);
        registry.for_tab("tab-1").end_conversation();
        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.completed_count(), 1);
    }
}
