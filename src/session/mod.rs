//! Session orchestration: the composition root.
//!
//! Builds the event bus, provider registry, conversation logs, and health
//! monitor once, then hands each accepted WebSocket connection its own PTY
//! and coordinator. Collaborators are injected rather than reached through
//! globals, so tests can swap in fixtures.

mod connection;
mod coordinator;
mod pty;

pub use connection::{ClientMessage, CloseReason, ControlMessage, Outbound};
pub use coordinator::{SessionCoordinator, SessionSettings, Shutdown};
pub use pty::PtyHandle;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::detect::{CommandDetector, DefaultCommandDetector};
use crate::domain::SystemHealth;
use crate::events::health::HealthMonitor;
use crate::events::EventBus;
use crate::logger::{LogRegistry, SnapshotLimits};
use crate::provider::ProviderRegistry;
use crate::vision::{Detector, NoopDetector};

/// Initial terminal dimensions; the client resizes immediately after connect
const INITIAL_COLS: u16 = 80;
const INITIAL_ROWS: u16 = 24;

/// Owns the long-lived pipeline pieces and accepts client connections
pub struct SessionOrchestrator {
    config: Config,
    bus: Arc<EventBus>,
    registry: Arc<LogRegistry>,
    monitor: Arc<HealthMonitor>,
    providers: ProviderRegistry,
    detector: Arc<dyn CommandDetector>,
    vision: Arc<dyn Detector>,
}

impl SessionOrchestrator {
    pub fn new(config: Config) -> Self {
        let bus = Arc::new(EventBus::new());
        let providers = ProviderRegistry::with_defaults();
        let registry = Arc::new(LogRegistry::new(
            config.data_dir.clone(),
            bus.clone(),
            providers.clone(),
            SnapshotLimits {
                max_snapshots: config.max_snapshots,
                keep_recent: config.snapshot_keep_recent,
            },
        ));
        let monitor = HealthMonitor::attach(&bus, registry.clone());
        Self {
            config,
            bus,
            registry,
            monitor,
            providers,
            detector: Arc::new(DefaultCommandDetector),
            vision: Arc::new(NoopDetector),
        }
    }

    /// Swap in a command detector
    pub fn with_detector(mut self, detector: Arc<dyn CommandDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Swap in a vision backend
    pub fn with_vision(mut self, vision: Arc<dyn Detector>) -> Self {
        self.vision = vision;
        self
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn registry(&self) -> Arc<LogRegistry> {
        self.registry.clone()
    }

    /// Current pipeline health
    pub fn health(&self) -> SystemHealth {
        self.monitor.health()
    }

    fn settings(&self) -> SessionSettings {
        SessionSettings {
            response_timeout: Duration::from_secs(self.config.response_timeout_secs),
            session_ceiling: Duration::from_secs(self.config.session_ceiling_hours * 3600),
            vision_enabled: self.config.vision_enabled,
            auto_respond: self.config.auto_respond,
        }
    }

    /// Accept WebSocket connections forever, one session per connection
    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        info!(%addr, shell = %self.config.shell, "listening for sessions");

        loop {
            let (stream, peer) = listener.accept().await.context("accept failed")?;
            let orchestrator = self.clone();
            tokio::spawn(async move {
                if let Err(err) = orchestrator.handle_connection(stream).await {
                    error!(%peer, error = %err, "session failed");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: tokio::net::TcpStream) -> Result<()> {
        let ws = accept_async(stream)
            .await
            .context("websocket handshake failed")?;

        let tab_id = new_tab_id();
        let cwd = std::env::current_dir().unwrap_or_else(|_| "/".into());
        let (pty, reader) =
            PtyHandle::spawn(&self.config.shell, &cwd, INITIAL_COLS, INITIAL_ROWS)?;
        let log = self.registry.for_tab(&tab_id);

        let coordinator = SessionCoordinator::new(
            tab_id.clone(),
            pty,
            reader,
            log,
            self.providers.clone(),
            self.detector.clone(),
            self.vision.clone(),
            self.settings(),
        );
        let result = coordinator.run(ws).await;
        self.registry.close_tab(&tab_id).await;
        result
    }
}

/// Session/tab identifier: epoch millis plus a short random suffix, sortable
/// by creation time and unique enough across restarts.
fn new_tab_id() -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
    format!("pty-{}-{}", Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tab_ids_are_unique_and_well_formed() {
        let a = new_tab_id();
        let b = new_tab_id();
        assert_ne!(a, b);
        assert!(a.starts_with("pty-"));
        let parts: Vec<&str> = a.splitn(3, '-').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 8);
    }

    #[test]
    fn orchestrator_wires_health_through_registry() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().to_path_buf();
        let orchestrator = SessionOrchestrator::new(config);
        let health = orchestrator.health();
        assert_eq!(health.layers.len(), 5);
        assert_eq!(health.active_conversations, 0);
    }
}
