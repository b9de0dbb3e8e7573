//! Serve command implementation

use std::sync::Arc;

use anyhow::{Context, Result};

use ttyscribe::config::Config;
use ttyscribe::session::SessionOrchestrator;

/// Run the capture server until interrupted
pub async fn serve_command(config: Config) -> Result<()> {
    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!("failed to create data dir {}", config.data_dir.display())
    })?;

    let orchestrator = Arc::new(SessionOrchestrator::new(config));
    orchestrator.serve().await
}
