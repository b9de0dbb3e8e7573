//! ttyscribe - terminal session capture and recovery
//!
//! Sits between a PTY running the user's shell and a remote WebSocket
//! client, forwarding terminal bytes while reconstructing AI-CLI
//! conversations (Claude, Codex, Gemini) from the raw byte stream.
//! Conversations are cleaned, attributed into turns, persisted as JSON,
//! and recoverable after a crash.

pub mod capture;
pub mod config;
pub mod detect;
pub mod domain;
pub mod events;
pub mod logger;
pub mod provider;
pub mod recovery;
pub mod session;
pub mod snapshot;
pub mod vision;

pub use domain::*;
