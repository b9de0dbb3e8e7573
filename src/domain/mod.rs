//! Core domain types for ttyscribe

mod conversation;
mod event;
mod health;
mod restore;
mod turn;

pub use conversation::{Conversation, Metadata, ScreenSnapshot, MAX_TURNS};
pub use event::{LayerEvent, LayerEventKind};
pub use health::{CaptureMetrics, HealthStatus, LayerStatus, SystemHealth};
pub use restore::RestoreContext;
pub use turn::{CaptureMethod, ConversationTurn, TurnRole};
