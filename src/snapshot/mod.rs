//! Snapshot-to-turn reconstruction.
//!
//! TUI-style tools repaint the whole screen, so successive snapshots mostly
//! repeat each other. Reconstruction runs provider-specific extraction over a
//! snapshot sequence and drops candidates whose prefix matches a turn already
//! emitted. Used incrementally (per new snapshot) during capture and
//! exhaustively at conversation end and during crash recovery.

use crate::domain::{ConversationTurn, ScreenSnapshot};
use crate::provider::ProviderOps;

/// Prefix length used for duplicate comparison
const DEDUP_PREFIX_CHARS: usize = 80;

/// How many preceding turns a candidate is compared against
const DEDUP_WINDOW: usize = 2;

/// Reconstruct turns from a full snapshot history
pub fn reconstruct(
    snapshots: &[ScreenSnapshot],
    provider: &dyn ProviderOps,
) -> Vec<ConversationTurn> {
    let mut turns: Vec<ConversationTurn> = Vec::new();
    for snapshot in snapshots {
        for candidate in provider.extract_turns(snapshot) {
            if !is_duplicate(&turns, &candidate) {
                turns.push(candidate);
            }
        }
    }
    turns
}

/// Whether `candidate` repeats one of the immediately preceding turns.
///
/// Snapshots capture overlapping screen regions, so an identical prefix on a
/// same-role turn almost always means the same content seen twice.
pub fn is_duplicate(previous: &[ConversationTurn], candidate: &ConversationTurn) -> bool {
    previous
        .iter()
        .rev()
        .take(DEDUP_WINDOW)
        .any(|prev| prev.role == candidate.role && prefix_matches(&prev.content, &candidate.content))
}

fn prefix_matches(a: &str, b: &str) -> bool {
    let a_prefix: String = a.chars().take(DEDUP_PREFIX_CHARS).collect();
    let b_prefix: String = b.chars().take(DEDUP_PREFIX_CHARS).collect();
    if a_prefix.is_empty() || b_prefix.is_empty() {
        return false;
    }
    a_prefix.starts_with(&b_prefix) || b_prefix.starts_with(&a_prefix)
}
