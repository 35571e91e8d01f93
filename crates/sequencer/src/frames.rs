//! Frame sequencing: `index` is a dense, unique `1..=N` run per project.

use shared::domain::FrameId;

use crate::renumber::{compact_and_reorder, Direction, RenumberPlan, Slot};

/// Index for a frame appended after `existing`.
pub fn next_index(existing: impl IntoIterator<Item = i64>) -> i64 {
    existing.into_iter().max().unwrap_or(0) + 1
}

/// Renumbers `frames` into `1..=N` following the client's id order.
pub fn plan_reorder(frames: &[Slot<FrameId>], requested: &[FrameId]) -> RenumberPlan<FrameId> {
    compact_and_reorder(frames, requested, Direction::Ascending)
}

/// Closes the gap left by a deleted frame, keeping index order.
pub fn plan_compaction(frames: &[Slot<FrameId>]) -> RenumberPlan<FrameId> {
    plan_reorder(frames, &[])
}

/// Index the editor should select after deleting the frame at `deleted_index`.
///
/// This is a positional clamp into `[1, remaining]`, not an identity match.
pub fn active_index_after_delete(deleted_index: i64, remaining: usize) -> i64 {
    let upper = i64::try_from(remaining).unwrap_or(i64::MAX).max(1);
    deleted_index.clamp(1, upper)
}
