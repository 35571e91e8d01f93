//! Layer stacking: higher `order` is closer to the viewer.

use shared::domain::{LayerId, MAX_NAME_CHARS};

use crate::renumber::{compact_and_reorder, Direction, RenumberPlan, Slot};

pub const DEFAULT_LAYER_NAME: &str = "Background";
pub const MAX_OPACITY: u8 = 100;

/// Field values for a layer about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLayer {
    pub name: String,
    pub order: i64,
    pub visible: bool,
    pub opacity: u8,
}

impl NewLayer {
    /// The layer every frame falls back to when it has none.
    pub fn background() -> Self {
        Self {
            name: DEFAULT_LAYER_NAME.to_string(),
            order: 1,
            visible: true,
            opacity: MAX_OPACITY,
        }
    }
}

/// Repairs the "at least one layer" invariant: returns the layer to insert
/// when `layers` is empty, nothing otherwise.
pub fn ensure_default<T>(layers: &[T]) -> Option<NewLayer> {
    layers.is_empty().then(NewLayer::background)
}

/// Order for a layer appended on top of `existing`.
pub fn next_order(existing: impl IntoIterator<Item = i64>) -> i64 {
    existing.into_iter().max().unwrap_or(0) + 1
}

/// Name given to an unnamed layer when it becomes the `count`-th layer.
pub fn fallback_name(count: usize) -> String {
    format!("Layer {count}")
}

/// Renumbers layers from a front-most-first id list: the first id receives
/// order `N`, the last receives 1.
pub fn plan_reorder(layers: &[Slot<LayerId>], requested: &[LayerId]) -> RenumberPlan<LayerId> {
    compact_and_reorder(layers, requested, Direction::Descending)
}

/// Closes gaps in `order` while keeping the current stacking.
pub fn plan_compaction(layers: &[Slot<LayerId>]) -> RenumberPlan<LayerId> {
    plan_reorder(layers, &[])
}

pub fn clamp_opacity(raw: i64) -> u8 {
    raw.clamp(0, i64::from(MAX_OPACITY)) as u8
}

/// Trimmed name, or `None` when it is blank or too long.
pub fn normalize_name(raw: &str) -> Option<String> {
    let name = raw.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_CHARS {
        return None;
    }
    Some(name.to_string())
}

/// Validated partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerPatch {
    pub name: Option<String>,
    pub visible: Option<bool>,
    pub opacity: Option<u8>,
}

impl LayerPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.visible.is_none() && self.opacity.is_none()
    }
}
