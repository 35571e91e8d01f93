//! Storage-free ordering rules for frames within a project and layers within
//! a frame.
//!
//! Everything here is pure: callers hand in `(id, position)` pairs and get back
//! the writes to perform. Applying them inside a transaction is the storage
//! layer's job.

pub mod frames;
pub mod layers;
pub mod renumber;

pub use renumber::{
    compact_and_reorder, is_dense, Assignment, Direction, RenumberPlan, Slot, STAGING_OFFSET,
};
