use std::{
    collections::{HashMap, HashSet},
    hash::Hash,
};

/// Floor for the temporary positions written in the staging phase. Real
/// positions never get close to it.
pub const STAGING_OFFSET: i64 = 1_000_000;

/// One item of an ordered collection: a stable identity and where it sits now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot<Id> {
    pub id: Id,
    pub position: i64,
}

impl<Id> Slot<Id> {
    pub fn new(id: Id, position: i64) -> Self {
        Self { id, position }
    }
}

/// How ranks in the desired order map onto positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Rank 0 gets position 1, rank `N-1` gets `N`.
    Ascending,
    /// Rank 0 gets position `N`, rank `N-1` gets 1.
    Descending,
}

/// A single positional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment<Id> {
    pub id: Id,
    pub position: i64,
}

/// The writes needed to move a collection into its target order without
/// two items ever sharing a position.
///
/// `staging` must be applied in full before `settle`. Both only mention items
/// whose position actually changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenumberPlan<Id> {
    pub staging: Vec<Assignment<Id>>,
    pub settle: Vec<Assignment<Id>>,
    /// Every item with its final position, in target order.
    pub slots: Vec<Slot<Id>>,
}

impl<Id: Copy + Eq> RenumberPlan<Id> {
    pub fn is_noop(&self) -> bool {
        self.settle.is_empty()
    }

    pub fn final_position(&self, id: Id) -> Option<i64> {
        self.slots
            .iter()
            .find(|slot| slot.id == id)
            .map(|slot| slot.position)
    }

    pub fn ids(&self) -> Vec<Id> {
        self.slots.iter().map(|slot| slot.id).collect()
    }
}

/// Target order for `items` given a client-requested id sequence.
///
/// Requested ids come first in the order given; unknown and repeated ids are
/// skipped. Items the request does not mention follow in their prior order,
/// which is position ascending for [`Direction::Ascending`] and position
/// descending for [`Direction::Descending`]. Ties keep input order.
pub fn desired_order<Id>(items: &[Slot<Id>], requested: &[Id], direction: Direction) -> Vec<Id>
where
    Id: Copy + Eq + Hash,
{
    let mut prior: Vec<Slot<Id>> = items.to_vec();
    match direction {
        Direction::Ascending => prior.sort_by_key(|slot| slot.position),
        Direction::Descending => prior.sort_by_key(|slot| std::cmp::Reverse(slot.position)),
    }

    let known: HashSet<Id> = prior.iter().map(|slot| slot.id).collect();
    let mut placed: HashSet<Id> = HashSet::with_capacity(prior.len());
    let mut order = Vec::with_capacity(prior.len());

    for id in requested {
        if known.contains(id) && placed.insert(*id) {
            order.push(*id);
        }
    }
    for slot in &prior {
        if placed.insert(slot.id) {
            order.push(slot.id);
        }
    }
    order
}

/// Plans a dense renumbering of `items` into `1..=N` following `requested`.
///
/// Passing an empty `requested` compacts the collection in place, closing gaps
/// while keeping relative order.
pub fn compact_and_reorder<Id>(
    items: &[Slot<Id>],
    requested: &[Id],
    direction: Direction,
) -> RenumberPlan<Id>
where
    Id: Copy + Eq + Hash,
{
    let order = desired_order(items, requested, direction);
    let count = order.len() as i64;
    let current: HashMap<Id, i64> = items.iter().map(|slot| (slot.id, slot.position)).collect();

    // Staged positions sit above every current and every final position.
    let base = items
        .iter()
        .map(|slot| slot.position)
        .max()
        .unwrap_or(0)
        .max(count)
        .max(STAGING_OFFSET);

    let mut plan = RenumberPlan {
        staging: Vec::new(),
        settle: Vec::new(),
        slots: Vec::with_capacity(order.len()),
    };

    for (rank, id) in order.into_iter().enumerate() {
        let rank = rank as i64;
        let target = match direction {
            Direction::Ascending => rank + 1,
            Direction::Descending => count - rank,
        };
        plan.slots.push(Slot::new(id, target));

        if current.get(&id) != Some(&target) {
            plan.staging.push(Assignment {
                id,
                position: base + rank + 1,
            });
            plan.settle.push(Assignment {
                id,
                position: target,
            });
        }
    }

    plan
}

/// True when `positions` is exactly `1..=N` for some `N`, in any order.
pub fn is_dense(positions: impl IntoIterator<Item = i64>) -> bool {
    let mut positions: Vec<i64> = positions.into_iter().collect();
    positions.sort_unstable();
    positions
        .iter()
        .enumerate()
        .all(|(i, position)| *position == i as i64 + 1)
}

#[cfg(test)]
#[path = "tests/renumber_tests.rs"]
mod tests;
