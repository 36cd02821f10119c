//! Ordered set difference over canonical tuples

use std::collections::HashSet;
use std::hash::Hash;

/// Which side of the difference to produce
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiffMode {
    /// Entities in `old` that are absent from `new` (to remove)
    Teardown,
    /// Entities in `new` that are absent from `old` (to add)
    Buildup,
}

/// Compute `old \ new` (teardown) or `new \ old` (buildup).
///
/// Output follows the insertion order of the scanned input and collapses
/// duplicates to their first occurrence. Equality is full structural
/// equality, so a changed field shows up on both sides.
pub fn diff<T>(old: &[T], new: &[T], mode: DiffMode) -> Vec<T>
where
    T: Eq + Hash + Clone,
{
    let (scanned, other) = match mode {
        DiffMode::Teardown => (old, new),
        DiffMode::Buildup => (new, old),
    };
    let other: HashSet<&T> = other.iter().collect();
    let mut emitted: HashSet<&T> = HashSet::new();

    scanned
        .iter()
        .filter(|item| !other.contains(item) && emitted.insert(*item))
        .cloned()
        .collect()
}
