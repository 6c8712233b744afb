//! Fractional ordering positions for board columns
//!
//! Items in a column are ordered by an `f64` position. Inserting between two
//! items takes the midpoint of their positions, so a move only ever rewrites
//! the moving item. When two neighbours get too close to split, the whole
//! column is respaced to multiples of [`BASE_GAP`] and the midpoint is taken
//! again.

/// Default spacing between consecutive items.
pub const BASE_GAP: f64 = 60_000.0;

/// Smallest gap between neighbours that can still be split.
pub const MIN_GAP: f64 = 1e-5;

/// Result of placing an item in a column
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    /// Position for the inserted item
    pub position: f64,
    /// New positions for the existing siblings, in their current order,
    /// when the column had to be respaced first
    pub reindexed: Option<Vec<f64>>,
}

impl Allocation {
    pub fn is_reindexed(&self) -> bool {
        self.reindexed.is_some()
    }
}

/// Compute a position for an item inserted at `index` among `siblings`.
///
/// `siblings` must be the positions of the other items of the column in
/// display order. The moving item itself must not be part of it, otherwise it
/// ends up as its own neighbour. `index` past the end means "append".
pub fn allocate(siblings: &[f64], index: usize) -> Allocation {
    let index = index.min(siblings.len());

    if !needs_reindex(siblings) {
        if let Some(position) = between(siblings, index) {
            return Allocation {
                position,
                reindexed: None,
            };
        }
    }

    let reindexed = reindex(siblings.len());
    // Respaced neighbours are BASE_GAP apart, splitting them cannot fail.
    let position = between(&reindexed, index).unwrap_or(BASE_GAP * (index as f64 + 0.5));

    Allocation {
        position,
        reindexed: Some(reindexed),
    }
}

/// Position for an item appended after `last`.
pub fn tail_position(last: Option<f64>) -> f64 {
    match last {
        Some(last) => last + BASE_GAP,
        None => BASE_GAP,
    }
}

/// Evenly spaced positions `1×BASE_GAP, 2×BASE_GAP, …` for `len` items.
pub fn reindex(len: usize) -> Vec<f64> {
    (1..=len).map(|i| i as f64 * BASE_GAP).collect()
}

/// Whether any pair of adjacent positions is too close (or out of order).
pub fn needs_reindex(positions: &[f64]) -> bool {
    positions
        .windows(2)
        .any(|pair| !(pair[1] - pair[0] >= MIN_GAP))
        || positions.first().is_some_and(|first| !(*first >= MIN_GAP))
}

/// Midpoint between the neighbours of `index`, or `None` when the gap is too
/// small to produce a distinct value.
fn between(positions: &[f64], index: usize) -> Option<f64> {
    let prev = index.checked_sub(1).and_then(|i| positions.get(i)).copied();
    let next = positions.get(index).copied();

    match (prev, next) {
        (None, None) => Some(BASE_GAP),
        (Some(prev), None) => Some(prev + BASE_GAP),
        (None, Some(next)) => split(0.0, next),
        (Some(prev), Some(next)) => split(prev, next),
    }
}

fn split(low: f64, high: f64) -> Option<f64> {
    if !(high - low >= MIN_GAP) {
        return None;
    }
    let mid = low + (high - low) / 2.0;
    // Float rounding can land on an endpoint.
    (mid > low && mid < high).then_some(mid)
}
