//! Uniform grid over item bounding boxes.
//!
//! Each entry is bucketed into every cell its rectangle touches. Queries walk
//! the cells overlapping the query rectangle, or the occupied cells when the
//! query covers more cells than exist. Entries spanning too many cells live
//! in an overflow list that every query scans.

use hashbrown::{HashMap, HashSet};
use kurbo::Rect;
use smallvec::SmallVec;

use super::ItemId;

/// Default edge length of a grid cell, in world units.
pub const DEFAULT_CELL_SIZE: f64 = 64.0;

/// Entries covering more cells than this go to the overflow list.
const MAX_ENTRY_CELLS: i64 = 256;

type CellKey = (i32, i32);

/// Inclusive range of cell coordinates.
#[derive(Debug, Copy, Clone)]
struct CellRange {
    x0: i32,
    y0: i32,
    x1: i32,
    y1: i32,
}

impl CellRange {
    fn count(self) -> i64 {
        let w = i64::from(self.x1) - i64::from(self.x0) + 1;
        let h = i64::from(self.y1) - i64::from(self.y0) + 1;
        w.saturating_mul(h)
    }

    fn contains(self, (x, y): CellKey) -> bool {
        x >= self.x0 && x <= self.x1 && y >= self.y0 && y <= self.y1
    }

    fn keys(self) -> impl Iterator<Item = CellKey> {
        (self.y0..=self.y1).flat_map(move |y| (self.x0..=self.x1).map(move |x| (x, y)))
    }
}

/// Rectangles touching along an edge or a corner intersect.
#[inline]
fn intersects(a: &Rect, b: &Rect) -> bool {
    a.x0 <= b.x1 && b.x0 <= a.x1 && a.y0 <= b.y1 && b.y0 <= a.y1
}

#[inline]
fn is_finite(r: &Rect) -> bool {
    r.x0.is_finite() && r.y0.is_finite() && r.x1.is_finite() && r.y1.is_finite()
}

/// Spatial index of one layer.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    cell_size: f64,
    cells: HashMap<CellKey, SmallVec<[ItemId; 8]>>,
    entries: HashMap<ItemId, Rect>,
    overflow: Vec<ItemId>,
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}

impl SpatialIndex {
    pub fn new(cell_size: f64) -> Self {
        debug_assert!(cell_size > 0.0, "cell_size must be strictly positive");
        Self {
            cell_size,
            cells: HashMap::new(),
            entries: HashMap::new(),
            overflow: Vec::new(),
        }
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Rectangle `id` was inserted with.
    pub fn rect(&self, id: ItemId) -> Option<Rect> {
        self.entries.get(&id).copied()
    }

    /// Every entry, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.entries.keys().copied()
    }

    /// Floor of `v` in cell units, saturated to `i32`.
    #[inline]
    fn cell_coord(&self, v: f64) -> i32 {
        (v / self.cell_size).floor() as i32
    }

    fn cell_range(&self, r: &Rect) -> CellRange {
        CellRange {
            x0: self.cell_coord(r.x0),
            y0: self.cell_coord(r.y0),
            x1: self.cell_coord(r.x1),
            y1: self.cell_coord(r.y1),
        }
    }

    /// `None` when the entry belongs in the overflow list.
    fn entry_cells(&self, r: &Rect) -> Option<CellRange> {
        if !is_finite(r) {
            return None;
        }
        let range = self.cell_range(r);
        (range.count() <= MAX_ENTRY_CELLS).then_some(range)
    }

    /// Adds `id` covering `rect`. Re-inserting an id replaces its rectangle.
    pub fn insert(&mut self, id: ItemId, rect: Rect) {
        let rect = rect.abs();
        if let Some(old) = self.entries.get(&id).copied() {
            self.unlink(id, &old);
        }
        match self.entry_cells(&rect) {
            Some(range) => {
                for key in range.keys() {
                    self.cells.entry(key).or_default().push(id);
                }
            }
            None => self.overflow.push(id),
        }
        self.entries.insert(id, rect);
    }

    /// Removes `id`, whose last inserted rectangle was `rect`. Returns whether
    /// the id was present.
    pub fn remove(&mut self, id: ItemId, rect: Rect) -> bool {
        let Some(stored) = self.entries.remove(&id) else {
            return false;
        };
        if stored != rect.abs() {
            log::trace!("index remove: {id:?} was inserted with {stored:?}, not {rect:?}");
        }
        self.unlink(id, &stored);
        true
    }

    fn unlink(&mut self, id: ItemId, rect: &Rect) {
        let Some(range) = self.entry_cells(rect) else {
            if let Some(pos) = self.overflow.iter().position(|&e| e == id) {
                self.overflow.swap_remove(pos);
            }
            return;
        };
        for key in range.keys() {
            let Some(cell) = self.cells.get_mut(&key) else {
                continue;
            };
            if let Some(pos) = cell.iter().position(|&e| e == id) {
                cell.swap_remove(pos);
            }
            if cell.is_empty() {
                self.cells.remove(&key);
            }
        }
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.entries.clear();
        self.overflow.clear();
    }

    /// Visits every entry intersecting `rect` once. The visitor returns
    /// `false` to stop; the result is `false` when the walk was stopped.
    pub fn query<F>(&self, rect: Rect, mut visitor: F) -> bool
    where
        F: FnMut(ItemId) -> bool,
    {
        let rect = rect.abs();
        if self.entries.is_empty() {
            return true;
        }

        let mut seen: HashSet<ItemId> = HashSet::new();
        let mut visit_cell = |ids: &SmallVec<[ItemId; 8]>, visitor: &mut F| -> bool {
            for &id in ids {
                let hit = self.entries.get(&id).is_some_and(|r| intersects(r, &rect));
                if hit && seen.insert(id) && !visitor(id) {
                    return false;
                }
            }
            true
        };

        let range = self.cell_range(&rect);
        if range.count() > self.cells.len() as i64 {
            for (&key, ids) in &self.cells {
                if range.contains(key) && !visit_cell(ids, &mut visitor) {
                    return false;
                }
            }
        } else {
            for key in range.keys() {
                if let Some(ids) = self.cells.get(&key) {
                    if !visit_cell(ids, &mut visitor) {
                        return false;
                    }
                }
            }
        }

        for &id in &self.overflow {
            let hit = self.entries.get(&id).is_some_and(|r| intersects(r, &rect));
            if hit && !visitor(id) {
                return false;
            }
        }
        true
    }

    /// Entries intersecting `rect`, collected.
    pub fn query_ids(&self, rect: Rect) -> Vec<ItemId> {
        let mut out = Vec::new();
        self.query(rect, |id| {
            out.push(id);
            true
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn id(index: u32) -> ItemId {
        ItemId { index, generation: 0 }
    }

    fn sorted(mut ids: Vec<ItemId>) -> Vec<ItemId> {
        ids.sort();
        ids
    }

    fn everything() -> Rect {
        Rect::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::INFINITY)
    }

    // ── queries ──────────────────────────────────────────────────────────

    #[test]
    fn full_extent_and_disjoint_queries_over_separated_rects() {
        let mut index = SpatialIndex::default();
        for i in 0..1000u32 {
            let x = (i % 40) as f64 * 100.0;
            let y = (i / 40) as f64 * 100.0;
            index.insert(id(i), Rect::new(x, y, x + 50.0, y + 50.0));
        }
        assert_eq!(index.len(), 1000);

        let all = index.query_ids(Rect::new(-10.0, -10.0, 4000.0, 2500.0));
        assert_eq!(all.len(), 1000);
        assert_eq!(index.query_ids(everything()).len(), 1000);

        assert!(index.query_ids(Rect::new(5000.0, 5000.0, 6000.0, 6000.0)).is_empty());
        // gap between four rectangles
        assert!(index.query_ids(Rect::new(60.0, 60.0, 90.0, 90.0)).is_empty());
    }

    #[test]
    fn touching_edges_intersect() {
        let mut index = SpatialIndex::default();
        index.insert(id(1), Rect::new(0.0, 0.0, 10.0, 10.0));
        assert_eq!(index.query_ids(Rect::new(10.0, 10.0, 20.0, 20.0)), vec![id(1)]);
        assert_eq!(index.query_ids(Rect::new(10.0, 0.0, 20.0, 5.0)), vec![id(1)]);
        assert!(index.query_ids(Rect::new(10.1, 0.0, 20.0, 5.0)).is_empty());
    }

    #[test]
    fn multi_cell_entries_are_visited_once() {
        let mut index = SpatialIndex::new(10.0);
        index.insert(id(7), Rect::new(-25.0, -25.0, 25.0, 25.0));
        let mut hits = 0;
        index.query(Rect::new(-100.0, -100.0, 100.0, 100.0), |_| {
            hits += 1;
            true
        });
        assert_eq!(hits, 1);
    }

    #[test]
    fn negative_coordinates_floor_into_cells() {
        let mut index = SpatialIndex::new(10.0);
        index.insert(id(1), Rect::new(-0.5, -0.5, -0.1, -0.1));
        assert_eq!(index.query_ids(Rect::new(-1.0, -1.0, -0.2, -0.2)), vec![id(1)]);
        assert!(index.query_ids(Rect::new(0.0, 0.0, 5.0, 5.0)).is_empty());
    }

    #[test]
    fn visitor_can_stop_the_walk() {
        let mut index = SpatialIndex::default();
        for i in 0..10 {
            index.insert(id(i), Rect::new(0.0, 0.0, 1.0, 1.0));
        }
        let mut seen = 0;
        let completed = index.query(Rect::new(0.0, 0.0, 1.0, 1.0), |_| {
            seen += 1;
            seen < 3
        });
        assert!(!completed);
        assert_eq!(seen, 3);
    }

    #[test]
    fn huge_entries_go_to_overflow() {
        let mut index = SpatialIndex::new(1.0);
        index.insert(id(1), Rect::new(-1e6, -1e6, 1e6, 1e6));
        index.insert(id(2), Rect::new(0.0, 0.0, 1.0, 1.0));
        assert_eq!(index.overflow, vec![id(1)]);
        assert_eq!(sorted(index.query_ids(Rect::new(0.5, 0.5, 0.6, 0.6))), vec![id(1), id(2)]);
        assert!(index.remove(id(1), Rect::new(-1e6, -1e6, 1e6, 1e6)));
        assert!(index.overflow.is_empty());
    }

    // ── mutation ─────────────────────────────────────────────────────────

    #[test]
    fn remove_drops_empty_cells() {
        let mut index = SpatialIndex::new(10.0);
        let r = Rect::new(0.0, 0.0, 15.0, 15.0);
        index.insert(id(1), r);
        assert_eq!(index.cells.len(), 4);
        assert!(index.remove(id(1), r));
        assert!(!index.remove(id(1), r));
        assert!(index.cells.is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn reinsert_replaces_the_rectangle() {
        let mut index = SpatialIndex::default();
        index.insert(id(1), Rect::new(0.0, 0.0, 1.0, 1.0));
        index.insert(id(1), Rect::new(500.0, 500.0, 501.0, 501.0));
        assert_eq!(index.len(), 1);
        assert!(index.query_ids(Rect::new(0.0, 0.0, 1.0, 1.0)).is_empty());
        assert_eq!(index.query_ids(Rect::new(500.0, 500.0, 501.0, 501.0)), vec![id(1)]);
    }

    #[test]
    fn matches_brute_force_over_random_edits() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut index = SpatialIndex::new(16.0);
        let mut present: HashMap<ItemId, Rect> = HashMap::new();

        for step in 0..2000u32 {
            let which = id(rng.random_range(0..200));
            if rng.random_ratio(1, 3) {
                if let Some(r) = present.remove(&which) {
                    assert!(index.remove(which, r));
                } else {
                    assert!(!index.remove(which, Rect::ZERO));
                }
            } else {
                let x = rng.random_range(-300.0..300.0);
                let y = rng.random_range(-300.0..300.0);
                let w = if step % 50 == 0 {
                    rng.random_range(0.0..5000.0)
                } else {
                    rng.random_range(0.0..40.0)
                };
                let h = rng.random_range(0.0..40.0);
                let r = Rect::new(x, y, x + w, y + h);
                index.insert(which, r);
                present.insert(which, r);
            }

            if step % 20 == 0 {
                let x = rng.random_range(-400.0..400.0);
                let y = rng.random_range(-400.0..400.0);
                let q = Rect::new(x, y, x + rng.random_range(0.0..200.0), y + rng.random_range(0.0..200.0));
                let expected: Vec<ItemId> = sorted(
                    present.iter().filter(|(_, r)| intersects(r, &q)).map(|(&i, _)| i).collect(),
                );
                assert_eq!(sorted(index.query_ids(q)), expected, "step {step}");
            }
        }
        assert_eq!(index.len(), present.len());
    }
}
