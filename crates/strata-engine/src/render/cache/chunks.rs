use std::collections::{BTreeMap, BTreeSet};

/// Free regions of a vertex buffer.
///
/// Regions are indexed twice: by `(size, offset)` for best-fit lookup and by
/// offset for neighbour merging. Adjacent regions never coexist; `insert`
/// merges them.
#[derive(Debug, Default, Clone)]
pub(crate) struct FreeChunks {
    by_size: BTreeSet<(u32, u32)>,
    by_offset: BTreeMap<u32, u32>,
    total: u32,
}

impl FreeChunks {
    pub fn with_chunk(offset: u32, size: u32) -> Self {
        let mut free = Self::default();
        free.insert(offset, size);
        free
    }

    /// Sum of all free region sizes.
    #[inline]
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Number of disjoint free regions.
    #[inline]
    pub fn len(&self) -> usize {
        self.by_offset.len()
    }

    /// Adds a free region, merging it with the regions that touch it.
    pub fn insert(&mut self, offset: u32, size: u32) {
        if size == 0 {
            return;
        }
        let mut start = offset;
        let mut len = size;

        if let Some((&prev, &prev_size)) = self.by_offset.range(..offset).next_back() {
            debug_assert!(prev + prev_size <= offset, "free region overlaps its predecessor");
            if prev + prev_size == offset {
                self.unlink(prev, prev_size);
                start = prev;
                len += prev_size;
            }
        }
        if let Some(&next_size) = self.by_offset.get(&(offset + size)) {
            self.unlink(offset + size, next_size);
            len += next_size;
        }
        debug_assert!(
            self.by_offset.range(start..start + len).next().is_none(),
            "free region overlaps its successor"
        );
        self.link(start, len);
    }

    /// Smallest region that holds `size` vertices (lowest offset on ties), as `(offset, size)`.
    pub fn best_fit(&self, size: u32) -> Option<(u32, u32)> {
        self.by_size.range((size, 0)..).next().map(|&(s, o)| (o, s))
    }

    /// Size of the region starting exactly at `offset`.
    pub fn at(&self, offset: u32) -> Option<u32> {
        self.by_offset.get(&offset).copied()
    }

    /// Removes the region starting at `offset` and returns its size.
    pub fn take(&mut self, offset: u32) -> Option<u32> {
        let size = self.at(offset)?;
        self.unlink(offset, size);
        Some(size)
    }

    /// Replaces every region with a single one (nothing if `size == 0`).
    pub fn reset(&mut self, offset: u32, size: u32) {
        self.by_size.clear();
        self.by_offset.clear();
        self.total = 0;
        self.insert(offset, size);
    }

    /// Regions in offset order, as `(offset, size)`.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.by_offset.iter().map(|(&o, &s)| (o, s))
    }

    fn link(&mut self, offset: u32, size: u32) {
        self.by_offset.insert(offset, size);
        self.by_size.insert((size, offset));
        self.total += size;
    }

    fn unlink(&mut self, offset: u32, size: u32) {
        self.by_offset.remove(&offset);
        self.by_size.remove(&(size, offset));
        self.total -= size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regions(free: &FreeChunks) -> Vec<(u32, u32)> {
        free.iter().collect()
    }

    // ── merging ───────────────────────────────────────────────────────────

    #[test]
    fn adjacent_regions_merge() {
        let mut free = FreeChunks::default();
        free.insert(0, 10);
        free.insert(20, 10);
        assert_eq!(free.len(), 2);
        free.insert(10, 10);
        assert_eq!(regions(&free), vec![(0, 30)]);
        assert_eq!(free.total(), 30);
    }

    #[test]
    fn zero_sized_insert_is_ignored() {
        let mut free = FreeChunks::with_chunk(5, 5);
        free.insert(10, 0);
        assert_eq!(regions(&free), vec![(5, 5)]);
    }

    // ── lookup ────────────────────────────────────────────────────────────

    #[test]
    fn best_fit_prefers_smallest_then_lowest_offset() {
        let mut free = FreeChunks::default();
        free.insert(0, 64);
        free.insert(100, 16);
        free.insert(200, 16);
        free.insert(300, 32);
        assert_eq!(free.best_fit(10), Some((100, 16)));
        assert_eq!(free.best_fit(17), Some((300, 32)));
        assert_eq!(free.best_fit(65), None);
    }

    #[test]
    fn take_and_reset_keep_total_consistent() {
        let mut free = FreeChunks::default();
        free.insert(0, 8);
        free.insert(16, 8);
        assert_eq!(free.take(16), Some(8));
        assert_eq!(free.take(16), None);
        assert_eq!(free.total(), 8);
        free.reset(4, 100);
        assert_eq!(regions(&free), vec![(4, 100)]);
        assert_eq!(free.total(), 100);
    }
}
