//! Per-item bookkeeping and the table addressing it by [`ItemId`].

use std::rc::{Rc, Weak};

use hashbrown::HashMap;
use kurbo::Rect;
use smallvec::SmallVec;

use crate::render::cache::GroupId;

use super::{ItemId, LayerId, LayerSet, UpdateFlags, ViewItem, Visibility};

pub(crate) struct ItemRecord {
    pub item: Weak<dyn ViewItem>,
    /// Position in the insertion-ordered list of the table.
    pub order_index: usize,
    /// Cached group per layer; only layers drawn from the cache have one.
    pub groups: SmallVec<[(LayerId, GroupId); 2]>,
    /// Bounds the item is indexed with.
    pub bbox: Rect,
    /// Layers the item is indexed on.
    pub layers: LayerSet,
    pub priority: i32,
    pub visibility: Visibility,
    pub pending: UpdateFlags,
}

impl ItemRecord {
    pub fn new(item: &Rc<dyn ViewItem>, bbox: Rect, layers: LayerSet, priority: i32) -> Self {
        Self {
            item: Rc::downgrade(item),
            order_index: 0,
            groups: SmallVec::new(),
            bbox,
            layers,
            priority,
            visibility: Visibility::VISIBLE,
            pending: UpdateFlags::INITIAL_ADD,
        }
    }

    pub fn group(&self, layer: LayerId) -> Option<GroupId> {
        self.groups.iter().find(|(l, _)| *l == layer).map(|&(_, g)| g)
    }

    pub fn set_group(&mut self, layer: LayerId, group: GroupId) {
        match self.groups.iter_mut().find(|(l, _)| *l == layer) {
            Some(entry) => entry.1 = group,
            None => self.groups.push((layer, group)),
        }
    }

    pub fn take_group(&mut self, layer: LayerId) -> Option<GroupId> {
        let pos = self.groups.iter().position(|(l, _)| *l == layer)?;
        Some(self.groups.swap_remove(pos).1)
    }

    /// Re-keys groups after layer ids were remapped.
    pub fn reorder_groups(&mut self, map: &HashMap<LayerId, LayerId>) {
        for (layer, _) in &mut self.groups {
            if let Some(&to) = map.get(layer) {
                *layer = to;
            }
        }
    }

    pub fn is_renderable(&self) -> bool {
        self.visibility.is_renderable()
    }
}

struct Slot {
    generation: u32,
    record: Option<ItemRecord>,
}

/// Generational slots plus an insertion-ordered list of ids.
///
/// Removal tombstones the ordered list; it is compacted once more than
/// `compact_threshold` tombstones have accumulated, refreshing every
/// record's `order_index`.
pub(crate) struct ItemTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    order: Vec<Option<ItemId>>,
    tombstones: usize,
    compact_threshold: usize,
    len: usize,
}

impl ItemTable {
    pub fn new(compact_threshold: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            order: Vec::new(),
            tombstones: 0,
            compact_threshold,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn insert(&mut self, mut record: ItemRecord) -> ItemId {
        record.order_index = self.order.len();
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.record = Some(record);
                ItemId { index, generation: slot.generation }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot { generation: 0, record: Some(record) });
                ItemId { index, generation: 0 }
            }
        };
        self.order.push(Some(id));
        self.len += 1;
        id
    }

    pub fn get(&self, id: ItemId) -> Option<&ItemRecord> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.record.as_ref()
    }

    pub fn get_mut(&mut self, id: ItemId) -> Option<&mut ItemRecord> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.record.as_mut()
    }

    pub fn remove(&mut self, id: ItemId) -> Option<ItemRecord> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let record = slot.record.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;

        let index = match self.order.get(record.order_index) {
            Some(Some(at)) if *at == id => Some(record.order_index),
            _ => self.order.iter().position(|e| *e == Some(id)),
        };
        if let Some(index) = index {
            self.order[index] = None;
            self.tombstones += 1;
        }
        if self.tombstones > self.compact_threshold {
            self.compact();
        }
        Some(record)
    }

    fn compact(&mut self) {
        self.order.retain(Option::is_some);
        for (i, id) in self.order.iter().flatten().enumerate() {
            if let Some(Some(record)) = self.slots.get_mut(id.index as usize).map(|s| s.record.as_mut()) {
                record.order_index = i;
            }
        }
        log::debug!("item table compacted: {} tombstones dropped", self.tombstones);
        self.tombstones = 0;
    }

    /// Live ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.order.iter().flatten().copied()
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = (ItemId, &mut ItemRecord)> + '_ {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.record
                .as_mut()
                .map(|r| (ItemId { index: index as u32, generation }, r))
        })
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            if slot.record.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
        self.free = (0..self.slots.len() as u32).rev().collect();
        self.order.clear();
        self.tombstones = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use kurbo::Rect;

    use super::*;

    struct Dot;

    impl ViewItem for Dot {
        fn bbox(&self) -> Rect {
            Rect::ZERO
        }

        fn layers(&self) -> LayerSet {
            SmallVec::new()
        }
    }

    fn record(item: &Rc<dyn ViewItem>) -> ItemRecord {
        ItemRecord::new(item, Rect::ZERO, SmallVec::new(), 0)
    }

    #[test]
    fn stale_ids_do_not_resolve() {
        let item: Rc<dyn ViewItem> = Rc::new(Dot);
        let mut table = ItemTable::new(16);
        let a = table.insert(record(&item));
        assert!(table.remove(a).is_some());
        let b = table.insert(record(&item));
        assert_eq!(a.index, b.index);
        assert_ne!(a, b);
        assert!(table.get(a).is_none());
        assert!(table.get(b).is_some());
        assert!(table.remove(a).is_none());
    }

    #[test]
    fn compaction_refreshes_order_indices() {
        let item: Rc<dyn ViewItem> = Rc::new(Dot);
        let mut table = ItemTable::new(2);
        let ids: Vec<ItemId> = (0..6).map(|_| table.insert(record(&item))).collect();
        table.remove(ids[0]);
        table.remove(ids[2]);
        assert_eq!(table.order.len(), 6);
        table.remove(ids[4]);
        // third tombstone crossed the threshold
        assert_eq!(table.order.len(), 3);
        assert_eq!(table.ids().collect::<Vec<_>>(), vec![ids[1], ids[3], ids[5]]);
        for (i, id) in table.ids().enumerate() {
            assert_eq!(table.get(id).map(|r| r.order_index), Some(i));
        }
        // removal after compaction still finds the right entry
        assert!(table.remove(ids[3]).is_some());
        assert_eq!(table.ids().collect::<Vec<_>>(), vec![ids[1], ids[5]]);
    }

    #[test]
    fn groups_are_keyed_by_layer() {
        let item: Rc<dyn ViewItem> = Rc::new(Dot);
        let mut r = record(&item);
        let g = GroupId { serial: 1, generation: 0 };
        r.set_group(LayerId(3), g);
        assert_eq!(r.group(LayerId(3)), Some(g));
        let map: HashMap<LayerId, LayerId> = [(LayerId(3), LayerId(9))].into_iter().collect();
        r.reorder_groups(&map);
        assert_eq!(r.group(LayerId(3)), None);
        assert_eq!(r.take_group(LayerId(9)), Some(g));
        assert!(r.groups.is_empty());
    }
}
