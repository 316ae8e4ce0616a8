use std::collections::BTreeSet;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use hashbrown::HashMap;
use kurbo::{Point, Rect, Vec2};

use crate::coords::{ViewTransform, Viewport};
use crate::device::ContextGuard;
use crate::painter::{Painter, ShapePainter};
use crate::render::cache::GroupId;
use crate::render::gal::layer_depth;
use crate::render::{Gal, RenderError, RenderTargetKind};

use super::index::DEFAULT_CELL_SIZE;
use super::layer::{Layer, LayerCycleError, LayerId, TOP_LAYER_MODIFIER};
use super::observer::{Observable, SceneObserver, Subscription};
use super::record::{ItemRecord, ItemTable};
use super::{ItemId, LayerSet, UpdateFlags, ViewItem, Visibility};

/// Scene configuration.
#[derive(Debug, Clone)]
pub struct SceneConfig {
    /// Number of layers; ids are `0..layer_count`.
    pub layer_count: u32,
    /// Screen pixels per world unit at creation.
    pub initial_scale: f64,
    pub min_scale: f64,
    pub max_scale: f64,
    /// Share of items with geometry or layer updates above which the layer
    /// indices are rebuilt instead of updated one item at a time.
    pub rebuild_threshold: f64,
    /// Removed items tolerated before the item table is compacted.
    pub compact_threshold: usize,
    /// The view center is kept inside this rectangle.
    pub boundary: Rect,
    /// Cell size of the layer indices, in world units.
    pub cell_size: f64,
}

impl Default for SceneConfig {
    fn default() -> Self {
        let half = f64::from(i32::MAX / 2);
        Self {
            layer_count: 512,
            initial_scale: 4.0,
            min_scale: 0.2,
            max_scale: 50000.0,
            rebuild_threshold: 0.3,
            compact_threshold: 4096,
            boundary: Rect::new(-half, -half, half, half),
            cell_size: DEFAULT_CELL_SIZE,
        }
    }
}

/// Layered collection of view items and the camera looking at them.
///
/// The scene indexes items per layer, tracks which render targets need a
/// redraw and drives a [`Gal`] to draw what is visible. Items on cached
/// layers are drawn once into a cache group and replayed until an update
/// invalidates them.
pub struct Scene {
    config: SceneConfig,
    layers: Vec<Layer>,
    /// Layer ids by ascending rendering order.
    ordered: Vec<LayerId>,
    table: ItemTable,
    next_priority: i32,
    top_layers: BTreeSet<LayerId>,
    top_enabled: bool,
    dirty: [bool; 3],
    view: ViewTransform,
    gal: Option<Gal>,
    painter: Box<dyn Painter>,
    use_draw_priority: bool,
    reverse_draw_order: bool,
    observers: Observable<dyn SceneObserver>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new(SceneConfig::default())
    }
}

impl Scene {
    pub fn new(config: SceneConfig) -> Self {
        let layers: Vec<Layer> =
            (0..config.layer_count).map(|i| Layer::new(LayerId(i), config.cell_size)).collect();
        let view = ViewTransform { scale: config.initial_scale, ..ViewTransform::default() };
        let mut scene = Self {
            layers,
            ordered: Vec::new(),
            table: ItemTable::new(config.compact_threshold),
            next_priority: 0,
            top_layers: BTreeSet::new(),
            top_enabled: false,
            dirty: [true; 3],
            view,
            gal: None,
            painter: Box::new(ShapePainter::default()),
            use_draw_priority: false,
            reverse_draw_order: false,
            observers: Observable::new(),
            config,
        };
        scene.sort_ordered_layers();
        scene
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    // ── context ───────────────────────────────────────────────────────────

    /// Replaces the renderer. Groups cached by the previous one are dropped.
    pub fn set_gal(&mut self, mut gal: Gal) {
        for (_, record) in self.table.records_mut() {
            record.groups.clear();
        }
        gal.set_view(&self.view);
        self.gal = Some(gal);
        self.mark_dirty();
    }

    pub fn gal(&self) -> Option<&Gal> {
        self.gal.as_ref()
    }

    pub fn gal_mut(&mut self) -> Option<&mut Gal> {
        self.gal.as_mut()
    }

    pub fn take_gal(&mut self) -> Option<Gal> {
        for (_, record) in self.table.records_mut() {
            record.groups.clear();
        }
        self.gal.take()
    }

    /// Takes the gal out of the scene and runs `f` with its context locked.
    fn with_locked_gal<R>(&mut self, f: impl FnOnce(&mut Self, Option<LockedGal<'_, '_>>) -> R) -> R {
        let Some(mut gal) = self.gal.take() else {
            return f(self, None);
        };
        let manager = Arc::clone(gal.manager());
        let guard = manager.lock(gal.context_id());
        let out = f(self, Some(LockedGal { gal: &mut gal, guard: &guard }));
        drop(guard);
        self.gal = Some(gal);
        out
    }

    /// Runs `f` with the context locked and the cache mapped. Does nothing
    /// without a gal.
    fn edit_cache(&mut self, f: impl FnOnce(&mut Self, &mut Gal)) -> Result<(), RenderError> {
        self.with_locked_gal(|scene, locked| {
            let Some(locked) = locked else {
                return Ok(());
            };
            locked.gal.begin_update(locked.guard)?;
            f(scene, &mut *locked.gal);
            locked.gal.end_update(locked.guard);
            Ok(())
        })
    }

    pub fn set_painter(&mut self, painter: Box<dyn Painter>) {
        self.painter = painter;
        self.mark_dirty();
    }

    pub fn painter(&self) -> &dyn Painter {
        self.painter.as_ref()
    }

    pub fn painter_mut(&mut self) -> &mut dyn Painter {
        self.painter.as_mut()
    }

    // ── observers ─────────────────────────────────────────────────────────

    pub fn subscribe(&self, observer: Weak<dyn SceneObserver>) -> Subscription {
        self.observers.subscribe(observer)
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.observers.unsubscribe(subscription)
    }

    fn notify_viewport(&self) {
        let visible = self.view.visible_world_rect();
        self.observers.notify(|o| o.viewport_changed(visible));
    }

    // ── items ─────────────────────────────────────────────────────────────

    /// Adds `item` with a draw priority; without one, priorities follow the
    /// order of addition. Layers outside the scene are ignored.
    pub fn add(&mut self, item: &Rc<dyn ViewItem>, priority: Option<i32>) -> ItemId {
        let priority = priority.unwrap_or_else(|| {
            let p = self.next_priority;
            self.next_priority += 1;
            p
        });
        let bbox = item.bbox();
        let layers = self.valid_layers(item.layers());

        let id = self.table.insert(ItemRecord::new(item, bbox, layers.clone(), priority));
        for &layer in &layers {
            let l = &mut self.layers[layer.index()];
            l.index.insert(id, bbox);
            self.dirty[l.target.index()] = true;
        }
        self.observers.notify(|o| o.item_added(id));
        id
    }

    /// Removes an item and its cached groups. Returns `false` for stale ids.
    pub fn remove(&mut self, id: ItemId) -> bool {
        if !self.has_item(id) {
            return false;
        }
        self.with_locked_gal(|scene, locked| scene.remove_with(id, locked))
    }

    fn remove_with(&mut self, id: ItemId, mut locked: Option<LockedGal<'_, '_>>) -> bool {
        let Some(record) = self.table.remove(id) else {
            return false;
        };
        for &layer in &record.layers {
            let l = &mut self.layers[layer.index()];
            l.index.remove(id, record.bbox);
            self.dirty[l.target.index()] = true;
        }
        if let Some(locked) = locked.as_mut() {
            for &(_, group) in &record.groups {
                if let Err(err) = locked.delete_group(group) {
                    log::warn!("dropping cache group of removed item failed: {err}");
                }
            }
        }
        self.observers.notify(|o| o.item_removed(id));
        true
    }

    /// Drops every item and cached group.
    pub fn clear(&mut self) -> Result<(), RenderError> {
        let ids: Vec<ItemId> = self.table.ids().collect();
        self.table.clear();
        for layer in &mut self.layers {
            layer.index.clear();
        }
        self.next_priority = 0;
        self.mark_dirty();
        for id in ids {
            self.observers.notify(|o| o.item_removed(id));
        }
        self.with_locked_gal(|_, locked| match locked {
            Some(locked) => locked.gal.clear_cache(locked.guard),
            None => Ok(()),
        })
    }

    pub fn has_item(&self, id: ItemId) -> bool {
        self.table.get(id).is_some()
    }

    /// The item behind `id`, unless it was removed or dropped.
    pub fn item(&self, id: ItemId) -> Option<Rc<dyn ViewItem>> {
        self.table.get(id)?.item.upgrade()
    }

    pub fn item_count(&self) -> usize {
        self.table.len()
    }

    /// Live ids in the order they were added.
    pub fn item_ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.table.ids()
    }

    pub fn draw_priority(&self, id: ItemId) -> Option<i32> {
        self.table.get(id).map(|r| r.priority)
    }

    /// Bounds `id` is currently indexed with.
    pub fn item_bbox(&self, id: ItemId) -> Option<Rect> {
        self.table.get(id).map(|r| r.bbox)
    }

    /// Cache group holding the item's drawing on `layer`.
    pub fn cached_group(&self, id: ItemId, layer: LayerId) -> Option<GroupId> {
        self.table.get(id)?.group(layer)
    }

    pub fn set_visible(&mut self, id: ItemId, visible: bool) {
        let Some(record) = self.table.get_mut(id) else {
            return;
        };
        if record.visibility.contains(Visibility::VISIBLE) != visible {
            record.visibility.set(Visibility::VISIBLE, visible);
            record.pending |= UpdateFlags::APPEARANCE | UpdateFlags::COLOR;
        }
    }

    /// Hides a visible item, optionally on the overlay as well. Unhiding
    /// clears both flags.
    pub fn hide(&mut self, id: ItemId, hide: bool, hide_overlay: bool) {
        let Some(record) = self.table.get_mut(id) else {
            return;
        };
        if !record.visibility.contains(Visibility::VISIBLE) {
            return;
        }
        if hide_overlay {
            record.visibility.insert(Visibility::OVERLAY_HIDDEN);
        }
        if hide {
            record.visibility.insert(Visibility::HIDDEN);
        } else {
            record.visibility.remove(Visibility::HIDDEN | Visibility::OVERLAY_HIDDEN);
        }
        record.pending |= UpdateFlags::APPEARANCE;
    }

    pub fn is_visible(&self, id: ItemId) -> bool {
        self.table.get(id).is_some_and(|r| r.visibility.contains(Visibility::VISIBLE))
    }

    pub fn is_hidden_on_overlay(&self, id: ItemId) -> bool {
        self.table.get(id).is_some_and(|r| r.visibility.contains(Visibility::OVERLAY_HIDDEN))
    }

    fn valid_layers(&self, layers: LayerSet) -> LayerSet {
        let count = self.layers.len();
        let mut valid: LayerSet = layers.into_iter().filter(|l| l.index() < count).collect();
        valid.sort_unstable();
        valid.dedup();
        valid
    }

    // ── updates ───────────────────────────────────────────────────────────

    /// Queues `flags` for the item; the work happens in `update_items`.
    pub fn update(&mut self, id: ItemId, flags: UpdateFlags) {
        debug_assert!(!flags.is_empty(), "update without flags");
        if let Some(record) = self.table.get_mut(id) {
            record.pending |= flags;
        }
    }

    pub fn update_all_items(&mut self, flags: UpdateFlags) {
        for (_, record) in self.table.records_mut() {
            record.pending |= flags;
        }
    }

    /// Queues `flags` for every item `predicate` accepts.
    pub fn update_all_items_conditionally<F>(&mut self, flags: UpdateFlags, mut predicate: F)
    where
        F: FnMut(&dyn ViewItem) -> bool,
    {
        for (_, record) in self.table.records_mut() {
            if let Some(item) = record.item.upgrade() {
                if predicate(&*item) {
                    record.pending |= flags;
                }
            }
        }
    }

    /// Applies every queued update.
    ///
    /// Geometry and layer changes move index entries and redraw cached
    /// groups; color changes recolor cached groups in place. When more than
    /// `rebuild_threshold` of the items moved, every index is rebuilt from
    /// scratch instead.
    pub fn update_items(&mut self) -> Result<(), RenderError> {
        self.with_locked_gal(|scene, locked| scene.apply_updates(locked))
    }

    fn apply_updates(&mut self, locked: Option<LockedGal<'_, '_>>) -> Result<(), RenderError> {
        let dropped: Vec<ItemId> = self
            .table
            .ids()
            .filter(|&id| self.table.get(id).is_some_and(|r| r.item.strong_count() == 0))
            .collect();
        let pending = self.table.ids().any(|id| self.table.get(id).is_some_and(|r| !r.pending.is_empty()));
        if dropped.is_empty() && !pending {
            return Ok(());
        }

        let Some(mut locked) = locked else {
            return self.apply_updates_with(&dropped, None);
        };
        locked.gal.begin_update(locked.guard)?;
        let result = self.apply_updates_with(&dropped, Some(locked.reborrow()));
        locked.gal.end_update(locked.guard);
        result
    }

    fn apply_updates_with(
        &mut self,
        dropped: &[ItemId],
        mut locked: Option<LockedGal<'_, '_>>,
    ) -> Result<(), RenderError> {
        for &id in dropped {
            log::warn!("item {id:?} was dropped without being removed from the scene");
            self.remove_with(id, locked.as_mut().map(LockedGal::reborrow));
        }

        let pending: Vec<ItemId> = self
            .table
            .ids()
            .filter(|&id| self.table.get(id).is_some_and(|r| !r.pending.is_empty()))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let moved = pending
            .iter()
            .filter(|&&id| {
                self.table.get(id).is_some_and(|r| r.pending.intersects(UpdateFlags::INDEX))
            })
            .count();
        let ratio = moved as f64 / self.table.len().max(1) as f64;
        if ratio > self.config.rebuild_threshold {
            self.rebuild_indices();
        }

        for &id in &pending {
            self.invalidate_item(id, locked.as_mut().map(LockedGal::reborrow))?;
        }
        log::trace!("scene update: {} items, {moved} moved", pending.len());
        Ok(())
    }

    /// Re-inserts every item into fresh indices. Items whose geometry or
    /// layers changed are left with a repaint instead.
    fn rebuild_indices(&mut self) {
        log::debug!("rebuilding layer indices for {} items", self.table.len());
        for layer in &mut self.layers {
            layer.index.clear();
        }
        let count = self.layers.len();
        for (id, record) in self.table.records_mut() {
            let Some(item) = record.item.upgrade() else {
                continue;
            };
            record.bbox = item.bbox();
            let mut layers: LayerSet = item.layers().into_iter().filter(|l| l.index() < count).collect();
            layers.sort_unstable();
            layers.dedup();
            record.layers = layers;
            for &layer in &record.layers {
                self.layers[layer.index()].index.insert(id, record.bbox);
            }
            if record.pending.intersects(UpdateFlags::INDEX) {
                record.pending.remove(UpdateFlags::INDEX);
                record.pending.insert(UpdateFlags::REPAINT);
            }
        }
        self.mark_dirty();
    }

    fn invalidate_item(&mut self, id: ItemId, locked: Option<LockedGal<'_, '_>>) -> Result<(), RenderError> {
        let Some(record) = self.table.get_mut(id) else {
            return Ok(());
        };
        let mut flags = std::mem::take(&mut record.pending);
        let Some(item) = record.item.upgrade() else {
            return Ok(());
        };

        // `add` created the index entries; they only move if the item
        // changed since
        if flags.intersects(UpdateFlags::INDEX) {
            let old_bbox = record.bbox;
            let old_layers = std::mem::take(&mut record.layers);
            record.bbox = item.bbox();
            record.layers = if flags.contains(UpdateFlags::LAYERS) {
                let count = self.layers.len();
                let mut layers: LayerSet =
                    item.layers().into_iter().filter(|l| l.index() < count).collect();
                layers.sort_unstable();
                layers.dedup();
                layers
            } else {
                old_layers.clone()
            };
            for &layer in &old_layers {
                let l = &mut self.layers[layer.index()];
                l.index.remove(id, old_bbox);
                self.dirty[l.target.index()] = true;
            }
            for &layer in &record.layers {
                let l = &mut self.layers[layer.index()];
                l.index.insert(id, record.bbox);
                self.dirty[l.target.index()] = true;
            }
        }
        if flags.contains(UpdateFlags::INITIAL_ADD) {
            flags = UpdateFlags::ALL;
        }

        // groups of layers the item left
        let layers = record.layers.clone();
        let mut stale = Vec::new();
        record.groups.retain(|(layer, group)| {
            let keep = layers.contains(layer);
            if !keep {
                stale.push(*group);
            }
            keep
        });

        let Some(mut locked) = locked else {
            for layer in &layers {
                self.dirty[self.layers[layer.index()].target.index()] = true;
            }
            return Ok(());
        };
        for group in stale {
            locked.delete_group(group)?;
        }

        for &layer_id in &layers {
            let layer = &self.layers[layer_id.index()];
            if layer.is_cached() {
                if flags.intersects(UpdateFlags::GEOMETRY | UpdateFlags::LAYERS | UpdateFlags::REPAINT) {
                    cache_item(&mut locked, self.painter.as_ref(), layer, record, &*item)?;
                } else if flags.contains(UpdateFlags::COLOR) {
                    if let Some(group) = record.group(layer_id) {
                        locked.gal.change_group_color(group, self.painter.settings().color(&*item, layer_id));
                    }
                }
            }
            self.dirty[layer.target.index()] = true;
        }
        Ok(())
    }

    /// Deletes every cached group and queues a full update of every item on
    /// a cached layer.
    pub fn recache_all_items(&mut self) -> Result<(), RenderError> {
        self.with_locked_gal(|scene, locked| scene.recache_all_items_with(locked))
    }

    fn recache_all_items_with(&mut self, mut locked: Option<LockedGal<'_, '_>>) -> Result<(), RenderError> {
        let cached: Vec<LayerId> = self.layers.iter().filter(|l| l.is_cached()).map(|l| l.id).collect();
        for layer in cached {
            let ids: Vec<ItemId> = self.layers[layer.index()].index.ids().collect();
            for id in ids {
                let Some(record) = self.table.get_mut(id) else {
                    continue;
                };
                if let Some(group) = record.take_group(layer) {
                    if let Some(locked) = locked.as_mut() {
                        locked.delete_group(group)?;
                    }
                }
                record.pending |= UpdateFlags::ALL;
            }
        }
        Ok(())
    }

    // ── queries ───────────────────────────────────────────────────────────

    /// Visits items intersecting `rect` on visible layers that hold real
    /// items, in ascending rendering order. Returns `false` if the visitor
    /// stopped the walk.
    pub fn query<F>(&self, rect: Rect, mut visitor: F) -> bool
    where
        F: FnMut(ItemId, LayerId) -> bool,
    {
        for &id in &self.ordered {
            let layer = &self.layers[id.index()];
            if layer.display_only || !layer.visible {
                continue;
            }
            if !layer.index.query(rect, |item| visitor(item, id)) {
                return false;
            }
        }
        true
    }

    /// Items intersecting `rect`, top-most layer first.
    pub fn query_items(&self, rect: Rect) -> Vec<(ItemId, LayerId)> {
        let mut out = Vec::new();
        for &id in self.ordered.iter().rev() {
            let layer = &self.layers[id.index()];
            if layer.display_only || !layer.visible {
                continue;
            }
            layer.index.query(rect, |item| {
                out.push((item, id));
                true
            });
        }
        out
    }

    // ── drawing ───────────────────────────────────────────────────────────

    /// Applies pending updates and draws every dirty target.
    ///
    /// The context stays locked from the first cache edit to the present.
    pub fn redraw(&mut self) -> Result<(), RenderError> {
        self.with_locked_gal(|scene, locked| {
            let Some(mut locked) = locked else {
                scene.apply_updates(None)?;
                return Err(RenderError::NotInitialized);
            };
            scene.apply_updates(Some(locked.reborrow()))?;
            scene.redraw_with(locked)
        })
    }

    fn redraw_with(&mut self, mut locked: LockedGal<'_, '_>) -> Result<(), RenderError> {
        locked.gal.set_view(&self.view);
        if locked.gal.begin_drawing(locked.guard)? {
            self.mark_dirty();
        }

        self.clear_targets_on(&mut *locked.gal);
        let rect = self.view.visible_world_rect();
        let drawn = self.redraw_rect(&mut locked, rect);
        let ended = locked.gal.end_drawing(locked.guard);
        drawn.and(ended)?;
        self.dirty = [false; 3];
        Ok(())
    }

    fn redraw_rect(&mut self, locked: &mut LockedGal<'_, '_>, rect: Rect) -> Result<(), RenderError> {
        let scale = self.view.scale;
        for &layer_id in &self.ordered {
            let layer = &self.layers[layer_id.index()];
            if !layer.visible
                || !self.dirty[layer.target.index()]
                || !required_layers_enabled(&self.layers, layer_id)
            {
                continue;
            }
            locked.gal.set_target(layer.target);
            locked.gal.set_layer_depth(layer_depth(layer.order));

            let mut visible: Vec<(i32, ItemId)> = Vec::new();
            layer.index.query(rect, |id| {
                if let Some(record) = self.table.get(id) {
                    let lod_ok = record.item.upgrade().is_some_and(|item| item.lod(layer_id) < scale);
                    if record.is_renderable() && lod_ok {
                        visible.push((record.priority, id));
                    }
                }
                true
            });
            if self.use_draw_priority {
                if self.reverse_draw_order {
                    visible.sort_by(|a, b| b.0.cmp(&a.0));
                } else {
                    visible.sort_by(|a, b| a.0.cmp(&b.0));
                }
            }

            for (_, id) in visible {
                let Some(record) = self.table.get_mut(id) else {
                    continue;
                };
                let Some(item) = record.item.upgrade() else {
                    continue;
                };
                if layer.is_cached() {
                    match record.group(layer_id) {
                        Some(group) if locked.gal.is_group_valid(group) => locked.gal.draw_group(group),
                        _ => {
                            cache_item(locked, self.painter.as_ref(), layer, record, &*item)?;
                            if let Some(group) = record.group(layer_id) {
                                locked.gal.draw_group(group);
                            }
                        }
                    }
                } else {
                    self.painter.draw(&*item, layer_id, &mut *locked.gal)?;
                }
            }
        }
        Ok(())
    }

    // ── targets ───────────────────────────────────────────────────────────

    /// Clears the targets that will be redrawn. Cached and non-cached
    /// content share a buffer and are cleared together.
    pub fn clear_targets(&mut self) {
        if let Some(mut gal) = self.gal.take() {
            self.clear_targets_on(&mut gal);
            self.gal = Some(gal);
        }
    }

    fn clear_targets_on(&mut self, gal: &mut Gal) {
        if self.is_target_dirty(RenderTargetKind::Cached) || self.is_target_dirty(RenderTargetKind::NonCached) {
            gal.clear_target(RenderTargetKind::NonCached);
            gal.clear_target(RenderTargetKind::Cached);
            self.mark_dirty();
        }
        if self.is_target_dirty(RenderTargetKind::Overlay) {
            gal.clear_target(RenderTargetKind::Overlay);
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = [true; 3];
    }

    pub fn mark_target_dirty(&mut self, kind: RenderTargetKind) {
        self.dirty[kind.index()] = true;
    }

    pub fn is_target_dirty(&self, kind: RenderTargetKind) -> bool {
        self.dirty[kind.index()]
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.iter().any(|&d| d)
    }

    // ── layers ────────────────────────────────────────────────────────────

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(id.index())
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Layer ids by ascending rendering order.
    pub fn ordered_layers(&self) -> &[LayerId] {
        &self.ordered
    }

    fn sort_ordered_layers(&mut self) {
        let layers = &self.layers;
        self.ordered = layers.iter().map(|l| l.id).collect();
        self.ordered.sort_by_key(|id| (layers[id.index()].order, *id));
        self.mark_dirty();
    }

    pub fn set_layer_order(&mut self, layer: LayerId, order: i32) {
        let Some(l) = self.layers.get_mut(layer.index()) else {
            return;
        };
        l.order = order;
        self.sort_ordered_layers();
    }

    pub fn layer_order(&self, layer: LayerId) -> Option<i32> {
        self.layer(layer).map(|l| l.order)
    }

    /// Sorts `layers` top-most first.
    pub fn sort_layers(&self, layers: &mut [LayerId]) {
        layers.sort_by_key(|id| std::cmp::Reverse(self.layer_order(*id).unwrap_or(i32::MIN)));
    }

    pub fn set_layer_visible(&mut self, layer: LayerId, visible: bool) {
        let Some(l) = self.layers.get_mut(layer.index()) else {
            return;
        };
        if l.visible != visible {
            l.visible = visible;
            self.dirty[l.target.index()] = true;
        }
    }

    pub fn set_layer_display_only(&mut self, layer: LayerId, display_only: bool) {
        if let Some(l) = self.layers.get_mut(layer.index()) {
            l.display_only = display_only;
        }
    }

    /// Moves a layer to another target. Groups cached for a layer that
    /// stops being cached are deleted.
    pub fn set_layer_target(&mut self, layer: LayerId, target: RenderTargetKind) -> Result<(), RenderError> {
        let Some(l) = self.layers.get_mut(layer.index()) else {
            return Ok(());
        };
        if l.target == target {
            return Ok(());
        }
        let was_cached = l.is_cached();
        self.dirty[l.target.index()] = true;
        l.target = target;
        self.dirty[target.index()] = true;

        if !was_cached {
            return Ok(());
        }
        let ids: Vec<ItemId> = l.index.ids().collect();
        self.with_locked_gal(|scene, mut locked| {
            for id in ids {
                let Some(group) = scene.table.get_mut(id).and_then(|r| r.take_group(layer)) else {
                    continue;
                };
                if let Some(locked) = locked.as_mut() {
                    locked.delete_group(group)?;
                }
            }
            Ok(())
        })
    }

    /// Makes drawing `layer` depend on `required` being visible.
    ///
    /// Requirements that would make two layers depend on each other are
    /// rejected.
    pub fn set_required(&mut self, layer: LayerId, required: LayerId, on: bool) -> Result<(), LayerCycleError> {
        let count = self.layers.len();
        if layer.index() >= count || required.index() >= count {
            return Ok(());
        }
        if !on {
            self.layers[layer.index()].required.retain(|r| *r != required);
            return Ok(());
        }
        if layer == required || requires(&self.layers, required, layer) {
            let err = LayerCycleError { layer, required };
            log::warn!("{err}");
            return Err(err);
        }
        let l = &mut self.layers[layer.index()];
        if !l.required.contains(&required) {
            l.required.push(required);
        }
        Ok(())
    }

    /// Whether every layer `layer` requires, directly or not, is visible.
    pub fn required_layers_enabled(&self, layer: LayerId) -> bool {
        required_layers_enabled(&self.layers, layer)
    }

    pub fn set_top_layer(&mut self, layer: LayerId, on: bool) {
        if layer.index() >= self.layers.len() {
            return;
        }
        let changed = if on { self.top_layers.insert(layer) } else { self.top_layers.remove(&layer) };
        if !changed || !self.top_enabled {
            return;
        }
        let delta = if on { TOP_LAYER_MODIFIER } else { -TOP_LAYER_MODIFIER };
        self.layers[layer.index()].order += delta;
        self.sort_ordered_layers();
    }

    /// Raises top layers above the others, or puts them back.
    pub fn enable_top_layer(&mut self, enable: bool) -> Result<(), RenderError> {
        if enable == self.top_enabled {
            return Ok(());
        }
        self.top_enabled = enable;
        let delta = if enable { TOP_LAYER_MODIFIER } else { -TOP_LAYER_MODIFIER };
        for layer in &self.top_layers {
            self.layers[layer.index()].order += delta;
        }
        self.update_all_layers_order()?;
        self.update_all_layers_color()
    }

    pub fn clear_top_layers(&mut self) {
        if self.top_enabled {
            for layer in &self.top_layers {
                self.layers[layer.index()].order -= TOP_LAYER_MODIFIER;
            }
        }
        self.top_layers.clear();
        self.sort_ordered_layers();
    }

    /// Lowest id among the top layers.
    pub fn top_layer(&self) -> Option<LayerId> {
        self.top_layers.first().copied()
    }

    /// Moves the cached groups of every item to the depth of their layer.
    pub fn update_all_layers_order(&mut self) -> Result<(), RenderError> {
        self.sort_ordered_layers();
        self.edit_cache(|scene, gal| {
            for (_, record) in scene.table.records_mut() {
                for &(layer, group) in &record.groups {
                    gal.change_group_depth(group, layer_depth(scene.layers[layer.index()].order));
                }
            }
        })
    }

    /// Recolors the cached groups of `layer` from the painter settings.
    pub fn update_layer_color(&mut self, layer: LayerId) -> Result<(), RenderError> {
        let Some(l) = self.layers.get(layer.index()) else {
            return Ok(());
        };
        if !l.is_cached() {
            return Ok(());
        }
        let target = l.target;
        self.edit_cache(|scene, gal| {
            for id in scene.layers[layer.index()].index.ids() {
                let Some(record) = scene.table.get(id) else {
                    continue;
                };
                let (Some(group), Some(item)) = (record.group(layer), record.item.upgrade()) else {
                    continue;
                };
                gal.change_group_color(group, scene.painter.settings().color(&*item, layer));
            }
        })?;
        self.mark_target_dirty(target);
        Ok(())
    }

    /// Recolors every cached group from the painter settings.
    pub fn update_all_layers_color(&mut self) -> Result<(), RenderError> {
        self.edit_cache(|scene, gal| {
            for (_, record) in scene.table.records_mut() {
                let Some(item) = record.item.upgrade() else {
                    continue;
                };
                for &(layer, group) in &record.groups {
                    gal.change_group_color(group, scene.painter.settings().color(&*item, layer));
                }
            }
        })?;
        self.mark_dirty();
        Ok(())
    }

    /// Renumbers layers following `map` (old id to new id). Layer state and
    /// index move with the layer; items re-read their layers, keep their
    /// groups under the new ids and are recolored.
    pub fn reorder_layer_data(&mut self, map: &HashMap<LayerId, LayerId>) -> Result<(), RenderError> {
        let count = self.layers.len();
        let mut moved: Vec<Option<Layer>> = (0..count).map(|_| None).collect();
        for mut layer in std::mem::take(&mut self.layers) {
            let to = map.get(&layer.id).copied().unwrap_or(layer.id);
            if to.index() >= count {
                log::warn!("reorder_layer_data: {} is out of range", to);
                continue;
            }
            let slot = &mut moved[to.index()];
            if slot.is_none() {
                layer.id = to;
                *slot = Some(layer);
            }
        }
        let cell_size = self.config.cell_size;
        self.layers = moved
            .into_iter()
            .enumerate()
            .map(|(i, l)| l.unwrap_or_else(|| Layer::new(LayerId(i as u32), cell_size)))
            .collect();
        self.sort_ordered_layers();

        for (_, record) in self.table.records_mut() {
            if let Some(item) = record.item.upgrade() {
                let mut layers: LayerSet =
                    item.layers().into_iter().filter(|l| l.index() < count).collect();
                layers.sort_unstable();
                layers.dedup();
                record.layers = layers;
            }
            record.reorder_groups(map);
            record.pending |= UpdateFlags::COLOR;
        }
        self.update_items()
    }

    // ── camera ────────────────────────────────────────────────────────────

    pub fn view(&self) -> &ViewTransform {
        &self.view
    }

    pub fn scale(&self) -> f64 {
        self.view.scale
    }

    pub fn center(&self) -> Point {
        self.view.center
    }

    /// Sets the zoom, clamped to the configured range, keeping `anchor`
    /// (default: the view center) at the same screen position.
    pub fn set_scale(&mut self, scale: f64, anchor: Option<Point>) {
        let anchor = anchor.unwrap_or(self.view.center);
        let fixed = self.view.to_screen(anchor);
        self.view.scale = scale.max(self.config.min_scale).min(self.config.max_scale);
        let delta = self.view.to_world(fixed) - anchor;
        self.apply_center(self.view.center - delta);
        self.mark_dirty();
        self.notify_viewport();
    }

    pub fn set_center(&mut self, center: Point) {
        self.apply_center(center);
        self.mark_dirty();
        self.notify_viewport();
    }

    fn apply_center(&mut self, center: Point) {
        let b = self.config.boundary;
        self.view.center = Point::new(center.x.max(b.x0).min(b.x1), center.y.max(b.y0).min(b.y1));
    }

    /// Centers `rect` and zooms so that it fills the screen.
    pub fn set_viewport(&mut self, rect: Rect) {
        let rect = rect.abs();
        let screen = self.view.screen.to_vec2();
        if rect.width() <= 0.0 || rect.height() <= 0.0 {
            self.set_center(rect.center());
            return;
        }
        let scale = (screen.x / rect.width()).min(screen.y / rect.height());
        self.apply_center(rect.center());
        self.set_scale(scale, None);
    }

    /// World rectangle covered by the screen.
    pub fn viewport(&self) -> Rect {
        self.view.visible_world_rect()
    }

    pub fn set_mirror(&mut self, x: bool, y: bool) {
        self.view.mirror_x = x;
        self.view.mirror_y = y;
        self.mark_dirty();
        self.notify_viewport();
    }

    pub fn set_screen_size(&mut self, width: u32, height: u32) {
        self.view.screen = Viewport::new(width, height);
        self.mark_dirty();
        self.notify_viewport();
    }

    pub fn to_world(&self, p: Point) -> Point {
        self.view.to_world(p)
    }

    pub fn to_screen(&self, p: Point) -> Point {
        self.view.to_screen(p)
    }

    pub fn to_world_vec(&self, v: Vec2) -> Vec2 {
        self.view.to_world_vec(v)
    }

    pub fn to_world_len(&self, len: f64) -> f64 {
        self.view.to_world_len(len)
    }

    pub fn to_screen_len(&self, len: f64) -> f64 {
        self.view.to_screen_len(len)
    }

    // ── draw order ────────────────────────────────────────────────────────

    pub fn set_use_draw_priority(&mut self, on: bool) {
        self.use_draw_priority = on;
    }

    pub fn is_using_draw_priority(&self) -> bool {
        self.use_draw_priority
    }

    pub fn set_reverse_draw_order(&mut self, on: bool) {
        self.reverse_draw_order = on;
    }

    pub fn is_reverse_draw_order(&self) -> bool {
        self.reverse_draw_order
    }
}

/// A gal taken out of its scene while its context is locked.
struct LockedGal<'a, 'm> {
    gal: &'a mut Gal,
    guard: &'a ContextGuard<'m>,
}

impl<'m> LockedGal<'_, 'm> {
    fn reborrow(&mut self) -> LockedGal<'_, 'm> {
        LockedGal { gal: &mut *self.gal, guard: self.guard }
    }

    fn delete_group(&mut self, group: GroupId) -> Result<bool, RenderError> {
        self.gal.delete_group(self.guard, group)
    }
}

/// Draws `item` into a fresh cache group for `layer`, replacing any
/// previous one.
fn cache_item(
    locked: &mut LockedGal<'_, '_>,
    painter: &dyn Painter,
    layer: &Layer,
    record: &mut ItemRecord,
    item: &dyn ViewItem,
) -> Result<(), RenderError> {
    if let Some(old) = record.take_group(layer.id) {
        locked.delete_group(old)?;
    }
    let gal = &mut *locked.gal;
    let target = gal.target();
    let depth = gal.layer_depth();
    gal.set_target(RenderTargetKind::Cached);
    gal.set_layer_depth(layer_depth(layer.order));

    let group = gal.begin_group();
    let drawn = painter.draw(item, layer.id, gal);
    gal.end_group();
    gal.set_target(target);
    gal.set_layer_depth(depth);
    record.set_group(layer.id, group);
    drawn.map(|_| ())
}

/// Whether `layer` depends on `on`, directly or through other layers.
fn requires(layers: &[Layer], layer: LayerId, on: LayerId) -> bool {
    let mut stack = vec![layer];
    let mut seen = BTreeSet::new();
    while let Some(next) = stack.pop() {
        if !seen.insert(next) {
            continue;
        }
        let Some(l) = layers.get(next.index()) else {
            continue;
        };
        for &r in &l.required {
            if r == on {
                return true;
            }
            stack.push(r);
        }
    }
    false
}

fn required_layers_enabled(layers: &[Layer], layer: LayerId) -> bool {
    let Some(l) = layers.get(layer.index()) else {
        return false;
    };
    l.required.iter().all(|&r| {
        layers.get(r.index()).is_some_and(|rl| rl.visible) && required_layers_enabled(layers, r)
    })
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::device::{ContextCall, ContextManager, RecordingContext};
    use crate::paint::Color;
    use crate::painter::{RenderSettings, Shape, ShapeItem};
    use crate::render::GalConfig;

    fn scene() -> Scene {
        let mut scene = Scene::new(SceneConfig { layer_count: 8, ..SceneConfig::default() });
        scene.set_screen_size(200, 100);
        scene
    }

    fn gal() -> Gal {
        Gal::new(
            Box::new(RecordingContext::new(200, 100)),
            Arc::new(ContextManager::new()),
            GalConfig { cache_capacity: 4096, ..GalConfig::default() },
        )
    }

    fn square(x: f64, y: f64, layers: &[u32]) -> Rc<ShapeItem> {
        let shape = Shape::Rectangle(Rect::new(x, y, x + 5.0, y + 5.0));
        Rc::new(ShapeItem::new(shape, layers.iter().map(|&l| LayerId(l))))
    }

    fn add(scene: &mut Scene, item: &Rc<ShapeItem>) -> ItemId {
        let dynamic: Rc<dyn ViewItem> = item.clone();
        scene.add(&dynamic, None)
    }

    fn recording(scene: &mut Scene) -> &mut RecordingContext {
        scene
            .gal_mut()
            .unwrap()
            .context_mut()
            .as_any_mut()
            .downcast_mut::<RecordingContext>()
            .unwrap()
    }

    fn everything() -> Rect {
        Rect::new(-1e9, -1e9, 1e9, 1e9)
    }

    fn sorted_ids(scene: &Scene, rect: Rect) -> Vec<(ItemId, LayerId)> {
        let mut hits = scene.query_items(rect);
        hits.sort();
        hits
    }

    #[derive(Default)]
    struct Events {
        added: Cell<u32>,
        removed: Cell<u32>,
        viewport: Cell<u32>,
    }

    impl SceneObserver for Events {
        fn item_added(&self, _id: ItemId) {
            self.added.set(self.added.get() + 1);
        }

        fn item_removed(&self, _id: ItemId) {
            self.removed.set(self.removed.get() + 1);
        }

        fn viewport_changed(&self, _visible: Rect) {
            self.viewport.set(self.viewport.get() + 1);
        }
    }

    /// Left edges of the squares streamed into the main buffer by the last
    /// frame, in draw order.
    fn streamed_left_edges(scene: &mut Scene) -> Vec<f32> {
        let calls = recording(scene).take_calls();
        let Some((buffer, count)) = calls.iter().find_map(|c| match c {
            ContextCall::DrawArrays { buffer, count, .. } => Some((*buffer, *count)),
            _ => None,
        }) else {
            return Vec::new();
        };
        let vertices = recording(scene).buffer_vertices(buffer).unwrap();
        vertices[..count as usize]
            .chunks(6)
            .map(|quad| quad.iter().map(|v| v.pos[0]).fold(f32::INFINITY, f32::min))
            .collect()
    }

    /// A square only drawn above a given scale.
    struct Detailed {
        lod: Cell<f64>,
    }

    impl ViewItem for Detailed {
        fn bbox(&self) -> Rect {
            Rect::new(0.0, 0.0, 5.0, 5.0)
        }

        fn layers(&self) -> LayerSet {
            std::iter::once(LayerId(0)).collect()
        }

        fn lod(&self, _layer: LayerId) -> f64 {
            self.lod.get()
        }

        fn shape(&self) -> Option<Shape> {
            Some(Shape::Rectangle(self.bbox()))
        }
    }

    /// Shape painter that counts draws made without the context lock.
    struct LockWatcher {
        manager: Arc<ContextManager>,
        draws: Rc<Cell<u32>>,
        unlocked: Rc<Cell<u32>>,
        shapes: ShapePainter,
    }

    impl Painter for LockWatcher {
        fn draw(&self, item: &dyn ViewItem, layer: LayerId, gal: &mut Gal) -> Result<bool, RenderError> {
            self.draws.set(self.draws.get() + 1);
            if !self.manager.is_locked() {
                self.unlocked.set(self.unlocked.get() + 1);
            }
            self.shapes.draw(item, layer, gal)
        }

        fn settings(&self) -> &RenderSettings {
            self.shapes.settings()
        }

        fn settings_mut(&mut self) -> &mut RenderSettings {
            self.shapes.settings_mut()
        }
    }

    // ── items ────────────────────────────────────────────────────────────

    #[test]
    fn add_indexes_every_known_layer_top_most_first() {
        let mut scene = scene();
        let item = square(0.0, 0.0, &[0, 3, 99]);
        let id = add(&mut scene, &item);

        assert_eq!(scene.query_items(everything()), vec![(id, LayerId(3)), (id, LayerId(0))]);
        assert!(scene.is_visible(id));
        assert!(scene.is_dirty());
    }

    #[test]
    fn priorities_follow_insertion_unless_given() {
        let mut scene = scene();
        let a = add(&mut scene, &square(0.0, 0.0, &[0]));
        let explicit: Rc<dyn ViewItem> = square(0.0, 0.0, &[0]);
        let b = scene.add(&explicit, Some(40));
        let c = add(&mut scene, &square(0.0, 0.0, &[0]));
        assert_eq!(scene.draw_priority(a), Some(0));
        assert_eq!(scene.draw_priority(b), Some(40));
        assert_eq!(scene.draw_priority(c), Some(1));
    }

    #[test]
    fn removed_ids_go_stale() {
        let mut scene = scene();
        let item = square(0.0, 0.0, &[1]);
        let id = add(&mut scene, &item);
        assert!(scene.remove(id));
        assert!(!scene.remove(id));
        assert!(!scene.has_item(id));
        assert!(scene.query_items(everything()).is_empty());

        let again = add(&mut scene, &item);
        assert_ne!(again, id);
        assert!(scene.item(id).is_none());
        assert!(scene.item(again).is_some());
    }

    #[test]
    fn dropped_items_are_pruned_on_update() {
        let mut scene = scene();
        let item = square(0.0, 0.0, &[0]);
        let id = add(&mut scene, &item);
        drop(item);
        scene.update_items().unwrap();
        assert!(!scene.has_item(id));
        assert_eq!(scene.item_count(), 0);
    }

    #[test]
    fn hiding_needs_a_visible_item() {
        let mut scene = scene();
        let id = add(&mut scene, &square(0.0, 0.0, &[0]));
        scene.hide(id, true, true);
        assert!(scene.is_hidden_on_overlay(id));
        scene.hide(id, false, false);
        assert!(!scene.is_hidden_on_overlay(id));

        scene.set_visible(id, false);
        scene.hide(id, true, true);
        assert!(!scene.is_hidden_on_overlay(id));
    }

    // ── updates ──────────────────────────────────────────────────────────

    #[test]
    fn bulk_geometry_update_matches_incremental_updates() {
        let build = || {
            let mut scene = scene();
            let items: Vec<(Rc<ShapeItem>, ItemId)> = (0..10)
                .map(|i| {
                    let item = square(i as f64 * 10.0, 0.0, &[0, 2]);
                    let id = add(&mut scene, &item);
                    (item, id)
                })
                .collect();
            scene.update_items().unwrap();
            (scene, items)
        };
        let moved = |i: usize| Shape::Rectangle(Rect::new(500.0 + i as f64 * 10.0, 0.0, 505.0 + i as f64 * 10.0, 5.0));

        // half of the items at once: above the rebuild threshold
        let (mut bulk, bulk_items) = build();
        for (i, (item, id)) in bulk_items.iter().enumerate().take(5) {
            item.set_shape(moved(i));
            bulk.update(*id, UpdateFlags::GEOMETRY);
        }
        bulk.update_items().unwrap();

        // one item per pass: below it
        let (mut single, single_items) = build();
        for (i, (item, id)) in single_items.iter().enumerate().take(5) {
            item.set_shape(moved(i));
            single.update(*id, UpdateFlags::GEOMETRY);
            single.update_items().unwrap();
        }

        let queries = [
            everything(),
            Rect::new(0.0, 0.0, 45.0, 5.0),
            Rect::new(495.0, 0.0, 600.0, 10.0),
            Rect::new(40.0, 0.0, 520.0, 1.0),
        ];
        for q in queries {
            assert_eq!(sorted_ids(&bulk, q), sorted_ids(&single, q), "{q:?}");
        }
        assert_eq!(bulk.query_items(Rect::new(495.0, 0.0, 600.0, 10.0)).len(), 10);
        assert_eq!(bulk.query_items(Rect::new(0.0, 0.0, 45.0, 5.0)).len(), 0);
    }

    #[test]
    fn layer_update_moves_the_item() {
        let mut scene = scene();
        let item = square(0.0, 0.0, &[1]);
        let id = add(&mut scene, &item);
        item.set_layers([LayerId(4)]);
        scene.update(id, UpdateFlags::LAYERS);
        scene.update_items().unwrap();
        assert_eq!(scene.query_items(everything()), vec![(id, LayerId(4))]);
        assert!(!scene.layer(LayerId(1)).unwrap().index().contains(id));
    }

    #[test]
    fn color_update_keeps_the_cached_chunk() {
        let mut scene = scene();
        scene.set_gal(gal());
        let item = square(0.0, 0.0, &[0]);
        let id = add(&mut scene, &item);
        scene.redraw().unwrap();

        let group = scene.cached_group(id, LayerId(0)).unwrap();
        let span = scene.gal().unwrap().cache().span(group).unwrap();

        let red = Color::from_straight(1.0, 0.0, 0.0, 1.0);
        scene.painter_mut().settings_mut().set_layer_color(LayerId(0), red);
        scene.update(id, UpdateFlags::COLOR);
        scene.update_items().unwrap();

        assert_eq!(scene.cached_group(id, LayerId(0)), Some(group));
        let cache = scene.gal().unwrap().cache();
        assert_eq!(cache.span(group), Some(span));
        assert!(cache.vertices(group).unwrap().iter().all(|v| v.color == red.to_array()));
    }

    #[test]
    fn geometry_update_redraws_the_group() {
        let mut scene = scene();
        scene.set_gal(gal());
        let item = square(0.0, 0.0, &[0]);
        let id = add(&mut scene, &item);
        scene.redraw().unwrap();
        let before = scene.cached_group(id, LayerId(0)).unwrap();

        item.set_shape(Shape::Rectangle(Rect::new(20.0, 20.0, 30.0, 30.0)));
        scene.update(id, UpdateFlags::GEOMETRY);
        scene.update_items().unwrap();

        let after = scene.cached_group(id, LayerId(0)).unwrap();
        assert_ne!(before, after);
        let gal = scene.gal().unwrap();
        assert!(!gal.is_group_valid(before));
        assert!(gal.cache().vertices(after).unwrap().iter().all(|v| v.pos[0] >= 20.0));
        assert_eq!(scene.item_bbox(id), Some(Rect::new(20.0, 20.0, 30.0, 30.0)));
    }

    // ── drawing ──────────────────────────────────────────────────────────

    #[test]
    fn redraw_needs_a_gal() {
        let mut scene = scene();
        assert_eq!(scene.redraw(), Err(RenderError::NotInitialized));
    }

    #[test]
    fn clean_targets_are_not_redrawn() {
        let mut scene = scene();
        scene.set_gal(gal());
        let items: Vec<Rc<ShapeItem>> = (0..3).map(|i| square(i as f64 * 6.0, 0.0, &[0])).collect();
        for item in &items {
            add(&mut scene, item);
        }
        scene.redraw().unwrap();
        assert!(!scene.is_dirty());
        let first = recording(&mut scene).take_calls();
        assert!(first.iter().any(|c| matches!(c, ContextCall::DrawIndexed { .. })));

        scene.redraw().unwrap();
        let second = recording(&mut scene).take_calls();
        assert!(!second.iter().any(|c| c.is_draw()));
        assert!(second.iter().any(|c| matches!(c, ContextCall::Present)));
        assert!(recording(&mut scene).violations().is_empty());
    }

    #[test]
    fn hidden_items_are_skipped() {
        let mut scene = scene();
        scene.set_gal(gal());
        let item = square(0.0, 0.0, &[0]);
        let id = add(&mut scene, &item);
        scene.redraw().unwrap();
        recording(&mut scene).take_calls();

        scene.hide(id, true, false);
        scene.mark_dirty();
        scene.redraw().unwrap();
        let calls = recording(&mut scene).take_calls();
        assert!(!calls.iter().any(|c| c.is_draw()));
    }

    #[test]
    fn layers_with_a_hidden_requirement_are_skipped() {
        let mut scene = scene();
        scene.set_gal(gal());
        let item = square(0.0, 0.0, &[1]);
        add(&mut scene, &item);
        scene.set_required(LayerId(1), LayerId(2), true).unwrap();
        scene.set_layer_visible(LayerId(2), false);
        scene.redraw().unwrap();
        assert!(!recording(&mut scene).take_calls().iter().any(|c| c.is_draw()));

        scene.set_layer_visible(LayerId(2), true);
        scene.redraw().unwrap();
        assert!(recording(&mut scene).take_calls().iter().any(|c| c.is_draw()));
    }

    #[test]
    fn non_cached_layers_stream_their_items() {
        let mut scene = scene();
        scene.set_gal(gal());
        scene.set_layer_target(LayerId(0), RenderTargetKind::NonCached).unwrap();
        let item = square(0.0, 0.0, &[0]);
        let id = add(&mut scene, &item);
        scene.redraw().unwrap();
        assert_eq!(scene.cached_group(id, LayerId(0)), None);
        let calls = recording(&mut scene).take_calls();
        assert!(calls.iter().any(|c| matches!(c, ContextCall::DrawArrays { count: 6, .. })));
    }

    #[test]
    fn items_wait_for_the_scale_to_pass_their_lod() {
        let mut scene = scene();
        scene.set_gal(gal());
        scene.set_layer_target(LayerId(0), RenderTargetKind::NonCached).unwrap();
        let item = Rc::new(Detailed { lod: Cell::new(10.0) });
        let dynamic: Rc<dyn ViewItem> = item.clone();
        scene.add(&dynamic, None);
        assert_eq!(scene.scale(), 4.0);

        scene.redraw().unwrap();
        assert!(streamed_left_edges(&mut scene).is_empty());

        item.lod.set(4.0);
        scene.mark_dirty();
        scene.redraw().unwrap();
        assert!(streamed_left_edges(&mut scene).is_empty());

        item.lod.set(1.0);
        scene.mark_dirty();
        scene.redraw().unwrap();
        assert_eq!(streamed_left_edges(&mut scene), vec![0.0]);

        item.lod.set(10.0);
        scene.set_scale(20.0, None);
        scene.mark_dirty();
        scene.redraw().unwrap();
        assert_eq!(streamed_left_edges(&mut scene), vec![0.0]);
    }

    #[test]
    fn draw_priority_orders_a_streamed_layer() {
        let mut scene = scene();
        scene.set_gal(gal());
        scene.set_layer_target(LayerId(0), RenderTargetKind::NonCached).unwrap();
        let items: Vec<Rc<ShapeItem>> = [0.0, 6.0, 12.0].iter().map(|&x| square(x, 0.0, &[0])).collect();
        for (item, priority) in items.iter().zip([2, 0, 1]) {
            let dynamic: Rc<dyn ViewItem> = item.clone();
            scene.add(&dynamic, Some(priority));
        }
        scene.set_use_draw_priority(true);

        scene.redraw().unwrap();
        assert_eq!(streamed_left_edges(&mut scene), vec![6.0, 12.0, 0.0]);

        scene.set_reverse_draw_order(true);
        scene.mark_dirty();
        scene.redraw().unwrap();
        assert_eq!(streamed_left_edges(&mut scene), vec![0.0, 12.0, 6.0]);
    }

    #[test]
    fn cache_edits_hold_the_context_lock() {
        let mut scene = scene();
        let gal = gal();
        let manager = Arc::clone(gal.manager());
        scene.set_gal(gal);
        let draws = Rc::new(Cell::new(0));
        let unlocked = Rc::new(Cell::new(0));
        scene.set_painter(Box::new(LockWatcher {
            manager: Arc::clone(&manager),
            draws: Rc::clone(&draws),
            unlocked: Rc::clone(&unlocked),
            shapes: ShapePainter::default(),
        }));

        let item = square(0.0, 0.0, &[0]);
        let id = add(&mut scene, &item);
        scene.redraw().unwrap();
        item.set_shape(Shape::Rectangle(Rect::new(1.0, 1.0, 4.0, 4.0)));
        scene.update(id, UpdateFlags::GEOMETRY);
        scene.update_items().unwrap();
        scene.recache_all_items().unwrap();
        scene.redraw().unwrap();

        assert!(draws.get() >= 3);
        assert_eq!(unlocked.get(), 0);
        assert!(!manager.is_locked());
        assert!(scene.remove(id));
        scene.clear().unwrap();
        assert!(!manager.is_locked());
        assert!(recording(&mut scene).violations().is_empty());
    }

    // ── layers ───────────────────────────────────────────────────────────

    #[test]
    fn required_layer_cycles_are_rejected() {
        let mut scene = scene();
        scene.set_required(LayerId(1), LayerId(2), true).unwrap();
        scene.set_required(LayerId(2), LayerId(3), true).unwrap();
        assert_eq!(
            scene.set_required(LayerId(3), LayerId(1), true),
            Err(LayerCycleError { layer: LayerId(3), required: LayerId(1) })
        );
        assert!(scene.set_required(LayerId(4), LayerId(4), true).is_err());

        assert!(scene.required_layers_enabled(LayerId(1)));
        scene.set_layer_visible(LayerId(3), false);
        assert!(!scene.required_layers_enabled(LayerId(1)));

        scene.set_required(LayerId(2), LayerId(3), false).unwrap();
        assert!(scene.required_layers_enabled(LayerId(1)));
        scene.set_required(LayerId(3), LayerId(1), true).unwrap();
    }

    #[test]
    fn top_layers_move_above_the_rest() {
        let mut scene = scene();
        scene.set_top_layer(LayerId(2), true);
        assert_eq!(scene.layer_order(LayerId(2)), Some(2));
        scene.enable_top_layer(true).unwrap();
        assert_eq!(scene.layer_order(LayerId(2)), Some(2 + TOP_LAYER_MODIFIER));
        assert_eq!(scene.ordered_layers().last(), Some(&LayerId(2)));
        assert_eq!(scene.top_layer(), Some(LayerId(2)));

        scene.set_top_layer(LayerId(5), true);
        assert_eq!(scene.layer_order(LayerId(5)), Some(5 + TOP_LAYER_MODIFIER));

        scene.clear_top_layers();
        assert_eq!(scene.layer_order(LayerId(2)), Some(2));
        assert_eq!(scene.layer_order(LayerId(5)), Some(5));
        assert_eq!(scene.top_layer(), None);
    }

    #[test]
    fn sort_layers_puts_the_top_most_first() {
        let mut scene = scene();
        scene.set_layer_order(LayerId(0), 100);
        let mut layers = [LayerId(3), LayerId(0), LayerId(5)];
        scene.sort_layers(&mut layers);
        assert_eq!(layers, [LayerId(0), LayerId(5), LayerId(3)]);
    }

    #[test]
    fn reorder_moves_layer_state_and_groups() {
        let mut scene = scene();
        scene.set_gal(gal());
        scene.set_layer_order(LayerId(1), 42);
        let item = square(0.0, 0.0, &[1]);
        let id = add(&mut scene, &item);
        scene.redraw().unwrap();
        let group = scene.cached_group(id, LayerId(1)).unwrap();

        item.set_layers([LayerId(5)]);
        let map: HashMap<LayerId, LayerId> = [(LayerId(1), LayerId(5))].into_iter().collect();
        scene.reorder_layer_data(&map).unwrap();

        assert_eq!(scene.cached_group(id, LayerId(5)), Some(group));
        assert_eq!(scene.layer_order(LayerId(5)), Some(42));
        assert!(scene.layer(LayerId(5)).unwrap().index().contains(id));
        assert_eq!(scene.layer_order(LayerId(1)), Some(1));
    }

    // ── camera ───────────────────────────────────────────────────────────

    #[test]
    fn zoom_keeps_the_anchor_and_respects_limits() {
        let mut scene = scene();
        let anchor = Point::new(10.0, 5.0);
        let before = scene.to_screen(anchor);
        scene.set_scale(8.0, Some(anchor));
        let after = scene.to_screen(anchor);
        assert!((before - after).hypot() < 1e-9);

        scene.set_scale(1e9, None);
        assert_eq!(scene.scale(), scene.config().max_scale);
        scene.set_scale(0.0, None);
        assert_eq!(scene.scale(), scene.config().min_scale);
    }

    #[test]
    fn center_is_clamped_to_the_boundary() {
        let mut scene = Scene::new(SceneConfig {
            layer_count: 1,
            boundary: Rect::new(-100.0, -100.0, 100.0, 100.0),
            ..SceneConfig::default()
        });
        scene.set_center(Point::new(500.0, -500.0));
        assert_eq!(scene.center(), Point::new(100.0, -100.0));
    }

    #[test]
    fn viewport_fits_the_requested_rectangle() {
        let mut scene = scene();
        scene.set_viewport(Rect::new(0.0, 0.0, 100.0, 100.0));
        assert_eq!(scene.center(), Point::new(50.0, 50.0));
        assert_eq!(scene.scale(), 1.0);
        let visible = scene.viewport();
        assert!((visible.width() - 200.0).abs() < 1e-9);
        assert!((visible.height() - 100.0).abs() < 1e-9);
    }

    // ── observers ────────────────────────────────────────────────────────

    #[test]
    fn observers_hear_about_items_and_the_viewport() {
        let mut scene = scene();
        let events = Rc::new(Events::default());
        let observer: Rc<dyn SceneObserver> = events.clone();
        let subscription = scene.subscribe(Rc::downgrade(&observer));

        let item = square(0.0, 0.0, &[0]);
        let id = add(&mut scene, &item);
        scene.remove(id);
        scene.set_center(Point::new(1.0, 1.0));
        assert_eq!(events.added.get(), 1);
        assert_eq!(events.removed.get(), 1);
        assert_eq!(events.viewport.get(), 1);

        assert!(scene.unsubscribe(subscription));
        add(&mut scene, &item);
        assert_eq!(events.added.get(), 1);
    }
}
