//! Entity/component store.
//!
//! The registry owns entity identity (allocation, liveness, recycling),
//! per-entity shape masks, the component data columns, and both change
//! logs. Structural changes (insert/remove/create/destroy) append to the
//! shape log; writes to tracked component types append to the write log.
//!
//! Destroyed entities are retained — shape mask and component data intact —
//! until the dispatcher's end-of-frame purge, so systems that opt in via
//! the recently-deleted toggle can still read them during the frame.

use std::any::Any;

use fixedbitset::FixedBitSet;

use crate::change_log::{pack_write, ChangeLog};
use crate::component::{ComponentId, ComponentTypes};
use crate::entity::{Entity, MAX_ENTITY_ID};

/// Typed sparse column storing components of one type.
///
/// A sparse array maps entity id to a slot in the dense array; the dense
/// array stays contiguous via swap-removal.
pub(crate) struct SparseColumn<T> {
    sparse: Vec<Option<u32>>,
    dense: Vec<T>,
    entities: Vec<u32>,
}

impl<T> SparseColumn<T> {
    fn new() -> Self {
        Self {
            sparse: Vec::new(),
            dense: Vec::new(),
            entities: Vec::new(),
        }
    }

    /// Inserts or replaces the component for an entity.
    ///
    /// Returns `true` if the entity did not have the component before.
    fn insert(&mut self, id: u32, value: T) -> bool {
        let idx = id as usize;
        if idx >= self.sparse.len() {
            self.sparse.resize(idx + 1, None);
        }
        if let Some(dense_idx) = self.sparse[idx] {
            self.dense[dense_idx as usize] = value;
            false
        } else {
            self.sparse[idx] = Some(self.dense.len() as u32);
            self.dense.push(value);
            self.entities.push(id);
            true
        }
    }

    fn remove(&mut self, id: u32) -> Option<T> {
        let idx = id as usize;
        let dense_idx = (*self.sparse.get(idx)?)? as usize;
        self.sparse[idx] = None;

        let last = self.dense.len() - 1;
        if dense_idx != last {
            let moved = self.entities[last];
            self.sparse[moved as usize] = Some(dense_idx as u32);
            self.entities[dense_idx] = moved;
        }
        self.entities.pop();
        Some(self.dense.swap_remove(dense_idx))
    }

    fn get(&self, id: u32) -> Option<&T> {
        let dense_idx = (*self.sparse.get(id as usize)?)? as usize;
        Some(&self.dense[dense_idx])
    }

    fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        let dense_idx = (*self.sparse.get(id as usize)?)? as usize;
        Some(&mut self.dense[dense_idx])
    }

    fn len(&self) -> usize {
        self.dense.len()
    }
}

/// Type-erased storage slot, one per registered component type.
trait Column: Send + Sync {
    fn remove_entity(&mut self, id: u32);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Send + Sync + 'static> Column for SparseColumn<T> {
    fn remove_entity(&mut self, id: u32) {
        self.remove(id);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// The entity/component store consumed by queries and system contexts.
pub struct Registry {
    types: ComponentTypes,
    columns: Vec<Box<dyn Column>>,
    /// Per-entity shape mask over component-type ids.
    shapes: Vec<FixedBitSet>,
    alive: FixedBitSet,
    /// Entities destroyed this frame, retained until the purge.
    recently_deleted: FixedBitSet,
    free_list: Vec<u32>,
    entity_count: u32,
    /// Component types whose writes are appended to the write log.
    tracked: FixedBitSet,
    include_recently_deleted: bool,
    pub(crate) shape_log: ChangeLog,
    pub(crate) write_log: ChangeLog,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            types: ComponentTypes::new(),
            columns: Vec::new(),
            shapes: Vec::new(),
            alive: FixedBitSet::new(),
            recently_deleted: FixedBitSet::new(),
            free_list: Vec::new(),
            entity_count: 0,
            tracked: FixedBitSet::new(),
            include_recently_deleted: false,
            shape_log: ChangeLog::new(),
            write_log: ChangeLog::new(),
        }
    }

    // ---- Component types ----

    /// Registers a component type, assigning the next dense id.
    ///
    /// # Panics
    ///
    /// Panics if `T` is already registered or the type-id space is full.
    pub fn register_component<T: Send + Sync + 'static>(&mut self) -> ComponentId {
        let id = self.types.register::<T>();
        self.columns.push(Box::new(SparseColumn::<T>::new()));
        self.tracked.grow(self.types.len());
        id
    }

    /// Looks up the id assigned to `T`, if registered.
    pub fn component_id<T: 'static>(&self) -> Option<ComponentId> {
        self.types.id_of::<T>()
    }

    /// Returns the short name of a registered component type.
    pub fn component_name(&self, id: ComponentId) -> &'static str {
        self.types.name(id)
    }

    /// Returns the number of registered component types.
    pub fn component_count(&self) -> usize {
        self.types.len()
    }

    pub(crate) fn types(&self) -> &ComponentTypes {
        &self.types
    }

    /// Marks a component type as tracked: subsequent writes append to the
    /// write log.
    pub(crate) fn set_tracked(&mut self, id: ComponentId) {
        self.tracked.insert(id.index());
    }

    fn require_id<T: 'static>(&self) -> ComponentId {
        self.types.id_of::<T>().unwrap_or_else(|| {
            panic!(
                "Component type `{}` used before registration",
                crate::component::short_type_name::<T>()
            )
        })
    }

    fn column<T: Send + Sync + 'static>(&self, id: ComponentId) -> &SparseColumn<T> {
        self.columns[id.index()]
            .as_any()
            .downcast_ref()
            .expect("component column type mismatch")
    }

    fn column_mut<T: Send + Sync + 'static>(&mut self, id: ComponentId) -> &mut SparseColumn<T> {
        self.columns[id.index()]
            .as_any_mut()
            .downcast_mut()
            .expect("component column type mismatch")
    }

    // ---- Entities ----

    /// Allocates a new entity, reusing a purged slot if available.
    pub fn create_entity(&mut self) -> Entity {
        let id = if let Some(id) = self.free_list.pop() {
            id
        } else {
            let id = self.shapes.len() as u32;
            assert!(id <= MAX_ENTITY_ID, "entity id space exhausted");
            self.shapes.push(FixedBitSet::with_capacity(self.types.len()));
            id
        };

        let idx = id as usize;
        self.alive.grow(idx + 1);
        self.alive.insert(idx);
        self.entity_count += 1;
        self.shape_log.push(id);
        Entity::new(id)
    }

    /// Destroys an entity.
    ///
    /// The entity immediately stops being alive, but its shape mask and
    /// component data are retained until [`purge_deleted`](Self::purge_deleted)
    /// so recently-deleted reads keep working for the rest of the frame.
    pub fn destroy_entity(&mut self, entity: Entity) {
        let idx = entity.id() as usize;
        if !self.alive.contains(idx) {
            return;
        }
        self.alive.set(idx, false);
        self.recently_deleted.grow(idx + 1);
        self.recently_deleted.insert(idx);
        self.entity_count -= 1;
        self.shape_log.push(entity.id());
    }

    /// Drops retained data of entities destroyed since the last purge and
    /// recycles their ids. Called by the dispatcher at end of frame.
    ///
    /// Each purged id is logged again so queries that kept a
    /// recently-deleted entity in their results re-evaluate it on their
    /// next turn.
    pub(crate) fn purge_deleted(&mut self) {
        let deleted: Vec<usize> = self.recently_deleted.ones().collect();
        for idx in deleted {
            for column in &mut self.columns {
                column.remove_entity(idx as u32);
            }
            self.shapes[idx].clear();
            self.free_list.push(idx as u32);
            self.shape_log.push(idx as u32);
        }
        self.recently_deleted.clear();
    }

    /// Returns whether the entity is currently alive.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.alive.contains(entity.id() as usize)
    }

    /// Returns the number of alive entities.
    pub fn entity_count(&self) -> u32 {
        self.entity_count
    }

    /// One past the largest entity id ever allocated.
    pub(crate) fn entity_capacity(&self) -> usize {
        self.shapes.len()
    }

    /// Iterates over alive entities in ascending id order.
    pub fn iter_alive(&self) -> impl Iterator<Item = Entity> + '_ {
        self.alive.ones().map(|idx| Entity::new(idx as u32))
    }

    // ---- Shapes ----

    /// Returns whether the entity currently has the component type.
    ///
    /// With `include_recently_deleted`, entities destroyed this frame (but
    /// not yet purged) answer as if still present.
    pub fn has_shape(&self, entity: Entity, component: ComponentId, include_recently_deleted: bool) -> bool {
        let idx = entity.id() as usize;
        if !self.shape_readable(idx, include_recently_deleted) {
            return false;
        }
        self.shapes[idx].contains(component.index())
    }

    /// Evaluates a query predicate against the entity's current shape.
    ///
    /// Honors the registry-level recently-deleted toggle.
    pub(crate) fn matches_shape(&self, id: u32, required: &FixedBitSet, forbidden: &FixedBitSet) -> bool {
        let idx = id as usize;
        if !self.shape_readable(idx, self.include_recently_deleted) {
            return false;
        }
        let shape = &self.shapes[idx];
        required.is_subset(shape) && forbidden.is_disjoint(shape)
    }

    fn shape_readable(&self, idx: usize, include_recently_deleted: bool) -> bool {
        self.alive.contains(idx)
            || (include_recently_deleted && self.recently_deleted.contains(idx))
    }

    /// Flips the registry-level toggle consulted by query predicate
    /// evaluations and component reads.
    pub(crate) fn set_include_recently_deleted(&mut self, enable: bool) {
        self.include_recently_deleted = enable;
    }

    pub(crate) fn include_recently_deleted(&self) -> bool {
        self.include_recently_deleted
    }

    // ---- Component data ----

    /// Inserts (or replaces) a component on an entity.
    ///
    /// A fresh insertion changes the entity's shape and appends to the
    /// shape log; replacement does not.
    ///
    /// # Panics
    ///
    /// Panics if `T` is not registered.
    pub fn insert<T: Send + Sync + 'static>(&mut self, entity: Entity, value: T) {
        let component = self.require_id::<T>();
        let added = self.column_mut::<T>(component).insert(entity.id(), value);
        if added {
            let idx = entity.id() as usize;
            let shape = &mut self.shapes[idx];
            shape.grow(component.index() + 1);
            shape.insert(component.index());
            self.shape_log.push(entity.id());
        }
    }

    /// Removes a component from an entity, returning it.
    ///
    /// # Panics
    ///
    /// Panics if `T` is not registered.
    pub fn remove<T: Send + Sync + 'static>(&mut self, entity: Entity) -> Option<T> {
        let component = self.require_id::<T>();
        let removed = self.column_mut::<T>(component).remove(entity.id());
        if removed.is_some() {
            self.shapes[entity.id() as usize].set(component.index(), false);
            self.shape_log.push(entity.id());
        }
        removed
    }

    /// Returns a reference to an entity's component.
    pub fn get<T: Send + Sync + 'static>(&self, entity: Entity) -> Option<&T> {
        let component = self.types.id_of::<T>()?;
        if !self.shape_readable(entity.id() as usize, self.include_recently_deleted) {
            return None;
        }
        self.column::<T>(component).get(entity.id())
    }

    /// Returns a mutable reference to an entity's component, appending a
    /// write-log entry if the type is tracked.
    ///
    /// # Panics
    ///
    /// Panics if `T` is not registered.
    pub fn write<T: Send + Sync + 'static>(&mut self, entity: Entity) -> Option<&mut T> {
        let component = self.require_id::<T>();
        if !self.shape_readable(entity.id() as usize, self.include_recently_deleted) {
            return None;
        }
        if self.tracked.contains(component.index()) && self.column::<T>(component).get(entity.id()).is_some() {
            self.write_log.push(pack_write(component, entity));
        }
        self.column_mut::<T>(component).get_mut(entity.id())
    }

    /// Returns the number of stored components of type `T`.
    pub fn component_len<T: Send + Sync + 'static>(&self) -> usize {
        match self.types.id_of::<T>() {
            Some(id) => self.column::<T>(id).len(),
            None => 0,
        }
    }
}
