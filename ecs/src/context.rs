//! Per-turn execution context handed to system hooks.
//!
//! A [`SystemContext`] exists only for the duration of one `initialize` or
//! `execute` call. It exposes the host system's query results, component
//! access checked against the system's declared read/write masks, entity
//! creation and destruction, and run-state control.
//!
//! Mask enforcement is strict: touching a component type the system never
//! declared access to is a usage error and panics at the call site.

use fixedbitset::FixedBitSet;

use crate::entity::Entity;
use crate::query::{collect_entities, Query, QueryHandle};
use crate::registry::Registry;

/// Context for component access, queries, and entity management during a
/// single system turn.
pub struct SystemContext<'a> {
    registry: &'a mut Registry,
    queries: &'a [Query],
    read_mask: &'a FixedBitSet,
    write_mask: &'a FixedBitSet,
    system_id: usize,
    system_name: &'a str,
    time: f64,
    delta: f64,
    pub(crate) stop_requested: bool,
}

impl<'a> SystemContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        registry: &'a mut Registry,
        queries: &'a [Query],
        read_mask: &'a FixedBitSet,
        write_mask: &'a FixedBitSet,
        system_id: usize,
        system_name: &'a str,
        time: f64,
        delta: f64,
    ) -> Self {
        Self {
            registry,
            queries,
            read_mask,
            write_mask,
            system_id,
            system_name,
            time,
            delta,
            stop_requested: false,
        }
    }

    // ---- Framework-set read-only fields ----

    /// The host system's dense id.
    pub fn id(&self) -> usize {
        self.system_id
    }

    /// The host system's name.
    pub fn name(&self) -> &str {
        self.system_name
    }

    /// Timestamp of the current frame.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Time elapsed since the previous frame.
    pub fn delta(&self) -> f64 {
        self.delta
    }

    // ---- Queries ----

    fn query(&self, handle: QueryHandle) -> &Query {
        assert!(
            handle.system == self.system_id,
            "query handle of system {} used inside system `{}`",
            handle.system,
            self.system_name
        );
        &self.queries[handle.index]
    }

    /// Entities currently matching the query, ascending by id.
    pub fn entities(&self, handle: QueryHandle) -> Vec<Entity> {
        collect_entities(self.query(handle).results())
    }

    /// Entities whose membership changed (or whose tracked component was
    /// written) this frame. Empty for queries without a transient set.
    pub fn changed(&self, handle: QueryHandle) -> Vec<Entity> {
        match self.query(handle).transient() {
            Some(set) => collect_entities(set),
            None => Vec::new(),
        }
    }

    /// Returns whether the entity is in the query's current result set.
    pub fn contains(&self, handle: QueryHandle, entity: Entity) -> bool {
        self.query(handle).results().contains(entity.id() as usize)
    }

    // ---- Component access ----

    fn check_read<T: 'static>(&self) {
        let id = self.component_id::<T>();
        assert!(
            self.read_mask.contains(id.index()) || self.write_mask.contains(id.index()),
            "system `{}` read component `{}` outside its read mask",
            self.system_name,
            self.registry.component_name(id),
        );
    }

    fn check_write<T: 'static>(&self) {
        let id = self.component_id::<T>();
        assert!(
            self.write_mask.contains(id.index()),
            "system `{}` wrote component `{}` outside its write mask",
            self.system_name,
            self.registry.component_name(id),
        );
    }

    fn component_id<T: 'static>(&self) -> crate::component::ComponentId {
        self.registry.component_id::<T>().unwrap_or_else(|| {
            panic!(
                "Component type `{}` used before registration",
                crate::component::short_type_name::<T>()
            )
        })
    }

    /// Returns a reference to an entity's component.
    ///
    /// # Panics
    ///
    /// Panics if the system declared no read or write access to `T`.
    pub fn get<T: Send + Sync + 'static>(&self, entity: Entity) -> Option<&T> {
        self.check_read::<T>();
        self.registry.get(entity)
    }

    /// Returns a mutable reference to an entity's component; the write is
    /// recorded in the write log if the type is tracked.
    ///
    /// # Panics
    ///
    /// Panics if the system declared no write access to `T`.
    pub fn write<T: Send + Sync + 'static>(&mut self, entity: Entity) -> Option<&mut T> {
        self.check_write::<T>();
        self.registry.write(entity)
    }

    /// Adds (or replaces) a component on an entity.
    ///
    /// # Panics
    ///
    /// Panics if the system declared no write access to `T`.
    pub fn insert<T: Send + Sync + 'static>(&mut self, entity: Entity, value: T) {
        self.check_write::<T>();
        self.registry.insert(entity, value);
    }

    /// Removes a component from an entity.
    ///
    /// # Panics
    ///
    /// Panics if the system declared no write access to `T`.
    pub fn remove<T: Send + Sync + 'static>(&mut self, entity: Entity) -> Option<T> {
        self.check_write::<T>();
        self.registry.remove(entity)
    }

    // ---- Entities ----

    /// Creates an entity. Populate it with [`insert`](Self::insert); the
    /// handle is only meaningful while the entity stays alive.
    pub fn create_entity(&mut self) -> Entity {
        self.registry.create_entity()
    }

    /// Destroys an entity. Its data stays readable through
    /// [`access_recently_deleted_data`](Self::access_recently_deleted_data)
    /// until the end of the frame.
    pub fn destroy_entity(&mut self, entity: Entity) {
        self.registry.destroy_entity(entity);
    }

    // ---- Toggles and run state ----

    /// Makes entities destroyed this frame visible to subsequent query
    /// evaluations and reads (until the end-of-frame purge resets it).
    pub fn access_recently_deleted_data(&mut self, enable: bool) {
        self.registry.set_include_recently_deleted(enable);
    }

    /// Stops the host system when the current call returns: queries are
    /// cleared and further `execute` calls become no-ops until a restart.
    pub fn stop(&mut self) {
        self.stop_requested = true;
    }
}
