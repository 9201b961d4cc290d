//! The world facade: building and driving a dispatcher.
//!
//! [`WorldBuilder`] collects component-type registrations and systems, then
//! [`build`](WorldBuilder::build) runs the dispatcher's pipeline and
//! returns a [`World`]. Configuration defects are aggregated into the
//! returned [`BuildError`](crate::BuildError).
//!
//! Entity and component access on the world itself is unrestricted (the
//! per-system masks only bind system code) and goes through the same
//! change logs, so mutations made between frames are picked up by every
//! system on its next turn.

use std::any::TypeId;
use std::sync::{Arc, RwLock};

use crate::component::{short_type_name, ComponentId};
use crate::dispatcher::{BuildError, Dispatcher};
use crate::entity::Entity;
use crate::registry::Registry;
use crate::system::System;

/// Collects component types and systems for a [`World`].
///
/// # Example
///
/// ```ignore
/// let mut builder = World::builder();
/// builder.register_component::<Position>();
/// builder.register_component::<Velocity>();
/// let movement = builder.add_system(Movement::default());
/// let mut world = builder.build()?;
/// world.execute(0.0, 0.016);
/// ```
pub struct WorldBuilder {
    dispatcher: Dispatcher,
}

impl WorldBuilder {
    pub fn new() -> Self {
        Self {
            dispatcher: Dispatcher::new(Registry::new()),
        }
    }

    /// Registers a component type.
    ///
    /// # Panics
    ///
    /// Panics if the type is already registered.
    pub fn register_component<T: Send + Sync + 'static>(&mut self) -> ComponentId {
        self.dispatcher.registry.register_component::<T>()
    }

    /// Registers a system; ids are dense in registration order.
    ///
    /// Returns the shared handle, usable for external inspection after the
    /// build.
    ///
    /// # Panics
    ///
    /// Panics if a system of the same type is already registered.
    pub fn add_system<S: System>(&mut self, system: S) -> Arc<RwLock<S>> {
        self.dispatcher.add_system(system)
    }

    /// Builds the world: configure pass, precedence graph seal, attachment
    /// resolution, and the initialize hooks (deferred completions are
    /// awaited).
    pub fn build(mut self) -> Result<World, BuildError> {
        self.dispatcher.build()?;
        Ok(World {
            dispatcher: self.dispatcher,
            time: 0.0,
        })
    }
}

impl Default for WorldBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A built ECS world: entity store plus scheduled systems.
pub struct World {
    dispatcher: Dispatcher,
    time: f64,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World").field("time", &self.time).finish()
    }
}

impl World {
    /// Starts a new [`WorldBuilder`].
    pub fn builder() -> WorldBuilder {
        WorldBuilder::new()
    }

    /// Serves one frame at the given timestamp: every running system in
    /// topological order, then the end-of-frame purge.
    pub fn execute(&mut self, time: f64, delta: f64) {
        self.time = time;
        self.dispatcher.execute(time, delta);
    }

    /// Serves one frame `delta` after the previous one.
    pub fn step(&mut self, delta: f64) {
        let time = self.time + delta;
        self.execute(time, delta);
    }

    /// Timestamp of the most recent frame.
    pub fn time(&self) -> f64 {
        self.time
    }

    // ---- Entities & components (between frames or from host code) ----

    /// Creates an entity.
    pub fn create_entity(&mut self) -> Entity {
        self.dispatcher.registry.create_entity()
    }

    /// Destroys an entity. Retained data is purged at the end of the next
    /// frame.
    pub fn destroy_entity(&mut self, entity: Entity) {
        self.dispatcher.registry.destroy_entity(entity);
    }

    /// Adds (or replaces) a component on an entity.
    pub fn insert<T: Send + Sync + 'static>(&mut self, entity: Entity, value: T) {
        self.dispatcher.registry.insert(entity, value);
    }

    /// Removes a component from an entity.
    pub fn remove<T: Send + Sync + 'static>(&mut self, entity: Entity) -> Option<T> {
        self.dispatcher.registry.remove(entity)
    }

    /// Returns a reference to an entity's component.
    pub fn get<T: Send + Sync + 'static>(&self, entity: Entity) -> Option<&T> {
        self.dispatcher.registry.get(entity)
    }

    /// Returns a mutable reference to an entity's component, recording the
    /// write if the type is tracked.
    pub fn write<T: Send + Sync + 'static>(&mut self, entity: Entity) -> Option<&mut T> {
        self.dispatcher.registry.write(entity)
    }

    /// Returns whether the entity currently has component `T`.
    pub fn has<T: Send + Sync + 'static>(&self, entity: Entity) -> bool {
        match self.dispatcher.registry.component_id::<T>() {
            Some(id) => self.dispatcher.registry.has_shape(entity, id, false),
            None => false,
        }
    }

    /// Returns whether the entity is alive.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.dispatcher.registry.is_alive(entity)
    }

    /// Returns the number of alive entities.
    pub fn entity_count(&self) -> u32 {
        self.dispatcher.registry.entity_count()
    }

    // ---- Run-state control ----

    /// Stops system `S`: its `execute` becomes a no-op and its query
    /// results are dropped until a restart.
    ///
    /// # Panics
    ///
    /// Panics if `S` is not registered.
    pub fn stop_system<S: System>(&mut self) {
        let index = self.system_index::<S>();
        self.dispatcher.stop_system(index);
    }

    /// Restarts system `S`, rebuilding its query results from the live
    /// entity set without replaying the stopped interval's change logs.
    ///
    /// # Panics
    ///
    /// Panics if `S` is not registered.
    pub fn restart_system<S: System>(&mut self) {
        let index = self.system_index::<S>();
        self.dispatcher.restart_system(index);
    }

    /// Returns the number of registered systems.
    pub fn system_count(&self) -> usize {
        self.dispatcher.system_count()
    }

    /// Returns system names in execution order.
    ///
    /// Useful for debugging schedule constraints.
    pub fn execution_order(&self) -> Vec<&'static str> {
        self.dispatcher
            .order()
            .iter()
            .map(|&index| self.dispatcher.system_name(index))
            .collect()
    }

    fn system_index<S: System>(&self) -> usize {
        self.dispatcher
            .system_index(TypeId::of::<S>())
            .unwrap_or_else(|| {
                panic!("System `{}` is not registered", short_type_name::<S>())
            })
    }
}
