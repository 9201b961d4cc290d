//! System registration, world build, and per-frame dispatch.
//!
//! The dispatcher is the single owner of the runtime: it holds the registry
//! (and through it both change logs) and every system container. Building
//! runs the configure pass over all systems, translates their declared
//! constraints into weighted precedence edges, seals the graph, resolves
//! attachment placeholders, and drives the `initialize` hooks in
//! topological order — waiting on any deferred completion before the first
//! frame. Configuration errors are aggregated; cycle detection reports all
//! elementary cycles in one error.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use fixedbitset::FixedBitSet;

use crate::component::short_type_name;
use crate::graph::{CycleError, PrecedenceGraph};
use crate::registry::Registry;
use crate::system::{AttachmentRequest, Constraint, Deferred, System};
use crate::system_container::SystemContainer;

/// Weight of a named-peer constraint (`before::<S>()` and friends).
pub(crate) const WEIGHT_PEER: i32 = 4;
/// Weight of a component-anchored constraint (`after_writers_of`,
/// `before_readers_of`). Lower than named-peer: anchored constraints are
/// less specific and yield to explicit ones.
pub(crate) const WEIGHT_ANCHORED: i32 = 2;

/// A single configuration defect found during world build.
#[derive(Debug)]
pub enum ConfigError {
    /// A query referenced a component type that was never registered.
    UnknownComponentType {
        system: &'static str,
        component: &'static str,
    },
    /// A system declared more than one schedule.
    DuplicateSchedule { system: &'static str },
    /// An attachment target is not a registered system.
    UnresolvedAttachment {
        system: &'static str,
        target: &'static str,
    },
    /// A schedule constraint named an unregistered peer system.
    UnknownScheduleTarget {
        system: &'static str,
        target: &'static str,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::UnknownComponentType { system, component } => write!(
                f,
                "system `{system}` queries component type `{component}` before registration"
            ),
            ConfigError::DuplicateSchedule { system } => {
                write!(f, "system `{system}` declared more than one schedule")
            }
            ConfigError::UnresolvedAttachment { system, target } => write!(
                f,
                "system `{system}` attaches to unregistered system `{target}`"
            ),
            ConfigError::UnknownScheduleTarget { system, target } => write!(
                f,
                "system `{system}` schedules against unregistered system `{target}`"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Error returned by world build.
#[derive(Debug)]
pub enum BuildError {
    /// Aggregated configuration defects.
    Config(Vec<ConfigError>),
    /// The precedence graph contains cycles (all listed, shortest first).
    Cycle(CycleError),
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::Config(errors) => {
                let rendered: Vec<String> = errors.iter().map(ConfigError::to_string).collect();
                write!(f, "{}", rendered.join("; "))
            }
            BuildError::Cycle(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BuildError::Config(_) => None,
            BuildError::Cycle(err) => Some(err),
        }
    }
}

/// A system registered but not yet built into a container.
struct PendingSystem {
    name: &'static str,
    type_id: TypeId,
    /// Dispatch handle.
    system: Arc<RwLock<dyn System>>,
    /// Same allocation, type-erased for attachment downcasts.
    instance: Arc<dyn Any + Send + Sync>,
}

/// Owner of the registry and all system containers; drives frames.
pub(crate) struct Dispatcher {
    pub(crate) registry: Registry,
    pending: Vec<PendingSystem>,
    containers: Vec<SystemContainer>,
    order: Vec<usize>,
    by_type: HashMap<TypeId, usize>,
    built: bool,
}

impl Dispatcher {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            pending: Vec::new(),
            containers: Vec::new(),
            order: Vec::new(),
            by_type: HashMap::new(),
            built: false,
        }
    }

    /// Registers a system, assigning the next dense id.
    ///
    /// Returns the shared handle so the caller can keep a clone for
    /// external access.
    ///
    /// # Panics
    ///
    /// Panics if the dispatcher is already built or a system of the same
    /// type is already registered.
    pub fn add_system<S: System>(&mut self, system: S) -> Arc<RwLock<S>> {
        assert!(!self.built, "systems cannot be registered after build");
        let type_id = TypeId::of::<S>();
        assert!(
            !self.by_type.contains_key(&type_id),
            "System `{}` is already registered",
            short_type_name::<S>()
        );

        let arc = Arc::new(RwLock::new(system));
        self.by_type.insert(type_id, self.pending.len());
        self.pending.push(PendingSystem {
            name: short_type_name::<S>(),
            type_id,
            system: arc.clone(),
            instance: arc.clone(),
        });
        arc
    }

    /// Runs the build pipeline: configure pass, graph construction, seal,
    /// attachment resolution, container construction, initialize.
    pub fn build(&mut self) -> Result<(), BuildError> {
        assert!(!self.built, "dispatcher built twice");
        let n = self.pending.len();
        let type_count = self.registry.component_count();
        let mut errors = Vec::new();

        // Configure pass: collect queries, masks, constraints, attachments.
        let mut queries = Vec::with_capacity(n);
        let mut constraints: Vec<Vec<Constraint>> = Vec::with_capacity(n);
        let mut attachments: Vec<Vec<AttachmentRequest>> = Vec::with_capacity(n);
        let mut read_masks = Vec::with_capacity(n);
        let mut write_masks = Vec::with_capacity(n);

        for (index, pending) in self.pending.iter().enumerate() {
            let mut cfg = crate::system::SystemConfig::new(self.registry.types(), index);
            pending.system.write().unwrap().configure(&mut cfg);

            let mut read_mask = FixedBitSet::with_capacity(type_count);
            let mut write_mask = FixedBitSet::with_capacity(type_count);
            for query in &cfg.queries {
                read_mask.union_with(&query.reads);
                write_mask.union_with(&query.writes);
            }

            for component in cfg.unknown_types.drain(..) {
                errors.push(ConfigError::UnknownComponentType {
                    system: pending.name,
                    component,
                });
            }
            if cfg.duplicate_schedule {
                errors.push(ConfigError::DuplicateSchedule {
                    system: pending.name,
                });
            }

            queries.push(cfg.queries);
            constraints.push(cfg.constraints);
            attachments.push(cfg.attachments);
            read_masks.push(read_mask);
            write_masks.push(write_mask);
        }

        // Graph construction. Positive edges first, denials after, so an
        // equal-weight denial suppresses its positive counterpart no matter
        // the declaration order.
        let mut graph =
            PrecedenceGraph::new(self.pending.iter().map(|p| p.name.to_string()).collect());
        let mut edge_count = 0usize;

        for (index, system_constraints) in constraints.iter().enumerate() {
            for constraint in system_constraints {
                match constraint {
                    Constraint::Before(target, target_name) => {
                        match self.by_type.get(target) {
                            Some(&peer) => {
                                graph.add(index, peer, WEIGHT_PEER);
                                edge_count += 1;
                            }
                            None => errors.push(ConfigError::UnknownScheduleTarget {
                                system: self.pending[index].name,
                                target: *target_name,
                            }),
                        }
                    }
                    Constraint::After(target, target_name) => match self.by_type.get(target) {
                        Some(&peer) => {
                            graph.add(peer, index, WEIGHT_PEER);
                            edge_count += 1;
                        }
                        None => errors.push(ConfigError::UnknownScheduleTarget {
                            system: self.pending[index].name,
                            target: *target_name,
                        }),
                    },
                    Constraint::AfterWritersOf(component, component_name) => {
                        match self.registry.types().id_by_type_id(*component) {
                            Some(id) => {
                                for peer in 0..n {
                                    if peer != index && write_masks[peer].contains(id.index()) {
                                        graph.add(peer, index, WEIGHT_ANCHORED);
                                        edge_count += 1;
                                    }
                                }
                            }
                            None => errors.push(ConfigError::UnknownComponentType {
                                system: self.pending[index].name,
                                component: *component_name,
                            }),
                        }
                    }
                    Constraint::BeforeReadersOf(component, component_name) => {
                        match self.registry.types().id_by_type_id(*component) {
                            Some(id) => {
                                for peer in 0..n {
                                    if peer != index && read_masks[peer].contains(id.index()) {
                                        graph.add(index, peer, WEIGHT_ANCHORED);
                                        edge_count += 1;
                                    }
                                }
                            }
                            None => errors.push(ConfigError::UnknownComponentType {
                                system: self.pending[index].name,
                                component: *component_name,
                            }),
                        }
                    }
                    Constraint::NotBefore(..) | Constraint::NotAfter(..) => {}
                }
            }
        }
        for (index, system_constraints) in constraints.iter().enumerate() {
            for constraint in system_constraints {
                match constraint {
                    Constraint::NotBefore(target, target_name) => {
                        match self.by_type.get(target) {
                            Some(&peer) => graph.deny(index, peer, WEIGHT_PEER),
                            None => errors.push(ConfigError::UnknownScheduleTarget {
                                system: self.pending[index].name,
                                target: *target_name,
                            }),
                        }
                    }
                    Constraint::NotAfter(target, target_name) => match self.by_type.get(target) {
                        Some(&peer) => graph.deny(peer, index, WEIGHT_PEER),
                        None => errors.push(ConfigError::UnknownScheduleTarget {
                            system: self.pending[index].name,
                            target: *target_name,
                        }),
                    },
                    _ => {}
                }
            }
        }

        // Attachment resolution: one-shot placeholder fills.
        for (index, requests) in attachments.into_iter().enumerate() {
            for request in requests {
                let resolved = self
                    .by_type
                    .get(&request.target)
                    .map(|&peer| (request.fill)(&self.pending[peer].instance))
                    .unwrap_or(false);
                if !resolved {
                    errors.push(ConfigError::UnresolvedAttachment {
                        system: self.pending[index].name,
                        target: request.target_name,
                    });
                }
            }
        }

        if !errors.is_empty() {
            return Err(BuildError::Config(errors));
        }

        graph.seal().map_err(BuildError::Cycle)?;
        self.order = graph.order().to_vec();

        // Containers, write tracking, and the initialize pass.
        for (index, pending) in self.pending.iter().enumerate() {
            let system_queries = std::mem::take(&mut queries[index]);
            for query in &system_queries {
                for watched in query.watched().ones() {
                    self.registry
                        .set_tracked(crate::component::ComponentId(watched as u32));
                }
            }
            self.containers.push(SystemContainer::new(
                index,
                pending.name,
                pending.system.clone(),
                system_queries,
                std::mem::take(&mut read_masks[index]),
                std::mem::take(&mut write_masks[index]),
                &self.registry,
            ));
        }
        self.built = true;

        log::debug!(
            "world built: {} systems, {} constraint edges, order {:?}",
            n,
            edge_count,
            self.order
                .iter()
                .map(|&i| self.containers[i].name)
                .collect::<Vec<_>>()
        );

        for i in 0..self.order.len() {
            let index = self.order[i];
            if let Some(deferred) = self.containers[index].initialize(&mut self.registry, 0.0) {
                block_on(deferred);
            }
        }
        self.registry.purge_deleted();
        self.registry.set_include_recently_deleted(false);

        Ok(())
    }

    /// Serves one frame: every running system in topological order, then
    /// the end-of-frame purge of destroyed entities.
    pub fn execute(&mut self, time: f64, delta: f64) {
        assert!(self.built, "frame executed before build");
        for i in 0..self.order.len() {
            let index = self.order[i];
            self.containers[index].run_frame(&mut self.registry, time, delta);
        }
        self.registry.purge_deleted();
        self.registry.set_include_recently_deleted(false);
    }

    /// Looks up a system's dense id by type.
    pub fn system_index(&self, type_id: TypeId) -> Option<usize> {
        self.by_type.get(&type_id).copied()
    }

    pub fn stop_system(&mut self, index: usize) {
        self.containers[index].stop();
    }

    pub fn restart_system(&mut self, index: usize) {
        let container = &mut self.containers[index];
        container.restart(&self.registry);
    }

    pub fn system_count(&self) -> usize {
        if self.built {
            self.containers.len()
        } else {
            self.pending.len()
        }
    }

    /// Topological execution order over system ids.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Name of the system with the given dense id.
    pub fn system_name(&self, index: usize) -> &'static str {
        self.containers[index].name
    }
}

/// Polls a deferred initialize completion to the end with a no-op waker.
fn block_on(mut future: Deferred) {
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    loop {
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => break,
            Poll::Pending => std::thread::yield_now(),
        }
    }
}

fn noop_waker() -> Waker {
    fn noop(_: *const ()) {}
    fn clone(p: *const ()) -> RawWaker {
        RawWaker::new(p, &VTABLE)
    }
    static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
    unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) }
}
