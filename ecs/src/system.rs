//! The system trait and its configuration surface.
//!
//! A system is a plain Rust type implementing [`System`]. Its lifecycle:
//!
//! 1. **Configure** — the dispatcher calls [`System::configure`] once,
//!    before the world is built. This is the only place queries, the
//!    schedule, and attachments can be declared; the [`SystemConfig`]
//!    handed in does not exist at any other time.
//! 2. **Initialize** — [`System::initialize`] runs once in topological
//!    order; it may return a deferred completion which the dispatcher
//!    polls to completion before serving any frame.
//! 3. **Execute** — [`System::execute`] runs once per frame while the
//!    system is in the [`Running`](RunState::Running) state, after its
//!    queries have absorbed the change-log deltas.
//!
//! # Example
//!
//! ```ignore
//! struct Movement {
//!     moving: QueryHandle,
//! }
//!
//! impl System for Movement {
//!     fn configure(&mut self, cfg: &mut SystemConfig<'_>) {
//!         self.moving = cfg.query(|q| {
//!             q.with::<Position>().write().with::<Velocity>().read()
//!         });
//!         cfg.schedule(|s| s.after_writers_of::<Velocity>());
//!     }
//!
//!     fn execute(&mut self, ctx: &mut SystemContext<'_>) {
//!         for entity in ctx.entities(self.moving) {
//!             let vx = ctx.get::<Velocity>(entity).unwrap().x;
//!             ctx.write::<Position>(entity).unwrap().x += vx * ctx.delta() as f32;
//!         }
//!     }
//! }
//! ```

use std::any::{Any, TypeId};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::component::{short_type_name, ComponentTypes};
use crate::context::SystemContext;
use crate::query::{Query, QueryBuilder, QueryHandle};

/// A deferred completion returned by [`System::initialize`].
///
/// The dispatcher polls it to completion (with a no-op waker) before any
/// frame is served.
pub type Deferred = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Run-state of a system.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RunState {
    /// The system executes every frame.
    Running,
    /// `execute` calls are no-ops and query results are empty until a
    /// restart.
    Stopped,
}

/// A per-frame unit of application logic driven by the dispatcher.
pub trait System: Send + Sync + 'static {
    /// Declares queries, at most one schedule, and attachments.
    ///
    /// Called exactly once, before the world is built.
    fn configure(&mut self, _cfg: &mut SystemConfig<'_>) {}

    /// One-time setup after attachment resolution, before the first frame.
    ///
    /// May return a deferred completion; the dispatcher waits for it
    /// before serving frames.
    fn initialize(&mut self, _ctx: &mut SystemContext<'_>) -> Option<Deferred> {
        None
    }

    /// Per-frame body. Runs after this system's queries were brought up to
    /// date against the change logs.
    fn execute(&mut self, ctx: &mut SystemContext<'_>);
}

/// A typed placeholder for a peer system, resolved during world build.
///
/// Created by [`SystemConfig::attach`] and stored in a field of the
/// declaring system. Starts unresolved; the dispatcher fills it exactly
/// once after all systems are registered. Accessing an unresolved
/// attachment panics, which cannot happen after a successful build.
pub struct Attachment<S> {
    slot: Arc<OnceLock<Arc<RwLock<S>>>>,
}

impl<S> Attachment<S> {
    /// Creates an unresolved placeholder.
    ///
    /// Useful as the initial field value before `configure` swaps in the
    /// registered placeholder.
    pub fn unresolved() -> Self {
        Self {
            slot: Arc::new(OnceLock::new()),
        }
    }

    /// Returns whether the placeholder has been resolved.
    pub fn is_resolved(&self) -> bool {
        self.slot.get().is_some()
    }

    /// Locks the peer system for shared access.
    pub fn read(&self) -> RwLockReadGuard<'_, S> {
        self.resolved().read().unwrap()
    }

    /// Locks the peer system for exclusive access.
    pub fn write(&self) -> RwLockWriteGuard<'_, S> {
        self.resolved().write().unwrap()
    }

    fn resolved(&self) -> &Arc<RwLock<S>> {
        self.slot.get().unwrap_or_else(|| {
            panic!(
                "attachment to `{}` used before resolution",
                short_type_name::<S>()
            )
        })
    }
}

impl<S> Clone for Attachment<S> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<S> Default for Attachment<S> {
    fn default() -> Self {
        Self::unresolved()
    }
}

/// A pending attachment recorded during configuration.
///
/// `fill` downcasts the dispatcher's type-erased instance handle and
/// resolves the placeholder; it reports failure so the dispatcher can
/// aggregate the error.
pub(crate) struct AttachmentRequest {
    pub target: TypeId,
    pub target_name: &'static str,
    pub fill: Box<dyn FnOnce(&Arc<dyn Any + Send + Sync>) -> bool + Send>,
}

/// One declarative ordering constraint emitted by a schedule builder.
pub(crate) enum Constraint {
    /// This system precedes the named peer.
    Before(TypeId, &'static str),
    /// The named peer precedes this system.
    After(TypeId, &'static str),
    /// Denial of `Before` at the same weight.
    NotBefore(TypeId, &'static str),
    /// Denial of `After` at the same weight.
    NotAfter(TypeId, &'static str),
    /// Every system that writes the component precedes this system.
    AfterWritersOf(TypeId, &'static str),
    /// This system precedes every system that reads the component.
    BeforeReadersOf(TypeId, &'static str),
}

/// Chainable builder for a system's schedule constraints.
///
/// Named-peer constraints are the most specific and carry the highest
/// default weight; component-anchored constraints bind the whole set of
/// writers/readers of a component at a lower weight, so a named-peer
/// constraint (or denial) can override them.
pub struct ScheduleBuilder {
    pub(crate) constraints: Vec<Constraint>,
}

impl ScheduleBuilder {
    pub(crate) fn new() -> Self {
        Self {
            constraints: Vec::new(),
        }
    }

    /// This system must run before `S`.
    pub fn before<S: 'static>(mut self) -> Self {
        self.constraints
            .push(Constraint::Before(TypeId::of::<S>(), short_type_name::<S>()));
        self
    }

    /// This system must run after `S`.
    pub fn after<S: 'static>(mut self) -> Self {
        self.constraints
            .push(Constraint::After(TypeId::of::<S>(), short_type_name::<S>()));
        self
    }

    /// This system must *not* be ordered before `S`; overrides weaker
    /// inherited constraints without imposing an order itself.
    pub fn not_before<S: 'static>(mut self) -> Self {
        self.constraints.push(Constraint::NotBefore(
            TypeId::of::<S>(),
            short_type_name::<S>(),
        ));
        self
    }

    /// This system must *not* be ordered after `S`.
    pub fn not_after<S: 'static>(mut self) -> Self {
        self.constraints.push(Constraint::NotAfter(
            TypeId::of::<S>(),
            short_type_name::<S>(),
        ));
        self
    }

    /// Every system whose write mask covers component `C` runs before this
    /// system.
    pub fn after_writers_of<C: 'static>(mut self) -> Self {
        self.constraints.push(Constraint::AfterWritersOf(
            TypeId::of::<C>(),
            short_type_name::<C>(),
        ));
        self
    }

    /// This system runs before every system whose read mask covers
    /// component `C`.
    pub fn before_readers_of<C: 'static>(mut self) -> Self {
        self.constraints.push(Constraint::BeforeReadersOf(
            TypeId::of::<C>(),
            short_type_name::<C>(),
        ));
        self
    }
}

/// Configuration collector handed to [`System::configure`].
///
/// Exists only during the configure pass; declaring queries or schedules at
/// any later point is unrepresentable.
pub struct SystemConfig<'a> {
    types: &'a ComponentTypes,
    system_index: usize,
    pub(crate) queries: Vec<Query>,
    pub(crate) unknown_types: Vec<&'static str>,
    pub(crate) constraints: Vec<Constraint>,
    pub(crate) schedule_declared: bool,
    pub(crate) duplicate_schedule: bool,
    pub(crate) attachments: Vec<AttachmentRequest>,
}

impl<'a> SystemConfig<'a> {
    pub(crate) fn new(types: &'a ComponentTypes, system_index: usize) -> Self {
        Self {
            types,
            system_index,
            queries: Vec::new(),
            unknown_types: Vec::new(),
            constraints: Vec::new(),
            schedule_declared: false,
            duplicate_schedule: false,
            attachments: Vec::new(),
        }
    }

    /// Declares a query; the closure shapes it through the builder DSL.
    ///
    /// The returned handle reads this query's results during `execute`.
    pub fn query(&mut self, build: impl FnOnce(QueryBuilder<'a>) -> QueryBuilder<'a>) -> QueryHandle {
        let builder = build(QueryBuilder::new(self.types));
        let (query, unknown) = builder.compile();
        self.unknown_types.extend(unknown);
        let handle = QueryHandle {
            system: self.system_index,
            index: self.queries.len(),
        };
        self.queries.push(query);
        handle
    }

    /// Declares the system's schedule constraints.
    ///
    /// At most one schedule per system; a second call is recorded as a
    /// configuration error and ignored.
    pub fn schedule(&mut self, build: impl FnOnce(ScheduleBuilder) -> ScheduleBuilder) {
        if self.schedule_declared {
            self.duplicate_schedule = true;
            return;
        }
        self.schedule_declared = true;
        self.constraints = build(ScheduleBuilder::new()).constraints;
    }

    /// Declares a placeholder reference to peer system `S`, resolved during
    /// world build. Store the returned value in a field.
    pub fn attach<S: System>(&mut self) -> Attachment<S> {
        let attachment = Attachment::unresolved();
        let slot = attachment.slot.clone();
        self.attachments.push(AttachmentRequest {
            target: TypeId::of::<S>(),
            target_name: short_type_name::<S>(),
            fill: Box::new(move |instance| match instance.clone().downcast::<RwLock<S>>() {
                Ok(typed) => {
                    let _ = slot.set(typed);
                    true
                }
                Err(_) => false,
            }),
        });
        attachment
    }
}
