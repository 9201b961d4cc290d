//! # weft_ecs
//!
//! Entity-Component-System runtime built around a precedence-graph
//! scheduler and incrementally maintained queries.
//!
//! ## Core Types
//!
//! - [`Entity`] — Dense numeric entity identifier
//! - [`World`] / [`WorldBuilder`] — Facade owning the dispatcher, registry,
//!   and change logs
//! - [`System`] — Per-frame unit of logic with `configure` / `initialize` /
//!   `execute` hooks
//! - [`SystemContext`] — Mask-checked component access, queries, and entity
//!   management during a system's turn
//!
//! ## Scheduling
//!
//! - [`PrecedenceGraph`] — Signed-weight constraint graph: cycle
//!   enumeration, transitive reduction, topological order
//! - [`ScheduleBuilder`] — Declarative constraints (`before`, `after`,
//!   denials, writer/reader anchoring)
//! - [`Attachment`] — Typed placeholder for a peer system, resolved at
//!   world build
//!
//! ## Queries & Change Logs
//!
//! - [`QueryBuilder`] / [`QueryHandle`] — Shape predicates with per-type
//!   access flags and write tracking
//! - [`ChangeLog`] / [`LogPointer`] — Append-only shape/write streams with
//!   monotone consumer cursors
//!
//! Systems run serially in topological order; each system's queries absorb
//! exactly the log entries produced since its previous turn, so a system
//! always observes the world as of the moment its turn arrives.
//!
//! See `DESIGN.md` at the repository root for architecture decisions.

mod change_log;
mod component;
mod context;
mod dispatcher;
mod entity;
mod graph;
mod query;
mod registry;
mod system;
mod system_container;
mod world;

pub use change_log::{ChangeLog, LogPointer};
pub use component::{ComponentId, MAX_COMPONENT_TYPES};
pub use context::SystemContext;
pub use dispatcher::{BuildError, ConfigError};
pub use entity::{Entity, ENTITY_ID_BITS, ENTITY_ID_MASK, MAX_ENTITY_ID};
pub use graph::{CycleError, PrecedenceGraph};
pub use query::{QueryBuilder, QueryHandle};
pub use registry::Registry;
pub use system::{Attachment, Deferred, RunState, ScheduleBuilder, System, SystemConfig};
pub use world::{World, WorldBuilder};
