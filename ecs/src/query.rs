//! Compiled entity queries with incremental maintenance.
//!
//! A query is declared once, during system configuration, through the
//! chainable [`QueryBuilder`] DSL and compiled into bit-masks: required and
//! forbidden shape predicates, per-type read/write access (OR-ed into the
//! host system's masks), and a watched-writes mask for queries that track
//! writes. From then on it is never re-scanned — the host system feeds it
//! shape-update and write events decoded from the change logs, and the
//! result set stays equal to the set of live entities matching the
//! predicate at the moment the host runs.

use fixedbitset::FixedBitSet;

use crate::component::{short_type_name, ComponentId, ComponentTypes};
use crate::entity::Entity;
use crate::registry::Registry;

/// Handle to a query owned by a system, returned at declaration time.
///
/// Pass it back to [`SystemContext`](crate::SystemContext) accessors during
/// `execute` to read the current and transient result sets.
#[derive(Clone, Copy, Debug)]
pub struct QueryHandle {
    pub(crate) system: usize,
    pub(crate) index: usize,
}

/// A compiled query: predicate masks, access masks, and result state.
pub(crate) struct Query {
    /// Component types an entity must have.
    required: FixedBitSet,
    /// Component types an entity must not have.
    forbidden: FixedBitSet,
    /// Types this query reads.
    pub(crate) reads: FixedBitSet,
    /// Types this query writes.
    pub(crate) writes: FixedBitSet,
    /// Types whose writes (by earlier systems) land in the transient set.
    watched_writes: FixedBitSet,
    /// Entities currently matching the predicate.
    results: FixedBitSet,
    /// Entities whose membership changed or whose watched component was
    /// written this frame. `None` for queries that never asked for deltas.
    transient: Option<FixedBitSet>,
}

impl Query {
    /// A query is a *write query* iff it watches writes to at least one
    /// referenced type; only write queries receive write events, and only
    /// systems owning one allocate a write-log cursor.
    pub(crate) fn is_write_query(&self) -> bool {
        self.watched_writes.count_ones(..) > 0
    }

    pub(crate) fn has_transient(&self) -> bool {
        self.transient.is_some()
    }

    pub(crate) fn results(&self) -> &FixedBitSet {
        &self.results
    }

    pub(crate) fn transient(&self) -> Option<&FixedBitSet> {
        self.transient.as_ref()
    }

    pub(crate) fn watched(&self) -> &FixedBitSet {
        &self.watched_writes
    }

    /// Re-evaluates the predicate for one entity against its live shape and
    /// updates the result set; a membership transition is recorded in the
    /// transient set.
    pub(crate) fn handle_shape_update(&mut self, id: u32, registry: &Registry) {
        let idx = id as usize;
        let matches = registry.matches_shape(id, &self.required, &self.forbidden);
        let had = self.results.contains(idx);
        if matches == had {
            return;
        }
        self.results.grow(idx + 1);
        self.results.set(idx, matches);
        if let Some(transient) = &mut self.transient {
            transient.grow(idx + 1);
            transient.insert(idx);
        }
    }

    /// Delivers a write event. The component bit is pre-decomposed by the
    /// caller into its word offset and mask within the packed 32-bit words
    /// of the watched-writes set.
    pub(crate) fn handle_write(&mut self, id: u32, word_offset: usize, bit_mask: u32) {
        let watched = self.watched_writes.as_slice();
        let hit = watched
            .get(word_offset)
            .is_some_and(|&word| word & bit_mask != 0);
        if !hit || !self.results.contains(id as usize) {
            return;
        }
        if let Some(transient) = &mut self.transient {
            transient.grow(id as usize + 1);
            transient.insert(id as usize);
        }
    }

    /// Drops every result. Used by `stop()` so a later restart re-discovers
    /// matching entities from scratch.
    pub(crate) fn clear_results(&mut self) {
        self.results.clear();
        if let Some(transient) = &mut self.transient {
            transient.clear();
        }
    }

    pub(crate) fn clear_transient(&mut self) {
        if let Some(transient) = &mut self.transient {
            transient.clear();
        }
    }
}

/// Chainable query declaration DSL.
///
/// Shape terms: [`with`](Self::with) (required), [`without`](Self::without)
/// (forbidden), [`using`](Self::using) (referenced for access only). Access
/// flags apply to the most recent `with`/`using` term:
/// [`read`](Self::read), [`write`](Self::write),
/// [`track_writes`](Self::track_writes). [`record_changes`](Self::record_changes)
/// gives the query a transient set of membership deltas.
///
/// # Example
///
/// ```ignore
/// let moving = cfg.query(|q| {
///     q.with::<Position>().write()
///         .with::<Velocity>().read()
///         .without::<Frozen>()
/// });
/// ```
pub struct QueryBuilder<'a> {
    types: &'a ComponentTypes,
    required: FixedBitSet,
    forbidden: FixedBitSet,
    reads: FixedBitSet,
    writes: FixedBitSet,
    watched_writes: FixedBitSet,
    transient: bool,
    last: Option<ComponentId>,
    /// Names of component types referenced before registration.
    pub(crate) unknown_types: Vec<&'static str>,
}

impl<'a> QueryBuilder<'a> {
    pub(crate) fn new(types: &'a ComponentTypes) -> Self {
        let n = types.len();
        Self {
            types,
            required: FixedBitSet::with_capacity(n),
            forbidden: FixedBitSet::with_capacity(n),
            reads: FixedBitSet::with_capacity(n),
            writes: FixedBitSet::with_capacity(n),
            watched_writes: FixedBitSet::with_capacity(n),
            transient: false,
            last: None,
            unknown_types: Vec::new(),
        }
    }

    fn resolve<T: 'static>(&mut self) -> Option<ComponentId> {
        let id = self.types.id_of::<T>();
        if id.is_none() {
            self.unknown_types.push(short_type_name::<T>());
        }
        id
    }

    /// Requires entities to have component `T`.
    pub fn with<T: 'static>(mut self) -> Self {
        self.last = self.resolve::<T>();
        if let Some(id) = self.last {
            self.required.insert(id.index());
        }
        self
    }

    /// Excludes entities that have component `T`.
    pub fn without<T: 'static>(mut self) -> Self {
        if let Some(id) = self.resolve::<T>() {
            self.forbidden.insert(id.index());
        }
        self.last = None;
        self
    }

    /// References component `T` for access without constraining the shape.
    pub fn using<T: 'static>(mut self) -> Self {
        self.last = self.resolve::<T>();
        self
    }

    /// Grants read access to the most recent `with`/`using` type.
    pub fn read(mut self) -> Self {
        if let Some(id) = self.flag_target("read()") {
            self.reads.insert(id.index());
        }
        self
    }

    /// Grants write access to the most recent `with`/`using` type.
    pub fn write(mut self) -> Self {
        if let Some(id) = self.flag_target("write()") {
            self.writes.insert(id.index());
        }
        self
    }

    /// Watches writes to the most recent `with`/`using` type: writes made
    /// by earlier systems land in the transient set. Implies read access
    /// and makes this a write query.
    pub fn track_writes(mut self) -> Self {
        if let Some(id) = self.flag_target("track_writes()") {
            self.watched_writes.insert(id.index());
            self.reads.insert(id.index());
            self.transient = true;
        }
        self
    }

    /// Gives the query a transient result set recording entities whose
    /// membership changed during the current frame.
    pub fn record_changes(mut self) -> Self {
        self.transient = true;
        self
    }

    /// The type the next access flag applies to. `None` (flag skipped)
    /// when the reference failed to resolve — that defect is already
    /// recorded for aggregation.
    fn flag_target(&self, flag: &str) -> Option<ComponentId> {
        if self.last.is_none() && !self.unknown_types.is_empty() {
            return None;
        }
        Some(self.last.unwrap_or_else(|| {
            panic!("{flag} requires a preceding with() or using() component reference")
        }))
    }

    pub(crate) fn compile(self) -> (Query, Vec<&'static str>) {
        let query = Query {
            required: self.required,
            forbidden: self.forbidden,
            reads: self.reads,
            writes: self.writes,
            watched_writes: self.watched_writes,
            results: FixedBitSet::new(),
            transient: if self.transient {
                Some(FixedBitSet::new())
            } else {
                None
            },
        };
        (query, self.unknown_types)
    }
}

/// Collects the entities of a result bit-set in ascending id order.
pub(crate) fn collect_entities(set: &FixedBitSet) -> Vec<Entity> {
    set.ones().map(|idx| Entity::new(idx as u32)).collect()
}
