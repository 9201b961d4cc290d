//! Per-system runtime state and the frame-update pipeline.
//!
//! The dispatcher owns one [`SystemContainer`] per registered system. The
//! container holds everything the framework tracks on a system's behalf:
//! run-state, read/write masks, the queries it owns, its change-log
//! cursors, and the processed-entity scratch set.
//!
//! Before each `execute`, the container brings the system's queries up to
//! date against the change logs along one of three paths:
//!
//! 1. New shape entries, or new write entries for a write-query host:
//!    clear every transient set, consume both logs.
//! 2. Nothing new but transients are still populated from last frame:
//!    clear them (transients persist across exactly one idle frame).
//! 3. Otherwise: no work.
//!
//! Shape updates dominate writes: an entity whose shape changed this frame
//! is marked in the processed set and its write entries are skipped.

use std::sync::{Arc, RwLock};

use fixedbitset::FixedBitSet;

use crate::change_log::{unpack_write, LogPointer};
use crate::context::SystemContext;
use crate::query::Query;
use crate::registry::Registry;
use crate::system::{Deferred, RunState, System};

pub(crate) struct SystemContainer {
    pub id: usize,
    pub name: &'static str,
    state: RunState,
    system: Arc<RwLock<dyn System>>,
    pub(crate) read_mask: FixedBitSet,
    pub(crate) write_mask: FixedBitSet,
    queries: Vec<Query>,
    shape_cursor: LogPointer,
    /// Allocated only when the system owns at least one write query.
    write_cursor: Option<LogPointer>,
    /// Entities already delivered a shape update this frame.
    processed: FixedBitSet,
    ran_last_frame: bool,
    has_transient_queries: bool,
}

impl SystemContainer {
    pub fn new(
        id: usize,
        name: &'static str,
        system: Arc<RwLock<dyn System>>,
        queries: Vec<Query>,
        read_mask: FixedBitSet,
        write_mask: FixedBitSet,
        registry: &Registry,
    ) -> Self {
        let has_write_queries = queries.iter().any(Query::is_write_query);
        let has_transient_queries = queries.iter().any(Query::has_transient);
        Self {
            id,
            name,
            state: RunState::Running,
            system,
            read_mask,
            write_mask,
            queries,
            shape_cursor: registry.shape_log.create_pointer(),
            write_cursor: has_write_queries.then(|| registry.write_log.create_pointer()),
            processed: FixedBitSet::new(),
            ran_last_frame: false,
            has_transient_queries,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub(crate) fn queries(&self) -> &[Query] {
        &self.queries
    }

    /// Runs the user's `initialize` hook, returning its deferred completion
    /// if any.
    pub fn initialize(&mut self, registry: &mut Registry, time: f64) -> Option<Deferred> {
        let system = self.system.clone();
        let mut guard = system.write().unwrap();
        let mut ctx = SystemContext::new(
            registry,
            &self.queries,
            &self.read_mask,
            &self.write_mask,
            self.id,
            self.name,
            time,
            0.0,
        );
        let deferred = guard.initialize(&mut ctx);
        let stop = ctx.stop_requested;
        drop(ctx);
        drop(guard);
        if stop {
            self.stop();
        }
        deferred
    }

    /// Serves one frame: query update pipeline, then the user's `execute`.
    /// A no-op while stopped.
    pub fn run_frame(&mut self, registry: &mut Registry, time: f64, delta: f64) {
        if self.state == RunState::Stopped {
            return;
        }

        self.update_queries(registry);

        let system = self.system.clone();
        let mut guard = system.write().unwrap();
        let mut ctx = SystemContext::new(
            registry,
            &self.queries,
            &self.read_mask,
            &self.write_mask,
            self.id,
            self.name,
            time,
            delta,
        );
        guard.execute(&mut ctx);
        let stop = ctx.stop_requested;
        drop(ctx);
        drop(guard);
        if stop {
            self.stop();
        }
    }

    /// Transition to `Stopped`: all query results are dropped so a restart
    /// rebuilds them from scratch.
    pub fn stop(&mut self) {
        if self.state == RunState::Stopped {
            return;
        }
        self.state = RunState::Stopped;
        for query in &mut self.queries {
            query.clear_results();
        }
        log::debug!("system `{}` stopped", self.name);
    }

    /// Transition back to `Running`, catching up on the stopped interval:
    /// every live entity is delivered a synthetic shape update to rebuild
    /// result sets, transients are cleared, and both cursors re-anchor at
    /// the current log tails so backlog entries never replay.
    pub fn restart(&mut self, registry: &Registry) {
        if self.state == RunState::Running {
            return;
        }
        self.state = RunState::Running;

        for entity in registry.iter_alive() {
            for query in &mut self.queries {
                query.handle_shape_update(entity.id(), registry);
            }
        }
        for query in &mut self.queries {
            query.clear_transient();
        }

        registry.shape_log.reanchor(&mut self.shape_cursor);
        if let Some(cursor) = &mut self.write_cursor {
            registry.write_log.reanchor(cursor);
        }
        self.ran_last_frame = false;
        log::debug!("system `{}` restarted", self.name);
    }

    /// The three-path query update (see module docs).
    fn update_queries(&mut self, registry: &Registry) {
        let shapes_changed = registry.shape_log.has_updates_since(&self.shape_cursor);
        let writes_made = self
            .write_cursor
            .as_ref()
            .is_some_and(|cursor| registry.write_log.has_updates_since(cursor));

        if shapes_changed || writes_made {
            for query in &mut self.queries {
                query.clear_transient();
            }
            self.consume_logs(registry);
            self.ran_last_frame = true;
        } else if self.has_transient_queries && self.ran_last_frame {
            for query in &mut self.queries {
                query.clear_transient();
            }
            self.ran_last_frame = false;
        } else {
            self.ran_last_frame = false;
        }
    }

    /// Drains both logs. Shape entries first: each distinct entity gets one
    /// shape update across all queries. Write entries second: skipped for
    /// entities whose shape already changed this frame, otherwise delivered
    /// to every write query with the component bit pre-decomposed.
    fn consume_logs(&mut self, registry: &Registry) {
        self.processed.clear();
        self.processed.grow(registry.entity_capacity());

        while let Some(slice) = registry.shape_log.process_since(&mut self.shape_cursor) {
            for &id in slice {
                let idx = id as usize;
                if self.processed.contains(idx) {
                    continue;
                }
                self.processed.grow(idx + 1);
                self.processed.insert(idx);
                for query in &mut self.queries {
                    query.handle_shape_update(id, registry);
                }
            }
        }

        if let Some(cursor) = &mut self.write_cursor {
            while let Some(slice) = registry.write_log.process_since(cursor) {
                for &entry in slice {
                    let (component, id) = unpack_write(entry);
                    if self.processed.contains(id as usize) {
                        continue;
                    }
                    let word_offset = (component >> 5) as usize;
                    let bit_mask = 1u32 << (component & 31);
                    for query in &mut self.queries {
                        if query.is_write_query() {
                            query.handle_write(id, word_offset, bit_mask);
                        }
                    }
                }
            }
        }
    }
}
