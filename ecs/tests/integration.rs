use std::sync::{Arc, Mutex, RwLock};

use weft_ecs::{
    Attachment, BuildError, QueryHandle, System, SystemConfig, SystemContext, World,
};

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

struct Marker;

struct Position {
    x: f32,
}

// ---------------------------------------------------------------------------
// Attachment: one system writes into another through a resolved placeholder
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Receiver {
    message: String,
    seen: String,
}

impl System for Receiver {
    fn execute(&mut self, _ctx: &mut SystemContext<'_>) {
        self.seen = self.message.clone();
    }
}

struct Sender {
    receiver: Attachment<Receiver>,
}

impl System for Sender {
    fn configure(&mut self, cfg: &mut SystemConfig<'_>) {
        self.receiver = cfg.attach::<Receiver>();
    }
    fn execute(&mut self, _ctx: &mut SystemContext<'_>) {
        self.receiver.write().message = "hello".to_string();
    }
}

#[test]
fn attachment_message_passing() {
    let mut builder = World::builder();
    builder.add_system(Sender {
        receiver: Attachment::unresolved(),
    });
    let receiver = builder.add_system(Receiver::default());
    let mut world = builder.build().unwrap();

    world.execute(0.0, 0.016);
    assert_eq!(receiver.read().unwrap().message, "hello");
    assert_eq!(receiver.read().unwrap().seen, "hello");
}

// ---------------------------------------------------------------------------
// Schedule `before`: constraint wins under either registration order
// ---------------------------------------------------------------------------

struct OrderedSender {
    receiver: Attachment<Receiver>,
}

impl System for OrderedSender {
    fn configure(&mut self, cfg: &mut SystemConfig<'_>) {
        self.receiver = cfg.attach::<Receiver>();
        cfg.schedule(|s| s.before::<Receiver>());
    }
    fn execute(&mut self, _ctx: &mut SystemContext<'_>) {
        self.receiver.write().message = "hello".to_string();
    }
}

#[test]
fn schedule_before_sender_registered_first() {
    let mut builder = World::builder();
    builder.add_system(OrderedSender {
        receiver: Attachment::unresolved(),
    });
    let receiver = builder.add_system(Receiver::default());
    let mut world = builder.build().unwrap();

    world.execute(0.0, 0.016);
    assert_eq!(receiver.read().unwrap().seen, "hello");
}

#[test]
fn schedule_before_sender_registered_last() {
    let mut builder = World::builder();
    let receiver = builder.add_system(Receiver::default());
    builder.add_system(OrderedSender {
        receiver: Attachment::unresolved(),
    });
    let mut world = builder.build().unwrap();

    world.execute(0.0, 0.016);
    assert_eq!(receiver.read().unwrap().seen, "hello");
}

// ---------------------------------------------------------------------------
// Cycle detection at world build
// ---------------------------------------------------------------------------

struct CycleA;
impl System for CycleA {
    fn configure(&mut self, cfg: &mut SystemConfig<'_>) {
        cfg.schedule(|s| s.before::<CycleB>());
    }
    fn execute(&mut self, _ctx: &mut SystemContext<'_>) {}
}

struct CycleB;
impl System for CycleB {
    fn configure(&mut self, cfg: &mut SystemConfig<'_>) {
        cfg.schedule(|s| s.before::<CycleC>());
    }
    fn execute(&mut self, _ctx: &mut SystemContext<'_>) {}
}

struct CycleC;
impl System for CycleC {
    fn configure(&mut self, cfg: &mut SystemConfig<'_>) {
        cfg.schedule(|s| s.before::<CycleA>());
    }
    fn execute(&mut self, _ctx: &mut SystemContext<'_>) {}
}

#[test]
fn cycle_detection_names_the_cycle() {
    let mut builder = World::builder();
    builder.add_system(CycleA);
    builder.add_system(CycleB);
    builder.add_system(CycleC);

    let err = builder.build().unwrap_err();
    let message = err.to_string();
    assert!(
        message.contains("CycleA\u{2014}CycleB\u{2014}CycleC"),
        "unexpected error message: {message}"
    );
    match err {
        BuildError::Cycle(cycle) => assert_eq!(cycle.cycles.len(), 1),
        other => panic!("expected cycle error, got: {other}"),
    }
}

// ---------------------------------------------------------------------------
// Transitive reduction: redundant constraint changes nothing about the order
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Trace(Arc<Mutex<Vec<&'static str>>>);

struct RedA(Trace);
impl System for RedA {
    fn configure(&mut self, cfg: &mut SystemConfig<'_>) {
        // A→B, plus the redundant shortcut A→C.
        cfg.schedule(|s| s.before::<RedB>().before::<RedC>());
    }
    fn execute(&mut self, _ctx: &mut SystemContext<'_>) {
        self.0 .0.lock().unwrap().push("a");
    }
}

struct RedB(Trace);
impl System for RedB {
    fn configure(&mut self, cfg: &mut SystemConfig<'_>) {
        cfg.schedule(|s| s.before::<RedC>());
    }
    fn execute(&mut self, _ctx: &mut SystemContext<'_>) {
        self.0 .0.lock().unwrap().push("b");
    }
}

struct RedC(Trace);
impl System for RedC {
    fn execute(&mut self, _ctx: &mut SystemContext<'_>) {
        self.0 .0.lock().unwrap().push("c");
    }
}

#[test]
fn transitive_reduction_preserves_chain_order() {
    let trace = Trace(Arc::new(Mutex::new(Vec::new())));

    // Register in reverse so registration order cannot mask the result.
    let mut builder = World::builder();
    builder.add_system(RedC(trace.clone()));
    builder.add_system(RedB(trace.clone()));
    builder.add_system(RedA(trace.clone()));
    let mut world = builder.build().unwrap();

    world.execute(0.0, 0.016);
    assert_eq!(*trace.0.lock().unwrap(), vec!["a", "b", "c"]);
}

// ---------------------------------------------------------------------------
// Denial override: a stronger denial erases an anchored constraint
// ---------------------------------------------------------------------------

struct DeniedWriter(Trace);
impl System for DeniedWriter {
    fn configure(&mut self, cfg: &mut SystemConfig<'_>) {
        cfg.query(|q| q.using::<Position>().write());
        // The anchored constraint (weight 2) would put this system before
        // the reader; the named denial (weight 4) erases it.
        cfg.schedule(|s| {
            s.before_readers_of::<Position>()
                .not_before::<DeniedReader>()
        });
    }
    fn execute(&mut self, _ctx: &mut SystemContext<'_>) {
        self.0 .0.lock().unwrap().push("writer");
    }
}

struct DeniedReader(Trace);
impl System for DeniedReader {
    fn configure(&mut self, cfg: &mut SystemConfig<'_>) {
        cfg.query(|q| q.using::<Position>().read());
    }
    fn execute(&mut self, _ctx: &mut SystemContext<'_>) {
        self.0 .0.lock().unwrap().push("reader");
    }
}

#[test]
fn denial_leaves_pair_unconstrained() {
    let trace = Trace(Arc::new(Mutex::new(Vec::new())));

    // Reader registered first: with the pair unconstrained, registration
    // order decides, proving the anchored edge was erased.
    let mut builder = World::builder();
    builder.register_component::<Position>();
    builder.add_system(DeniedReader(trace.clone()));
    builder.add_system(DeniedWriter(trace.clone()));
    let mut world = builder.build().unwrap();

    world.execute(0.0, 0.016);
    assert_eq!(*trace.0.lock().unwrap(), vec!["reader", "writer"]);
}

#[test]
fn anchored_constraint_orders_without_denial() {
    // Same pair minus the denial: the writer must come first.
    struct AnchoredWriter(Trace);
    impl System for AnchoredWriter {
        fn configure(&mut self, cfg: &mut SystemConfig<'_>) {
            cfg.query(|q| q.using::<Position>().write());
            cfg.schedule(|s| s.before_readers_of::<Position>());
        }
        fn execute(&mut self, _ctx: &mut SystemContext<'_>) {
            self.0 .0.lock().unwrap().push("writer");
        }
    }
    struct AnchoredReader(Trace);
    impl System for AnchoredReader {
        fn configure(&mut self, cfg: &mut SystemConfig<'_>) {
            cfg.query(|q| q.using::<Position>().read());
        }
        fn execute(&mut self, _ctx: &mut SystemContext<'_>) {
            self.0 .0.lock().unwrap().push("reader");
        }
    }

    let trace = Trace(Arc::new(Mutex::new(Vec::new())));
    let mut builder = World::builder();
    builder.register_component::<Position>();
    builder.add_system(AnchoredReader(trace.clone()));
    builder.add_system(AnchoredWriter(trace.clone()));
    let mut world = builder.build().unwrap();

    world.execute(0.0, 0.016);
    assert_eq!(*trace.0.lock().unwrap(), vec!["writer", "reader"]);
}

// ---------------------------------------------------------------------------
// Stop / restart: no execution while stopped, no replay on restart
// ---------------------------------------------------------------------------

struct Watcher {
    query: Option<QueryHandle>,
    counts: Vec<usize>,
    changed: Vec<usize>,
}

impl Watcher {
    fn new() -> Self {
        Self {
            query: None,
            counts: Vec::new(),
            changed: Vec::new(),
        }
    }
}

impl System for Watcher {
    fn configure(&mut self, cfg: &mut SystemConfig<'_>) {
        self.query = Some(cfg.query(|q| q.with::<Marker>().read().record_changes()));
    }
    fn execute(&mut self, ctx: &mut SystemContext<'_>) {
        let query = self.query.unwrap();
        self.counts.push(ctx.entities(query).len());
        self.changed.push(ctx.changed(query).len());
    }
}

#[test]
fn stop_restart_converges_without_replay() {
    let mut builder = World::builder();
    builder.register_component::<Marker>();
    let watcher = builder.add_system(Watcher::new());
    let mut world = builder.build().unwrap();

    let first = world.create_entity();
    world.insert(first, Marker);
    world.execute(0.0, 0.016);
    {
        let w = watcher.read().unwrap();
        assert_eq!(w.counts, vec![1]);
        assert_eq!(w.changed, vec![1]);
    }

    world.stop_system::<Watcher>();

    // Changes accumulate while the system is stopped.
    let second = world.create_entity();
    world.insert(second, Marker);
    world.execute(1.0, 0.016);
    assert_eq!(watcher.read().unwrap().counts, vec![1]); // execute skipped

    world.restart_system::<Watcher>();
    world.execute(2.0, 0.016);
    {
        let w = watcher.read().unwrap();
        // Result set equals the live matching entities...
        assert_eq!(w.counts, vec![1, 2]);
        // ...and the stopped interval's log entries were not replayed as
        // fresh changes.
        assert_eq!(w.changed, vec![1, 0]);
    }
}

// ---------------------------------------------------------------------------
// Write tracking: a downstream query sees upstream writes the same frame
// ---------------------------------------------------------------------------

struct Mover {
    query: Option<QueryHandle>,
}

impl System for Mover {
    fn configure(&mut self, cfg: &mut SystemConfig<'_>) {
        self.query = Some(cfg.query(|q| q.with::<Position>().write()));
    }
    fn execute(&mut self, ctx: &mut SystemContext<'_>) {
        for entity in ctx.entities(self.query.unwrap()) {
            ctx.write::<Position>(entity).unwrap().x += 1.0;
        }
    }
}

struct MoveListener {
    query: Option<QueryHandle>,
    changed_per_frame: Vec<usize>,
}

impl System for MoveListener {
    fn configure(&mut self, cfg: &mut SystemConfig<'_>) {
        self.query = Some(cfg.query(|q| q.with::<Position>().track_writes()));
        cfg.schedule(|s| s.after_writers_of::<Position>());
    }
    fn execute(&mut self, ctx: &mut SystemContext<'_>) {
        self.changed_per_frame
            .push(ctx.changed(self.query.unwrap()).len());
    }
}

#[test]
fn tracked_writes_flow_downstream_within_a_frame() {
    let mut builder = World::builder();
    builder.register_component::<Position>();
    // Listener registered first; the anchored constraint still places it
    // after the writer.
    let listener = builder.add_system(MoveListener {
        query: None,
        changed_per_frame: Vec::new(),
    });
    builder.add_system(Mover { query: None });
    let mut world = builder.build().unwrap();

    for _ in 0..2 {
        let e = world.create_entity();
        world.insert(e, Position { x: 0.0 });
    }

    // Frame 1: both entities enter the query (shape updates subsume the
    // writes made the same frame).
    world.execute(0.0, 0.016);
    // Frame 2: no shape changes; the deltas come from the write log alone.
    world.execute(1.0, 0.016);

    assert_eq!(listener.read().unwrap().changed_per_frame, vec![2, 2]);
}

// ---------------------------------------------------------------------------
// Same-frame visibility of entities created by an earlier system
// ---------------------------------------------------------------------------

struct Spawner {
    spawned: bool,
}

impl System for Spawner {
    fn configure(&mut self, cfg: &mut SystemConfig<'_>) {
        cfg.query(|q| q.using::<Marker>().write());
    }
    fn execute(&mut self, ctx: &mut SystemContext<'_>) {
        if !self.spawned {
            self.spawned = true;
            let entity = ctx.create_entity();
            ctx.insert(entity, Marker);
        }
    }
}

struct SpawnObserver {
    query: Option<QueryHandle>,
    counts: Vec<usize>,
}

impl System for SpawnObserver {
    fn configure(&mut self, cfg: &mut SystemConfig<'_>) {
        self.query = Some(cfg.query(|q| q.with::<Marker>().read()));
        cfg.schedule(|s| s.after::<Spawner>());
    }
    fn execute(&mut self, ctx: &mut SystemContext<'_>) {
        self.counts.push(ctx.entities(self.query.unwrap()).len());
    }
}

#[test]
fn later_system_sees_entities_created_this_frame() {
    let mut builder = World::builder();
    builder.register_component::<Marker>();
    let observer = builder.add_system(SpawnObserver {
        query: None,
        counts: Vec::new(),
    });
    builder.add_system(Spawner { spawned: false });
    let mut world = builder.build().unwrap();

    world.execute(0.0, 0.016);
    assert_eq!(observer.read().unwrap().counts, vec![1]);
}

// ---------------------------------------------------------------------------
// Recently-deleted data stays readable for the rest of the frame
// ---------------------------------------------------------------------------

struct Destroyer {
    query: Option<QueryHandle>,
}

impl System for Destroyer {
    fn configure(&mut self, cfg: &mut SystemConfig<'_>) {
        self.query = Some(cfg.query(|q| q.with::<Position>().read()));
    }
    fn execute(&mut self, ctx: &mut SystemContext<'_>) {
        for entity in ctx.entities(self.query.unwrap()) {
            ctx.destroy_entity(entity);
        }
        ctx.access_recently_deleted_data(true);
    }
}

struct Mourner {
    query: Option<QueryHandle>,
    last_values: Vec<f32>,
    counts: Vec<usize>,
}

impl System for Mourner {
    fn configure(&mut self, cfg: &mut SystemConfig<'_>) {
        self.query = Some(cfg.query(|q| q.with::<Position>().read()));
        cfg.schedule(|s| s.after::<Destroyer>());
    }
    fn execute(&mut self, ctx: &mut SystemContext<'_>) {
        let entities = ctx.entities(self.query.unwrap());
        self.counts.push(entities.len());
        for entity in entities {
            if let Some(position) = ctx.get::<Position>(entity) {
                self.last_values.push(position.x);
            }
        }
    }
}

#[test]
fn recently_deleted_data_readable_until_frame_end() {
    let mut builder = World::builder();
    builder.register_component::<Position>();
    builder.add_system(Destroyer { query: None });
    let mourner = builder.add_system(Mourner {
        query: None,
        last_values: Vec::new(),
        counts: Vec::new(),
    });
    let mut world = builder.build().unwrap();

    let e = world.create_entity();
    world.insert(e, Position { x: 7.5 });

    // Frame 1: the destroyer removes the entity, but the mourner (with the
    // toggle flipped) still sees and reads it.
    world.execute(0.0, 0.016);
    {
        let m = mourner.read().unwrap();
        assert_eq!(m.counts, vec![1]);
        assert_eq!(m.last_values, vec![7.5]);
    }
    assert_eq!(world.entity_count(), 0);

    // Frame 2: the purge dropped the data and the toggle reset.
    world.execute(1.0, 0.016);
    assert_eq!(mourner.read().unwrap().counts, vec![1, 0]);
}

// ---------------------------------------------------------------------------
// Usage errors
// ---------------------------------------------------------------------------

struct MaskViolator {
    query: Option<QueryHandle>,
}

impl System for MaskViolator {
    fn configure(&mut self, cfg: &mut SystemConfig<'_>) {
        self.query = Some(cfg.query(|q| q.with::<Position>().read()));
    }
    fn execute(&mut self, ctx: &mut SystemContext<'_>) {
        for entity in ctx.entities(self.query.unwrap()) {
            // Read-only access; this write must be rejected.
            ctx.write::<Position>(entity).unwrap().x = 0.0;
        }
    }
}

#[test]
#[should_panic(expected = "outside its write mask")]
fn write_outside_mask_panics() {
    let mut builder = World::builder();
    builder.register_component::<Position>();
    builder.add_system(MaskViolator { query: None });
    let mut world = builder.build().unwrap();

    let e = world.create_entity();
    world.insert(e, Position { x: 1.0 });
    world.execute(0.0, 0.016);
}

// ---------------------------------------------------------------------------
// Self-stop from inside execute
// ---------------------------------------------------------------------------

struct OneShot {
    runs: u32,
}

impl System for OneShot {
    fn execute(&mut self, ctx: &mut SystemContext<'_>) {
        self.runs += 1;
        ctx.stop();
    }
}

#[test]
fn system_can_stop_itself() {
    let mut builder = World::builder();
    let one_shot = builder.add_system(OneShot { runs: 0 });
    let mut world = builder.build().unwrap();

    world.execute(0.0, 0.016);
    world.execute(1.0, 0.016);
    world.execute(2.0, 0.016);
    assert_eq!(one_shot.read().unwrap().runs, 1);
}

// ---------------------------------------------------------------------------
// Shared RwLock sanity: external handles observe system state between frames
// ---------------------------------------------------------------------------

#[test]
fn external_handle_shares_state() {
    let mut builder = World::builder();
    let receiver: Arc<RwLock<Receiver>> = builder.add_system(Receiver::default());
    let mut world = builder.build().unwrap();

    receiver.write().unwrap().message = "primed".to_string();
    world.execute(0.0, 0.016);
    assert_eq!(receiver.read().unwrap().seen, "primed");
}
