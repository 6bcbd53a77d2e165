//! Integration tests for the corelink-core control plane.
//!
//! Drives the plane through decoded host commands with recording probe
//! components, a budgeted heap and a cache journal, and checks the object
//! model afterwards: adjacency lists, buffer sizing, pipeline teardown,
//! rollback on failed binds, core affinity of forwarded calls and the cache
//! maintenance issued for cross-core buffers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use corelink_core::{
    BaseModuleConfig, BindRequest, BufferId, BufferKey, CacheJournal, CacheOp, Command, CompId,
    Component, ComponentConfig, ComponentDriver, ComponentOps, ComponentSpec, ComponentState,
    ComponentView, Connection, ControlPlane, CoreId, DriverLookup, Entry, HeapAllocator,
    HeapConfig, IpcError, MemRange, MemZone, ObjectKind, PLATFORM_DCACHE_ALIGN, ParamsFlags,
    PipelineId, PipelineInfo, PipelineScheduler, PipelineState, Roles, Status, StreamParams,
    TriggerCmd,
};
use parking_lot::Mutex;
use uuid::Uuid;

// ============================================================================
// Probe components
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Created { comp: CompId, thread: String },
    Bind { comp: CompId, buffer: BufferId, thread: String },
    Unbind { comp: CompId, buffer: BufferId },
    Params { comp: CompId, params: StreamParams },
    Trigger { comp: CompId, cmd: TriggerCmd, thread: String },
    Copy { comp: CompId, thread: String },
    Free { comp: CompId },
}

type Log = Arc<Mutex<Vec<Event>>>;

fn thread_name() -> String {
    std::thread::current().name().unwrap_or_default().to_string()
}

fn on_core_worker(thread: &str, core: u8) -> bool {
    thread == format!("dsp-core-{core}")
}

#[derive(Clone, Copy, Default)]
struct Quirks {
    refuse_bind: bool,
    refuse_unbind: bool,
    reject_create: bool,
}

const REFUSE_BIND: u16 = 5;
const REFUSE_UNBIND: u16 = 6;
const REJECT_CREATE: u16 = 7;
const UNREGISTERED: u16 = 99;

struct ProbeDriver {
    module: u16,
    quirks: Quirks,
    log: Log,
}

impl ComponentDriver for ProbeDriver {
    fn uuid(&self) -> Uuid {
        Uuid::from_u128(0x5052_4f42_u128 << 96 | u128::from(self.module))
    }

    fn name(&self) -> &str {
        "probe"
    }

    fn create(&self, config: &ComponentConfig) -> Option<Box<dyn ComponentOps>> {
        if self.quirks.reject_create {
            return None;
        }
        self.log.lock().push(Event::Created {
            comp: config.id,
            thread: thread_name(),
        });
        Some(Box::new(Probe {
            comp: config.id,
            quirks: self.quirks,
            log: Arc::clone(&self.log),
        }))
    }
}

struct Probe {
    comp: CompId,
    quirks: Quirks,
    log: Log,
}

impl ComponentOps for Probe {
    fn bind(&mut self, connection: &Connection) -> Result<(), IpcError> {
        if self.quirks.refuse_bind {
            return Err(IpcError::InvalidRequest);
        }
        self.log.lock().push(Event::Bind {
            comp: self.comp,
            buffer: connection.buffer_id(),
            thread: thread_name(),
        });
        Ok(())
    }

    fn unbind(&mut self, connection: &Connection) -> Result<(), IpcError> {
        self.log.lock().push(Event::Unbind {
            comp: self.comp,
            buffer: connection.buffer_id(),
        });
        if self.quirks.refuse_unbind {
            return Err(IpcError::InvalidRequest);
        }
        Ok(())
    }

    fn set_params(&mut self, params: &StreamParams) -> Result<(), IpcError> {
        self.log.lock().push(Event::Params {
            comp: self.comp,
            params: *params,
        });
        Ok(())
    }

    fn trigger(&mut self, cmd: TriggerCmd) -> Result<(), IpcError> {
        self.log.lock().push(Event::Trigger {
            comp: self.comp,
            cmd,
            thread: thread_name(),
        });
        Ok(())
    }

    fn copy(&mut self) -> Result<(), IpcError> {
        self.log.lock().push(Event::Copy {
            comp: self.comp,
            thread: thread_name(),
        });
        Ok(())
    }

    fn free(&mut self) {
        self.log.lock().push(Event::Free { comp: self.comp });
    }
}

struct Drivers(HashMap<u16, Arc<dyn ComponentDriver>>);

impl DriverLookup for Drivers {
    fn by_uuid(&self, uuid: &Uuid) -> Option<Arc<dyn ComponentDriver>> {
        self.0.values().find(|d| d.uuid() == *uuid).cloned()
    }

    fn by_module(&self, module_id: u16) -> Option<Arc<dyn ComponentDriver>> {
        self.0.get(&module_id).cloned()
    }
}

#[derive(Default)]
struct RecordingScheduler {
    refuse: AtomicBool,
    calls: Mutex<Vec<(PipelineInfo, Option<CompId>, Option<CompId>)>>,
}

impl PipelineScheduler for RecordingScheduler {
    fn complete(
        &self,
        info: &PipelineInfo,
        source: Option<CompId>,
        sink: Option<CompId>,
    ) -> Result<(), IpcError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(IpcError::InvalidRequest);
        }
        self.calls.lock().push((*info, source, sink));
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    plane: ControlPlane,
    heap: Arc<HeapAllocator>,
    cache: Arc<CacheJournal>,
    scheduler: Arc<RecordingScheduler>,
    log: Log,
}

fn harness(cores: u8) -> Harness {
    harness_with(cores, HeapConfig::default())
}

fn harness_with(cores: u8, heap: HeapConfig) -> Harness {
    let log = Log::default();
    let mut drivers: HashMap<u16, Arc<dyn ComponentDriver>> = HashMap::new();
    let quirks = [
        (1, Quirks::default()),
        (2, Quirks::default()),
        (3, Quirks::default()),
        (4, Quirks::default()),
        (
            REFUSE_BIND,
            Quirks {
                refuse_bind: true,
                ..Quirks::default()
            },
        ),
        (
            REFUSE_UNBIND,
            Quirks {
                refuse_unbind: true,
                ..Quirks::default()
            },
        ),
        (
            REJECT_CREATE,
            Quirks {
                reject_create: true,
                ..Quirks::default()
            },
        ),
    ];
    for (module, quirks) in quirks {
        drivers.insert(
            module,
            Arc::new(ProbeDriver {
                module,
                quirks,
                log: Arc::clone(&log),
            }),
        );
    }

    let heap = Arc::new(HeapAllocator::new(heap));
    let cache = Arc::new(CacheJournal::new());
    let scheduler = Arc::new(RecordingScheduler::default());
    let plane = ControlPlane::builder(Arc::new(Drivers(drivers)))
        .cores(cores)
        .allocator(heap.clone())
        .cache(cache.clone())
        .scheduler(scheduler.clone())
        .build()
        .expect("spawn core workers");

    Harness {
        plane,
        heap,
        cache,
        scheduler,
        log,
    }
}

fn id(module: u16, instance: u16) -> CompId {
    CompId::new(module, instance).unwrap()
}

fn spec(module: u16, instance: u16, pipeline: Option<u16>, core: u8) -> ComponentSpec {
    ComponentSpec {
        module_id: module,
        instance_id: instance,
        pipeline_id: pipeline.map(PipelineId),
        core: CoreId(core),
        config: BaseModuleConfig {
            ibs: 64,
            obs: 64,
            ..BaseModuleConfig::default()
        },
        ..ComponentSpec::default()
    }
}

fn link(src: CompId, dst: CompId, src_queue: u16, dst_queue: u16) -> BindRequest {
    BindRequest {
        src_module: src.module_id(),
        src_instance: src.instance_id(),
        dst_module: dst.module_id(),
        dst_instance: dst.instance_id(),
        src_queue,
        dst_queue,
        ..BindRequest::default()
    }
}

fn key(src: CompId, src_queue: u16, dst_queue: u16) -> BufferKey {
    BufferKey {
        producer: src,
        id: BufferId::from_queues(src_queue, dst_queue),
    }
}

/// Bytes the heap charges for an allocation of `size`.
fn charged(size: usize) -> usize {
    size.next_multiple_of(PLATFORM_DCACHE_ALIGN)
}

impl Harness {
    fn run(&self, command: Command) -> Result<(), IpcError> {
        self.plane.dispatch(command)
    }

    fn pipeline(&self, instance_id: u16, core: u8) -> Result<(), IpcError> {
        self.pipeline_with_sched(instance_id, core, None)
    }

    fn pipeline_with_sched(
        &self,
        instance_id: u16,
        core: u8,
        sched_id: Option<u32>,
    ) -> Result<(), IpcError> {
        self.run(Command::PipelineNew {
            instance_id,
            priority: 0,
            core: CoreId(core),
            sched_id,
        })
    }

    fn component(&self, spec: ComponentSpec) -> Result<(), IpcError> {
        self.run(Command::ComponentNew(spec))
    }

    fn bind(&self, req: BindRequest) -> Result<(), IpcError> {
        self.run(Command::ModuleBind(req))
    }

    fn unbind(&self, req: BindRequest) -> Result<(), IpcError> {
        self.run(Command::ModuleUnbind(req))
    }

    fn free(&self, comp: CompId) -> Result<(), IpcError> {
        self.run(Command::ComponentFree { comp_id: comp.raw() })
    }

    fn view(&self, comp: CompId) -> ComponentView {
        self.plane
            .snapshot()
            .components
            .into_iter()
            .find(|c| c.id == comp.raw())
            .expect("component is alive")
    }

    fn buffer_range(&self, key: BufferKey) -> MemRange {
        self.plane
            .inspect(|c| c.buffer(key).map(|b| b.memory().range()))
            .expect("buffer is alive")
    }

    fn events(&self) -> Vec<Event> {
        self.log.lock().clone()
    }
}

// ============================================================================
// 1. Bind / unbind
// ============================================================================

#[test]
fn bind_then_unbind_restores_lists_and_memory() {
    let h = harness(1);
    let (a, b) = (id(1, 0), id(2, 0));
    h.component(spec(1, 0, None, 0)).unwrap();
    h.component(spec(2, 0, None, 0)).unwrap();
    let before = h.plane.snapshot();
    let outstanding = h.heap.outstanding();
    let shared_in_use = h.heap.in_use(MemZone::RuntimeShared);

    h.bind(link(a, b, 0, 0)).unwrap();
    assert_eq!(h.view(a).sinks, vec![0]);
    assert_eq!(h.view(b).sources, vec![0]);
    assert_eq!(h.heap.outstanding(), outstanding + 1);

    h.unbind(link(a, b, 0, 0)).unwrap();
    assert_eq!(h.plane.snapshot(), before);
    assert_eq!(h.heap.outstanding(), outstanding);
    assert_eq!(h.heap.in_use(MemZone::RuntimeShared), shared_in_use);
}

#[test]
fn buffer_size_is_the_larger_block_size() {
    let h = harness(1);
    let mut producer = spec(1, 0, None, 0);
    producer.config.obs = 64;
    let mut consumer = spec(2, 0, None, 0);
    consumer.config.ibs = 128;
    h.component(producer).unwrap();
    h.component(consumer).unwrap();

    h.bind(link(id(1, 0), id(2, 0), 0, 0)).unwrap();
    h.bind(link(id(2, 0), id(1, 0), 0, 0)).unwrap();

    let buffers = h.plane.snapshot().buffers;
    assert_eq!(buffers.len(), 2);
    // 1 -> 2: max(64, 128); 2 -> 1: max(obs 64, ibs 64).
    assert_eq!(buffers[0].size, 128);
    assert_eq!(buffers[1].size, 64);
    assert_eq!(buffers[0].addr % PLATFORM_DCACHE_ALIGN, 0);
}

#[test]
fn new_links_are_prepended() {
    let h = harness(1);
    let (a, b) = (id(1, 0), id(2, 0));
    h.component(spec(1, 0, None, 0)).unwrap();
    h.component(spec(2, 0, None, 0)).unwrap();

    h.bind(link(a, b, 0, 0)).unwrap();
    h.bind(link(a, b, 1, 1)).unwrap();

    assert_eq!(h.view(a).sinks, vec![0x0001_0001, 0]);
    assert_eq!(h.view(b).sources, vec![0x0001_0001, 0]);
}

#[test]
fn rebinding_the_same_queue_pair_is_rejected() {
    let h = harness(1);
    let (a, b) = (id(1, 0), id(2, 0));
    h.component(spec(1, 0, None, 0)).unwrap();
    h.component(spec(2, 0, None, 0)).unwrap();
    h.bind(link(a, b, 0, 0)).unwrap();

    assert_eq!(h.bind(link(a, b, 0, 0)), Err(IpcError::InvalidResourceState));
    assert_eq!(h.view(a).sinks.len(), 1);
    assert_eq!(h.plane.inspect(|c| c.count(ObjectKind::Buffer)), 1);
}

#[test]
fn bind_with_unknown_endpoint_is_invalid_id() {
    let h = harness(1);
    h.component(spec(1, 0, None, 0)).unwrap();

    assert_eq!(
        h.bind(link(id(1, 0), id(2, 0), 0, 0)),
        Err(IpcError::InvalidResourceId)
    );
    let mut req = link(id(1, 0), id(2, 0), 0, 0);
    req.src_module = 0;
    assert_eq!(h.bind(req), Err(IpcError::InvalidResourceId));
    assert!(h.plane.snapshot().buffers.is_empty());
}

#[test]
fn bind_out_of_memory_leaves_nothing_behind() {
    let h = harness_with(
        1,
        HeapConfig {
            runtime_shared: 4096,
            ..HeapConfig::default()
        },
    );
    let mut producer = spec(1, 0, None, 0);
    producer.config.obs = 1 << 20;
    h.component(producer).unwrap();
    h.component(spec(2, 0, None, 0)).unwrap();
    let outstanding = h.heap.outstanding();

    assert_eq!(
        h.bind(link(id(1, 0), id(2, 0), 0, 0)),
        Err(IpcError::OutOfMemory)
    );
    assert!(h.view(id(1, 0)).sinks.is_empty());
    assert!(h.plane.snapshot().buffers.is_empty());
    assert_eq!(h.heap.outstanding(), outstanding);
}

#[test]
fn sink_refusing_bind_rolls_back_both_sides() {
    let h = harness(1);
    let (a, b) = (id(1, 0), id(REFUSE_BIND, 0));
    h.component(spec(1, 0, None, 0)).unwrap();
    h.component(spec(REFUSE_BIND, 0, None, 0)).unwrap();
    let outstanding = h.heap.outstanding();

    assert_eq!(h.bind(link(a, b, 0, 0)), Err(IpcError::InvalidResourceId));

    assert!(h.view(a).sinks.is_empty());
    assert!(h.view(b).sources.is_empty());
    assert!(h.plane.snapshot().buffers.is_empty());
    assert_eq!(h.heap.outstanding(), outstanding);

    // The source accepted the bind, so it must have been told to undo it.
    let events = h.events();
    assert!(events.iter().any(|e| matches!(e, Event::Bind { comp, .. } if *comp == a)));
    assert!(events.iter().any(|e| matches!(e, Event::Unbind { comp, .. } if *comp == a)));
}

#[test]
fn rollback_completes_when_source_refuses_to_undo_its_bind() {
    let h = harness(1);
    let (a, b) = (id(REFUSE_UNBIND, 0), id(REFUSE_BIND, 0));
    h.component(spec(REFUSE_UNBIND, 0, None, 0)).unwrap();
    h.component(spec(REFUSE_BIND, 0, None, 0)).unwrap();
    let outstanding = h.heap.outstanding();

    assert_eq!(h.bind(link(a, b, 0, 0)), Err(IpcError::InvalidResourceId));
    assert!(h.view(a).sinks.is_empty());
    assert!(h.view(b).sources.is_empty());
    assert!(h.plane.snapshot().buffers.is_empty());
    assert_eq!(h.heap.outstanding(), outstanding);
}

#[test]
fn source_refusing_bind_never_reaches_sink() {
    let h = harness(1);
    let (a, b) = (id(REFUSE_BIND, 0), id(1, 0));
    h.component(spec(REFUSE_BIND, 0, None, 0)).unwrap();
    h.component(spec(1, 0, None, 0)).unwrap();

    assert_eq!(h.bind(link(a, b, 0, 0)), Err(IpcError::InvalidResourceId));
    assert!(!h
        .events()
        .iter()
        .any(|e| matches!(e, Event::Bind { comp, .. } if *comp == b)));
    assert!(h.plane.snapshot().buffers.is_empty());
}

#[test]
fn unbind_within_one_pipeline_is_refused_without_mutation() {
    let h = harness(1);
    let (a, b) = (id(1, 0), id(2, 0));
    h.pipeline(1, 0).unwrap();
    h.component(spec(1, 0, Some(1), 0)).unwrap();
    h.component(spec(2, 0, Some(1), 0)).unwrap();
    h.bind(link(a, b, 0, 0)).unwrap();
    let before = h.plane.snapshot();

    assert_eq!(h.unbind(link(a, b, 0, 0)), Err(IpcError::InvalidRequest));
    assert_eq!(h.plane.snapshot(), before);
}

#[test]
fn unbind_naming_the_wrong_sink_leaves_the_link_intact() {
    let h = harness(1);
    let (a, b, c) = (id(1, 0), id(2, 0), id(3, 0));
    h.component(spec(1, 0, None, 0)).unwrap();
    h.component(spec(2, 0, None, 0)).unwrap();
    h.component(spec(3, 0, None, 0)).unwrap();
    h.bind(link(a, b, 0, 0)).unwrap();
    let before = h.plane.snapshot();

    assert_eq!(h.unbind(link(a, c, 0, 0)), Err(IpcError::InvalidResourceId));
    assert_eq!(h.plane.snapshot(), before);
    assert!(!h
        .events()
        .iter()
        .any(|e| matches!(e, Event::Unbind { .. })));

    // The real sink still owns its inbound link, so a later bind to the
    // other component on the same queues can not alias it.
    assert_eq!(h.bind(link(a, c, 0, 0)), Err(IpcError::InvalidResourceState));
    h.unbind(link(a, b, 0, 0)).unwrap();
    assert!(h.view(a).sinks.is_empty());
    assert!(h.view(b).sources.is_empty());
    assert!(h.plane.snapshot().buffers.is_empty());
}

#[test]
fn unbind_of_missing_buffer_is_invalid_id() {
    let h = harness(1);
    let (a, b) = (id(1, 0), id(2, 0));
    h.component(spec(1, 0, None, 0)).unwrap();
    h.component(spec(2, 0, None, 0)).unwrap();

    assert_eq!(h.unbind(link(a, b, 0, 0)), Err(IpcError::InvalidResourceId));
    assert_eq!(
        h.unbind(link(a, id(3, 0), 0, 0)),
        Err(IpcError::InvalidResourceId)
    );
}

#[test]
fn refused_unbind_is_reported_but_buffer_is_released() {
    let h = harness(1);
    let (a, b) = (id(REFUSE_UNBIND, 0), id(1, 0));
    h.component(spec(REFUSE_UNBIND, 0, None, 0)).unwrap();
    h.component(spec(1, 0, None, 0)).unwrap();
    let outstanding = h.heap.outstanding();
    h.bind(link(a, b, 0, 0)).unwrap();

    assert_eq!(h.unbind(link(a, b, 0, 0)), Err(IpcError::InvalidResourceId));
    assert!(h.plane.snapshot().buffers.is_empty());
    assert!(h.view(a).sinks.is_empty());
    assert_eq!(h.heap.outstanding(), outstanding);
    // The sink is still told even though the source refused.
    assert!(h
        .events()
        .iter()
        .any(|e| matches!(e, Event::Unbind { comp, .. } if *comp == b)));
}

// ============================================================================
// 2. Cross-core connections
// ============================================================================

#[test]
fn cross_core_bind_marks_buffer_and_promotes_sink() {
    let h = harness(2);
    let (a, b) = (id(1, 0), id(2, 0));
    h.component(spec(1, 0, None, 0)).unwrap();
    h.component(spec(2, 0, None, 1)).unwrap();
    assert_eq!(h.view(b).zone, MemZone::Runtime);

    h.bind(link(a, b, 0, 0)).unwrap();

    let buffers = h.plane.snapshot().buffers;
    assert!(buffers[0].inter_core);
    assert_eq!(buffers[0].core, 0);
    assert!(h.view(b).shared);
    assert_eq!(h.view(b).zone, MemZone::RuntimeShared);
    assert!(!h.view(a).shared);
}

#[test]
fn same_core_bind_does_not_promote() {
    let h = harness(2);
    h.component(spec(1, 0, None, 1)).unwrap();
    h.component(spec(2, 0, None, 1)).unwrap();

    h.bind(link(id(1, 0), id(2, 0), 0, 0)).unwrap();

    assert!(!h.plane.snapshot().buffers[0].inter_core);
    assert!(!h.view(id(2, 0)).shared);
    let range = h.buffer_range(key(id(1, 0), 0, 0));
    assert!(h
        .cache
        .touching(range)
        .iter()
        .all(|e| e.op != CacheOp::Invalidate));
}

#[test]
fn cross_core_buffer_is_invalidated_then_published() {
    let h = harness(2);
    let (a, b) = (id(1, 0), id(2, 0));
    h.component(spec(1, 0, None, 0)).unwrap();
    h.component(spec(2, 0, None, 1)).unwrap();
    h.cache.clear();

    h.bind(link(a, b, 0, 0)).unwrap();

    let events = h.cache.touching(h.buffer_range(key(a, 0, 0)));
    let invalidate = events
        .iter()
        .position(|e| e.op == CacheOp::Invalidate)
        .expect("consumer core invalidates the buffer");
    let publishes = events
        .iter()
        .filter(|e| e.op == CacheOp::WritebackInvalidate)
        .count();
    // Creation, producer splice and consumer splice each publish.
    assert!(publishes >= 3, "only {publishes} publishes");
    assert_eq!(
        events.last().map(|e| e.op),
        Some(CacheOp::WritebackInvalidate)
    );
    assert!(invalidate < events.len() - 1);
}

#[test]
fn components_are_created_on_their_own_core() {
    let h = harness(2);
    h.component(spec(1, 0, None, 0)).unwrap();
    h.component(spec(2, 0, None, 1)).unwrap();

    let events = h.events();
    let thread_of = |comp: CompId| {
        events.iter().find_map(|e| match e {
            Event::Created { comp: c, thread } if *c == comp => Some(thread.clone()),
            _ => None,
        })
    };
    assert!(on_core_worker(&thread_of(id(2, 0)).unwrap(), 1));
    assert!(!thread_of(id(1, 0)).unwrap().starts_with("dsp-core-"));
}

#[test]
fn shared_component_calls_run_on_owning_core() {
    let h = harness(2);
    let (a, b) = (id(1, 0), id(2, 0));
    h.component(spec(1, 0, None, 0)).unwrap();
    h.component(spec(2, 0, None, 1)).unwrap();
    h.bind(link(a, b, 0, 0)).unwrap();
    h.plane.copy(b).unwrap();
    h.plane.copy(a).unwrap();

    for event in h.events() {
        match event {
            Event::Bind { comp, thread, .. } | Event::Copy { comp, thread } if comp == b => {
                assert!(on_core_worker(&thread, 1), "{comp} ran on {thread}");
            }
            Event::Bind { comp, thread, .. } | Event::Copy { comp, thread } if comp == a => {
                assert!(!thread.starts_with("dsp-core-"), "{comp} ran on {thread}");
            }
            _ => {}
        }
    }
}

#[test]
fn unshared_remote_component_is_called_directly() {
    let h = harness(2);
    let c = id(1, 0);
    h.component(spec(1, 0, None, 1)).unwrap();
    assert!(!h.view(c).shared);

    h.plane.copy(c).unwrap();
    let copied_on = h.events().into_iter().find_map(|e| match e {
        Event::Copy { comp, thread } if comp == c => Some(thread),
        _ => None,
    });
    let thread = copied_on.expect("copy reached the component");
    assert!(!thread.starts_with("dsp-core-"), "{c} ran on {thread}");
}

#[test]
fn failed_promotion_rolls_back_as_invalid_state() {
    // Exactly enough shared memory for two bookkeeping entries and one
    // 64-byte buffer; moving the sink into the shared zone cannot succeed.
    let budget = 2 * charged(size_of::<Entry>()) + charged(64);
    let h = harness_with(
        2,
        HeapConfig {
            runtime_shared: budget,
            ..HeapConfig::default()
        },
    );
    let (a, b) = (id(1, 0), id(2, 0));
    h.component(spec(1, 0, None, 0)).unwrap();
    h.component(spec(2, 0, None, 1)).unwrap();
    assert!(charged(size_of::<Component>()) > 0);
    let outstanding = h.heap.outstanding();

    assert_eq!(h.bind(link(a, b, 0, 0)), Err(IpcError::InvalidResourceState));
    assert!(!h.view(b).shared);
    assert!(h.view(a).sinks.is_empty());
    assert!(h.plane.snapshot().buffers.is_empty());
    assert_eq!(h.heap.outstanding(), outstanding);
}

#[test]
fn promotion_is_permanent() {
    let h = harness(2);
    let (a, b) = (id(1, 0), id(2, 0));
    h.component(spec(1, 0, None, 0)).unwrap();
    h.component(spec(2, 0, None, 1)).unwrap();
    h.bind(link(a, b, 0, 0)).unwrap();
    h.unbind(link(a, b, 0, 0)).unwrap();

    assert!(h.view(b).shared);
    assert!(h.view(b).sources.is_empty());
}

// ============================================================================
// 3. Pipelines
// ============================================================================

#[test]
fn duplicate_pipeline_id_is_rejected() {
    let h = harness(1);
    h.pipeline(5, 0).unwrap();

    assert_eq!(h.pipeline(5, 0), Err(IpcError::ResourceAlreadyExists));
    let count = h
        .plane
        .snapshot()
        .pipelines
        .iter()
        .filter(|p| p.id == 5)
        .count();
    assert_eq!(count, 1);
}

#[test]
fn pipeline_on_unknown_core_is_invalid_request() {
    let h = harness(2);
    assert_eq!(h.pipeline(1, 2), Err(IpcError::InvalidRequest));
}

#[test]
fn pipeline_allocation_failure_releases_everything() {
    let no_runtime = harness_with(
        1,
        HeapConfig {
            runtime: 0,
            ..HeapConfig::default()
        },
    );
    assert_eq!(no_runtime.pipeline(1, 0), Err(IpcError::OutOfMemory));

    let no_shared = harness_with(
        1,
        HeapConfig {
            runtime_shared: 0,
            ..HeapConfig::default()
        },
    );
    assert_eq!(no_shared.pipeline(1, 0), Err(IpcError::OutOfMemory));
    assert_eq!(no_shared.heap.outstanding(), 0);
    assert!(!no_shared.plane.is_halted());
}

#[test]
fn component_roles_wire_the_pipeline() {
    let h = harness(1);
    h.pipeline(1, 0).unwrap();
    let mut source = spec(1, 0, Some(1), 0);
    source.roles = Roles {
        source: true,
        scheduler: true,
        ..Roles::default()
    };
    let mut sink = spec(2, 0, Some(1), 0);
    sink.roles.sink = true;
    h.component(source).unwrap();
    h.component(sink).unwrap();

    let pipeline = h.plane.snapshot().pipelines[0].clone();
    assert_eq!(pipeline.state, PipelineState::Wiring);
    assert_eq!(pipeline.source, Some(id(1, 0).raw()));
    assert_eq!(pipeline.sink, Some(id(2, 0).raw()));
}

#[test]
fn complete_hands_topology_to_scheduler() {
    let h = harness(1);
    h.pipeline(1, 0).unwrap();
    let mut source = spec(1, 0, Some(1), 0);
    source.roles.source = true;
    source.roles.scheduler = true;
    let mut sink = spec(2, 0, Some(1), 0);
    sink.roles.sink = true;
    h.component(source).unwrap();
    h.component(sink).unwrap();

    h.run(Command::PipelineComplete {
        pipeline_id: PipelineId(1),
    })
    .unwrap();

    let calls = h.scheduler.calls.lock().clone();
    assert_eq!(calls.len(), 1);
    let (info, source, sink) = calls[0];
    assert_eq!(info.id, PipelineId(1));
    assert_eq!(info.sched_comp, Some(id(1, 0)));
    assert_eq!(source, Some(id(1, 0)));
    assert_eq!(sink, Some(id(2, 0)));
    assert_eq!(
        h.plane.snapshot().pipelines[0].state,
        PipelineState::Completed
    );
}

#[test]
fn complete_rejects_bad_scheduling_component() {
    let h = harness(2);
    let complete = |pid: u16| {
        h.run(Command::PipelineComplete {
            pipeline_id: PipelineId(pid),
        })
    };

    // Nothing declared.
    h.pipeline(1, 0).unwrap();
    assert_eq!(complete(1), Err(IpcError::InvalidRequest));

    // Declared but never created.
    h.pipeline_with_sched(2, 0, Some(id(1, 9).raw())).unwrap();
    assert_eq!(complete(2), Err(IpcError::InvalidRequest));

    // Exists, but on another core than the pipeline.
    h.pipeline(3, 0).unwrap();
    let mut remote = spec(1, 3, Some(3), 1);
    remote.roles.scheduler = true;
    h.component(remote).unwrap();
    assert_eq!(complete(3), Err(IpcError::InvalidRequest));

    // Resolves to a pipeline, not a component.
    h.pipeline_with_sched(4, 0, Some(1)).unwrap();
    assert_eq!(complete(4), Err(IpcError::InvalidRequest));

    assert_eq!(complete(42), Err(IpcError::ResourceNotFound));
    assert!(h.scheduler.calls.lock().is_empty());
}

#[test]
fn scheduler_refusal_is_invalid_request() {
    let h = harness(1);
    h.pipeline_with_sched(1, 0, Some(id(1, 0).raw())).unwrap();
    h.component(spec(1, 0, Some(1), 0)).unwrap();
    h.scheduler.refuse.store(true, Ordering::SeqCst);

    assert_eq!(
        h.run(Command::PipelineComplete {
            pipeline_id: PipelineId(1)
        }),
        Err(IpcError::InvalidRequest)
    );
    assert_ne!(
        h.plane.snapshot().pipelines[0].state,
        PipelineState::Completed
    );
}

#[test]
fn remote_pipeline_completes_on_its_core() {
    let h = harness(2);
    h.pipeline_with_sched(1, 1, Some(id(1, 0).raw())).unwrap();
    h.component(spec(1, 0, Some(1), 1)).unwrap();

    h.run(Command::PipelineComplete {
        pipeline_id: PipelineId(1),
    })
    .unwrap();

    let calls = h.scheduler.calls.lock().clone();
    assert_eq!(calls[0].0.core, CoreId(1));
}

#[test]
fn pipeline_free_removes_every_component() {
    let h = harness(1);
    let (a, b, c) = (id(1, 0), id(2, 0), id(3, 0));
    h.pipeline(1, 0).unwrap();
    h.component(spec(1, 0, Some(1), 0)).unwrap();
    h.component(spec(2, 0, Some(1), 0)).unwrap();
    h.component(spec(3, 0, Some(1), 0)).unwrap();
    h.bind(link(a, b, 0, 0)).unwrap();
    h.bind(link(b, c, 0, 0)).unwrap();

    h.run(Command::PipelineFree {
        pipeline_id: PipelineId(1),
    })
    .unwrap();

    assert_eq!(h.plane.inspect(|c| c.referencing(PipelineId(1))), 0);
    assert!(h.plane.snapshot().is_empty());
    assert_eq!(h.heap.outstanding(), 0);
    let freed = h
        .events()
        .iter()
        .filter(|e| matches!(e, Event::Free { .. }))
        .count();
    assert_eq!(freed, 3);
}

#[test]
fn pipeline_free_cascades_across_cores() {
    let h = harness(2);
    let (a, b) = (id(1, 0), id(2, 0));
    h.pipeline(1, 1).unwrap();
    h.component(spec(1, 0, Some(1), 1)).unwrap();
    h.component(spec(2, 0, Some(1), 0)).unwrap();
    h.bind(link(a, b, 0, 0)).unwrap();

    h.run(Command::PipelineFree {
        pipeline_id: PipelineId(1),
    })
    .unwrap();

    assert!(h.plane.snapshot().is_empty());
    assert_eq!(h.heap.outstanding(), 0);
}

#[test]
fn concurrent_host_threads_free_cross_homed_pipelines() {
    // Pipeline 1 lives on core 1 with its members on core 2, pipeline 2 the
    // other way round, so each teardown forwards into the other's core.
    let h = Arc::new(harness(3));
    for round in 0..20 {
        h.pipeline(1, 1).unwrap();
        h.pipeline(2, 2).unwrap();
        h.component(spec(1, 0, Some(1), 2)).unwrap();
        h.component(spec(2, 0, Some(1), 2)).unwrap();
        h.component(spec(3, 0, Some(2), 1)).unwrap();
        h.component(spec(4, 0, Some(2), 1)).unwrap();

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        for pipeline_id in [1, 2] {
            let h = Arc::clone(&h);
            let done = done_tx.clone();
            std::thread::spawn(move || {
                let result = h.run(Command::PipelineFree {
                    pipeline_id: PipelineId(pipeline_id),
                });
                let _ = done.send(result);
            });
        }
        for _ in 0..2 {
            let result = done_rx
                .recv_timeout(std::time::Duration::from_secs(5))
                .unwrap_or_else(|_| panic!("host threads stalled in round {round}"));
            assert_eq!(result, Ok(()));
        }
        assert!(h.plane.snapshot().is_empty());
    }
    assert_eq!(h.heap.outstanding(), 0);
}

#[test]
fn pipeline_free_with_busy_component_is_invalid_state() {
    let h = harness(1);
    h.pipeline(1, 0).unwrap();
    h.component(spec(1, 0, Some(1), 0)).unwrap();
    h.component(spec(2, 0, Some(1), 0)).unwrap();
    h.plane.trigger(id(2, 0), TriggerCmd::Prepare).unwrap();

    assert_eq!(
        h.run(Command::PipelineFree {
            pipeline_id: PipelineId(1)
        }),
        Err(IpcError::InvalidResourceState)
    );
    // The quiescent component went, the busy one and the pipeline stayed.
    let snapshot = h.plane.snapshot();
    assert_eq!(snapshot.components.len(), 1);
    assert_eq!(snapshot.pipelines.len(), 1);
    assert_ne!(snapshot.pipelines[0].state, PipelineState::Freeing);

    assert_eq!(
        h.run(Command::PipelineFree {
            pipeline_id: PipelineId(9)
        }),
        Err(IpcError::ResourceNotFound)
    );
}

// ============================================================================
// 4. Component lifecycle
// ============================================================================

#[test]
fn component_new_validates_its_inputs() {
    let h = harness(2);
    h.component(spec(1, 0, None, 0)).unwrap();
    let outstanding = h.heap.outstanding();

    assert_eq!(
        h.component(spec(0, 1, None, 0)),
        Err(IpcError::InvalidResourceId)
    );
    assert_eq!(
        h.component(spec(1, 1, None, 7)),
        Err(IpcError::InvalidRequest)
    );
    assert_eq!(
        h.component(spec(1, 0, None, 0)),
        Err(IpcError::ResourceAlreadyExists)
    );
    assert_eq!(
        h.component(spec(1, 1, Some(3), 0)),
        Err(IpcError::InvalidResourceId)
    );
    assert_eq!(
        h.component(spec(UNREGISTERED, 0, None, 0)),
        Err(IpcError::InvalidResourceId)
    );
    assert_eq!(
        h.component(spec(REJECT_CREATE, 0, None, 1)),
        Err(IpcError::InvalidRequest)
    );
    assert_eq!(h.heap.outstanding(), outstanding);
}

#[test]
fn component_memory_exhaustion_is_out_of_memory() {
    let h = harness_with(
        1,
        HeapConfig {
            runtime: 0,
            ..HeapConfig::default()
        },
    );
    assert_eq!(
        h.component(spec(1, 0, None, 0)),
        Err(IpcError::OutOfMemory)
    );
    assert!(!h.plane.is_halted());
}

#[test]
fn bookkeeping_failure_halts_the_plane() {
    let h = harness_with(
        1,
        HeapConfig {
            runtime_shared: 0,
            ..HeapConfig::default()
        },
    );

    let err = h.component(spec(1, 0, None, 0)).unwrap_err();
    assert!(err.is_fatal());
    assert!(h.plane.is_halted());
    assert_eq!(h.heap.outstanding(), 0);

    let later = h.pipeline(1, 0).unwrap_err();
    assert!(later.is_fatal());
    assert_eq!(Status::from_result(Err(later)), Status::Fatal);
}

#[test]
fn component_free_is_idempotent_in_effect() {
    let h = harness(1);
    h.component(spec(1, 0, None, 0)).unwrap();

    assert_eq!(h.free(id(1, 0)), Ok(()));
    assert_eq!(h.free(id(1, 0)), Err(IpcError::ResourceNotFound));
    assert_eq!(
        h.run(Command::ComponentFree { comp_id: 0x42 }),
        Err(IpcError::InvalidResourceId)
    );
    assert_eq!(h.heap.outstanding(), 0);
}

#[test]
fn component_free_requires_ready_state() {
    let h = harness(1);
    h.component(spec(1, 0, None, 0)).unwrap();
    h.plane.trigger(id(1, 0), TriggerCmd::Prepare).unwrap();

    assert_eq!(h.free(id(1, 0)), Err(IpcError::BadState));
    assert_eq!(
        Status::from_result(h.free(id(1, 0))).code(),
        Status::BadState.code()
    );

    h.plane.trigger(id(1, 0), TriggerCmd::Reset).unwrap();
    assert_eq!(h.free(id(1, 0)), Ok(()));
}

#[test]
fn component_free_detaches_buffers_and_back_references() {
    let h = harness(1);
    let (a, b) = (id(1, 0), id(2, 0));
    h.pipeline(1, 0).unwrap();
    let mut sink = spec(2, 0, Some(1), 0);
    sink.roles.sink = true;
    h.component(spec(1, 0, None, 0)).unwrap();
    h.component(sink).unwrap();
    h.bind(link(a, b, 0, 0)).unwrap();

    h.free(b).unwrap();

    assert!(h.view(a).sinks.is_empty());
    assert!(h.plane.snapshot().buffers.is_empty());
    assert_eq!(h.plane.snapshot().pipelines[0].sink, None);
}

#[test]
fn triggers_follow_the_state_machine_on_the_owning_core() {
    let h = harness(2);
    let comp = id(1, 0);
    h.component(spec(1, 0, None, 1)).unwrap();

    assert_eq!(
        h.plane.trigger(comp, TriggerCmd::Start),
        Err(IpcError::BadState)
    );
    for cmd in [
        TriggerCmd::Prepare,
        TriggerCmd::Start,
        TriggerCmd::Pause,
        TriggerCmd::Start,
    ] {
        h.plane.trigger(comp, cmd).unwrap();
    }
    assert_eq!(h.view(comp).state, ComponentState::Running);
    assert_eq!(h.free(comp), Err(IpcError::BadState));

    h.plane.trigger(comp, TriggerCmd::Stop).unwrap();
    assert_eq!(h.view(comp).state, ComponentState::Ready);

    for event in h.events() {
        if let Event::Trigger { thread, .. } = event {
            assert!(on_core_worker(&thread, 1), "trigger ran on {thread}");
        }
    }
    assert_eq!(
        h.plane.trigger(id(3, 3), TriggerCmd::Reset),
        Err(IpcError::ResourceNotFound)
    );
}

// ============================================================================
// 5. Stream parameters
// ============================================================================

#[test]
fn set_params_propagates_through_a_chain() {
    let h = harness(1);
    let (a, b, c) = (id(1, 0), id(2, 0), id(3, 0));
    for module in 1..=3 {
        h.component(spec(module, 0, None, 0)).unwrap();
    }
    h.bind(link(a, b, 0, 0)).unwrap();
    h.bind(link(b, c, 0, 0)).unwrap();
    let host = StreamParams {
        channels: 2,
        rate: 48_000,
        ..StreamParams::default()
    };

    // Source endpoint: forces its only buffer.
    h.run(Command::ComponentSetParams {
        comp_id: a.raw(),
        flags: ParamsFlags::NONE,
        params: host,
    })
    .unwrap();
    // Middle component: forces every downstream buffer.
    h.run(Command::ComponentSetParams {
        comp_id: b.raw(),
        flags: ParamsFlags::NONE,
        params: host,
    })
    .unwrap();
    // Sink endpoint: inherits rate and channels from its buffer.
    h.run(Command::ComponentSetParams {
        comp_id: c.raw(),
        flags: ParamsFlags::RATE | ParamsFlags::CHANNELS,
        params: StreamParams {
            channels: 1,
            rate: 8_000,
            ..StreamParams::default()
        },
    })
    .unwrap();

    assert_eq!(h.view(a).period_frames, 48);
    assert_eq!(h.view(b).period_frames, 48);
    assert_eq!(h.view(c).period_frames, 48);
    let seen = h.events().into_iter().find_map(|e| match e {
        Event::Params { comp, params } if comp == c => Some(params),
        _ => None,
    });
    assert_eq!(seen, Some(host));
}

#[test]
fn set_params_without_buffers_is_invalid_state() {
    let h = harness(1);
    h.component(spec(1, 0, None, 0)).unwrap();

    assert_eq!(
        h.run(Command::ComponentSetParams {
            comp_id: id(1, 0).raw(),
            flags: ParamsFlags::NONE,
            params: StreamParams::default(),
        }),
        Err(IpcError::InvalidResourceState)
    );
    assert_eq!(
        h.run(Command::ComponentSetParams {
            comp_id: id(2, 0).raw(),
            flags: ParamsFlags::NONE,
            params: StreamParams::default(),
        }),
        Err(IpcError::ResourceNotFound)
    );
}
