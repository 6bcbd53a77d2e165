//! Serializable view of the object container.

use serde::Serialize;

use crate::component::{ComponentState, Direction, Roles};
use crate::container::{Object, ObjectContainer};
use crate::memory::MemZone;
use crate::pipeline::{PipelineState, TimeDomain};

/// One component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentView {
    /// Raw component id.
    pub id: u32,
    /// Owning core.
    pub core: u8,
    /// Owning pipeline.
    pub pipeline: Option<u16>,
    /// Lifecycle state.
    pub state: ComponentState,
    /// Pipeline roles.
    pub roles: Roles,
    /// Shared calling convention.
    pub shared: bool,
    /// Zone of the component record.
    pub zone: MemZone,
    /// Processing direction.
    pub direction: Direction,
    /// Frames per period.
    pub period_frames: u32,
    /// Raw ids of inbound buffers, most recent first.
    pub sources: Vec<u32>,
    /// Raw ids of outbound buffers, most recent first.
    pub sinks: Vec<u32>,
}

/// One buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferView {
    /// Raw buffer id.
    pub id: u32,
    /// Raw producer id.
    pub producer: Option<u32>,
    /// Raw consumer id.
    pub consumer: Option<u32>,
    /// Owning core.
    pub core: u8,
    /// Producer's pipeline.
    pub pipeline: Option<u16>,
    /// Capacity in bytes.
    pub size: usize,
    /// Producer and consumer on different cores.
    pub inter_core: bool,
    /// Start address of the buffer header.
    pub addr: usize,
}

/// One pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineView {
    /// Pipeline id.
    pub id: u16,
    /// Owning core.
    pub core: u8,
    /// Scheduling priority.
    pub priority: u32,
    /// Pacing clock.
    pub time_domain: TimeDomain,
    /// Period in microseconds.
    pub period_us: u32,
    /// Lifecycle state.
    pub state: PipelineState,
    /// Raw source endpoint id.
    pub source: Option<u32>,
    /// Raw sink endpoint id.
    pub sink: Option<u32>,
    /// Raw scheduling component id.
    pub sched: Option<u32>,
}

/// Every live object, grouped by kind in container order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    /// Pipelines.
    pub pipelines: Vec<PipelineView>,
    /// Components.
    pub components: Vec<ComponentView>,
    /// Buffers.
    pub buffers: Vec<BufferView>,
}

impl Snapshot {
    /// Captures the container contents.
    pub fn capture(container: &ObjectContainer) -> Self {
        let mut snapshot = Snapshot::default();
        for entry in container.iter() {
            match &entry.object {
                Object::Component(c) => snapshot.components.push(ComponentView {
                    id: c.id().raw(),
                    core: c.core().0,
                    pipeline: c.pipeline_id().map(|p| p.0),
                    state: c.state(),
                    roles: c.roles(),
                    shared: c.is_shared(),
                    zone: c.memory().zone(),
                    direction: c.direction(),
                    period_frames: c.period_frames(),
                    sources: c.sources().iter().map(|k| k.id.raw()).collect(),
                    sinks: c.sinks().iter().map(|k| k.id.raw()).collect(),
                }),
                Object::Buffer(b) => snapshot.buffers.push(BufferView {
                    id: b.id().raw(),
                    producer: b.producer().map(|c| c.raw()),
                    consumer: b.consumer().map(|c| c.raw()),
                    core: b.core().0,
                    pipeline: b.pipeline_id().map(|p| p.0),
                    size: b.size(),
                    inter_core: b.is_inter_core(),
                    addr: b.memory().addr(),
                }),
                Object::Pipeline(p) => snapshot.pipelines.push(PipelineView {
                    id: p.id().0,
                    core: p.core().0,
                    priority: p.priority(),
                    time_domain: p.time_domain(),
                    period_us: p.period_us(),
                    state: p.state(),
                    source: p.source_comp().map(|c| c.raw()),
                    sink: p.sink_comp().map(|c| c.raw()),
                    sched: p.sched_comp().map(|c| c.raw()),
                }),
            }
        }
        snapshot
    }

    /// True when nothing is alive.
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty() && self.components.is_empty() && self.buffers.is_empty()
    }
}
