//! Pipeline metadata and the external scheduler hook.
//!
//! A pipeline does not own its components; it only records which of them
//! act as source, sink and scheduling component. Those fields are ids, and
//! the component free path clears them before the component disappears.

use serde::{Deserialize, Serialize};

use crate::error::IpcError;
use crate::id::{CompId, CoreId, PipelineId};
use crate::memory::Region;

/// Default scheduling period in microseconds.
pub const DEFAULT_PERIOD_US: u32 = 1000;

/// Clock source that paces a pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeDomain {
    /// Periodic timer interrupt.
    #[default]
    Timer,
    /// DMA completion interrupt.
    Dma,
}

/// Lifecycle state of a pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Created, no component yet.
    #[default]
    Created,
    /// Components are being added and connected.
    Wiring,
    /// Topology finalized by the scheduler.
    Completed,
    /// Running (externally driven).
    Running,
    /// Paused (externally driven).
    Paused,
    /// Teardown in progress.
    Freeing,
}

/// A named, schedulable subgraph.
#[derive(Debug)]
pub struct Pipeline {
    pub(crate) id: PipelineId,
    pub(crate) priority: u32,
    pub(crate) time_domain: TimeDomain,
    pub(crate) period_us: u32,
    pub(crate) core: CoreId,
    pub(crate) state: PipelineState,
    pub(crate) source_comp: Option<CompId>,
    pub(crate) sink_comp: Option<CompId>,
    pub(crate) sched_comp: Option<CompId>,
    /// Raw id declared by the host; resolved at completion.
    pub(crate) sched_id: Option<u32>,
    pub(crate) memory: Region,
}

impl Pipeline {
    pub(crate) fn new(
        id: PipelineId,
        priority: u32,
        sched_id: Option<u32>,
        core: CoreId,
        memory: Region,
    ) -> Self {
        Self {
            id,
            priority,
            time_domain: TimeDomain::default(),
            period_us: DEFAULT_PERIOD_US,
            core,
            state: PipelineState::Created,
            source_comp: None,
            sink_comp: None,
            sched_comp: None,
            sched_id,
            memory,
        }
    }

    /// Pipeline id.
    #[inline]
    pub fn id(&self) -> PipelineId {
        self.id
    }

    /// Scheduling priority.
    #[inline]
    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Pacing clock.
    #[inline]
    pub fn time_domain(&self) -> TimeDomain {
        self.time_domain
    }

    /// Scheduling period in microseconds.
    #[inline]
    pub fn period_us(&self) -> u32 {
        self.period_us
    }

    /// Owning core.
    #[inline]
    pub fn core(&self) -> CoreId {
        self.core
    }

    /// Lifecycle state.
    #[inline]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Source endpoint.
    #[inline]
    pub fn source_comp(&self) -> Option<CompId> {
        self.source_comp
    }

    /// Sink endpoint.
    #[inline]
    pub fn sink_comp(&self) -> Option<CompId> {
        self.sink_comp
    }

    /// Scheduling component, resolved at completion.
    #[inline]
    pub fn sched_comp(&self) -> Option<CompId> {
        self.sched_comp
    }

    /// Declared scheduling-component id.
    #[inline]
    pub fn sched_id(&self) -> Option<u32> {
        self.sched_id
    }

    /// Pipeline object memory.
    #[inline]
    pub fn memory(&self) -> &Region {
        &self.memory
    }

    /// Scheduling hints handed to the scheduler.
    pub fn info(&self) -> PipelineInfo {
        PipelineInfo {
            id: self.id,
            priority: self.priority,
            time_domain: self.time_domain,
            period_us: self.period_us,
            core: self.core,
            sched_comp: self.sched_comp,
        }
    }

    /// Drops every back-reference to `comp`.
    pub(crate) fn forget(&mut self, comp: CompId) {
        for slot in [
            &mut self.source_comp,
            &mut self.sink_comp,
            &mut self.sched_comp,
        ] {
            if *slot == Some(comp) {
                *slot = None;
            }
        }
    }
}

/// Snapshot of the scheduling hints of a pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineInfo {
    /// Pipeline id.
    pub id: PipelineId,
    /// Scheduling priority.
    pub priority: u32,
    /// Pacing clock.
    pub time_domain: TimeDomain,
    /// Period in microseconds.
    pub period_us: u32,
    /// Owning core.
    pub core: CoreId,
    /// Resolved scheduling component.
    pub sched_comp: Option<CompId>,
}

/// Finalizes a pipeline topology for the external scheduler.
pub trait PipelineScheduler: Send + Sync {
    /// Called once per successful completion.
    fn complete(
        &self,
        _info: &PipelineInfo,
        _source: Option<CompId>,
        _sink: Option<CompId>,
    ) -> Result<(), IpcError> {
        Ok(())
    }
}

/// Scheduler that accepts every topology.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScheduler;

impl PipelineScheduler for NoopScheduler {}
