//! Components: the processing nodes of a pipeline.
//!
//! A [`Component`] is the control plane's record of one processing node. The
//! processing itself lives behind [`ComponentOps`], produced by a
//! [`ComponentDriver`] that is looked up through [`DriverLookup`]. The
//! control plane only needs the driver to accept queue (un)binding, stream
//! parameters, triggers and a per-block `copy`; it never looks inside.
//!
//! ## Ownership
//!
//! Components are exclusively owned by the object container. Their adjacency
//! lists hold [`BufferKey`]s, not references, so tearing down a buffer never
//! leaves a dangling pointer behind.
//!
//! ## Shared components
//!
//! Once a component gains a buffer that crosses a core boundary it is
//! promoted to *shared*: its record moves to the shared heap and every later
//! call into its ops from another core is forwarded to its owning core. The
//! promotion is permanent.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::buffer::StreamParams;
use crate::cache::CacheOps;
use crate::error::IpcError;
use crate::id::{BufferId, BufferKey, CompId, CoreId, PipelineId};
use crate::memory::{Allocator, MemZone, PLATFORM_DCACHE_ALIGN, Region};

/// Lifecycle state of a component, driven by triggers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    /// Created or stopped; may be freed or rewired.
    #[default]
    Ready,
    /// Parameters accepted, ready to start.
    Prepared,
    /// Processing blocks.
    Running,
    /// Started, currently paused.
    Paused,
    /// Driver reported an unrecoverable error.
    Error,
}

/// Trigger commands issued by the (external) stream controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerCmd {
    /// Ready → Prepared.
    Prepare,
    /// Prepared or Paused → Running.
    Start,
    /// Running → Paused.
    Pause,
    /// Prepared, Running or Paused → Ready.
    Stop,
    /// Any state → Ready.
    Reset,
}

impl ComponentState {
    /// State reached by applying `cmd`, or [`IpcError::BadState`].
    pub fn apply(self, cmd: TriggerCmd) -> Result<ComponentState, IpcError> {
        use ComponentState::{Paused, Prepared, Ready, Running};
        match (cmd, self) {
            (TriggerCmd::Prepare, Ready) => Ok(Prepared),
            (TriggerCmd::Start, Prepared | Paused) => Ok(Running),
            (TriggerCmd::Pause, Running) => Ok(Paused),
            (TriggerCmd::Stop, Prepared | Running | Paused) => Ok(Ready),
            (TriggerCmd::Reset, _) => Ok(Ready),
            _ => Err(IpcError::BadState),
        }
    }
}

/// Processing direction of a component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Host → DSP → DAI; parameters propagate downstream.
    #[default]
    Playback,
    /// DAI → DSP → host; parameters propagate upstream.
    Capture,
}

/// Roles a component plays in its pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Roles {
    /// Pipeline source endpoint.
    pub source: bool,
    /// Pipeline sink endpoint.
    pub sink: bool,
    /// Drives the pipeline's periodic execution.
    pub scheduler: bool,
}

/// Capability declaration every module instance carries.
///
/// Only the block sizes matter to the control plane: they size the buffers
/// adjoining the component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseModuleConfig {
    /// Cycles per block.
    pub cpc: u32,
    /// Input block size in bytes.
    pub ibs: u32,
    /// Output block size in bytes.
    pub obs: u32,
    /// Memory pages required by the instance.
    pub is_pages: u32,
}

/// Decoded payload of a bind or unbind command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Connection {
    /// Producing component.
    pub src: CompId,
    /// Consuming component.
    pub dst: CompId,
    /// Output queue on `src`.
    pub src_queue: u16,
    /// Input queue on `dst`.
    pub dst_queue: u16,
}

impl Connection {
    /// Id of the buffer this connection creates or removes.
    #[inline]
    pub fn buffer_id(&self) -> BufferId {
        BufferId::from_queues(self.src_queue, self.dst_queue)
    }

    /// Container key of that buffer.
    #[inline]
    pub fn buffer_key(&self) -> BufferKey {
        BufferKey {
            producer: self.src,
            id: self.buffer_id(),
        }
    }
}

/// Configuration handed to a driver when instantiating a component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentConfig {
    /// Component id.
    pub id: CompId,
    /// Owning pipeline.
    pub pipeline_id: Option<PipelineId>,
    /// Owning core.
    pub core: CoreId,
    /// Capability declaration.
    pub base: BaseModuleConfig,
    /// Processing direction.
    pub direction: Direction,
    /// Opaque module-specific init payload.
    pub init_data: Vec<u8>,
}

/// Per-instance capabilities provided by a driver.
///
/// Calls on a shared component made from another core are forwarded to its
/// owning core. Every other call runs directly on the calling core, even
/// when that is not the owner. Default implementations accept the request
/// and do nothing.
pub trait ComponentOps: Send {
    /// A buffer was attached on one of this component's queues.
    fn bind(&mut self, _connection: &Connection) -> Result<(), IpcError> {
        Ok(())
    }

    /// A buffer was detached from one of this component's queues.
    fn unbind(&mut self, _connection: &Connection) -> Result<(), IpcError> {
        Ok(())
    }

    /// New stream parameters were negotiated.
    fn set_params(&mut self, _params: &StreamParams) -> Result<(), IpcError> {
        Ok(())
    }

    /// A trigger is about to change the component state.
    fn trigger(&mut self, _cmd: TriggerCmd) -> Result<(), IpcError> {
        Ok(())
    }

    /// Processes one block.
    fn copy(&mut self) -> Result<(), IpcError> {
        Ok(())
    }

    /// Releases driver resources. Called once, before the record is dropped.
    fn free(&mut self) {}
}

/// Factory for one kind of component.
pub trait ComponentDriver: Send + Sync {
    /// Fixed-width driver identifier.
    fn uuid(&self) -> Uuid;

    /// Short human-readable name.
    fn name(&self) -> &str;

    /// Instantiates a component, or `None` if the configuration is rejected.
    fn create(&self, config: &ComponentConfig) -> Option<Box<dyn ComponentOps>>;
}

/// Driver lookup capability consumed by the control plane.
pub trait DriverLookup: Send + Sync {
    /// Driver with exactly this UUID.
    fn by_uuid(&self, uuid: &Uuid) -> Option<Arc<dyn ComponentDriver>>;

    /// Driver bound to `module_id` by the boot manifest.
    fn by_module(&self, module_id: u16) -> Option<Arc<dyn ComponentDriver>>;
}

/// Boot manifest capability: which driver a module id is bound to.
pub trait ModuleManifest: Send + Sync {
    /// UUID of the driver implementing `module_id`.
    fn module_uuid(&self, module_id: u16) -> Option<Uuid>;
}

/// Calls into a component's ops that may need to cross cores.
#[derive(Clone, Debug, PartialEq)]
pub enum ComponentCall {
    /// [`ComponentOps::bind`].
    Bind(Connection),
    /// [`ComponentOps::unbind`].
    Unbind(Connection),
    /// [`ComponentOps::set_params`].
    SetParams(StreamParams),
    /// [`ComponentOps::copy`].
    Copy,
}

/// Control-plane record of a processing node.
pub struct Component {
    pub(crate) id: CompId,
    pub(crate) core: CoreId,
    pub(crate) pipeline_id: Option<PipelineId>,
    pub(crate) state: ComponentState,
    pub(crate) roles: Roles,
    pub(crate) shared: bool,
    pub(crate) config: BaseModuleConfig,
    pub(crate) direction: Direction,
    pub(crate) period_us: u32,
    pub(crate) period_frames: u32,
    /// Inbound buffers, most recent first.
    pub(crate) sources: Vec<BufferKey>,
    /// Outbound buffers, most recent first.
    pub(crate) sinks: Vec<BufferKey>,
    pub(crate) memory: Region,
    pub(crate) ops: Box<dyn ComponentOps>,
}

impl Component {
    /// Component id.
    #[inline]
    pub fn id(&self) -> CompId {
        self.id
    }

    /// Owning core.
    #[inline]
    pub fn core(&self) -> CoreId {
        self.core
    }

    /// Owning pipeline, if any.
    #[inline]
    pub fn pipeline_id(&self) -> Option<PipelineId> {
        self.pipeline_id
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> ComponentState {
        self.state
    }

    /// Pipeline roles.
    #[inline]
    pub fn roles(&self) -> Roles {
        self.roles
    }

    /// True once any attached buffer crossed a core boundary.
    #[inline]
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// Capability declaration.
    #[inline]
    pub fn config(&self) -> &BaseModuleConfig {
        &self.config
    }

    /// Processing direction.
    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Scheduling period in microseconds.
    #[inline]
    pub fn period_us(&self) -> u32 {
        self.period_us
    }

    /// Frames per period, set by stream-parameter verification.
    #[inline]
    pub fn period_frames(&self) -> u32 {
        self.period_frames
    }

    /// Inbound buffer keys, most recent first.
    #[inline]
    pub fn sources(&self) -> &[BufferKey] {
        &self.sources
    }

    /// Outbound buffer keys, most recent first.
    #[inline]
    pub fn sinks(&self) -> &[BufferKey] {
        &self.sinks
    }

    /// Home memory of the record.
    #[inline]
    pub fn memory(&self) -> &Region {
        &self.memory
    }

    /// True if another core must go through the owning core to call `ops`.
    #[inline]
    pub(crate) fn needs_forwarding(&self, executing: CoreId) -> bool {
        self.shared && self.core != executing
    }

    /// Derives `period_frames` from a sample rate.
    pub(crate) fn set_period_frames(&mut self, rate: u32) {
        self.period_frames = (u64::from(rate) * u64::from(self.period_us) / 1_000_000) as u32;
    }

    /// Makes local changes to the record visible to other cores.
    pub(crate) fn writeback(&self, cache: &dyn CacheOps) {
        cache.writeback(self.memory.range());
    }

    /// Promotes the component to the shared calling convention, moving its
    /// record into the shared zone. Permanent.
    pub(crate) fn make_shared(
        &mut self,
        allocator: &dyn Allocator,
        cache: &dyn CacheOps,
    ) -> Result<(), IpcError> {
        let moved = allocator
            .alloc(
                MemZone::RuntimeShared,
                self.memory.caps(),
                self.memory.len(),
                PLATFORM_DCACHE_ALIGN,
            )
            .ok_or(IpcError::OutOfMemory)?;
        let old = core::mem::replace(&mut self.memory, moved);
        allocator.free(old);
        self.shared = true;
        cache.writeback_invalidate(self.memory.range());

        #[cfg(feature = "tracing")]
        tracing::debug!(comp = %self.id, core = %self.core, "component promoted to shared");
        Ok(())
    }

    /// Runs a call against the ops on the current core.
    pub(crate) fn call(&mut self, call: &ComponentCall) -> Result<(), IpcError> {
        match call {
            ComponentCall::Bind(c) => self.ops.bind(c),
            ComponentCall::Unbind(c) => self.ops.unbind(c),
            ComponentCall::SetParams(p) => self.ops.set_params(p),
            ComponentCall::Copy => self.ops.copy(),
        }
    }
}

impl core::fmt::Debug for Component {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.id)
            .field("core", &self.core)
            .field("pipeline_id", &self.pipeline_id)
            .field("state", &self.state)
            .field("shared", &self.shared)
            .field("sources", &self.sources)
            .field("sinks", &self.sinks)
            .finish_non_exhaustive()
    }
}
