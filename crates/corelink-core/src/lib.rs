//! Corelink Core - control plane of a multi-core DSP audio firmware
//!
//! Hosts assemble, wire, run and tear down graphs of processing components
//! ("pipelines") that exchange audio through shared-memory buffers, possibly
//! across cores without hardware cache coherency. This crate is the object
//! model and the cross-core connection protocol behind those commands.
//!
//! # Core Abstractions
//!
//! ## Objects
//!
//! - [`Component`] - a processing node, created by a [`ComponentDriver`]
//! - [`Buffer`] - a FIFO edge sized from both endpoints' block sizes
//! - [`Pipeline`] - a schedulable subgraph with source, sink and scheduler
//! - [`ObjectContainer`] - every live object, keyed by [`ObjectId`]
//!
//! ## Protocol
//!
//! - [`ControlPlane::dispatch`] - executes a decoded [`Command`]
//! - bind/unbind - creates or removes a buffer and splices it into both
//!   components, rolling back completely on failure
//! - core affinity - objects are only mutated on their owning core; other
//!   cores forward the request and wait for the reply
//!
//! ## Collaborators
//!
//! - [`Allocator`] - zone/caps/alignment allocation ([`HeapAllocator`])
//! - [`CacheOps`] - writeback/invalidate ([`CoherentCache`], [`CacheJournal`])
//! - [`DriverLookup`] - module id or UUID to driver
//! - [`PipelineScheduler`] - topology finalization hook
//!
//! # Features
//!
//! - `tracing` - structured logging of every mutation and failure
//!
//! # Design Principles
//!
//! - **Ids, not pointers**: pipelines and adjacency lists refer to objects by
//!   id, so a freed object never leaves a dangling reference
//! - **One container lock**: short critical sections, never held across a
//!   cross-core forward
//! - **Explicit publish**: every cross-core visible mutation is followed by
//!   cache maintenance, a no-op on coherent platforms

mod affinity;
pub mod buffer;
pub mod cache;
pub mod command;
pub mod component;
mod connect;
pub mod container;
pub mod error;
pub mod id;
mod lifecycle;
pub mod memory;
pub mod pipeline;
pub mod plane;
pub mod snapshot;
mod topology;

pub use buffer::{Buffer, BufferFlags, BufferFormat, FrameFormat, ParamsFlags, StreamParams};
pub use cache::{
    CacheEvent, CacheJournal, CacheOp, CacheOps, CoherentCache, DEFAULT_JOURNAL_CAPACITY,
};
pub use command::{BindRequest, Command, ComponentSpec};
pub use component::{
    BaseModuleConfig, Component, ComponentCall, ComponentConfig, ComponentDriver, ComponentOps,
    ComponentState, Connection, Direction, DriverLookup, ModuleManifest, Roles, TriggerCmd,
};
pub use container::{Entry, Object, ObjectContainer};
pub use error::{IpcError, Status};
pub use id::{BufferId, BufferKey, CompId, CoreId, ObjectId, ObjectKind, PipelineId};
pub use memory::{
    Allocator, HeapAllocator, HeapConfig, MemCaps, MemRange, MemZone, PLATFORM_DCACHE_ALIGN,
    Region,
};
pub use pipeline::{
    DEFAULT_PERIOD_US, NoopScheduler, Pipeline, PipelineInfo, PipelineScheduler, PipelineState,
    TimeDomain,
};
pub use plane::{ControlPlane, ControlPlaneBuilder};
pub use snapshot::{BufferView, ComponentView, PipelineView, Snapshot};
