//! Identifiers for cores, components, pipelines and buffers.
//!
//! Host commands address objects with raw 32-bit ids. The namespaces are
//! disjoint by construction:
//!
//! - component ids pack `module_id << 16 | instance_id` with `module_id != 0`
//!   (module 0 is the base firmware), so they are always `>= 0x1_0000`;
//! - pipeline ids are instance ids in `0..=0xFFFF`;
//! - buffer ids pack the two queue indices and are only unique per producer,
//!   so the container keys a buffer by `(producer, buffer id)`.
//!
//! [`ObjectId`] is the tagged key used by the object container.

use serde::{Deserialize, Serialize};

use crate::error::IpcError;

/// Index of a DSP core.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CoreId(pub u8);

impl CoreId {
    /// The core on which host commands are dispatched.
    pub const PRIMARY: CoreId = CoreId(0);

    /// Returns the core index.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Process-wide unique component id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompId(u32);

impl CompId {
    /// Packs a module id and instance id.
    ///
    /// Returns [`IpcError::InvalidResourceId`] for module 0.
    pub fn new(module_id: u16, instance_id: u16) -> Result<Self, IpcError> {
        if module_id == 0 {
            return Err(IpcError::InvalidResourceId);
        }
        Ok(Self((u32::from(module_id) << 16) | u32::from(instance_id)))
    }

    /// Interprets a raw host id as a component id.
    pub fn from_raw(raw: u32) -> Result<Self, IpcError> {
        if raw >> 16 == 0 {
            return Err(IpcError::InvalidResourceId);
        }
        Ok(Self(raw))
    }

    /// Returns the raw packed id.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Module (driver) identifier.
    #[inline]
    pub fn module_id(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Instance of the module.
    #[inline]
    pub fn instance_id(self) -> u16 {
        self.0 as u16
    }
}

/// Pipeline instance id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(pub u16);

impl PipelineId {
    /// Interprets a raw host id as a pipeline id.
    pub fn from_raw(raw: u32) -> Result<Self, IpcError> {
        u16::try_from(raw)
            .map(PipelineId)
            .map_err(|_| IpcError::InvalidResourceId)
    }

    /// Returns the raw id.
    #[inline]
    pub fn raw(self) -> u32 {
        u32::from(self.0)
    }
}

/// Buffer id derived from the producer and consumer queue indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(u32);

impl BufferId {
    /// Packs `src_queue << 16 | dst_queue`.
    #[inline]
    pub fn from_queues(src_queue: u16, dst_queue: u16) -> Self {
        Self((u32::from(src_queue) << 16) | u32::from(dst_queue))
    }

    /// Returns the raw packed id.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Producer-side queue index.
    #[inline]
    pub fn src_queue(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Consumer-side queue index.
    #[inline]
    pub fn dst_queue(self) -> u16 {
        self.0 as u16
    }
}

/// Container key of a buffer: its producer plus its derived id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferKey {
    /// Component writing into the buffer.
    pub producer: CompId,
    /// Queue-derived id.
    pub id: BufferId,
}

/// Kind of a container entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// A processing component.
    Component,
    /// A shared-memory buffer.
    Buffer,
    /// A pipeline.
    Pipeline,
}

/// Tagged key of an object container entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectId {
    /// Component entry.
    Component(CompId),
    /// Buffer entry.
    Buffer(BufferKey),
    /// Pipeline entry.
    Pipeline(PipelineId),
}

impl ObjectId {
    /// Maps a raw host id onto the component or pipeline namespace.
    ///
    /// Buffers are never addressed by a raw id.
    pub fn classify(raw: u32) -> ObjectId {
        match CompId::from_raw(raw) {
            Ok(comp) => ObjectId::Component(comp),
            Err(_) => ObjectId::Pipeline(PipelineId(raw as u16)),
        }
    }

    /// Kind of object this key names.
    pub fn kind(self) -> ObjectKind {
        match self {
            ObjectId::Component(_) => ObjectKind::Component,
            ObjectId::Buffer(_) => ObjectKind::Buffer,
            ObjectId::Pipeline(_) => ObjectKind::Pipeline,
        }
    }
}

impl core::fmt::Display for CoreId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "core{}", self.0)
    }
}

impl core::fmt::Display for CompId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "comp {:#x}", self.0)
    }
}

impl core::fmt::Display for PipelineId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "pipe {}", self.0)
    }
}

impl core::fmt::Display for BufferKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "buf {}.{} of {}",
            self.id.src_queue(),
            self.id.dst_queue(),
            self.producer
        )
    }
}

impl core::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ObjectId::Component(id) => id.fmt(f),
            ObjectId::Buffer(key) => key.fmt(f),
            ObjectId::Pipeline(id) => id.fmt(f),
        }
    }
}
