//! Shared-memory buffers connecting a producer to a consumer.
//!
//! A buffer is created by a bind and destroyed by the matching unbind, by
//! freeing one of its endpoint components, or by pipeline teardown. Its
//! header lives in the runtime-shared zone, aligned to the cache line so
//! maintenance on one buffer never touches a line owned by another.
//!
//! Stream parameters sit behind a per-buffer lock that is independent of
//! the container lock. It is held only for the duration of a field update
//! and never across a cross-core forward.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cache::CacheOps;
use crate::component::{Component, Connection};
use crate::error::IpcError;
use crate::id::{BufferId, BufferKey, CompId, CoreId, PipelineId};
use crate::memory::{Allocator, MemCaps, MemZone, Region, PLATFORM_DCACHE_ALIGN};

/// Sample container format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameFormat {
    /// Signed 16-bit little endian.
    #[default]
    S16Le,
    /// Signed 24-bit in a 32-bit container.
    S24In32Le,
    /// Signed 32-bit little endian.
    S32Le,
    /// 32-bit float.
    Float,
}

/// Channel layout in memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferFormat {
    /// Samples of one frame are adjacent.
    #[default]
    Interleaved,
    /// One contiguous block per channel.
    NonInterleaved,
}

/// Negotiated stream parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamParams {
    /// Sample format.
    pub frame_fmt: FrameFormat,
    /// Memory layout.
    pub buffer_fmt: BufferFormat,
    /// Channel count.
    pub channels: u32,
    /// Sample rate in Hz.
    pub rate: u32,
}

/// Selects which [`StreamParams`] fields are taken from an existing buffer
/// during parameter verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct ParamsFlags(u32);

impl ParamsFlags {
    /// No field is inherited.
    pub const NONE: ParamsFlags = ParamsFlags(0);
    /// Inherit `frame_fmt`.
    pub const FRAME_FMT: ParamsFlags = ParamsFlags(1 << 0);
    /// Inherit `buffer_fmt`.
    pub const BUFFER_FMT: ParamsFlags = ParamsFlags(1 << 1);
    /// Inherit `channels`.
    pub const CHANNELS: ParamsFlags = ParamsFlags(1 << 2);
    /// Inherit `rate`.
    pub const RATE: ParamsFlags = ParamsFlags(1 << 3);

    /// Builds flags from raw bits, dropping unknown ones.
    #[inline]
    pub fn from_bits_truncate(bits: u32) -> Self {
        ParamsFlags(bits & 0xF)
    }

    /// Raw flag bits.
    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    /// True if every flag in `other` is set.
    #[inline]
    pub fn contains(self, other: ParamsFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for ParamsFlags {
    type Output = ParamsFlags;

    fn bitor(self, rhs: ParamsFlags) -> ParamsFlags {
        ParamsFlags(self.0 | rhs.0)
    }
}

/// Empty/full policy copied from the bind request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferFlags {
    /// Reading an empty buffer is not an error.
    pub underrun_permitted: bool,
    /// Writing a full buffer is not an error.
    pub overrun_permitted: bool,
}

/// A FIFO edge between two components.
#[derive(Debug)]
pub struct Buffer {
    pub(crate) key: BufferKey,
    pub(crate) core: CoreId,
    pub(crate) pipeline_id: Option<PipelineId>,
    pub(crate) size: usize,
    pub(crate) inter_core: bool,
    pub(crate) flags: BufferFlags,
    pub(crate) producer: Option<CompId>,
    pub(crate) consumer: Option<CompId>,
    stream: Mutex<StreamParams>,
    pub(crate) memory: Region,
}

impl Buffer {
    /// Queue-derived id.
    #[inline]
    pub fn id(&self) -> BufferId {
        self.key.id
    }

    /// Container key.
    #[inline]
    pub fn key(&self) -> BufferKey {
        self.key
    }

    /// Core whose memory holds the buffer (the producer's core).
    #[inline]
    pub fn core(&self) -> CoreId {
        self.core
    }

    /// Pipeline inherited from the producer.
    #[inline]
    pub fn pipeline_id(&self) -> Option<PipelineId> {
        self.pipeline_id
    }

    /// Capacity in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// True when producer and consumer live on different cores.
    #[inline]
    pub fn is_inter_core(&self) -> bool {
        self.inter_core
    }

    /// Empty/full policy.
    #[inline]
    pub fn flags(&self) -> BufferFlags {
        self.flags
    }

    /// Producer edge, set once the source splice completed.
    #[inline]
    pub fn producer(&self) -> Option<CompId> {
        self.producer
    }

    /// Consumer edge, set once the sink splice completed.
    #[inline]
    pub fn consumer(&self) -> Option<CompId> {
        self.consumer
    }

    /// Header memory.
    #[inline]
    pub fn memory(&self) -> &Region {
        &self.memory
    }

    /// Snapshot of the stream parameters.
    pub fn stream(&self) -> StreamParams {
        *self.stream.lock()
    }

    /// Takes the fields selected by `flags` from this buffer into `params`,
    /// then force-updates the buffer from the result.
    ///
    /// Returns the buffer's new sample rate.
    pub(crate) fn exchange_params(&self, flags: ParamsFlags, params: &mut StreamParams) -> u32 {
        let mut stream = self.stream.lock();
        if flags.contains(ParamsFlags::FRAME_FMT) {
            params.frame_fmt = stream.frame_fmt;
        }
        if flags.contains(ParamsFlags::BUFFER_FMT) {
            params.buffer_fmt = stream.buffer_fmt;
        }
        if flags.contains(ParamsFlags::CHANNELS) {
            params.channels = stream.channels;
        }
        if flags.contains(ParamsFlags::RATE) {
            params.rate = stream.rate;
        }
        *stream = *params;
        stream.rate
    }

    /// Writes the header back and drops stale lines: the buffer is now
    /// fully formed for every core.
    pub(crate) fn publish(&self, cache: &dyn CacheOps) {
        cache.writeback_invalidate(self.memory.range());
    }

    /// Discards cached lines before a read by a non-owning core.
    pub(crate) fn refresh(&self, cache: &dyn CacheOps) {
        cache.invalidate(self.memory.range());
    }

    /// True once neither component references the buffer.
    #[inline]
    pub(crate) fn is_detached(&self) -> bool {
        self.producer.is_none() && self.consumer.is_none()
    }
}

/// Allocates a buffer for `connection` between `producer` and `consumer`.
///
/// Size is the larger of the producer's output block size and the consumer's
/// input block size. The header is published before it is returned.
pub(crate) fn create(
    allocator: &dyn Allocator,
    cache: &dyn CacheOps,
    producer: &Component,
    consumer: &Component,
    connection: &Connection,
    flags: BufferFlags,
) -> Result<Buffer, IpcError> {
    let size = producer.config().obs.max(consumer.config().ibs) as usize;
    let memory = allocator
        .alloc(
            MemZone::RuntimeShared,
            MemCaps::RAM,
            size,
            PLATFORM_DCACHE_ALIGN,
        )
        .ok_or(IpcError::OutOfMemory)?;

    let buffer = Buffer {
        key: connection.buffer_key(),
        core: producer.core(),
        pipeline_id: producer.pipeline_id(),
        size,
        inter_core: false,
        flags,
        producer: None,
        consumer: None,
        stream: Mutex::new(StreamParams::default()),
        memory,
    };
    buffer.publish(cache);

    #[cfg(feature = "tracing")]
    tracing::debug!(buffer = %buffer.key, size, core = %buffer.core, "buffer created");

    Ok(buffer)
}

/// Releases a buffer's memory.
///
/// The buffer must already be unlinked from both adjacency lists.
pub(crate) fn free(allocator: &dyn Allocator, buffer: Buffer) {
    debug_assert!(
        buffer.is_detached(),
        "{} freed while still linked",
        buffer.key
    );
    #[cfg(feature = "tracing")]
    tracing::debug!(buffer = %buffer.key, "buffer freed");
    allocator.free(buffer.memory);
}
