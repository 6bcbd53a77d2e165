//! Allocator capability and a budgeted reference heap.
//!
//! The control plane never allocates shared memory directly: it asks an
//! [`Allocator`] for a [`Region`] in a given [`MemZone`] with capability
//! flags and an alignment, and hands the region back on free. A region is an
//! ownership token for a range of the DSP address space; cache maintenance
//! is expressed over its [`MemRange`].
//!
//! [`HeapAllocator`] is a budgeted implementation with per-zone limits and
//! outstanding-allocation accounting, suitable for hosts, tests and
//! simulation.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Cache line size of the reference platform in bytes.
///
/// Buffers are aligned to this so cache maintenance on one buffer never
/// touches a line owned by another.
pub const PLATFORM_DCACHE_ALIGN: usize = 64;

/// Memory zone an allocation is served from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemZone {
    /// Boot-time system allocations.
    System,
    /// Core-local runtime allocations.
    Runtime,
    /// Runtime allocations visible from every core.
    RuntimeShared,
}

impl MemZone {
    /// All zones, in budget-table order.
    pub const ALL: [MemZone; 3] = [MemZone::System, MemZone::Runtime, MemZone::RuntimeShared];

    fn slot(self) -> usize {
        match self {
            MemZone::System => 0,
            MemZone::Runtime => 1,
            MemZone::RuntimeShared => 2,
        }
    }
}

/// Capability flags requested from the allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct MemCaps(u32);

impl MemCaps {
    /// Plain RAM.
    pub const RAM: MemCaps = MemCaps(1 << 0);
    /// DMA-capable memory.
    pub const DMA: MemCaps = MemCaps(1 << 1);
    /// Memory that bypasses the data cache.
    pub const UNCACHED: MemCaps = MemCaps(1 << 2);

    /// Returns the raw flag bits.
    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    /// True if every flag in `other` is set.
    #[inline]
    pub fn contains(self, other: MemCaps) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for MemCaps {
    type Output = MemCaps;

    fn bitor(self, rhs: MemCaps) -> MemCaps {
        MemCaps(self.0 | rhs.0)
    }
}

/// An address range in the DSP address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MemRange {
    /// Start address.
    pub addr: usize,
    /// Length in bytes.
    pub len: usize,
}

impl MemRange {
    /// Exclusive end address.
    #[inline]
    pub fn end(self) -> usize {
        self.addr + self.len
    }

    /// True if the two ranges share at least one byte.
    pub fn overlaps(self, other: MemRange) -> bool {
        self.addr < other.end() && other.addr < self.end()
    }
}

/// An allocated range, owned by exactly one object.
#[derive(Debug, PartialEq, Eq)]
pub struct Region {
    range: MemRange,
    zone: MemZone,
    caps: MemCaps,
}

impl Region {
    /// Creates a region descriptor. Only allocators should call this.
    pub fn new(range: MemRange, zone: MemZone, caps: MemCaps) -> Self {
        Self { range, zone, caps }
    }

    /// The covered address range.
    #[inline]
    pub fn range(&self) -> MemRange {
        self.range
    }

    /// Start address.
    #[inline]
    pub fn addr(&self) -> usize {
        self.range.addr
    }

    /// Size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.range.len
    }

    /// True for a zero-length region.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.range.len == 0
    }

    /// Zone the region was served from.
    #[inline]
    pub fn zone(&self) -> MemZone {
        self.zone
    }

    /// Capabilities the region was allocated with.
    #[inline]
    pub fn caps(&self) -> MemCaps {
        self.caps
    }
}

/// Memory allocation capability.
pub trait Allocator: Send + Sync {
    /// Allocates `size` bytes aligned to `align` (a power of two).
    ///
    /// Returns `None` when the request cannot be satisfied.
    fn alloc(&self, zone: MemZone, caps: MemCaps, size: usize, align: usize) -> Option<Region>;

    /// Returns a region to the allocator.
    fn free(&self, region: Region);
}

/// Per-zone byte budgets for [`HeapAllocator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    /// System zone budget in bytes.
    pub system: usize,
    /// Runtime zone budget in bytes.
    pub runtime: usize,
    /// Runtime-shared zone budget in bytes.
    pub runtime_shared: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            system: 16 * 1024,
            runtime: 192 * 1024,
            runtime_shared: 128 * 1024,
        }
    }
}

impl HeapConfig {
    fn budget(&self, zone: MemZone) -> usize {
        match zone {
            MemZone::System => self.system,
            MemZone::Runtime => self.runtime,
            MemZone::RuntimeShared => self.runtime_shared,
        }
    }
}

const HEAP_BASE: usize = 0x1000;

struct HeapState {
    used: [usize; 3],
    next_addr: usize,
    live: HashMap<usize, usize>,
}

/// Budgeted allocator with synthetic, never-reused addresses.
pub struct HeapAllocator {
    config: HeapConfig,
    state: Mutex<HeapState>,
}

impl Default for HeapAllocator {
    fn default() -> Self {
        Self::new(HeapConfig::default())
    }
}

impl HeapAllocator {
    /// Creates an allocator with the given zone budgets.
    pub fn new(config: HeapConfig) -> Self {
        Self {
            config,
            state: Mutex::new(HeapState {
                used: [0; 3],
                next_addr: HEAP_BASE,
                live: HashMap::new(),
            }),
        }
    }

    /// Bytes currently allocated from `zone`.
    pub fn in_use(&self, zone: MemZone) -> usize {
        self.state.lock().used[zone.slot()]
    }

    /// Number of live allocations across all zones.
    pub fn outstanding(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Zone budgets.
    pub fn config(&self) -> HeapConfig {
        self.config
    }
}

impl Allocator for HeapAllocator {
    fn alloc(&self, zone: MemZone, caps: MemCaps, size: usize, align: usize) -> Option<Region> {
        if size == 0 || !align.is_power_of_two() {
            return None;
        }
        let charged = size.checked_next_multiple_of(align)?;

        let mut state = self.state.lock();
        let slot = zone.slot();
        if state.used[slot] + charged > self.config.budget(zone) {
            return None;
        }
        let addr = state.next_addr.checked_next_multiple_of(align)?;
        state.next_addr = addr + charged;
        state.used[slot] += charged;
        state.live.insert(addr, charged);

        Some(Region::new(MemRange { addr, len: size }, zone, caps))
    }

    fn free(&self, region: Region) {
        let mut state = self.state.lock();
        match state.live.remove(&region.addr()) {
            Some(charged) => state.used[region.zone().slot()] -= charged,
            None => debug_assert!(false, "free of unknown region {:#x}", region.addr()),
        }
    }
}
