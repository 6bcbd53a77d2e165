//! Cache-maintenance capability.
//!
//! Cores on the target DSP do not snoop each other's data caches. Any object
//! visible to more than one core is kept consistent by explicit maintenance:
//! a **writeback** after the owner mutates it (before the lock protecting it
//! is released) and an **invalidate** before a remote core reads it.
//!
//! On platforms with coherent memory [`CoherentCache`] turns every operation
//! into a no-op. [`CacheJournal`] records operations so the discipline can be
//! inspected.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::memory::MemRange;

/// Data-cache maintenance over address ranges.
pub trait CacheOps: Send + Sync {
    /// Writes dirty lines in `range` back to memory.
    fn writeback(&self, range: MemRange);

    /// Discards cached lines in `range` so the next read comes from memory.
    fn invalidate(&self, range: MemRange);

    /// Writeback followed by invalidate.
    fn writeback_invalidate(&self, range: MemRange);
}

/// Cache model for coherent platforms: every operation is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct CoherentCache;

impl CacheOps for CoherentCache {
    fn writeback(&self, _range: MemRange) {}

    fn invalidate(&self, _range: MemRange) {}

    fn writeback_invalidate(&self, _range: MemRange) {}
}

/// A single maintenance operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheOp {
    /// Dirty lines written back.
    Writeback,
    /// Lines discarded.
    Invalidate,
    /// Written back, then discarded.
    WritebackInvalidate,
}

/// A recorded maintenance operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheEvent {
    /// Operation performed.
    pub op: CacheOp,
    /// Range it covered.
    pub range: MemRange,
}

/// Events a [`CacheJournal`] keeps by default.
pub const DEFAULT_JOURNAL_CAPACITY: usize = 4096;

/// Records maintenance operations.
///
/// Per-operation counts are exact for the journal's lifetime. Only the most
/// recent `capacity` events are kept, in issue order; older ones are dropped.
#[derive(Debug)]
pub struct CacheJournal {
    state: Mutex<JournalState>,
}

#[derive(Debug)]
struct JournalState {
    events: VecDeque<CacheEvent>,
    capacity: usize,
    counts: [usize; 3],
}

impl CacheOp {
    const fn index(self) -> usize {
        match self {
            Self::Writeback => 0,
            Self::Invalidate => 1,
            Self::WritebackInvalidate => 2,
        }
    }
}

impl Default for CacheJournal {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_JOURNAL_CAPACITY)
    }
}

impl CacheJournal {
    /// Creates an empty journal keeping [`DEFAULT_JOURNAL_CAPACITY`] events.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty journal keeping at most `capacity` events.
    ///
    /// A capacity of zero only counts.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(JournalState {
                events: VecDeque::with_capacity(capacity.min(DEFAULT_JOURNAL_CAPACITY)),
                capacity,
                counts: [0; 3],
            }),
        }
    }

    /// Copy of the retained events, oldest first.
    pub fn events(&self) -> Vec<CacheEvent> {
        self.state.lock().events.iter().copied().collect()
    }

    /// Number of operations of kind `op` recorded since creation or the last
    /// [`clear`](Self::clear).
    pub fn count(&self, op: CacheOp) -> usize {
        self.state.lock().counts[op.index()]
    }

    /// Retained events whose range overlaps `range`.
    pub fn touching(&self, range: MemRange) -> Vec<CacheEvent> {
        self.state
            .lock()
            .events
            .iter()
            .filter(|e| e.range.overlaps(range))
            .copied()
            .collect()
    }

    /// Forgets all recorded events and counts.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.events.clear();
        state.counts = [0; 3];
    }

    fn record(&self, op: CacheOp, range: MemRange) {
        #[cfg(feature = "tracing")]
        tracing::trace!(?op, addr = range.addr, len = range.len, "dcache");
        let mut state = self.state.lock();
        state.counts[op.index()] += 1;
        if state.capacity == 0 {
            return;
        }
        if state.events.len() == state.capacity {
            state.events.pop_front();
        }
        state.events.push_back(CacheEvent { op, range });
    }
}

impl CacheOps for CacheJournal {
    fn writeback(&self, range: MemRange) {
        self.record(CacheOp::Writeback, range);
    }

    fn invalidate(&self, range: MemRange) {
        self.record(CacheOp::Invalidate, range);
    }

    fn writeback_invalidate(&self, range: MemRange) {
        self.record(CacheOp::WritebackInvalidate, range);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_records_in_order() {
        let journal = CacheJournal::new();
        let a = MemRange { addr: 0x100, len: 64 };
        let b = MemRange { addr: 0x200, len: 64 };
        journal.writeback(a);
        journal.invalidate(b);
        journal.writeback_invalidate(a);

        let events = journal.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].op, CacheOp::Writeback);
        assert_eq!(events[1].range, b);
        assert_eq!(journal.count(CacheOp::WritebackInvalidate), 1);
        assert_eq!(journal.touching(a).len(), 2);
    }

    #[test]
    fn clear_empties_journal() {
        let journal = CacheJournal::new();
        journal.writeback(MemRange { addr: 0, len: 1 });
        journal.clear();
        assert!(journal.events().is_empty());
        assert_eq!(journal.count(CacheOp::Writeback), 0);
    }

    #[test]
    fn journal_is_bounded_but_counts_everything() {
        let journal = CacheJournal::with_capacity(4);
        for i in 0..10 {
            journal.writeback(MemRange { addr: i * 64, len: 64 });
        }
        journal.invalidate(MemRange { addr: 0x1000, len: 64 });

        let events = journal.events();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].range.addr, 7 * 64);
        assert_eq!(events[3].op, CacheOp::Invalidate);
        assert_eq!(journal.count(CacheOp::Writeback), 10);
        assert_eq!(journal.count(CacheOp::Invalidate), 1);
    }

    #[test]
    fn zero_capacity_journal_only_counts() {
        let journal = CacheJournal::with_capacity(0);
        journal.writeback_invalidate(MemRange { addr: 0, len: 64 });
        assert!(journal.events().is_empty());
        assert_eq!(journal.count(CacheOp::WritebackInvalidate), 1);
    }
}
