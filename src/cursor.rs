//! Range scans
//!
//! A `Cursor` merges the memtable snapshot with every overlapping SSTable,
//! yielding live entries in ascending key order. For keys present in several
//! sources the newest source wins; tombstones hide the key.
//!
//! ```text
//!   memtable ──┐
//!   sst #7   ──┼──► min-heap on (key, source) ──► dedup ──► skip tombstones
//!   sst #3   ──┘
//! ```

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::iter::FusedIterator;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use tracing::trace;

use crate::error::Result;
use crate::memtable::{MemTableRange, MemTableSnapshot};
use crate::storage::{SSTableIterator, SSTableReader};

// =============================================================================
// Scan Ranges
// =============================================================================

/// Half-open key range `[start, end)`; `None` bounds are open
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanRange {
    start: Option<Vec<u8>>,
    end: Option<Vec<u8>>,
}

impl ScanRange {
    /// The whole keyspace
    pub fn all() -> Self {
        Self::default()
    }

    /// Every key starting with `prefix`
    pub fn prefix(prefix: &[u8]) -> Self {
        Self {
            start: (!prefix.is_empty()).then(|| prefix.to_vec()),
            end: prefix_upper_bound(prefix),
        }
    }

    /// Keys in `[start, end)`
    pub fn between(start: &[u8], end: &[u8]) -> Self {
        Self {
            start: Some(start.to_vec()),
            end: Some(end.to_vec()),
        }
    }

    pub fn start(&self) -> Option<&[u8]> {
        self.start.as_deref()
    }

    pub fn end(&self) -> Option<&[u8]> {
        self.end.as_deref()
    }

    /// True when no key can fall inside (`start >= end`)
    pub fn is_empty(&self) -> bool {
        matches!((&self.start, &self.end), (Some(s), Some(e)) if s >= e)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.start().map_or(true, |s| key >= s) && self.end().map_or(true, |e| key < e)
    }
}

/// Smallest key greater than every key starting with `prefix`
///
/// Trailing `0xFF` bytes cannot be incremented and are dropped first; `None`
/// means the range is unbounded above.
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut bound = prefix.to_vec();
    while let Some(last) = bound.pop() {
        if last < u8::MAX {
            bound.push(last + 1);
            return Some(bound);
        }
    }
    None
}

// =============================================================================
// Sources
// =============================================================================

/// One ordered input to the merge; lower index = newer
enum Source {
    Memtable(MemTableRange),
    Table(SSTableIterator),
}

impl Source {
    /// Next (key, value) with `None` value for tombstones
    fn next_entry(&mut self) -> Option<Result<(Vec<u8>, Option<Vec<u8>>)>> {
        match self {
            Source::Memtable(range) => range.next().map(|(k, v)| Ok((k, v.into_value()))),
            Source::Table(iter) => iter.next(),
        }
    }
}

/// Head entry of one source
struct HeapEntry {
    key: Vec<u8>,
    value: Option<Vec<u8>>,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // BinaryHeap is a max-heap: reverse so the smallest key, then the newest
    // source, is on top
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

// =============================================================================
// Cursor
// =============================================================================

/// Keeps the engine's live-cursor count accurate
struct CursorGuard<'a> {
    live: &'a AtomicUsize,
}

impl<'a> CursorGuard<'a> {
    fn acquire(live: &'a AtomicUsize) -> Self {
        let now = live.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        trace!(live = now, "cursor opened");
        Self { live }
    }
}

impl Drop for CursorGuard<'_> {
    fn drop(&mut self) {
        let now = self.live.fetch_sub(1, AtomicOrdering::SeqCst) - 1;
        trace!(live = now, "cursor released");
    }
}

/// Lazy, ordered scan over a point-in-time view of the engine
///
/// Yields `(key, value)` pairs for live keys. Nothing is read until the first
/// call to `next`; SSTable files are opened then and read one entry at a time.
/// Resources are released on exhaustion, after an error, or on drop,
/// whichever comes first. Fused: after `None` or an error, always `None`.
pub struct Cursor<'a> {
    sources: Vec<Source>,
    heap: BinaryHeap<HeapEntry>,
    primed: bool,
    guard: Option<CursorGuard<'a>>,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(
        range: &ScanRange,
        memtable: MemTableSnapshot,
        sstables: Vec<Arc<SSTableReader>>,
        live: &'a AtomicUsize,
    ) -> Self {
        let guard = Some(CursorGuard::acquire(live));

        if range.is_empty() {
            return Self {
                sources: Vec::new(),
                heap: BinaryHeap::new(),
                primed: true,
                guard,
            };
        }

        let (start, end) = (range.start(), range.end());
        let mut sources = Vec::with_capacity(sstables.len() + 1);
        sources.push(Source::Memtable(MemTableRange::new(memtable, start, end)));
        sources.extend(
            sstables
                .iter()
                .filter(|table| table.overlaps(start, end))
                .map(|table| Source::Table(table.range_iter(start, end))),
        );

        Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            primed: false,
            guard,
        }
    }

    /// Whether the cursor still holds engine resources
    pub fn is_open(&self) -> bool {
        self.guard.is_some()
    }

    fn pull(&mut self, source: usize) -> Result<()> {
        if let Some(entry) = self.sources[source].next_entry() {
            let (key, value) = entry?;
            self.heap.push(HeapEntry { key, value, source });
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if !self.primed {
            for source in 0..self.sources.len() {
                self.pull(source)?;
            }
            self.primed = true;
        }

        while let Some(top) = self.heap.pop() {
            // Older versions of the same key are shadowed
            while self.heap.peek().is_some_and(|next| next.key == top.key) {
                if let Some(shadowed) = self.heap.pop() {
                    self.pull(shadowed.source)?;
                }
            }
            self.pull(top.source)?;

            if let Some(value) = top.value {
                return Ok(Some((top.key, value)));
            }
        }

        Ok(None)
    }

    fn release(&mut self) {
        self.sources.clear();
        self.heap.clear();
        self.guard = None;
    }
}

impl Iterator for Cursor<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.guard.is_none() {
            return None;
        }

        match self.advance() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.release();
                None
            }
            Err(e) => {
                self.release();
                Some(Err(e))
            }
        }
    }
}

impl FusedIterator for Cursor<'_> {}
