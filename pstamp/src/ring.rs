//! Causally-linked event rings.
//!
//! A ring segment is a fixed-capacity, single-producer log of captured
//! events paired with the events that caused them. Writes never block and
//! never allocate; a full segment either overwrites its oldest entry and
//! counts the loss, or hands off permanently to a successor segment that
//! was attached out of band.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use smallvec::SmallVec;

use crate::tsc::Pstamp;

/// One logged entry: the captured event and the event the caller named as
/// its cause. The cause is stored as given and never validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoggedPstamp {
    pub pstamp: Pstamp,
    pub cause: Pstamp,
}

#[inline]
fn wrap(index: usize, capacity: usize) -> usize {
    if index < capacity { index } else { 0 }
}

struct RingSegment {
    capacity: usize,
    /// Slot the next write lands in, always in `[0, capacity)`.
    next_write_index: AtomicUsize,
    /// Oldest-entry cursor in `[0, capacity]`. The value `capacity` means
    /// the first lap has not completed; the first wrap resets it to 0, after
    /// which it advances in lock-step with overwrites.
    wrap_bound: AtomicUsize,
    inactive: AtomicBool,
    overflow_count: AtomicU64,
    successor: OnceLock<Arc<RingSegment>>,
    storage: Box<[UnsafeCell<LoggedPstamp>]>,
}

// Safety: storage cells are written only by the single producer thread that
// holds the live handle, and read only once that producer is quiescent or
// the segment is inactive, which the enumeration methods state as their
// precondition. Cursor and status fields are atomics.
unsafe impl Send for RingSegment {}
unsafe impl Sync for RingSegment {}

impl RingSegment {
    fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "ring capacity must be nonzero");
        let storage = (0..capacity)
            .map(|_| UnsafeCell::new(LoggedPstamp::default()))
            .collect();
        RingSegment {
            capacity,
            next_write_index: AtomicUsize::new(0),
            wrap_bound: AtomicUsize::new(capacity),
            inactive: AtomicBool::new(false),
            overflow_count: AtomicU64::new(0),
            successor: OnceLock::new(),
            storage,
        }
    }

    /// Oldest-entry index and resident-entry count.
    fn window(&self) -> (usize, usize) {
        let next = self.next_write_index.load(Ordering::SeqCst);
        let bound = self.wrap_bound.load(Ordering::SeqCst);
        if bound == self.capacity {
            (0, next)
        } else {
            (bound, self.capacity)
        }
    }

    fn read(&self, index: usize) -> LoggedPstamp {
        // Safety: the caller holds the enumeration precondition, so no
        // write overlaps this read.
        unsafe { *self.storage[index].get() }
    }
}

/// Owned handle to a ring segment.
///
/// [`log`](PstampRing::log) consumes the handle and returns the one to
/// write through next, which addresses a different segment once a full ring
/// hands off to its successor. Clones address the same segment; exactly one
/// of them may act as the producer.
#[derive(Clone)]
pub struct PstampRing {
    segment: Arc<RingSegment>,
}

impl PstampRing {
    /// Create an empty ring holding up to `capacity` entries.
    ///
    /// `capacity` need not be a power of two. Zero capacity is a contract
    /// violation (debug-asserted only).
    pub fn new(capacity: usize) -> Self {
        PstampRing {
            segment: Arc::new(RingSegment::new(capacity)),
        }
    }

    /// Capture a timestamp for `point`, pair it with `cause`, and append
    /// the entry.
    ///
    /// Returns the handle to use for the next call. When this segment is
    /// full and has a successor, the segment becomes inactive, the entry
    /// lands in the successor, and the returned handle addresses the
    /// successor. When full with no successor, the oldest entry is
    /// overwritten and [`overflows`](PstampRing::overflows) grows by one.
    /// Never blocks, never allocates.
    pub fn log(self, point: u32, cause: &Pstamp) -> PstampRing {
        let mut segment = self.segment;
        loop {
            let next = segment.next_write_index.load(Ordering::SeqCst);
            let bound = segment.wrap_bound.load(Ordering::SeqCst);
            if next == bound {
                if let Some(successor) = segment.successor.get() {
                    let successor = Arc::clone(successor);
                    segment.inactive.store(true, Ordering::SeqCst);
                    segment = successor;
                    continue;
                }
                segment.overflow_count.fetch_add(1, Ordering::SeqCst);
                segment
                    .wrap_bound
                    .store(wrap(bound + 1, segment.capacity), Ordering::SeqCst);
            }
            let entry = LoggedPstamp {
                pstamp: Pstamp::capture(point),
                cause: *cause,
            };
            // Safety: this thread is the single producer for the segment;
            // readers wait for quiescence or inactivation.
            unsafe {
                *segment.storage[next].get() = entry;
            }
            let advanced = wrap(next + 1, segment.capacity);
            segment.next_write_index.store(advanced, Ordering::SeqCst);
            if bound == segment.capacity && advanced == 0 {
                segment.wrap_bound.store(0, Ordering::SeqCst);
            }
            return PstampRing { segment };
        }
    }

    /// Attach `next` as this segment's successor.
    ///
    /// One-shot: returns false without effect if a successor is already
    /// attached or the segment is already inactive. Safe to call from a
    /// thread other than the producer; the producer only reads the
    /// successor field on its full-buffer path.
    pub fn extend(&self, next: PstampRing) -> bool {
        if self.segment.inactive.load(Ordering::SeqCst) {
            return false;
        }
        self.segment.successor.set(next.segment).is_ok()
    }

    /// Number of entries overwritten because the segment was full with no
    /// successor. Safe to read concurrently with the producer.
    pub fn overflows(&self) -> u64 {
        self.segment.overflow_count.load(Ordering::SeqCst)
    }

    /// Whether a successor has been attached.
    pub fn is_extended(&self) -> bool {
        self.segment.successor.get().is_some()
    }

    /// Whether the producer has handed off to a successor. Once set, the
    /// segment never receives another write.
    pub fn is_inactive(&self) -> bool {
        self.segment.inactive.load(Ordering::SeqCst)
    }

    /// Handle to the successor segment, if one was attached.
    pub fn successor(&self) -> Option<PstampRing> {
        self.segment.successor.get().map(|segment| PstampRing {
            segment: Arc::clone(segment),
        })
    }

    pub fn capacity(&self) -> usize {
        self.segment.capacity
    }

    /// Number of resident entries, at most `capacity`.
    pub fn len(&self) -> usize {
        self.segment.window().1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `self` and `other` address the same segment.
    pub fn same_segment(&self, other: &PstampRing) -> bool {
        Arc::ptr_eq(&self.segment, &other.segment)
    }

    /// Iterate resident entries oldest to newest: everything after the last
    /// overwritten slot, up to the write cursor, at most `capacity` entries.
    ///
    /// Precondition: the segment is inactive or its producer has stopped
    /// writing for the duration of the walk. Enumerating under active
    /// writes can observe torn entries; writes are deliberately left
    /// synchronization-free.
    pub fn entries(&self) -> Entries<'_> {
        let (index, remaining) = self.segment.window();
        Entries {
            segment: &self.segment,
            index,
            remaining,
        }
    }

    /// Visit resident entries oldest to newest. Same precondition as
    /// [`entries`](PstampRing::entries).
    pub fn enumerate<F>(&self, mut visit: F)
    where
        F: FnMut(&LoggedPstamp),
    {
        for entry in self.entries() {
            visit(&entry);
        }
    }

    /// Visit this segment's entries, then each successor's, in chain order.
    /// The precondition of [`entries`](PstampRing::entries) applies to
    /// every segment in the chain.
    pub fn enumerate_chain<F>(&self, mut visit: F)
    where
        F: FnMut(&LoggedPstamp),
    {
        for entry in self.chain_entries() {
            visit(&entry);
        }
    }

    fn chain_entries(&self) -> ChainEntries {
        ChainEntries::new(Arc::clone(&self.segment))
    }
}

/// Lazy oldest-to-newest walk over one segment's resident entries.
pub struct Entries<'a> {
    segment: &'a RingSegment,
    index: usize,
    remaining: usize,
}

impl Iterator for Entries<'_> {
    type Item = LoggedPstamp;

    fn next(&mut self) -> Option<LoggedPstamp> {
        if self.remaining == 0 {
            return None;
        }
        let entry = self.segment.read(self.index);
        self.index = wrap(self.index + 1, self.segment.capacity);
        self.remaining -= 1;
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Entries<'_> {}

struct ChainEntries {
    segment: Option<Arc<RingSegment>>,
    index: usize,
    remaining: usize,
}

impl ChainEntries {
    fn new(segment: Arc<RingSegment>) -> Self {
        let (index, remaining) = segment.window();
        ChainEntries {
            segment: Some(segment),
            index,
            remaining,
        }
    }
}

impl Iterator for ChainEntries {
    type Item = LoggedPstamp;

    fn next(&mut self) -> Option<LoggedPstamp> {
        loop {
            let segment = self.segment.as_ref()?;
            if self.remaining > 0 {
                let entry = segment.read(self.index);
                self.index = wrap(self.index + 1, segment.capacity);
                self.remaining -= 1;
                return Some(entry);
            }
            let next = segment.successor.get().cloned();
            if let Some(next) = &next {
                let (index, remaining) = next.window();
                self.index = index;
                self.remaining = remaining;
            }
            self.segment = next;
        }
    }
}

/// Merge entries from several rings into one stream ordered by capture
/// cycles.
///
/// Each ring contributes its full chain, oldest to newest. Entries are
/// ordered by `cycles`; ties go to the smaller `logical_processor`, then to
/// the earlier position in `rings`. Cross-ring ordering is meaningful when
/// all rings were written on one machine with an invariant TSC. Every ring
/// in the slice must satisfy the enumeration precondition.
pub fn merge<F>(rings: &[PstampRing], mut visit: F)
where
    F: FnMut(&LoggedPstamp),
{
    let mut cursors: SmallVec<[ChainEntries; 8]> =
        rings.iter().map(|ring| ring.chain_entries()).collect();
    let mut heads: SmallVec<[Option<LoggedPstamp>; 8]> =
        cursors.iter_mut().map(|cursor| cursor.next()).collect();
    loop {
        let mut best: Option<(usize, (u64, u32))> = None;
        for (ring_index, head) in heads.iter().enumerate() {
            if let Some(entry) = head {
                let key = (entry.pstamp.cycles, entry.pstamp.logical_processor);
                match best {
                    Some((_, best_key)) if best_key <= key => {}
                    _ => best = Some((ring_index, key)),
                }
            }
        }
        let Some((ring_index, _)) = best else { return };
        if let Some(entry) = heads[ring_index].take() {
            visit(&entry);
        }
        heads[ring_index] = cursors[ring_index].next();
    }
}
