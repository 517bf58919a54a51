//! Ordered event store
//!
//! A Vec kept sorted ascending by earliest execution time.
//! Lookup is a lower-bound binary search; removal is by identity and O(n),
//! which is fine for the tens of live events a clock normally holds.

/// An entry that can live in an [`OrderedStore`].
pub trait Timed {
    /// Sort key: earliest time the entry may execute.
    fn earliest_time(&self) -> f64;

    /// Identity comparison. Two entries with identical timing fields are
    /// still distinct unless this returns true.
    fn same_entry(&self, other: &Self) -> bool;
}

/// Entries sorted by `earliest_time`, ties in lower-bound insertion order.
#[derive(Debug)]
pub struct OrderedStore<E> {
    entries: Vec<E>,
}

impl<E> Default for OrderedStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> OrderedStore<E> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.entries.iter()
    }

    pub fn first(&self) -> Option<&E> {
        self.entries.first()
    }

    /// Drop every entry, returning them in order.
    pub fn take_all(&mut self) -> Vec<E> {
        std::mem::take(&mut self.entries)
    }
}

impl<E: Timed> OrderedStore<E> {
    /// Index of the first entry whose earliest time is `>= t`.
    pub fn index_by_time(&self, t: f64) -> usize {
        let mut lo = 0;
        let mut hi = self.entries.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.entries[mid].earliest_time() < t {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Insert at the lower bound of the entry's earliest time.
    /// An entry equal to existing ones lands in front of them.
    pub fn insert(&mut self, entry: E) {
        let idx = self.index_by_time(entry.earliest_time());
        self.entries.insert(idx, entry);
    }

    /// Remove `entry` by identity. Returns false if it was not stored.
    pub fn remove(&mut self, entry: &E) -> bool {
        match self.entries.iter().position(|e| e.same_entry(entry)) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, entry: &E) -> bool {
        self.entries.iter().any(|e| e.same_entry(entry))
    }

    /// Pop every entry whose earliest time is `<= now`, in order.
    /// Entries still in the future are left untouched.
    pub fn drain_due(&mut self, now: f64) -> Vec<E> {
        let n = self.entries.partition_point(|e| e.earliest_time() <= now);
        self.entries.drain(..n).collect()
    }

    /// True if every adjacent pair is in ascending order.
    pub fn is_sorted(&self) -> bool {
        self.entries
            .windows(2)
            .all(|w| w[0].earliest_time() <= w[1].earliest_time())
    }
}
