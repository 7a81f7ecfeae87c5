//! Interval index over ordered keys
//!
//! [`RangeIndex`] stores closed intervals `[lower, upper]` with an attached
//! value and answers stabbing and range queries. It is kept as a sorted map of
//! breakpoints: every interval endpoint owns a [`Segment`] holding the values
//! whose interval covers the breakpoint and continues past it (`continuing`),
//! and the values whose interval ends exactly at it (`closing`). The number of
//! intervals containing a breakpoint is `continuing.len() + closing.len()`.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound::{Excluded, Included, Unbounded};

/// Values attached to one breakpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment<V: Ord> {
    /// Values whose interval covers this breakpoint and extends past it
    pub continuing: BTreeSet<V>,
    /// Values whose interval ends at this breakpoint
    pub closing: BTreeSet<V>,
}

impl<V: Ord + Clone> Segment<V> {
    fn new(continuing: BTreeSet<V>) -> Self {
        Self {
            continuing,
            closing: BTreeSet::new(),
        }
    }

    /// Number of intervals containing the breakpoint
    pub fn overlap(&self) -> usize {
        self.continuing.len() + self.closing.len()
    }

    /// Union of continuing and closing values
    pub fn values(&self) -> BTreeSet<V> {
        self.continuing.union(&self.closing).cloned().collect()
    }
}

/// Interval index keyed by breakpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeIndex<K: Ord, V: Ord> {
    segments: BTreeMap<K, Segment<V>>,
}

impl<K: Ord, V: Ord> Default for RangeIndex<K, V> {
    fn default() -> Self {
        Self {
            segments: BTreeMap::new(),
        }
    }
}

impl<K, V> RangeIndex<K, V>
where
    K: Ord + Clone,
    V: Ord + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Ordered breakpoint view
    pub fn segments(&self) -> &BTreeMap<K, Segment<V>> {
        &self.segments
    }

    /// Add `value` covering `[lower, upper]`
    pub fn insert(&mut self, lower: K, upper: K, value: V) {
        self.ensure_breakpoint(&lower);
        self.ensure_breakpoint(&upper);
        for (_, segment) in self.segments.range_mut((Included(&lower), Excluded(&upper))) {
            segment.continuing.insert(value.clone());
        }
        if let Some(segment) = self.segments.get_mut(&upper) {
            segment.closing.insert(value);
        }
    }

    /// Remove `value` previously inserted with the same bounds.
    ///
    /// Breakpoints left redundant are dropped, so inserting then removing an
    /// interval restores the previous state exactly.
    pub fn remove(&mut self, lower: &K, upper: &K, value: &V) -> bool {
        let mut found = false;
        for (_, segment) in self.segments.range_mut((Included(lower), Excluded(upper))) {
            found |= segment.continuing.remove(value);
        }
        if let Some(segment) = self.segments.get_mut(upper) {
            found |= segment.closing.remove(value);
        }
        self.drop_if_redundant(upper);
        self.drop_if_redundant(lower);
        found
    }

    /// Values whose interval intersects `[from, to]`
    pub fn range_query(&self, from: &K, to: &K) -> BTreeSet<V> {
        let mut out = BTreeSet::new();
        if from > to {
            return out;
        }
        if let Some((_, segment)) = self.segments.range((Unbounded, Excluded(from))).next_back() {
            out.extend(segment.continuing.iter().cloned());
        }
        for (_, segment) in self.segments.range((Included(from), Included(to))) {
            out.extend(segment.continuing.iter().cloned());
            out.extend(segment.closing.iter().cloned());
        }
        out
    }

    /// Values whose interval contains `key`
    pub fn stab(&self, key: &K) -> BTreeSet<V> {
        self.range_query(key, key)
    }

    /// Every value in the index
    pub fn all(&self) -> BTreeSet<V> {
        let mut out = BTreeSet::new();
        for segment in self.segments.values() {
            out.extend(segment.continuing.iter().cloned());
            out.extend(segment.closing.iter().cloned());
        }
        out
    }

    fn ensure_breakpoint(&mut self, key: &K) {
        if self.segments.contains_key(key) {
            return;
        }
        let continuing = self
            .segments
            .range((Unbounded, Excluded(key)))
            .next_back()
            .map(|(_, s)| s.continuing.clone())
            .unwrap_or_default();
        self.segments.insert(key.clone(), Segment::new(continuing));
    }

    /// A breakpoint is redundant when nothing closes at it and it continues
    /// exactly what its predecessor continues.
    fn drop_if_redundant(&mut self, key: &K) {
        let Some(segment) = self.segments.get(key) else {
            return;
        };
        if !segment.closing.is_empty() {
            return;
        }
        let redundant = match self.segments.range((Unbounded, Excluded(key))).next_back() {
            Some((_, previous)) => previous.continuing == segment.continuing,
            None => segment.continuing.is_empty(),
        };
        if redundant {
            self.segments.remove(key);
        }
    }
}
