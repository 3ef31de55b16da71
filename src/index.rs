//! Sparse ordered key→value table with interpolated lookup.
//!
//! Entries are kept in a sorted vector; lookups binary search for the
//! neighbouring entries and hand them to an [`Interpolation`] policy.

use std::marker::PhantomData;

use crate::timestamp::Timestamp;

/// Boundary signal from [`SparseIndex::get`]. Expected control flow, not a
/// failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OutOfRange {
    #[error("key precedes the first index entry")]
    Low,
    #[error("key follows the last index entry")]
    High,
}

/// Numeric view of a key or value for proportional interpolation.
pub trait Axis: Copy + Ord {
    fn to_i128(self) -> i128;
    fn from_i128(value: i128) -> Self;
}

impl Axis for u64 {
    fn to_i128(self) -> i128 {
        i128::from(self)
    }

    fn from_i128(value: i128) -> Self {
        value.clamp(0, i128::from(u64::MAX)) as u64
    }
}

impl Axis for i64 {
    fn to_i128(self) -> i128 {
        i128::from(self)
    }

    fn from_i128(value: i128) -> Self {
        value.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }
}

impl Axis for Timestamp {
    fn to_i128(self) -> i128 {
        i128::from(self.as_micros())
    }

    fn from_i128(value: i128) -> Self {
        Timestamp::from_micros(i64::from_i128(value))
    }
}

pub trait Interpolation<K, V> {
    /// Value for `key`, strictly between `lo.0` and `hi.0`.
    fn interpolate(lo: (K, V), hi: (K, V), key: K) -> V;
}

/// Proportional interpolation along the key axis, rounded to nearest.
#[derive(Debug, Clone, Copy, Default)]
pub struct Linear;

impl<K: Axis, V: Axis> Interpolation<K, V> for Linear {
    fn interpolate(lo: (K, V), hi: (K, V), key: K) -> V {
        let (klo, khi, k) = (lo.0.to_i128(), hi.0.to_i128(), key.to_i128());
        let (vlo, vhi) = (lo.1.to_i128(), hi.1.to_i128());
        let span = khi - klo;
        if span == 0 {
            return lo.1;
        }
        // Products past i128 fall back to the lower neighbour.
        let Some(num) = (vhi - vlo).checked_mul(k - klo) else {
            return lo.1;
        };
        // Round half away from zero.
        let step = if (num >= 0) == (span > 0) {
            (num.abs() + span.abs() / 2) / span.abs()
        } else {
            -((num.abs() + span.abs() / 2) / span.abs())
        };
        V::from_i128(vlo + step)
    }
}

/// Step function: the lower neighbour's value, never interpolated.
#[derive(Debug, Clone, Copy, Default)]
pub struct HoldLast;

impl<K, V> Interpolation<K, V> for HoldLast {
    fn interpolate(lo: (K, V), _hi: (K, V), _key: K) -> V {
        lo.1
    }
}

#[derive(Debug, Clone)]
pub struct SparseIndex<K, V, I> {
    entries: Vec<(K, V)>,
    _policy: PhantomData<I>,
}

impl<K, V, I> Default for SparseIndex<K, V, I> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            _policy: PhantomData,
        }
    }
}

impl<K: Copy + Ord, V: Copy, I: Interpolation<K, V>> SparseIndex<K, V, I> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces. Appending in increasing key order is O(1).
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if self.entries.last().map_or(true, |(last, _)| *last < key) {
            self.entries.push((key, value));
            return None;
        }
        match self.entries.binary_search_by(|(k, _)| k.cmp(&key)) {
            Ok(pos) => Some(std::mem::replace(&mut self.entries[pos].1, value)),
            Err(pos) => {
                self.entries.insert(pos, (key, value));
                None
            }
        }
    }

    pub fn get(&self, key: K) -> Result<V, OutOfRange> {
        let upper = self.entries.partition_point(|(k, _)| *k <= key);
        if upper == 0 {
            return Err(OutOfRange::Low);
        }
        let lo = self.entries[upper - 1];
        if lo.0 == key {
            return Ok(lo.1);
        }
        match self.entries.get(upper) {
            Some(&hi) => Ok(I::interpolate(lo, hi, key)),
            None => Err(OutOfRange::High),
        }
    }

    pub fn contains_key(&self, key: K) -> bool {
        self.entries
            .binary_search_by(|(k, _)| k.cmp(&key))
            .is_ok()
    }

    pub fn first(&self) -> Option<(K, V)> {
        self.entries.first().copied()
    }

    pub fn last(&self) -> Option<(K, V)> {
        self.entries.last().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, V)> + '_ {
        self.entries.iter().copied()
    }
}

/// Time → byte offset, linear between keyframes.
pub type OffsetIndex = SparseIndex<Timestamp, u64, Linear>;

/// Byte offset → absolute time anchor in force there.
pub type AnchorIndex = SparseIndex<u64, Timestamp, HoldLast>;
