//! Dense bit sets over the state and choice spaces.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitXor, Index, Not, Rem, Sub};

use fixedbitset::FixedBitSet;

/// A dense fixed-length bit vector with set algebra.
///
/// Bit sets index states or choices of a model. The arithmetic operators map
/// to pointwise Boolean operations (`&` intersection, `|` union, `^`
/// symmetric difference, `-` difference, `!` complement); the `%` operator is
/// *projection*, see [`BitSet::project`]. The length is fixed at
/// construction and only changed by [`BitSet::resize`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BitSet {
    data: FixedBitSet,
}

impl BitSet {
    /// Creates a bit set of the given length with all bits clear.
    pub fn new(len: usize) -> Self {
        Self {
            data: FixedBitSet::with_capacity(len),
        }
    }

    /// Creates a bit set of the given length with all bits set.
    pub fn full(len: usize) -> Self {
        let mut data = FixedBitSet::with_capacity(len);
        data.insert_range(..);
        Self { data }
    }

    /// Creates a bit set of the given length with exactly the given bits set.
    pub fn from_indices<I: IntoIterator<Item = usize>>(len: usize, indices: I) -> Self {
        let mut set = Self::new(len);
        for i in indices {
            set.insert(i);
        }
        set
    }

    /// The number of bits in this set.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the bit at `index` is set.
    pub fn get(&self, index: usize) -> bool {
        self.data.contains(index)
    }

    pub fn insert(&mut self, index: usize) {
        self.data.insert(index);
    }

    pub fn remove(&mut self, index: usize) {
        self.data.set(index, false);
    }

    pub fn set(&mut self, index: usize, value: bool) {
        self.data.set(index, value);
    }

    /// Clears all bits.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// The number of set bits.
    pub fn count(&self) -> usize {
        self.data.count_ones(..)
    }

    /// Whether no bit is set.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Whether every bit is set.
    pub fn is_full(&self) -> bool {
        self.count() == self.len()
    }

    /// Iterates over the indices of set bits in ascending order.
    pub fn ones(&self) -> fixedbitset::Ones {
        self.data.ones()
    }

    /// The index of the first set bit, if any.
    pub fn first_set(&self) -> Option<usize> {
        self.ones().next()
    }

    /// The index of the first set bit at or after `index`, if any.
    pub fn next_set_from(&self, index: usize) -> Option<usize> {
        self.ones().find(|&i| i >= index)
    }

    /// The number of set bits strictly below `index`.
    pub fn rank(&self, index: usize) -> usize {
        self.data.count_ones(..index.min(self.len()))
    }

    /// The index of the `k`-th set bit (zero-based), if there are more than
    /// `k` set bits.
    pub fn select(&self, k: usize) -> Option<usize> {
        self.ones().nth(k)
    }

    /// Grows or shrinks the set to `len` bits, filling new bits with `fill`.
    pub fn resize(&mut self, len: usize, fill: bool) {
        let old_len = self.len();
        if len > old_len {
            self.data.grow(len);
            if fill {
                self.data.insert_range(old_len..len);
            }
        } else if len < old_len {
            let mut data = FixedBitSet::with_capacity(len);
            for i in self.ones().take_while(|&i| i < len) {
                data.insert(i);
            }
            self.data = data;
        }
    }

    pub fn union_with(&mut self, other: &Self) {
        self.data.union_with(&other.data);
    }

    pub fn intersect_with(&mut self, other: &Self) {
        self.data.intersect_with(&other.data);
    }

    pub fn difference_with(&mut self, other: &Self) {
        self.data.difference_with(&other.data);
    }

    /// Flips every bit in place.
    pub fn complement(&mut self) {
        self.data.toggle_range(..);
    }

    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.data.is_subset(&other.data)
    }

    pub fn is_disjoint_from(&self, other: &Self) -> bool {
        self.data.is_disjoint(&other.data)
    }

    /// Projects this set through `mask`.
    ///
    /// The result has length `mask.count()`; its `j`-th bit is the value of
    /// `self` at the position of the `j`-th set bit of `mask`. Exposed as
    /// the `%` operator.
    pub fn project(&self, mask: &Self) -> Self {
        let mut result = Self::new(mask.count());
        for (j, i) in mask.ones().enumerate() {
            if self.get(i) {
                result.insert(j);
            }
        }
        result
    }
}

impl Index<usize> for BitSet {
    type Output = bool;

    fn index(&self, index: usize) -> &Self::Output {
        &self.data[index]
    }
}

impl fmt::Display for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for index in self.ones() {
            write!(f, " {}", index)?;
        }
        write!(f, " }}")
    }
}

impl std::iter::Extend<usize> for BitSet {
    fn extend<T: IntoIterator<Item = usize>>(&mut self, iter: T) {
        self.data.extend(iter)
    }
}

impl BitAnd for &BitSet {
    type Output = BitSet;

    fn bitand(self, rhs: &BitSet) -> BitSet {
        let mut result = self.clone();
        result.intersect_with(rhs);
        result
    }
}

impl BitOr for &BitSet {
    type Output = BitSet;

    fn bitor(self, rhs: &BitSet) -> BitSet {
        let mut result = self.clone();
        result.union_with(rhs);
        result
    }
}

impl BitXor for &BitSet {
    type Output = BitSet;

    fn bitxor(self, rhs: &BitSet) -> BitSet {
        BitSet {
            data: &self.data ^ &rhs.data,
        }
    }
}

impl Sub for &BitSet {
    type Output = BitSet;

    fn sub(self, rhs: &BitSet) -> BitSet {
        let mut result = self.clone();
        result.difference_with(rhs);
        result
    }
}

impl Not for &BitSet {
    type Output = BitSet;

    fn not(self) -> BitSet {
        let mut result = self.clone();
        result.complement();
        result
    }
}

impl Rem for &BitSet {
    type Output = BitSet;

    fn rem(self, rhs: &BitSet) -> BitSet {
        self.project(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_algebra() {
        let a = BitSet::from_indices(8, vec![0, 2, 4, 6]);
        let b = BitSet::from_indices(8, vec![4, 5, 6, 7]);

        assert_eq!(&a & &b, BitSet::from_indices(8, vec![4, 6]));
        assert_eq!(&a | &b, BitSet::from_indices(8, vec![0, 2, 4, 5, 6, 7]));
        assert_eq!(&a - &b, BitSet::from_indices(8, vec![0, 2]));
        assert_eq!(&a ^ &b, BitSet::from_indices(8, vec![0, 2, 5, 7]));
        assert_eq!(!&a, BitSet::from_indices(8, vec![1, 3, 5, 7]));
        assert_eq!(a.count(), 4);
        assert!(!a.is_full());
        assert!(BitSet::full(3).is_full());
    }

    #[test]
    fn test_iteration_and_select() {
        let a = BitSet::from_indices(100, vec![3, 17, 64, 99]);
        assert_eq!(a.ones().collect::<Vec<_>>(), vec![3, 17, 64, 99]);
        assert_eq!(a.first_set(), Some(3));
        assert_eq!(a.next_set_from(18), Some(64));
        assert_eq!(a.next_set_from(99), Some(99));
        assert_eq!(a.next_set_from(100), None);
        assert_eq!(a.rank(17), 1);
        assert_eq!(a.rank(18), 2);
        assert_eq!(a.select(0), Some(3));
        assert_eq!(a.select(3), Some(99));
        assert_eq!(a.select(4), None);
    }

    #[test]
    fn test_resize() {
        let mut a = BitSet::from_indices(4, vec![1, 3]);
        a.resize(8, true);
        assert_eq!(a, BitSet::from_indices(8, vec![1, 3, 4, 5, 6, 7]));
        a.resize(3, false);
        assert_eq!(a, BitSet::from_indices(3, vec![1]));
    }

    #[test]
    fn test_project_round_trip() {
        let b = BitSet::from_indices(10, vec![1, 4, 5, 8]);
        let a = BitSet::from_indices(10, vec![1, 5]);
        // for a ⊆ b, (a % b) % (b % b) = a % b
        let ab = &a % &b;
        let bb = &b % &b;
        assert_eq!(&ab % &bb, ab);
        assert_eq!(ab, BitSet::from_indices(4, vec![0, 2]));
    }
}
