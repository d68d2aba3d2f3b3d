use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::ops::Add;

/// A calibrated centroid: a physical position (m/z) and a raw ion count.
///
/// Peaks are ordered by position only. Whether two peaks describe the same
/// physical signal is decided by a tolerance at merge time, never by `==`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TofPeak {
    pub position: f64,
    pub intensity: u64,
}

impl TofPeak {
    pub fn new(position: f64, intensity: u64) -> Self {
        TofPeak { position, intensity }
    }

    /// Total order on position, NaN sorts last.
    pub fn cmp_position(&self, other: &TofPeak) -> Ordering {
        self.position.total_cmp(&other.position)
    }
}

impl Add for TofPeak {
    type Output = TofPeak;

    /// Consolidates two peaks: intensities are summed, the position is the midpoint.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use timscore::data::peak::TofPeak;
    /// let sum = TofPeak::new(100.0, 10) + TofPeak::new(100.1, 5);
    /// assert!((sum.position - 100.05).abs() < 1e-9);
    /// assert_eq!(sum.intensity, 15);
    /// ```
    fn add(self, other: TofPeak) -> TofPeak {
        TofPeak {
            position: (self.position + other.position) / 2.0,
            intensity: self.intensity + other.intensity,
        }
    }
}

/// Handle to a forward-linked run of peaks living inside a [`PeakArena`].
///
/// The handle is `Copy`; it only records where the run starts and ends, the
/// links themselves are owned by the arena.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PeakChain {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl PeakChain {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn head(&self) -> Option<usize> {
        self.head
    }
}

/// Index arena backing any number of [`PeakChain`]s.
///
/// Nodes are never freed individually; a merge that consolidates two nodes
/// simply stops linking one of them. Dropping the arena releases everything.
#[derive(Clone, Debug, Default)]
pub struct PeakArena {
    peaks: Vec<TofPeak>,
    next: Vec<Option<usize>>,
}

impl PeakArena {
    pub fn new() -> Self {
        PeakArena::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        PeakArena {
            peaks: Vec::with_capacity(capacity),
            next: Vec::with_capacity(capacity),
        }
    }

    /// number of allocated nodes, linked or not
    pub fn capacity_used(&self) -> usize {
        self.peaks.len()
    }

    pub fn peak(&self, node: usize) -> &TofPeak {
        &self.peaks[node]
    }

    pub fn set_peak(&mut self, node: usize, peak: TofPeak) {
        self.peaks[node] = peak;
    }

    fn alloc(&mut self, peak: TofPeak) -> usize {
        self.peaks.push(peak);
        self.next.push(None);
        self.peaks.len() - 1
    }

    /// Builds a new chain from peaks given in position order.
    pub fn chain_from_peaks<I>(&mut self, peaks: I) -> PeakChain
    where
        I: IntoIterator<Item = TofPeak>,
    {
        let mut chain = PeakChain::default();
        for peak in peaks {
            self.push_back(&mut chain, peak);
        }
        chain
    }

    /// Allocates a node for `peak` and appends it to `chain`.
    pub fn push_back(&mut self, chain: &mut PeakChain, peak: TofPeak) {
        let node = self.alloc(peak);
        self.link_back(chain, node);
    }

    /// Appends an already allocated node to `chain` by reference.
    ///
    /// Any link the node carried from a previous chain is cut.
    pub fn link_back(&mut self, chain: &mut PeakChain, node: usize) {
        self.next[node] = None;
        match chain.tail {
            Some(tail) => self.next[tail] = Some(node),
            None => chain.head = Some(node),
        }
        chain.tail = Some(node);
        chain.len += 1;
    }

    /// Splices all of `other` onto the end of `chain` in O(1).
    pub fn append_chain(&mut self, chain: &mut PeakChain, other: PeakChain) {
        if other.is_empty() {
            return;
        }
        match chain.tail {
            Some(tail) => {
                self.next[tail] = other.head;
                chain.tail = other.tail;
                chain.len += other.len;
            }
            None => *chain = other,
        }
    }

    /// Detaches the head node of `chain` and returns its index.
    ///
    /// The returned node still links into the remainder until it is re-linked
    /// with [`PeakArena::link_back`].
    pub fn pop_front(&self, chain: &mut PeakChain) -> Option<usize> {
        let head = chain.head?;
        chain.head = self.next[head];
        chain.len -= 1;
        if chain.head.is_none() {
            chain.tail = None;
        }
        Some(head)
    }

    pub fn iter<'a>(&'a self, chain: &PeakChain) -> ChainIter<'a> {
        ChainIter {
            arena: self,
            node: chain.head,
            remaining: chain.len,
        }
    }

    /// Copies a chain out into parallel position / intensity vectors.
    pub fn to_vecs(&self, chain: &PeakChain) -> (Vec<f64>, Vec<u64>) {
        let mut positions = Vec::with_capacity(chain.len);
        let mut intensities = Vec::with_capacity(chain.len);
        for peak in self.iter(chain) {
            positions.push(peak.position);
            intensities.push(peak.intensity);
        }
        (positions, intensities)
    }
}

pub struct ChainIter<'a> {
    arena: &'a PeakArena,
    node: Option<usize>,
    remaining: usize,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = &'a TofPeak;

    fn next(&mut self) -> Option<Self::Item> {
        // the tail node of a spliced run may still link onward, the length bounds the walk
        if self.remaining == 0 {
            return None;
        }
        let node = self.node?;
        self.node = self.arena.next[node];
        self.remaining -= 1;
        Some(&self.arena.peaks[node])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_of(arena: &mut PeakArena, peaks: &[(f64, u64)]) -> PeakChain {
        arena.chain_from_peaks(peaks.iter().map(|&(p, i)| TofPeak::new(p, i)))
    }

    #[test]
    fn test_add_is_midpoint_and_sum() {
        let sum = TofPeak::new(200.0, 3) + TofPeak::new(200.2, 7);
        assert!((sum.position - 200.1).abs() < 1e-9);
        assert_eq!(sum.intensity, 10);
    }

    #[test]
    fn test_push_and_iterate() {
        let mut arena = PeakArena::new();
        let chain = chain_of(&mut arena, &[(1.0, 1), (2.0, 2), (3.0, 3)]);
        assert_eq!(chain.len(), 3);
        let (pos, int) = arena.to_vecs(&chain);
        assert_eq!(pos, vec![1.0, 2.0, 3.0]);
        assert_eq!(int, vec![1, 2, 3]);
    }

    #[test]
    fn test_append_chain_splices_tail() {
        let mut arena = PeakArena::new();
        let mut a = chain_of(&mut arena, &[(1.0, 1)]);
        let b = chain_of(&mut arena, &[(2.0, 2), (3.0, 3)]);
        let used = arena.capacity_used();

        arena.append_chain(&mut a, b);

        // splicing allocates nothing
        assert_eq!(arena.capacity_used(), used);
        assert_eq!(a.len(), 3);
        assert_eq!(arena.to_vecs(&a).0, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_append_onto_empty_and_empty_onto_chain() {
        let mut arena = PeakArena::new();
        let mut empty = PeakChain::default();
        let b = chain_of(&mut arena, &[(5.0, 1)]);
        arena.append_chain(&mut empty, b);
        assert_eq!(empty, b);

        let mut c = b;
        arena.append_chain(&mut c, PeakChain::default());
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_pop_front_then_relink() {
        let mut arena = PeakArena::new();
        let mut src = chain_of(&mut arena, &[(1.0, 1), (2.0, 2)]);
        let mut dst = PeakChain::default();

        let first = arena.pop_front(&mut src).unwrap();
        arena.link_back(&mut dst, first);

        assert_eq!(src.len(), 1);
        assert_eq!(dst.len(), 1);
        assert_eq!(arena.to_vecs(&dst).0, vec![1.0]);
        assert_eq!(arena.to_vecs(&src).0, vec![2.0]);

        arena.pop_front(&mut src);
        assert!(src.is_empty());
        assert!(arena.pop_front(&mut src).is_none());
    }
}
