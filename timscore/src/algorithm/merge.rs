use crate::data::peak::{PeakArena, PeakChain, TofPeak};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Decides whether two peak positions describe the same physical peak.
///
/// The predicate is evaluated pairwise while merging and is not assumed to be
/// transitive: a run A~B, B~C with A outside of C still folds A+B first and
/// then tests that sum against C.
pub trait PeakTolerance: Send + Sync {
    fn within(&self, experimental: f64, reference: f64) -> bool;
}

impl<F> PeakTolerance for F
where
    F: Fn(f64, f64) -> bool + Send + Sync,
{
    fn within(&self, experimental: f64, reference: f64) -> bool {
        self(experimental, reference)
    }
}

/// Relative (ppm) or absolute (Dalton) peak matching window.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Tolerance {
    Ppm(f64),
    Da(f64),
}

impl Default for Tolerance {
    fn default() -> Self {
        Tolerance::Ppm(10.0)
    }
}

impl PeakTolerance for Tolerance {
    fn within(&self, experimental: f64, reference: f64) -> bool {
        match *self {
            Tolerance::Ppm(ppm) => {
                if reference == 0.0 {
                    return experimental == 0.0;
                }
                (experimental - reference).abs() / reference.abs() * 1e6 <= ppm
            }
            Tolerance::Da(da) => (experimental - reference).abs() <= da,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum MergeError {
    #[error("invalid merge input: {0}")]
    InvalidArgument(String),
    #[error("disagreement in peak count: {input} input peaks, {consolidated} consolidated, {output} in the merged chain")]
    CountMismatch {
        input: usize,
        consolidated: usize,
        output: usize,
    },
}

/// Output of a chain level merge.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MergedChain {
    pub chain: PeakChain,
    pub consolidated: usize,
}

/// Output of an array level merge, positions are non-decreasing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergedPeaks {
    pub positions: Vec<f64>,
    pub intensities: Vec<u64>,
    pub consolidated: usize,
}

impl MergedPeaks {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Merges two position sorted chains into one.
///
/// Heads within tolerance are consolidated left-chain-first: the left head
/// absorbs the following left peaks that are within tolerance of the running
/// sum, then the right head. The sum stays at the front of the left input so
/// it is tested again against the next right head. Once either input runs
/// dry the other is spliced on by reference.
fn merge_pair<T>(
    arena: &mut PeakArena,
    mut left: PeakChain,
    mut right: PeakChain,
    tolerance: &T,
) -> (PeakChain, usize)
where
    T: PeakTolerance + ?Sized,
{
    let mut merged = PeakChain::default();
    let mut consolidated = 0;

    let mut left_head = arena.pop_front(&mut left);
    let mut right_head = arena.pop_front(&mut right);

    loop {
        match (left_head, right_head) {
            (Some(l), Some(r)) => {
                let left_peak = *arena.peak(l);
                let right_peak = *arena.peak(r);

                if tolerance.within(left_peak.position, right_peak.position) {
                    let mut sum: TofPeak = left_peak;
                    while let Some(next) = left.head() {
                        let next_peak = *arena.peak(next);
                        if !tolerance.within(sum.position, next_peak.position) {
                            break;
                        }
                        sum = sum + next_peak;
                        arena.pop_front(&mut left);
                        consolidated += 1;
                    }
                    sum = sum + right_peak;
                    consolidated += 1;

                    arena.set_peak(l, sum);
                    right_head = arena.pop_front(&mut right);
                } else if left_peak.position < right_peak.position {
                    arena.link_back(&mut merged, l);
                    left_head = arena.pop_front(&mut left);
                } else {
                    arena.link_back(&mut merged, r);
                    right_head = arena.pop_front(&mut right);
                }
            }
            (Some(l), None) => {
                arena.link_back(&mut merged, l);
                arena.append_chain(&mut merged, left);
                break;
            }
            (None, Some(r)) => {
                arena.link_back(&mut merged, r);
                arena.append_chain(&mut merged, right);
                break;
            }
            (None, None) => break,
        }
    }

    (merged, consolidated)
}

fn merge_range<T>(arena: &mut PeakArena, chains: &[PeakChain], tolerance: &T) -> (PeakChain, usize)
where
    T: PeakTolerance + ?Sized,
{
    match chains.len() {
        0 => (PeakChain::default(), 0),
        1 => (chains[0], 0),
        n => {
            let mid = n / 2;
            let (left, left_count) = merge_range(arena, &chains[..mid], tolerance);
            let (right, right_count) = merge_range(arena, &chains[mid..], tolerance);
            let (merged, count) = merge_pair(arena, left, right, tolerance);
            (merged, left_count + right_count + count)
        }
    }
}

/// Divide and conquer k-way merge of position sorted chains living in `arena`.
///
/// Empty chains are skipped. No chains at all yields an empty chain and zero
/// consolidations. The result always satisfies
/// `chain.len() == total_input_peaks - consolidated`.
pub fn merge_chains<T>(
    arena: &mut PeakArena,
    chains: &[PeakChain],
    tolerance: &T,
) -> Result<MergedChain, MergeError>
where
    T: PeakTolerance + ?Sized,
{
    let chains: Vec<PeakChain> = chains.iter().copied().filter(|c| !c.is_empty()).collect();
    let input: usize = chains.iter().map(|c| c.len()).sum();

    let (chain, consolidated) = merge_range(arena, &chains, tolerance);

    if chain.len() + consolidated != input {
        return Err(MergeError::CountMismatch {
            input,
            consolidated,
            output: chain.len(),
        });
    }

    Ok(MergedChain {
        chain,
        consolidated,
    })
}

/// Merges N pairs of (position, intensity) arrays into one sorted peak list.
///
/// # Arguments
///
/// * `positions` - one position sorted array per input run
/// * `intensities` - the matching intensity arrays
/// * `tolerance` - peak equivalence predicate
///
/// # Errors
///
/// `MergeError::InvalidArgument` when the number of position and intensity
/// arrays differ, or when any pair differs in length. Nothing is merged then.
///
/// # Example
///
/// ```rust
/// # use timscore::algorithm::merge::{merge_peak_arrays, Tolerance};
/// let merged = merge_peak_arrays(
///     &[vec![100.0, 100.1], vec![100.05]],
///     &[vec![10u32, 5], vec![8u32]],
///     &Tolerance::Da(0.2),
/// ).unwrap();
/// assert_eq!(merged.intensities, vec![23]);
/// assert_eq!(merged.consolidated, 2);
/// ```
pub fn merge_peak_arrays<P, I, V, T>(
    positions: &[P],
    intensities: &[I],
    tolerance: &T,
) -> Result<MergedPeaks, MergeError>
where
    P: AsRef<[f64]>,
    I: AsRef<[V]>,
    V: Copy + Into<u64>,
    T: PeakTolerance + ?Sized,
{
    if positions.len() != intensities.len() {
        return Err(MergeError::InvalidArgument(format!(
            "{} position arrays but {} intensity arrays",
            positions.len(),
            intensities.len()
        )));
    }

    let mut total = 0;
    for (i, (p, v)) in positions.iter().zip(intensities).enumerate() {
        let (p, v) = (p.as_ref(), v.as_ref());
        if p.len() != v.len() {
            return Err(MergeError::InvalidArgument(format!(
                "run {}: {} positions but {} intensities",
                i,
                p.len(),
                v.len()
            )));
        }
        total += p.len();
    }

    if total == 0 {
        return Ok(MergedPeaks::default());
    }

    let mut arena = PeakArena::with_capacity(total);
    let chains: Vec<PeakChain> = positions
        .iter()
        .zip(intensities)
        .filter(|(p, _)| !p.as_ref().is_empty())
        .map(|(p, v)| {
            arena.chain_from_peaks(
                p.as_ref()
                    .iter()
                    .zip(v.as_ref())
                    .map(|(&pos, &int)| TofPeak::new(pos, int.into())),
            )
        })
        .collect();

    let merged = merge_chains(&mut arena, &chains, tolerance)?;
    let (positions, intensities) = arena.to_vecs(&merged.chain);

    Ok(MergedPeaks {
        positions,
        intensities,
        consolidated: merged.consolidated,
    })
}
