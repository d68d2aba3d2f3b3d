use crate::data::spectrum::{MsOrder, MzSpectrum};
use itertools::Itertools;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

/// Intensity trimming applied to merged spectra before they become scans.
///
/// Trimming runs after the merge; the merge itself never drops peaks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrimConfig {
    /// Keep at most this many of the most intense peaks (default: None, keep all)
    pub top_n: Option<usize>,
    /// Drop peaks below this fraction of the base peak (default: None)
    pub min_relative_intensity: Option<f64>,
    /// Whether MS1 spectra are trimmed (default: true)
    pub apply_to_ms1: bool,
    /// Whether MS2 spectra are trimmed (default: true)
    pub apply_to_ms2: bool,
}

impl Default for TrimConfig {
    fn default() -> Self {
        TrimConfig {
            top_n: None,
            min_relative_intensity: None,
            apply_to_ms1: true,
            apply_to_ms2: true,
        }
    }
}

impl TrimConfig {
    pub fn is_active(&self) -> bool {
        self.top_n.is_some() || self.min_relative_intensity.is_some()
    }

    pub fn applies_to(&self, order: MsOrder) -> bool {
        self.is_active()
            && match order {
                MsOrder::Ms1 => self.apply_to_ms1,
                MsOrder::Ms2 => self.apply_to_ms2,
            }
    }

    /// Applies the configured trim to `spectrum` if it is enabled for `order`.
    pub fn apply(&self, spectrum: MzSpectrum, order: MsOrder) -> MzSpectrum {
        if !self.applies_to(order) {
            return spectrum;
        }

        let (mut mz, mut intensity) = (spectrum.mz, spectrum.intensity);

        if let Some(top_n) = self.top_n {
            (mz, intensity) = filter_top_n(&mz, &intensity, top_n);
        }

        if let Some(fraction) = self.min_relative_intensity {
            (mz, intensity) = filter_relative_intensity(&mz, &intensity, fraction);
        }

        MzSpectrum::new(mz, intensity)
    }
}

/// Keep the `top_n` most intense peaks.
///
/// # Arguments
/// * `mz` - m/z values
/// * `intensity` - intensity values
/// * `top_n` - maximum number of peaks to keep
///
/// # Returns
/// Tuple of (filtered_mz, filtered_intensity) sorted by m/z
pub fn filter_top_n(mz: &[f64], intensity: &[f64], top_n: usize) -> (Vec<f64>, Vec<f64>) {
    if mz.len() <= top_n {
        return (mz.to_vec(), intensity.to_vec());
    }

    let kept: Vec<usize> = (0..mz.len())
        .sorted_by_key(|&i| Reverse(OrderedFloat(intensity[i])))
        .take(top_n)
        .sorted_by_key(|&i| OrderedFloat(mz[i]))
        .collect();

    (
        kept.iter().map(|&i| mz[i]).collect(),
        kept.iter().map(|&i| intensity[i]).collect(),
    )
}

/// Drop peaks whose intensity is below `fraction` of the most intense peak.
pub fn filter_relative_intensity(
    mz: &[f64],
    intensity: &[f64],
    fraction: f64,
) -> (Vec<f64>, Vec<f64>) {
    let max = intensity.iter().copied().fold(0.0_f64, f64::max);
    let cutoff = max * fraction;
    mz.iter()
        .zip(intensity)
        .filter(|&(_, &i)| i >= cutoff)
        .map(|(&m, &i)| (m, i))
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_top_n() {
        let mz = vec![100.0, 200.0, 300.0, 400.0, 500.0];
        let intensity = vec![10.0, 50.0, 30.0, 20.0, 40.0];

        let (filtered_mz, filtered_int) = filter_top_n(&mz, &intensity, 3);

        assert_eq!(filtered_mz, vec![200.0, 300.0, 500.0]);
        assert_eq!(filtered_int, vec![50.0, 30.0, 40.0]);
    }

    #[test]
    fn test_filter_relative_intensity() {
        let (mz, int) = filter_relative_intensity(&[1.0, 2.0, 3.0], &[100.0, 4.0, 50.0], 0.05);
        assert_eq!(mz, vec![1.0, 3.0]);
        assert_eq!(int, vec![100.0, 50.0]);
    }

    #[test]
    fn test_default_trim_is_noop() {
        let spectrum = MzSpectrum::new(vec![1.0, 2.0], vec![1.0, 2.0]);
        let trimmed = TrimConfig::default().apply(spectrum.clone(), MsOrder::Ms2);
        assert_eq!(trimmed, spectrum);
    }

    #[test]
    fn test_trim_respects_ms_order() {
        let config = TrimConfig {
            top_n: Some(1),
            apply_to_ms1: false,
            ..TrimConfig::default()
        };
        let spectrum = MzSpectrum::new(vec![1.0, 2.0], vec![5.0, 9.0]);

        assert_eq!(config.apply(spectrum.clone(), MsOrder::Ms1).len(), 2);
        let trimmed = config.apply(spectrum, MsOrder::Ms2);
        assert_eq!(trimmed.mz, vec![2.0]);
    }
}
