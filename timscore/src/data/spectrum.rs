use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// MS order of a reconstructed scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MsOrder {
    Ms1,
    Ms2,
}

impl MsOrder {
    pub fn level(&self) -> u8 {
        match self {
            MsOrder::Ms1 => 1,
            MsOrder::Ms2 => 2,
        }
    }
}

impl Display for MsOrder {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "MS{}", self.level())
    }
}

/// Represents a mass spectrum with associated m/z values and intensities.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MzSpectrum {
    pub mz: Vec<f64>,
    pub intensity: Vec<f64>,
}

impl MzSpectrum {
    /// Constructs a new `MzSpectrum`.
    ///
    /// # Arguments
    ///
    /// * `mz` - A vector of m/z values, sorted ascending.
    /// * `intensity` - A vector of intensity values corresponding to the m/z values.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use timscore::data::spectrum::MzSpectrum;
    /// let spectrum = MzSpectrum::new(vec![100.0, 200.0], vec![10.0, 20.0]);
    /// assert_eq!(spectrum.mz, vec![100.0, 200.0]);
    /// assert_eq!(spectrum.intensity, vec![10.0, 20.0]);
    /// ```
    pub fn new(mz: Vec<f64>, intensity: Vec<f64>) -> Self {
        assert_eq!(
            mz.len(),
            intensity.len(),
            "mz and intensity vectors must have the same length"
        );
        MzSpectrum { mz, intensity }
    }

    /// Builds a spectrum from merged peak positions and integer ion counts.
    pub fn from_peaks(positions: Vec<f64>, intensities: &[u64]) -> Self {
        let intensity = intensities.iter().map(|&i| i as f64).collect();
        MzSpectrum::new(positions, intensity)
    }

    pub fn len(&self) -> usize {
        self.mz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mz.is_empty()
    }

    pub fn total_ion_current(&self) -> f64 {
        self.intensity.iter().sum()
    }
}

impl Display for MzSpectrum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MzSpectrum(peaks: {}, tic: {:.1})",
            self.len(),
            self.total_ion_current()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_peaks_and_tic() {
        let spectrum = MzSpectrum::from_peaks(vec![100.0, 101.0], &[3, 4]);
        assert_eq!(spectrum.intensity, vec![3.0, 4.0]);
        assert!((spectrum.total_ion_current() - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_spectrum() {
        let spectrum = MzSpectrum::default();
        assert!(spectrum.is_empty());
        assert_eq!(spectrum.total_ion_current(), 0.0);
    }

    #[test]
    fn test_ms_order_display() {
        assert_eq!(MsOrder::Ms2.to_string(), "MS2");
        assert_eq!(MsOrder::Ms1.level(), 1);
    }
}
