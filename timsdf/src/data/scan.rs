use std::fmt::{self, Display, Formatter};

use timscore::data::spectrum::{MsOrder, MzSpectrum};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
    Unknown,
}

impl From<&str> for Polarity {
    fn from(item: &str) -> Self {
        match item {
            "+" => Polarity::Positive,
            "-" => Polarity::Negative,
            _ => Polarity::Unknown,
        }
    }
}

/// Precursor details of an MS2 scan.
#[derive(Debug, Clone, PartialEq)]
pub struct PrecursorInfo {
    pub selected_ion_mz: Option<f64>,
    pub charge: Option<i32>,
    pub intensity: Option<f64>,
    pub isolation_mz: f64,
    pub isolation_width: f64,
    pub collision_energy: f64,
    pub monoisotopic_mz: Option<f64>,
}

/// Where a scan's peaks came from.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOrigin {
    /// Sub-scans of one MS1 frame belonging to a precursor.
    Precursor { frame_id: u32, precursor_id: u32 },
    /// Every sub-scan of one frame.
    WholeFrame { frame_id: u32 },
    /// Sub-scans of every PASEF frame that fragmented a precursor.
    Pasef { frame_ids: Vec<u32>, precursor_id: u32 },
}

impl ScanOrigin {
    pub fn first_frame(&self) -> u32 {
        match self {
            ScanOrigin::Precursor { frame_id, .. } | ScanOrigin::WholeFrame { frame_id } => *frame_id,
            ScanOrigin::Pasef { frame_ids, .. } => frame_ids.first().copied().unwrap_or_default(),
        }
    }

    pub fn precursor_id(&self) -> Option<u32> {
        match self {
            ScanOrigin::Precursor { precursor_id, .. } | ScanOrigin::Pasef { precursor_id, .. } => {
                Some(*precursor_id)
            }
            ScanOrigin::WholeFrame { .. } => None,
        }
    }
}

/// A reconstructed, calibrated scan.
///
/// `scan_number` is zero until the scan builder numbers it; numbers are one based.
#[derive(Debug, Clone, PartialEq)]
pub struct TimsDataScan {
    pub scan_number: u32,
    pub ms_order: MsOrder,
    pub spectrum: MzSpectrum,
    pub parent_scan_number: Option<u32>,
    pub origin: ScanOrigin,
    pub scan_start: u32,
    pub scan_end: u32,
    pub polarity: Polarity,
    /// minutes
    pub retention_time: f64,
    /// milliseconds
    pub injection_time: f64,
    pub total_ion_current: f64,
    pub median_one_over_k0: f64,
    pub precursor: Option<PrecursorInfo>,
}

impl TimsDataScan {
    pub fn frame_id(&self) -> u32 {
        self.origin.first_frame()
    }

    pub fn precursor_id(&self) -> Option<u32> {
        self.origin.precursor_id()
    }

    pub fn native_id(&self) -> String {
        match &self.origin {
            ScanOrigin::Precursor {
                frame_id,
                precursor_id,
            } => format!(
                "frame={};scans={}-{};precursor={}",
                frame_id, self.scan_start, self.scan_end, precursor_id
            ),
            ScanOrigin::WholeFrame { frame_id } => {
                format!("frame={};scans={}-{}", frame_id, self.scan_start, self.scan_end)
            }
            ScanOrigin::Pasef {
                frame_ids,
                precursor_id,
            } => format!(
                "frames={}-{};scans={}-{};precursor={}",
                frame_ids.first().copied().unwrap_or_default(),
                frame_ids.last().copied().unwrap_or_default(),
                self.scan_start,
                self.scan_end,
                precursor_id
            ),
        }
    }
}

impl Display for TimsDataScan {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TimsDataScan(#{}, {}, {}, rt: {:.3}, {})",
            self.scan_number,
            self.ms_order,
            self.native_id(),
            self.retention_time,
            self.spectrum
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(origin: ScanOrigin) -> TimsDataScan {
        TimsDataScan {
            scan_number: 0,
            ms_order: MsOrder::Ms1,
            spectrum: MzSpectrum::default(),
            parent_scan_number: None,
            origin,
            scan_start: 3,
            scan_end: 9,
            polarity: Polarity::from("+"),
            retention_time: 1.0,
            injection_time: 100.0,
            total_ion_current: 0.0,
            median_one_over_k0: 1.0,
            precursor: None,
        }
    }

    #[test]
    fn test_native_ids() {
        let s = scan(ScanOrigin::Precursor {
            frame_id: 4,
            precursor_id: 12,
        });
        assert_eq!(s.native_id(), "frame=4;scans=3-9;precursor=12");
        assert_eq!(s.precursor_id(), Some(12));

        let s = scan(ScanOrigin::WholeFrame { frame_id: 4 });
        assert_eq!(s.native_id(), "frame=4;scans=3-9");
        assert_eq!(s.precursor_id(), None);

        let s = scan(ScanOrigin::Pasef {
            frame_ids: vec![5, 6, 8],
            precursor_id: 12,
        });
        assert_eq!(s.native_id(), "frames=5-8;scans=3-9;precursor=12");
        assert_eq!(s.frame_id(), 5);
    }

    #[test]
    fn test_polarity() {
        assert_eq!(Polarity::from("-"), Polarity::Negative);
        assert_eq!(Polarity::from("?"), Polarity::Unknown);
    }
}
