use crate::data::raw::{BrukerTimsDataLibrary, SharedTimsLibrary};
use crate::error::CalibrationError;

/// The six frame scoped calibration transforms.
///
/// Every transform returns exactly one output per input; empty input yields
/// empty output without reaching the underlying implementation.
pub trait IndexConverter: Send + Sync {
    fn tof_to_mz(&self, frame_id: u32, tof_values: &[f64]) -> Result<Vec<f64>, CalibrationError>;
    fn mz_to_tof(&self, frame_id: u32, mz_values: &[f64]) -> Result<Vec<f64>, CalibrationError>;
    fn scan_to_inverse_mobility(
        &self,
        frame_id: u32,
        scan_values: &[f64],
    ) -> Result<Vec<f64>, CalibrationError>;
    fn inverse_mobility_to_scan(
        &self,
        frame_id: u32,
        inverse_mobility_values: &[f64],
    ) -> Result<Vec<f64>, CalibrationError>;
    fn scan_to_voltage(&self, frame_id: u32, scan_values: &[f64]) -> Result<Vec<f64>, CalibrationError>;
    fn voltage_to_scan(&self, frame_id: u32, voltage_values: &[f64]) -> Result<Vec<f64>, CalibrationError>;

    /// Convenience for raw u32 TOF indices straight out of a frame payload.
    fn tof_indices_to_mz(&self, frame_id: u32, tof: &[u32]) -> Result<Vec<f64>, CalibrationError> {
        let dbl_tofs: Vec<f64> = tof.iter().map(|&x| x as f64).collect();
        self.tof_to_mz(frame_id, &dbl_tofs)
    }
}

/// Calibration through the vendor library.
pub struct BrukerLibTimsDataConverter {
    pub bruker_lib: SharedTimsLibrary,
}

impl BrukerLibTimsDataConverter {
    pub fn new(bruker_lib: SharedTimsLibrary) -> Self {
        BrukerLibTimsDataConverter { bruker_lib }
    }

    fn call<F>(
        &self,
        function: &'static str,
        values: &[f64],
        f: F,
    ) -> Result<Vec<f64>, CalibrationError>
    where
        F: FnOnce(&BrukerTimsDataLibrary, &[f64]) -> Result<Vec<f64>, CalibrationError>,
    {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let out = self.bruker_lib.with(|lib| f(lib, values))?;
        if out.len() != values.len() {
            return Err(CalibrationError::LengthMismatch {
                function,
                expected: values.len(),
                actual: out.len(),
            });
        }
        Ok(out)
    }
}

impl IndexConverter for BrukerLibTimsDataConverter {
    /// translate tof to mz values calling the bruker library
    ///
    /// # Arguments
    ///
    /// * `frame_id` - A u32 that holds the frame id
    /// * `tof` - the tof indices as f64
    ///
    /// # Returns
    ///
    /// * `mz_values` - A vector of f64 that holds the mz values
    ///
    fn tof_to_mz(&self, frame_id: u32, tof: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        self.call("tims_index_to_mz", tof, |lib, v| lib.tims_index_to_mz(frame_id, v))
    }

    fn mz_to_tof(&self, frame_id: u32, mz: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        self.call("tims_mz_to_index", mz, |lib, v| lib.tims_mz_to_index(frame_id, v))
    }

    /// translate scan to inverse mobility values calling the bruker library
    fn scan_to_inverse_mobility(&self, frame_id: u32, scan: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        self.call("tims_scannum_to_oneoverk0", scan, |lib, v| {
            lib.tims_scan_to_inv_mob(frame_id, v)
        })
    }

    fn inverse_mobility_to_scan(&self, frame_id: u32, inv_mob: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        self.call("tims_oneoverk0_to_scannum", inv_mob, |lib, v| {
            lib.inv_mob_to_tims_scan(frame_id, v)
        })
    }

    fn scan_to_voltage(&self, frame_id: u32, scan: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        self.call("tims_scannum_to_voltage", scan, |lib, v| {
            lib.tims_scan_to_voltage(frame_id, v)
        })
    }

    fn voltage_to_scan(&self, frame_id: u32, voltage: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        self.call("tims_voltage_to_scannum", voltage, |lib, v| {
            lib.voltage_to_tims_scan(frame_id, v)
        })
    }
}

/// Linear boundary model for runs opened without the vendor library.
///
/// `sqrt(mz)` is linear in the TOF index and 1/K0 is linear in the scan number,
/// both anchored on the acquisition ranges of the global metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct SimpleIndexConverter {
    pub tof_intercept: f64,
    pub tof_slope: f64,
    pub scan_intercept: f64,
    pub scan_slope: f64,
    pub voltage_ramp: Option<(f64, f64)>,
}

impl SimpleIndexConverter {
    pub fn from_boundaries(
        mz_min: f64,
        mz_max: f64,
        tof_max_index: u32,
        im_min: f64,
        im_max: f64,
        scan_max_index: u32,
    ) -> Self {
        let tof_intercept: f64 = mz_min.sqrt();
        let tof_slope: f64 = (mz_max.sqrt() - tof_intercept) / tof_max_index.max(1) as f64;

        let scan_intercept: f64 = im_max;
        let scan_slope: f64 = (im_min - scan_intercept) / scan_max_index.max(1) as f64;
        Self {
            tof_intercept,
            tof_slope,
            scan_intercept,
            scan_slope,
            voltage_ramp: None,
        }
    }

    /// Enables the voltage transforms with a linear ramp from `start` (scan 0)
    /// to `end` (scan `scan_max_index`).
    pub fn with_voltage_ramp(mut self, start: f64, end: f64, scan_max_index: u32) -> Self {
        let slope = (end - start) / scan_max_index.max(1) as f64;
        self.voltage_ramp = Some((start, slope));
        self
    }
}

impl IndexConverter for SimpleIndexConverter {
    fn tof_to_mz(&self, _frame_id: u32, tof_values: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        Ok(tof_values
            .iter()
            .map(|&val| (self.tof_intercept + self.tof_slope * val).powi(2))
            .collect())
    }

    fn mz_to_tof(&self, _frame_id: u32, mz_values: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        Ok(mz_values
            .iter()
            .map(|&val| (val.sqrt() - self.tof_intercept) / self.tof_slope)
            .collect())
    }

    fn scan_to_inverse_mobility(&self, _frame_id: u32, scan_values: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        Ok(scan_values
            .iter()
            .map(|&val| self.scan_intercept + self.scan_slope * val)
            .collect())
    }

    fn inverse_mobility_to_scan(
        &self,
        _frame_id: u32,
        inverse_mobility_values: &[f64],
    ) -> Result<Vec<f64>, CalibrationError> {
        Ok(inverse_mobility_values
            .iter()
            .map(|&val| (val - self.scan_intercept) / self.scan_slope)
            .collect())
    }

    fn scan_to_voltage(&self, _frame_id: u32, scan_values: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        let (start, slope) = self
            .voltage_ramp
            .ok_or(CalibrationError::Unsupported("scan_to_voltage"))?;
        Ok(scan_values.iter().map(|&val| start + slope * val).collect())
    }

    fn voltage_to_scan(&self, _frame_id: u32, voltage_values: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        let (start, slope) = self
            .voltage_ramp
            .ok_or(CalibrationError::Unsupported("voltage_to_scan"))?;
        Ok(voltage_values.iter().map(|&val| (val - start) / slope).collect())
    }
}

/// Precomputed index tables taken from one representative frame.
///
/// Index to m/z differs only negligibly between frames of a run, so a table
/// built from the median frame replaces per-frame native calls.
#[derive(Clone, Debug, PartialEq)]
pub struct LookupIndexConverter {
    pub mz_lookup: Vec<f64>,
    pub im_lookup: Vec<f64>,
    pub voltage_lookup: Option<Vec<f64>>,
}

impl LookupIndexConverter {
    pub fn new(mz_lookup: Vec<f64>, im_lookup: Vec<f64>, voltage_lookup: Option<Vec<f64>>) -> Self {
        LookupIndexConverter {
            mz_lookup,
            im_lookup,
            voltage_lookup,
        }
    }

    /// Builds the tables by calling `source` once per transform for `frame_id`.
    ///
    /// # Arguments
    ///
    /// * `source` - converter to sample, usually the vendor library
    /// * `frame_id` - the representative (median) frame
    /// * `tof_max_index` - number of TOF indices, `DigitizerNumSamples`
    /// * `scan_count` - largest sub-scan count of any frame
    pub fn build(
        source: &dyn IndexConverter,
        frame_id: u32,
        tof_max_index: u32,
        scan_count: u32,
    ) -> Result<Self, CalibrationError> {
        let tofs: Vec<f64> = (0..tof_max_index).map(|i| i as f64).collect();
        let scans: Vec<f64> = (0..scan_count).map(|i| i as f64).collect();

        let mz_lookup = source.tof_to_mz(frame_id, &tofs)?;
        let im_lookup = source.scan_to_inverse_mobility(frame_id, &scans)?;
        let voltage_lookup = match source.scan_to_voltage(frame_id, &scans) {
            Ok(v) => Some(v),
            Err(CalibrationError::Unsupported(_)) => None,
            Err(e) => return Err(e),
        };

        Ok(LookupIndexConverter::new(mz_lookup, im_lookup, voltage_lookup))
    }

    /// Inverse mobility at a one-based, possibly fractional, median scan number.
    ///
    /// Fractional medians average the two neighbouring entries. Values outside
    /// the table are clamped to its ends; an empty table gives NaN.
    pub fn one_over_k0_at(&self, one_based_scan: f64) -> f64 {
        if self.im_lookup.is_empty() {
            return f64::NAN;
        }
        let last = (self.im_lookup.len() - 1) as f64;
        let index = (one_based_scan - 1.0).clamp(0.0, last);
        let (floor, ceil) = (index.floor() as usize, index.ceil() as usize);
        if floor == ceil {
            self.im_lookup[floor]
        } else {
            (self.im_lookup[floor] + self.im_lookup[ceil]) / 2.0
        }
    }
}

fn forward_lookup(table: &[f64], values: &[f64]) -> Result<Vec<f64>, CalibrationError> {
    values
        .iter()
        .map(|&value| {
            if value < 0.0 || value > table.len() as f64 - 1.0 || value.is_nan() {
                return Err(CalibrationError::IndexOutOfRange {
                    value,
                    size: table.len(),
                });
            }
            let floor = value.floor() as usize;
            let frac = value - floor as f64;
            if frac == 0.0 {
                Ok(table[floor])
            } else {
                Ok(table[floor] + (table[floor + 1] - table[floor]) * frac)
            }
        })
        .collect()
}

/// Fractional table position of `value` in a monotone table, clamped to its ends.
fn inverse_lookup(table: &[f64], values: &[f64]) -> Vec<f64> {
    if table.len() < 2 {
        return vec![0.0; values.len()];
    }
    let ascending = table[0] <= table[table.len() - 1];
    values
        .iter()
        .map(|&value| {
            let upper = if ascending {
                table.partition_point(|&t| t < value)
            } else {
                table.partition_point(|&t| t > value)
            };
            if upper == 0 {
                return 0.0;
            }
            if upper >= table.len() {
                return (table.len() - 1) as f64;
            }
            let (lo, hi) = (table[upper - 1], table[upper]);
            let span = hi - lo;
            if span == 0.0 {
                upper as f64
            } else {
                (upper - 1) as f64 + (value - lo) / span
            }
        })
        .collect()
}

impl IndexConverter for LookupIndexConverter {
    fn tof_to_mz(&self, _frame_id: u32, tof_values: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        forward_lookup(&self.mz_lookup, tof_values)
    }

    fn mz_to_tof(&self, _frame_id: u32, mz_values: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        Ok(inverse_lookup(&self.mz_lookup, mz_values))
    }

    fn scan_to_inverse_mobility(&self, _frame_id: u32, scan_values: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        forward_lookup(&self.im_lookup, scan_values)
    }

    fn inverse_mobility_to_scan(
        &self,
        _frame_id: u32,
        inverse_mobility_values: &[f64],
    ) -> Result<Vec<f64>, CalibrationError> {
        Ok(inverse_lookup(&self.im_lookup, inverse_mobility_values))
    }

    fn scan_to_voltage(&self, _frame_id: u32, scan_values: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        let table = self
            .voltage_lookup
            .as_ref()
            .ok_or(CalibrationError::Unsupported("scan_to_voltage"))?;
        forward_lookup(table, scan_values)
    }

    fn voltage_to_scan(&self, _frame_id: u32, voltage_values: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        let table = self
            .voltage_lookup
            .as_ref()
            .ok_or(CalibrationError::Unsupported("voltage_to_scan"))?;
        Ok(inverse_lookup(table, voltage_values))
    }
}

pub enum TimsIndexConverter {
    Simple(SimpleIndexConverter),
    BrukerLib(BrukerLibTimsDataConverter),
    Lookup(LookupIndexConverter),
}

impl TimsIndexConverter {
    /// The vendor library is not thread safe; callers may want to know.
    pub fn uses_bruker_sdk(&self) -> bool {
        matches!(self, TimsIndexConverter::BrukerLib(_))
    }

    fn inner(&self) -> &dyn IndexConverter {
        match self {
            TimsIndexConverter::Simple(c) => c,
            TimsIndexConverter::BrukerLib(c) => c,
            TimsIndexConverter::Lookup(c) => c,
        }
    }
}

impl IndexConverter for TimsIndexConverter {
    fn tof_to_mz(&self, frame_id: u32, tof_values: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        if tof_values.is_empty() {
            return Ok(Vec::new());
        }
        self.inner().tof_to_mz(frame_id, tof_values)
    }

    fn mz_to_tof(&self, frame_id: u32, mz_values: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        if mz_values.is_empty() {
            return Ok(Vec::new());
        }
        self.inner().mz_to_tof(frame_id, mz_values)
    }

    fn scan_to_inverse_mobility(&self, frame_id: u32, scan_values: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        if scan_values.is_empty() {
            return Ok(Vec::new());
        }
        self.inner().scan_to_inverse_mobility(frame_id, scan_values)
    }

    fn inverse_mobility_to_scan(
        &self,
        frame_id: u32,
        inverse_mobility_values: &[f64],
    ) -> Result<Vec<f64>, CalibrationError> {
        if inverse_mobility_values.is_empty() {
            return Ok(Vec::new());
        }
        self.inner()
            .inverse_mobility_to_scan(frame_id, inverse_mobility_values)
    }

    fn scan_to_voltage(&self, frame_id: u32, scan_values: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        if scan_values.is_empty() {
            return Ok(Vec::new());
        }
        self.inner().scan_to_voltage(frame_id, scan_values)
    }

    fn voltage_to_scan(&self, frame_id: u32, voltage_values: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        if voltage_values.is_empty() {
            return Ok(Vec::new());
        }
        self.inner().voltage_to_scan(frame_id, voltage_values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple() -> SimpleIndexConverter {
        SimpleIndexConverter::from_boundaries(100.0, 1600.0, 400_000, 0.6, 1.6, 1000)
    }

    #[test]
    fn test_simple_converter_boundaries() {
        let conv = simple();
        let mz = conv.tof_to_mz(1, &[0.0, 400_000.0]).unwrap();
        assert!((mz[0] - 100.0).abs() < 1e-6);
        assert!((mz[1] - 1600.0).abs() < 1e-6);

        let tof = conv.mz_to_tof(1, &mz).unwrap();
        assert!((tof[1] - 400_000.0).abs() < 1e-3);

        let im = conv.scan_to_inverse_mobility(1, &[0.0, 1000.0]).unwrap();
        assert!((im[0] - 1.6).abs() < 1e-9);
        assert!((im[1] - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_simple_voltage_requires_ramp() {
        let conv = simple();
        assert!(matches!(
            conv.scan_to_voltage(1, &[1.0]),
            Err(CalibrationError::Unsupported(_))
        ));

        let conv = conv.with_voltage_ramp(100.0, 200.0, 1000);
        let v = conv.scan_to_voltage(1, &[500.0]).unwrap();
        assert!((v[0] - 150.0).abs() < 1e-9);
        let s = conv.voltage_to_scan(1, &v).unwrap();
        assert!((s[0] - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_input_short_circuits() {
        let conv = TimsIndexConverter::Lookup(LookupIndexConverter::new(vec![], vec![], None));
        // an empty voltage table would be Unsupported, empty input never gets there
        assert!(conv.scan_to_voltage(1, &[]).unwrap().is_empty());
        assert!(conv.tof_to_mz(1, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_lookup_build_and_bounds() {
        let lookup = LookupIndexConverter::build(&simple(), 1, 10, 4).unwrap();
        assert_eq!(lookup.mz_lookup.len(), 10);
        assert_eq!(lookup.im_lookup.len(), 4);
        assert!(lookup.voltage_lookup.is_none());

        let mz = lookup.tof_to_mz(1, &[3.0]).unwrap();
        assert_eq!(mz[0], lookup.mz_lookup[3]);

        assert!(matches!(
            lookup.tof_to_mz(1, &[10.0]),
            Err(CalibrationError::IndexOutOfRange { size: 10, .. })
        ));
        assert!(lookup.tof_to_mz(1, &[-1.0]).is_err());
    }

    #[test]
    fn test_lookup_inverse_descending_table() {
        let lookup = LookupIndexConverter::new(vec![], vec![1.6, 1.4, 1.2, 1.0], None);
        let scans = lookup.inverse_mobility_to_scan(1, &[1.3, 2.0, 0.5]).unwrap();
        assert!((scans[0] - 1.5).abs() < 1e-9);
        assert_eq!(scans[1], 0.0);
        assert_eq!(scans[2], 3.0);
    }

    #[test]
    fn test_one_over_k0_at_median() {
        let lookup = LookupIndexConverter::new(vec![], vec![1.6, 1.4, 1.2, 1.0], None);
        assert!((lookup.one_over_k0_at(2.0) - 1.4).abs() < 1e-9);
        assert!((lookup.one_over_k0_at(2.5) - 1.3).abs() < 1e-9);
        assert!((lookup.one_over_k0_at(99.0) - 1.0).abs() < 1e-9);
        assert!(LookupIndexConverter::new(vec![], vec![], None)
            .one_over_k0_at(1.0)
            .is_nan());
    }
}
