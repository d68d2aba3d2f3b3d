use libloading::{Library, Symbol};
use parking_lot::Mutex;
use std::ffi::CString;
use std::os::raw::{c_char, c_double};
use std::path::Path;
use std::sync::Arc;

use crate::error::CalibrationError;

type ConversionFn = unsafe extern "C" fn(u64, i64, *const c_double, *mut c_double, u32) -> u32;
type ReadScansFn = unsafe extern "C" fn(u64, i64, u32, u32, *mut u32, u32) -> u32;

/// Initial frame buffer, in u32 entries.
const DEFAULT_BUFFER_ENTRIES: usize = 4096;
/// Frames larger than this are treated as corrupt.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// An open handle on a `.d` directory inside the vendor `timsdata` library.
///
/// The library is not reentrant. Share it through [`SharedTimsLibrary`], never directly.
pub struct BrukerTimsDataLibrary {
    lib: Library,
    handle: u64,
}

impl BrukerTimsDataLibrary {
    //
    // Create a new BrukerTimsDataLibrary struct
    //
    // # Arguments
    //
    // * `bruker_lib_path` - path to libtimsdata.so / timsdata.dll
    // * `data_path` - path to the .d directory
    // * `use_recalibrated_state` - open with the recalibrated state of the analysis
    //
    // # Example
    //
    // ```
    // let tims_data = BrukerTimsDataLibrary::new(Path::new("libtimsdata.so"), Path::new("run.d"), false)?;
    // ```
    pub fn new(
        bruker_lib_path: &Path,
        data_path: &Path,
        use_recalibrated_state: bool,
    ) -> Result<BrukerTimsDataLibrary, CalibrationError> {
        let lib = unsafe { Library::new(bruker_lib_path)? };

        let path = CString::new(data_path.to_string_lossy().as_bytes())
            .map_err(|_| CalibrationError::OpenFailed(data_path.to_path_buf()))?;

        let handle = unsafe {
            let func: Symbol<unsafe extern "C" fn(*const c_char, u32) -> u64> =
                lib.get(b"tims_open")?;
            func(path.as_ptr(), use_recalibrated_state as u32)
        };

        if handle == 0 {
            return Err(CalibrationError::OpenFailed(data_path.to_path_buf()));
        }

        Ok(BrukerTimsDataLibrary { lib, handle })
    }

    //
    // Close the handle to the raw data, called on drop
    //
    fn tims_close(&self) -> Result<(), CalibrationError> {
        unsafe {
            let func: Symbol<unsafe extern "C" fn(u64)> = self.lib.get(b"tims_close")?;
            func(self.handle);
        }
        Ok(())
    }

    fn convert(
        &self,
        symbol: &'static [u8],
        function: &'static str,
        frame_id: u32,
        input: &[c_double],
    ) -> Result<Vec<c_double>, CalibrationError> {
        let mut output = vec![0.0; input.len()];
        let status = unsafe {
            let func: Symbol<ConversionFn> = self.lib.get(symbol)?;
            func(
                self.handle,
                frame_id as i64,
                input.as_ptr(),
                output.as_mut_ptr(),
                input.len() as u32,
            )
        };
        if status == 0 {
            return Err(CalibrationError::NativeCall { function, frame_id });
        }
        Ok(output)
    }

    pub fn tims_index_to_mz(&self, frame_id: u32, indices: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        self.convert(b"tims_index_to_mz", "tims_index_to_mz", frame_id, indices)
    }

    pub fn tims_mz_to_index(&self, frame_id: u32, mzs: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        self.convert(b"tims_mz_to_index", "tims_mz_to_index", frame_id, mzs)
    }

    pub fn tims_scan_to_inv_mob(&self, frame_id: u32, scans: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        self.convert(b"tims_scannum_to_oneoverk0", "tims_scannum_to_oneoverk0", frame_id, scans)
    }

    pub fn inv_mob_to_tims_scan(&self, frame_id: u32, inv_mob: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        self.convert(b"tims_oneoverk0_to_scannum", "tims_oneoverk0_to_scannum", frame_id, inv_mob)
    }

    pub fn tims_scan_to_voltage(&self, frame_id: u32, scans: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        self.convert(b"tims_scannum_to_voltage", "tims_scannum_to_voltage", frame_id, scans)
    }

    pub fn voltage_to_tims_scan(&self, frame_id: u32, voltages: &[f64]) -> Result<Vec<f64>, CalibrationError> {
        self.convert(b"tims_voltage_to_scannum", "tims_voltage_to_scannum", frame_id, voltages)
    }

    /// One `tims_read_scans_v2` call. Returns the number of bytes the full
    /// output needs, which may exceed the size of `buffer`.
    fn tims_read_scans(
        &self,
        frame_id: u32,
        scan_begin: u32,
        scan_end: u32,
        buffer: &mut [u32],
    ) -> Result<usize, CalibrationError> {
        let required = unsafe {
            let func: Symbol<ReadScansFn> = self.lib.get(b"tims_read_scans_v2")?;
            func(
                self.handle,
                frame_id as i64,
                scan_begin,
                scan_end,
                buffer.as_mut_ptr(),
                (buffer.len() * 4) as u32,
            )
        };
        if required == 0 {
            return Err(CalibrationError::NativeCall {
                function: "tims_read_scans_v2",
                frame_id,
            });
        }
        Ok(required as usize)
    }
}

impl Drop for BrukerTimsDataLibrary {
    fn drop(&mut self) {
        if let Err(e) = self.tims_close() {
            log::warn!("failed to close timsdata handle: {}", e);
        }
    }
}

/// Process wide capability for one open native handle.
///
/// Every native call, calibration or frame read, takes the same lock and
/// holds it only for the duration of that call.
#[derive(Clone)]
pub struct SharedTimsLibrary {
    inner: Arc<Mutex<BrukerTimsDataLibrary>>,
}

impl SharedTimsLibrary {
    pub fn open(
        bruker_lib_path: &Path,
        data_path: &Path,
        use_recalibrated_state: bool,
    ) -> Result<Self, CalibrationError> {
        let lib = BrukerTimsDataLibrary::new(bruker_lib_path, data_path, use_recalibrated_state)?;
        log::info!(
            "opened {} through {}",
            data_path.display(),
            bruker_lib_path.display()
        );
        Ok(SharedTimsLibrary {
            inner: Arc::new(Mutex::new(lib)),
        })
    }

    /// Runs `f` with exclusive access to the native handle.
    pub fn with<R>(&self, f: impl FnOnce(&BrukerTimsDataLibrary) -> R) -> R {
        let lib = self.inner.lock();
        f(&lib)
    }

    /// Reads all sub-scans of a frame into a freshly sized buffer.
    ///
    /// The buffer starts at 4096 entries and grows to whatever the library asks
    /// for; the lock is released between attempts.
    pub fn read_frame(&self, frame_id: u32, num_scans: u32) -> Result<Vec<u32>, CalibrationError> {
        let mut entries = DEFAULT_BUFFER_ENTRIES;
        loop {
            let mut buffer = vec![0u32; entries];
            let required = self.with(|lib| lib.tims_read_scans(frame_id, 0, num_scans, &mut buffer))?;

            if required <= entries * 4 {
                buffer.truncate(required.div_ceil(4));
                return Ok(buffer);
            }
            if required > MAX_FRAME_BYTES {
                return Err(CalibrationError::FrameTooLarge {
                    frame_id,
                    bytes: required,
                });
            }
            entries = required / 4 + 1;
        }
    }
}
