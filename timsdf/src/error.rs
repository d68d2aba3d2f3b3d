use std::io;
use std::path::PathBuf;

use thiserror::Error;
use timscore::algorithm::merge::MergeError;

/// Failures while slicing a frame payload.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame {frame_id}: sub-scan {index} out of range, frame has {count} sub-scans")]
    IndexOutOfRange {
        frame_id: u32,
        index: usize,
        count: usize,
    },
    #[error("frame {frame_id}: payload holds {available} entries but the declared peak counts need {required}")]
    Truncated {
        frame_id: u32,
        required: usize,
        available: usize,
    },
    #[error("frame {frame_id}: payload of {len} bytes is not a whole number of u32 entries")]
    Misaligned { frame_id: u32, len: usize },
    #[error("frame {frame_id}: failed to decompress: {reason}")]
    Decompression { frame_id: u32, reason: String },
    #[error("frame {0} is not present in the frame source")]
    Missing(u32),
}

/// Failures at the calibration / native library boundary.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("failed to load native timsdata library: {0}")]
    Library(#[from] libloading::Error),
    #[error("tims_open returned no handle for {0}")]
    OpenFailed(PathBuf),
    #[error("native call {function} failed for frame {frame_id}")]
    NativeCall {
        function: &'static str,
        frame_id: u32,
    },
    #[error("frame {frame_id} needs {bytes} bytes, more than the 16 MiB frame limit")]
    FrameTooLarge { frame_id: u32, bytes: usize },
    #[error("{0} is not supported by this converter")]
    Unsupported(&'static str),
    #[error("value {value} is outside of the lookup table of size {size}")]
    IndexOutOfRange { value: f64, size: usize },
    #[error("{function} returned {actual} values for {expected} inputs")]
    LengthMismatch {
        function: &'static str,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Error)]
pub enum TimsError {
    #[error("required file component is missing: {0}")]
    MissingComponent(PathBuf),
    #[error("metadata query failed: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed metadata: {0}")]
    Metadata(String),
    #[error("unsupported scan mode {0}, only DDA-PASEF, MRM and plain MS data are supported")]
    UnsupportedScanMode(i64),
    #[error("file mixes scan modes {0:?}")]
    MixedScanModes(Vec<i64>),
    #[error("contract violation: {0}")]
    ContractViolation(String),
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Merge(#[from] MergeError),
}

pub type Result<T, E = TimsError> = std::result::Result<T, E>;
