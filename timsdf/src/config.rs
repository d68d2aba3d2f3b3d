use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use timscore::algorithm::merge::Tolerance;
use timscore::timstof::spectrum_processing::TrimConfig;

use crate::error::Result;

/// Options for opening and reconstructing a `.d` directory.
///
/// # Example
///
/// ```
/// use timsdf::config::ReaderConfig;
///
/// let config: ReaderConfig = serde_json::from_str(r#"{ "max_threads": 8 }"#).unwrap();
/// assert_eq!(config.max_threads, 8);
/// assert!(config.use_lookup_tables);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Worker threads for scan building.
    pub max_threads: usize,
    /// Peak equivalence used by every merge.
    pub tolerance: Tolerance,
    /// Calibrate from tables built once from the median frame instead of
    /// calling the native library per frame.
    pub use_lookup_tables: bool,
    pub use_recalibrated_state: bool,
    /// Native `timsdata` library. Without it frames are read from
    /// `analysis.tdf_bin` directly and calibration is linear.
    pub bruker_lib_path: Option<PathBuf>,
    pub trim: TrimConfig,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig {
            max_threads: 4,
            tolerance: Tolerance::default(),
            use_lookup_tables: true,
            use_recalibrated_state: false,
            bruker_lib_path: None,
            trim: TrimConfig::default(),
        }
    }
}

impl ReaderConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: ReaderConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ReaderConfig::default());
        assert_eq!(config.tolerance, Tolerance::Ppm(10.0));
        assert_eq!(config.max_threads, 4);
        assert!(!config.trim.is_active());
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "tolerance": {{ "Da": 0.01 }}, "trim": {{ "top_n": 100 }}, "bruker_lib_path": "/opt/libtimsdata.so" }}"#
        )
        .unwrap();

        let config = ReaderConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.tolerance, Tolerance::Da(0.01));
        assert_eq!(config.trim.top_n, Some(100));
        assert!(config.trim.apply_to_ms1);
        assert_eq!(config.bruker_lib_path, Some(PathBuf::from("/opt/libtimsdata.so")));
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ \"max_threads\": \"many\" }}").unwrap();
        assert!(matches!(
            ReaderConfig::from_json_file(file.path()),
            Err(crate::error::TimsError::Config(_))
        ));
    }
}
