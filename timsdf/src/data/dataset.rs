use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::ReaderConfig;
use crate::data::acquisition::{AcquisitionMode, MsMsType};
use crate::data::builder::{Prefetch, ScanBuilder, ScanList};
use crate::data::handle::{
    BrukerLibTimsDataConverter, LookupIndexConverter, SimpleIndexConverter, TimsIndexConverter,
};
use crate::data::meta::{FrameMeta, GlobalMetaData, TdfMetadata};
use crate::data::raw::SharedTimsLibrary;
use crate::data::scan::TimsDataScan;
use crate::data::source::{BrukerLibFrameSource, FrameSource, TdfBinFrameSource};
use crate::error::{Result, TimsError};

/// An opened `.d` directory.
///
/// Opening reads all metadata and builds the calibration tables; scans are
/// built on request.
pub struct TimsDataset {
    data_path: PathBuf,
    config: ReaderConfig,
    global_meta: GlobalMetaData,
    frame_meta: BTreeMap<u32, FrameMeta>,
    prefetch: Prefetch,
    frames: Box<dyn FrameSource>,
    converter: TimsIndexConverter,
    mobility: LookupIndexConverter,
}

impl TimsDataset {
    /// Opens `data_path` with the options of `config`.
    ///
    /// # Arguments
    ///
    /// * `data_path` - the `.d` directory, holding `analysis.tdf` and `analysis.tdf_bin`
    /// * `config` - reader options, see [`ReaderConfig`]
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use timsdf::config::ReaderConfig;
    /// use timsdf::data::dataset::TimsDataset;
    ///
    /// let dataset = TimsDataset::open(Path::new("run.d"), ReaderConfig::default()).unwrap();
    /// let scans = dataset.load_all_scans().unwrap();
    /// println!("{} scans", scans.len());
    /// ```
    pub fn open(data_path: &Path, config: ReaderConfig) -> Result<Self> {
        for component in ["analysis.tdf", "analysis.tdf_bin"] {
            let path = data_path.join(component);
            if !path.is_file() {
                return Err(TimsError::MissingComponent(path));
            }
        }

        let metadata = TdfMetadata::open(data_path)?;
        let prefetch = Prefetch::load(&metadata)?;
        let global_meta = metadata.read_global_meta_data()?;
        let frames_in_order = metadata.read_frame_meta()?;

        if global_meta.tof_max_index == 0 {
            return Err(TimsError::Metadata(
                "GlobalMetadata has no DigitizerNumSamples".to_string(),
            ));
        }

        let max_scans = frames_in_order.iter().map(|f| f.num_scans).max().unwrap_or(0);
        let median_frame = frames_in_order
            .get(frames_in_order.len() / 2)
            .map(|f| f.id)
            .ok_or_else(|| TimsError::Metadata("Frames table is empty".to_string()))?;

        let (frames, native): (Box<dyn FrameSource>, Option<BrukerLibTimsDataConverter>) =
            match &config.bruker_lib_path {
                Some(lib_path) => {
                    let lib = SharedTimsLibrary::open(lib_path, data_path, config.use_recalibrated_state)?;
                    (
                        Box::new(BrukerLibFrameSource::new(lib.clone())),
                        Some(BrukerLibTimsDataConverter::new(lib)),
                    )
                }
                None => (
                    Box::new(TdfBinFrameSource::new(
                        data_path,
                        global_meta.tims_compression_type,
                        &frames_in_order,
                    )?),
                    None,
                ),
            };

        let (mobility, converter) = match native {
            Some(native) => {
                let mobility = LookupIndexConverter::build(&native, median_frame, global_meta.tof_max_index, max_scans)?;
                let converter = if config.use_lookup_tables {
                    TimsIndexConverter::Lookup(mobility.clone())
                } else {
                    TimsIndexConverter::BrukerLib(native)
                };
                (mobility, converter)
            }
            None => {
                let simple = SimpleIndexConverter::from_boundaries(
                    global_meta.mz_acquisition_range_lower,
                    global_meta.mz_acquisition_range_upper,
                    global_meta.tof_max_index,
                    global_meta.one_over_k0_range_lower,
                    global_meta.one_over_k0_range_upper,
                    max_scans,
                );
                let mobility = LookupIndexConverter::build(&simple, median_frame, global_meta.tof_max_index, max_scans)?;
                let converter = if config.use_lookup_tables {
                    TimsIndexConverter::Lookup(mobility.clone())
                } else {
                    TimsIndexConverter::Simple(simple)
                };
                (mobility, converter)
            }
        };

        log::info!(
            "opened {} ({} frames, {}, calibration through {})",
            data_path.display(),
            frames_in_order.len(),
            prefetch.mode,
            match &converter {
                c if c.uses_bruker_sdk() => "timsdata",
                TimsIndexConverter::Lookup(_) => "lookup tables",
                _ => "global metadata",
            }
        );

        Ok(TimsDataset {
            data_path: data_path.to_path_buf(),
            config,
            global_meta,
            frame_meta: frames_in_order.into_iter().map(|f| (f.id, f)).collect(),
            prefetch,
            frames,
            converter,
            mobility,
        })
    }

    fn builder(&self) -> ScanBuilder<'_> {
        ScanBuilder::new(
            self.frames.as_ref(),
            &self.converter,
            &self.mobility,
            &self.frame_meta,
            &self.config,
        )
    }

    /// Builds and numbers every scan of the run.
    pub fn load_all_scans(&self) -> Result<ScanList> {
        self.builder().build(&self.prefetch)
    }

    /// Builds one unnumbered scan for `precursor_id`.
    ///
    /// An MS1 `frame_id` yields the precursor's MS1 scan in that frame, any
    /// other frame yields the precursor's PASEF scan. `None` if the precursor
    /// is unknown there, the frame does not exist, or no peaks were produced.
    pub fn get_scan_for_precursor(&self, precursor_id: u32, frame_id: u32) -> Result<Option<TimsDataScan>> {
        let Some(meta) = self.frame_meta.get(&frame_id) else {
            return Ok(None);
        };
        let builder = self.builder();

        if MsMsType::from(meta.ms_ms_type) == MsMsType::MS1 {
            let Some(record) = self.prefetch.ms1_record(frame_id, precursor_id) else {
                return Ok(None);
            };
            let frame = builder.load_frame(frame_id)?;
            builder.ms1_scan(&frame, record)
        } else {
            match self.prefetch.pasef_record(precursor_id) {
                Some(record) if record.frame_ids.contains(&frame_id) => builder.pasef_scan_for_record(record),
                _ => Ok(None),
            }
        }
    }

    /// Unnumbered MS1 scans of one frame.
    pub fn get_ms1_frame_scans(&self, frame_id: u32) -> Result<Vec<TimsDataScan>> {
        let builder = self.builder();
        let frame = builder.load_frame(frame_id)?;
        let records = self.prefetch.ms1_records.get(&frame_id).map(Vec::as_slice);
        builder.ms1_scans(&frame, records)
    }

    pub fn acquisition_mode(&self) -> AcquisitionMode {
        self.prefetch.mode
    }

    pub fn global_meta_data(&self) -> &GlobalMetaData {
        &self.global_meta
    }

    pub fn frame_meta(&self) -> &BTreeMap<u32, FrameMeta> {
        &self.frame_meta
    }

    pub fn frame_count(&self) -> usize {
        self.frame_meta.len()
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn index_converter(&self) -> &TimsIndexConverter {
        &self.converter
    }

    pub fn uses_bruker_sdk(&self) -> bool {
        self.config.bruker_lib_path.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::handle::IndexConverter;
    use crate::data::meta::create_test_schema;
    use crate::data::utility::compress_frame_type2;
    use rusqlite::{params, Connection};
    use std::fs::File;
    use std::io::Write;
    use timscore::data::spectrum::MsOrder;

    fn write_run(dir: &Path) {
        let ms1 = compress_frame_type2(&[1, 1, 0], &[100, 100], &[10, 20], 1).unwrap();
        let ms2 = compress_frame_type2(&[1, 0, 0], &[200], &[5], 1).unwrap();

        let mut bin = File::create(dir.join("analysis.tdf_bin")).unwrap();
        bin.write_all(&ms1).unwrap();
        bin.write_all(&ms2).unwrap();

        let conn = Connection::open(dir.join("analysis.tdf")).unwrap();
        create_test_schema(&conn);
        conn.execute_batch(
            "INSERT INTO GlobalMetadata VALUES ('TimsCompressionType', '2'), ('DigitizerNumSamples', '999'),
                                               ('MzAcqRangeLower', '100'), ('MzAcqRangeUpper', '1600'),
                                               ('OneOverK0AcqRangeLower', '0.6'), ('OneOverK0AcqRangeUpper', '1.6');
             INSERT INTO Precursors VALUES (1, 500.2, 500.3, 500.25, 2, 2.0, 1000.0, 1);
             INSERT INTO PasefFrameMsMsInfo VALUES (2, 1, 3, 500.3, 2.0, 30.0, 1);",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO Frames VALUES (1, 600.0, '+', 8, 0, 0, 3, 2, 100.0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO Frames VALUES (2, 600.1, '+', 8, 8, ?1, 3, 1, 100.0)",
            params![ms1.len() as i64],
        )
        .unwrap();
    }

    #[test_log::test]
    fn test_open_and_load_without_native_library() {
        let dir = tempfile::tempdir().unwrap();
        write_run(dir.path());

        let dataset = TimsDataset::open(dir.path(), ReaderConfig::default()).unwrap();
        assert_eq!(dataset.acquisition_mode(), AcquisitionMode::DDA);
        assert_eq!(dataset.frame_count(), 2);
        assert_eq!(dataset.global_meta_data().tof_max_index, 1000);
        assert!(!dataset.uses_bruker_sdk());

        let list = dataset.load_all_scans().unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.faulty_frames.is_empty());

        let ms1 = list.get(1).unwrap();
        assert_eq!(ms1.ms_order, MsOrder::Ms1);
        assert_eq!(ms1.spectrum.intensity, vec![30.0]);
        let expected = dataset.index_converter().tof_to_mz(1, &[100.0]).unwrap()[0];
        assert!((ms1.spectrum.mz[0] - expected).abs() < 1e-9);
        assert!((ms1.retention_time - 10.0).abs() < 1e-12);

        let ms2 = list.get(2).unwrap();
        assert_eq!(ms2.ms_order, MsOrder::Ms2);
        assert_eq!(ms2.parent_scan_number, Some(1));
        assert_eq!(ms2.spectrum.intensity, vec![5.0]);
    }

    #[test]
    fn test_single_scan_access() {
        let dir = tempfile::tempdir().unwrap();
        write_run(dir.path());
        let dataset = TimsDataset::open(dir.path(), ReaderConfig::default()).unwrap();

        let ms1 = dataset.get_scan_for_precursor(1, 1).unwrap().unwrap();
        assert_eq!(ms1.native_id(), "frame=1;scans=1-3;precursor=1");

        let ms2 = dataset.get_scan_for_precursor(1, 2).unwrap().unwrap();
        assert_eq!(ms2.ms_order, MsOrder::Ms2);
        assert_eq!(ms2.scan_number, 0);

        assert!(dataset.get_scan_for_precursor(7, 1).unwrap().is_none());
        assert!(dataset.get_scan_for_precursor(1, 99).unwrap().is_none());
        assert_eq!(dataset.get_ms1_frame_scans(1).unwrap().len(), 1);
    }

    #[test]
    fn test_linear_calibration_without_lookup() {
        let dir = tempfile::tempdir().unwrap();
        write_run(dir.path());
        let config = ReaderConfig {
            use_lookup_tables: false,
            ..ReaderConfig::default()
        };
        let dataset = TimsDataset::open(dir.path(), config).unwrap();
        assert!(matches!(dataset.index_converter(), TimsIndexConverter::Simple(_)));
        assert_eq!(dataset.load_all_scans().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_component() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("analysis.tdf")).unwrap();

        match TimsDataset::open(dir.path(), ReaderConfig::default()) {
            Err(TimsError::MissingComponent(path)) => assert!(path.ends_with("analysis.tdf_bin")),
            other => panic!("expected a missing component, got {:?}", other.err()),
        }
    }
}
