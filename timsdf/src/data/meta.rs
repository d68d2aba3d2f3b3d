use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;

use crate::data::acquisition::AcquisitionMode;
use crate::error::{Result, TimsError};

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalMetaData {
    pub schema_type: String,
    pub schema_version_major: i64,
    pub schema_version_minor: i64,
    pub acquisition_software_vendor: String,
    pub instrument_vendor: String,
    pub tims_compression_type: i64,
    pub max_num_peaks_per_scan: i64,
    pub mz_acquisition_range_lower: f64,
    pub mz_acquisition_range_upper: f64,
    pub one_over_k0_range_lower: f64,
    pub one_over_k0_range_upper: f64,
    pub tof_max_index: u32,
}

impl Default for GlobalMetaData {
    fn default() -> Self {
        GlobalMetaData {
            schema_type: String::new(),
            schema_version_major: -1,
            schema_version_minor: -1,
            acquisition_software_vendor: String::new(),
            instrument_vendor: String::new(),
            tims_compression_type: -1,
            max_num_peaks_per_scan: -1,
            mz_acquisition_range_lower: -1.0,
            mz_acquisition_range_upper: -1.0,
            one_over_k0_range_lower: -1.0,
            one_over_k0_range_upper: -1.0,
            tof_max_index: 0,
        }
    }
}

/// One row of the `Frames` table.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMeta {
    pub id: u32,
    /// seconds
    pub time: f64,
    pub polarity: String,
    pub scan_mode: i64,
    pub ms_ms_type: i64,
    pub tims_id: u64,
    pub num_scans: u32,
    pub num_peaks: u32,
    /// milliseconds
    pub accumulation_time: f64,
}

/// A precursor as seen from its parent MS1 frame.
///
/// `precursor_id == None` marks the whole-frame record of a frame without
/// precursors. Sub-scans are one based, `[scan_start, scan_end)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Ms1Record {
    pub frame_id: u32,
    pub precursor_id: Option<u32>,
    pub scan_start: u32,
    pub scan_end: u32,
    pub scan_median: f64,
}

impl Ms1Record {
    /// Record covering every sub-scan of a frame, one based and end exclusive.
    pub fn whole_frame(frame_id: u32, num_scans: u32) -> Self {
        Ms1Record {
            frame_id,
            precursor_id: None,
            scan_start: 1,
            scan_end: num_scans + 1,
            scan_median: num_scans as f64,
        }
    }
}

/// A precursor as fragmented over one or more PASEF frames.
#[derive(Debug, Clone, PartialEq)]
pub struct PasefRecord {
    pub precursor_id: u32,
    /// ascending
    pub frame_ids: Vec<u32>,
    pub scan_start: u32,
    pub scan_end: u32,
    pub isolation_mz: f64,
    pub isolation_width: f64,
    pub collision_energy: f64,
    pub largest_peak_mz: f64,
    pub monoisotopic_mz: f64,
    pub charge: i32,
    pub intensity: f64,
    pub scan_median: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MrmRecord {
    pub frame_id: u32,
    pub scan_start: u32,
    pub scan_end: u32,
    pub isolation_mz: f64,
    pub isolation_width: f64,
    pub collision_energy: f64,
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| TimsError::Metadata(format!("cannot parse GlobalMetadata {} = '{}'", key, value)))
}

fn parse_frame_list(precursor_id: u32, concatenated: &str) -> Result<Vec<u32>> {
    let mut frames = concatenated
        .split(',')
        .map(|id| parse_value::<u32>("Frame", id))
        .collect::<Result<Vec<u32>>>()?;
    frames.sort_unstable();
    frames.dedup();
    if frames.is_empty() {
        return Err(TimsError::Metadata(format!(
            "precursor {} has no PASEF frames",
            precursor_id
        )));
    }
    Ok(frames)
}

/// Read only access to `analysis.tdf`.
///
/// `rusqlite::Connection` is not `Sync`, so every query takes the lock.
/// All queries run before any parallel work starts.
pub struct TdfMetadata {
    conn: Mutex<Connection>,
}

impl TdfMetadata {
    pub fn open(data_path: &Path) -> Result<Self> {
        let db_path = data_path.join("analysis.tdf");
        let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(TdfMetadata::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        TdfMetadata {
            conn: Mutex::new(conn),
        }
    }

    pub fn has_table(&self, name: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let found: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn scan_modes(&self) -> Result<Vec<i64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT ScanMode FROM Frames ORDER BY ScanMode")?;
        let modes: rusqlite::Result<Vec<i64>> = stmt.query_map([], |row| row.get(0))?.collect();
        Ok(modes?)
    }

    /// The single acquisition mode of the file.
    ///
    /// Fails if frames disagree on their scan mode or the mode cannot be
    /// reconstructed into scans.
    pub fn acquisition_mode(&self) -> Result<AcquisitionMode> {
        let modes = self.scan_modes()?;
        match modes.as_slice() {
            [] => Err(TimsError::Metadata("Frames table is empty".to_string())),
            [mode] => {
                let mode = AcquisitionMode::from(*mode);
                if mode.is_supported() {
                    Ok(mode)
                } else {
                    Err(TimsError::UnsupportedScanMode(mode.to_i64()))
                }
            }
            _ => Err(TimsError::MixedScanModes(modes)),
        }
    }

    pub fn read_global_meta_data(&self) -> Result<GlobalMetaData> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT Key, Value FROM GlobalMetadata")?;
        let rows: rusqlite::Result<Vec<(String, Option<String>)>> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect();

        let mut global_meta = GlobalMetaData::default();

        for (key, value) in rows? {
            let Some(value) = value else { continue };
            match key.as_str() {
                "SchemaType" => global_meta.schema_type = value,
                "SchemaVersionMajor" => global_meta.schema_version_major = parse_value(&key, &value)?,
                "SchemaVersionMinor" => global_meta.schema_version_minor = parse_value(&key, &value)?,
                "AcquisitionSoftwareVendor" => global_meta.acquisition_software_vendor = value,
                "InstrumentVendor" => global_meta.instrument_vendor = value,
                "TimsCompressionType" => global_meta.tims_compression_type = parse_value(&key, &value)?,
                "MaxNumPeaksPerScan" => global_meta.max_num_peaks_per_scan = parse_value(&key, &value)?,
                "MzAcqRangeLower" => global_meta.mz_acquisition_range_lower = parse_value(&key, &value)?,
                "MzAcqRangeUpper" => global_meta.mz_acquisition_range_upper = parse_value(&key, &value)?,
                "OneOverK0AcqRangeLower" => global_meta.one_over_k0_range_lower = parse_value(&key, &value)?,
                "OneOverK0AcqRangeUpper" => global_meta.one_over_k0_range_upper = parse_value(&key, &value)?,
                "DigitizerNumSamples" => {
                    global_meta.tof_max_index = parse_value::<u32>(&key, &value)? + 1
                }
                _ => (),
            }
        }
        Ok(global_meta)
    }

    /// All frames, ascending by id.
    pub fn read_frame_meta(&self) -> Result<Vec<FrameMeta>> {
        let conn = self.conn.lock();

        let rows: Vec<&str> = vec![
            "Id", "Time", "Polarity", "ScanMode", "MsMsType", "TimsId", "NumScans", "NumPeaks",
            "AccumulationTime",
        ];
        let query = format!("SELECT {} FROM Frames ORDER BY Id", rows.join(", "));

        let frames: rusqlite::Result<Vec<FrameMeta>> = conn
            .prepare(&query)?
            .query_map([], |row| {
                Ok(FrameMeta {
                    id: row.get(0)?,
                    time: row.get(1)?,
                    polarity: row.get(2)?,
                    scan_mode: row.get(3)?,
                    ms_ms_type: row.get(4)?,
                    tims_id: row.get::<_, i64>(5)? as u64,
                    num_scans: row.get(6)?,
                    num_peaks: row.get(7)?,
                    accumulation_time: row.get(8)?,
                })
            })?
            .collect();
        Ok(frames?)
    }

    pub fn read_ms1_frame_ids(&self) -> Result<Vec<u32>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT Id FROM Frames WHERE MsMsType = 0 ORDER BY Id")?;
        let ids: rusqlite::Result<Vec<u32>> = stmt.query_map([], |row| row.get(0))?.collect();
        Ok(ids?)
    }

    /// Precursor records keyed by their parent frame, ascending precursor id
    /// within each frame. Empty when the file has no precursor tables.
    pub fn read_ms1_records(&self) -> Result<BTreeMap<u32, Vec<Ms1Record>>> {
        if !self.has_table("Precursors")? || !self.has_table("PasefFrameMsMsInfo")? {
            return Ok(BTreeMap::new());
        }
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT p.Parent, MIN(m.ScanNumBegin), MAX(m.ScanNumEnd), p.ScanNumber, p.Id \
             FROM Precursors p \
             INNER JOIN PasefFrameMsMsInfo m ON m.Precursor = p.Id \
             GROUP BY p.Id \
             ORDER BY p.Parent, p.Id",
        )?;
        let records: rusqlite::Result<Vec<Ms1Record>> = stmt
            .query_map([], |row| {
                Ok(Ms1Record {
                    frame_id: row.get(0)?,
                    scan_start: row.get(1)?,
                    scan_end: row.get(2)?,
                    scan_median: row.get(3)?,
                    precursor_id: Some(row.get(4)?),
                })
            })?
            .collect();

        let mut by_frame: BTreeMap<u32, Vec<Ms1Record>> = BTreeMap::new();
        for record in records? {
            by_frame.entry(record.frame_id).or_default().push(record);
        }
        Ok(by_frame)
    }

    /// PASEF records, ascending by precursor id.
    ///
    /// Every frame of a precursor must share one sub-scan range.
    pub fn read_pasef_records(&self) -> Result<Vec<PasefRecord>> {
        if !self.has_table("Precursors")? || !self.has_table("PasefFrameMsMsInfo")? {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT p.Id, GROUP_CONCAT(m.Frame), \
                    MIN(m.ScanNumBegin), MAX(m.ScanNumBegin), MIN(m.ScanNumEnd), MAX(m.ScanNumEnd), \
                    m.IsolationMz, m.IsolationWidth, m.CollisionEnergy, \
                    p.LargestPeakMz, p.MonoisotopicMz, p.Charge, p.Intensity, p.ScanNumber \
             FROM PasefFrameMsMsInfo m \
             INNER JOIN Precursors p ON m.Precursor = p.Id \
             GROUP BY p.Id \
             ORDER BY p.Id",
        )?;

        #[allow(clippy::type_complexity)]
        let rows: rusqlite::Result<Vec<(u32, String, [u32; 4], [f64; 4], Option<f64>, Option<i32>, f64, f64)>> = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    [row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?],
                    [row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?],
                    row.get(10)?,
                    row.get(11)?,
                    row.get(12)?,
                    row.get(13)?,
                ))
            })?
            .collect();

        let mut records = Vec::new();
        for (precursor_id, frames, ranges, mzs, mono, charge, intensity, scan_median) in rows? {
            let [begin_min, begin_max, end_min, end_max] = ranges;
            if begin_min != begin_max || end_min != end_max {
                return Err(TimsError::ContractViolation(format!(
                    "precursor {} uses sub-scan ranges [{}..{}]-[{}..{}] across its frames",
                    precursor_id, begin_min, begin_max, end_min, end_max
                )));
            }
            let [isolation_mz, isolation_width, collision_energy, largest_peak_mz] = mzs;
            records.push(PasefRecord {
                precursor_id,
                frame_ids: parse_frame_list(precursor_id, &frames)?,
                scan_start: begin_min,
                scan_end: end_min,
                isolation_mz,
                isolation_width,
                collision_energy,
                largest_peak_mz,
                monoisotopic_mz: mono.unwrap_or(isolation_mz),
                charge: charge.unwrap_or(1),
                intensity,
                scan_median,
            });
        }
        Ok(records)
    }

    /// MRM records, ascending by frame id.
    pub fn read_mrm_records(&self) -> Result<Vec<MrmRecord>> {
        if !self.has_table("FrameMsMsInfo")? {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT f.Id, f.NumScans, m.TriggerMass, m.IsolationWidth, m.CollisionEnergy \
             FROM Frames f \
             INNER JOIN FrameMsMsInfo m ON m.Frame = f.Id \
             ORDER BY f.Id",
        )?;
        let records: rusqlite::Result<Vec<MrmRecord>> = stmt
            .query_map([], |row| {
                Ok(MrmRecord {
                    frame_id: row.get(0)?,
                    scan_start: 1,
                    scan_end: row.get::<_, u32>(1)? + 1,
                    isolation_mz: row.get(2)?,
                    isolation_width: row.get(3)?,
                    collision_energy: row.get(4)?,
                })
            })?
            .collect();
        Ok(records?)
    }
}

/// Minimal `analysis.tdf` schema for tests.
#[cfg(test)]
pub(crate) fn create_test_schema(conn: &Connection) {
    conn.execute_batch(
        "CREATE TABLE GlobalMetadata (Key TEXT PRIMARY KEY, Value TEXT);
         CREATE TABLE Frames (
             Id INTEGER PRIMARY KEY, Time REAL, Polarity TEXT, ScanMode INTEGER,
             MsMsType INTEGER, TimsId INTEGER, NumScans INTEGER, NumPeaks INTEGER,
             AccumulationTime REAL);
         CREATE TABLE Precursors (
             Id INTEGER PRIMARY KEY, LargestPeakMz REAL, AverageMz REAL, MonoisotopicMz REAL,
             Charge INTEGER, ScanNumber REAL, Intensity REAL, Parent INTEGER);
         CREATE TABLE PasefFrameMsMsInfo (
             Frame INTEGER, ScanNumBegin INTEGER, ScanNumEnd INTEGER, IsolationMz REAL,
             IsolationWidth REAL, CollisionEnergy REAL, Precursor INTEGER);",
    )
    .unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> TdfMetadata {
        let conn = Connection::open_in_memory().unwrap();
        create_test_schema(&conn);
        conn.execute_batch(
            "INSERT INTO GlobalMetadata VALUES ('TimsCompressionType', '2'), ('DigitizerNumSamples', '399999'),
                                               ('MzAcqRangeLower', '100.0'), ('MzAcqRangeUpper', '1700'),
                                               ('OneOverK0AcqRangeLower', '0.6'), ('OneOverK0AcqRangeUpper', '1.6'),
                                               ('InstrumentVendor', 'Bruker'), ('Comment', NULL);
             INSERT INTO Frames VALUES (1, 60.0, '+', 8, 0, 0, 10, 5, 100.0),
                                       (2, 60.1, '+', 8, 8, 100, 10, 5, 100.0),
                                       (3, 60.2, '+', 8, 8, 200, 10, 5, 100.0),
                                       (4, 61.0, '+', 8, 0, 300, 10, 5, 100.0);
             INSERT INTO Precursors VALUES (1, 500.2, 500.3, 500.25, 2, 4.0, 1000.0, 1),
                                           (2, 600.2, 600.3, NULL, NULL, 6.5, 2000.0, 1);
             INSERT INTO PasefFrameMsMsInfo VALUES (3, 2, 6, 500.3, 2.0, 30.0, 1),
                                                   (2, 2, 6, 500.3, 2.0, 30.0, 1),
                                                   (2, 5, 9, 600.3, 2.0, 35.0, 2);",
        )
        .unwrap();
        TdfMetadata::from_connection(conn)
    }

    #[test]
    fn test_global_meta_data() {
        let global = metadata().read_global_meta_data().unwrap();
        assert_eq!(global.tims_compression_type, 2);
        assert_eq!(global.tof_max_index, 400_000);
        assert_eq!(global.mz_acquisition_range_upper, 1700.0);
        assert_eq!(global.instrument_vendor, "Bruker");
    }

    #[test]
    fn test_frames_and_mode() {
        let meta = metadata();
        let frames = meta.read_frame_meta().unwrap();
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[1].tims_id, 100);
        assert_eq!(meta.read_ms1_frame_ids().unwrap(), vec![1, 4]);
        assert_eq!(meta.acquisition_mode().unwrap(), AcquisitionMode::DDA);
    }

    #[test]
    fn test_ms1_records_grouped_by_parent() {
        let records = metadata().read_ms1_records().unwrap();
        assert_eq!(records.len(), 1);
        let frame_one = &records[&1];
        assert_eq!(frame_one.len(), 2);
        assert_eq!(frame_one[0].precursor_id, Some(1));
        assert_eq!((frame_one[0].scan_start, frame_one[0].scan_end), (2, 6));
        assert_eq!(frame_one[1].scan_median, 6.5);
    }

    #[test]
    fn test_pasef_records_with_fallbacks() {
        let records = metadata().read_pasef_records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].frame_ids, vec![2, 3]);
        assert_eq!(records[0].charge, 2);
        assert_eq!(records[1].monoisotopic_mz, 600.3);
        assert_eq!(records[1].charge, 1);
    }

    #[test]
    fn test_pasef_range_mismatch_is_contract_violation() {
        let meta = metadata();
        meta.conn
            .lock()
            .execute("INSERT INTO PasefFrameMsMsInfo VALUES (3, 5, 10, 600.3, 2.0, 35.0, 2)", [])
            .unwrap();
        assert!(matches!(
            meta.read_pasef_records(),
            Err(TimsError::ContractViolation(_))
        ));
    }

    #[test]
    fn test_mixed_and_unsupported_modes() {
        let meta = metadata();
        meta.conn
            .lock()
            .execute("INSERT INTO Frames VALUES (5, 62.0, '+', 9, 9, 400, 10, 5, 100.0)", [])
            .unwrap();
        assert!(matches!(
            meta.acquisition_mode(),
            Err(TimsError::MixedScanModes(modes)) if modes == vec![8, 9]
        ));

        let conn = Connection::open_in_memory().unwrap();
        create_test_schema(&conn);
        conn.execute("INSERT INTO Frames VALUES (1, 1.0, '+', 9, 9, 0, 10, 5, 100.0)", [])
            .unwrap();
        assert!(matches!(
            TdfMetadata::from_connection(conn).acquisition_mode(),
            Err(TimsError::UnsupportedScanMode(9))
        ));
    }

    #[test]
    fn test_whole_frame_ranges_cover_last_sub_scan() {
        let record = Ms1Record::whole_frame(4, 3);
        assert_eq!((record.scan_start, record.scan_end), (1, 4));

        let meta = metadata();
        meta.conn
            .lock()
            .execute_batch(
                "CREATE TABLE FrameMsMsInfo (Frame INTEGER, TriggerMass REAL, IsolationWidth REAL, CollisionEnergy REAL);
                 INSERT INTO FrameMsMsInfo VALUES (2, 445.1, 1.0, 20.0);",
            )
            .unwrap();
        let records = meta.read_mrm_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!((records[0].scan_start, records[0].scan_end), (1, 11));
        assert_eq!(records[0].isolation_mz, 445.1);
    }

    #[test]
    fn test_missing_precursor_tables() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE Frames (Id INTEGER, ScanMode INTEGER, MsMsType INTEGER);")
            .unwrap();
        let meta = TdfMetadata::from_connection(conn);
        assert!(meta.read_ms1_records().unwrap().is_empty());
        assert!(meta.read_pasef_records().unwrap().is_empty());
        assert!(meta.read_mrm_records().unwrap().is_empty());
    }
}
