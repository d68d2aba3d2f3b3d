use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};

use timscore::algorithm::merge::{merge_peak_arrays, MergedPeaks};
use timscore::data::spectrum::{MsOrder, MzSpectrum};

use crate::config::ReaderConfig;
use crate::data::acquisition::AcquisitionMode;
use crate::data::frame::FrameDecoder;
use crate::data::handle::{IndexConverter, LookupIndexConverter};
use crate::data::meta::{FrameMeta, Ms1Record, MrmRecord, PasefRecord, TdfMetadata};
use crate::data::scan::{Polarity, PrecursorInfo, ScanOrigin, TimsDataScan};
use crate::data::source::FrameSource;
use crate::error::{CalibrationError, Result, TimsError};

/// Everything read from the metadata store before scans are built.
#[derive(Debug, Clone)]
pub struct Prefetch {
    pub mode: AcquisitionMode,
    pub ms1_frame_ids: Vec<u32>,
    pub ms1_records: BTreeMap<u32, Vec<Ms1Record>>,
    pub pasef_records: Vec<PasefRecord>,
    pub mrm_records: Vec<MrmRecord>,
}

impl Prefetch {
    pub fn load(metadata: &TdfMetadata) -> Result<Self> {
        let mode = metadata.acquisition_mode()?;

        let prefetch = match mode {
            AcquisitionMode::MRM => Prefetch {
                mode,
                ms1_frame_ids: Vec::new(),
                ms1_records: BTreeMap::new(),
                pasef_records: Vec::new(),
                mrm_records: metadata.read_mrm_records()?,
            },
            _ => Prefetch {
                mode,
                ms1_frame_ids: metadata.read_ms1_frame_ids()?,
                ms1_records: metadata.read_ms1_records()?,
                pasef_records: metadata.read_pasef_records()?,
                mrm_records: Vec::new(),
            },
        };

        if let Some(frame_id) = prefetch
            .ms1_records
            .keys()
            .find(|&&id| prefetch.ms1_frame_ids.binary_search(&id).is_err())
        {
            return Err(TimsError::ContractViolation(format!(
                "precursor parent frame {} is not an MS1 frame",
                frame_id
            )));
        }

        log::info!(
            "{} run: {} MS1 frames, {} precursors, {} MRM frames",
            prefetch.mode,
            prefetch.ms1_frame_ids.len(),
            prefetch.pasef_records.len(),
            prefetch.mrm_records.len()
        );
        Ok(prefetch)
    }

    pub fn ms1_record(&self, frame_id: u32, precursor_id: u32) -> Option<&Ms1Record> {
        self.ms1_records
            .get(&frame_id)?
            .iter()
            .find(|r| r.precursor_id == Some(precursor_id))
    }

    pub fn pasef_record(&self, precursor_id: u32) -> Option<&PasefRecord> {
        self.pasef_records
            .binary_search_by_key(&precursor_id, |r| r.precursor_id)
            .ok()
            .map(|i| &self.pasef_records[i])
    }
}

/// Precursor id to MS1 scan number, written during MS1 numbering only.
#[derive(Debug, Default)]
pub struct ParentScanMap {
    inner: HashMap<u32, u32>,
}

impl ParentScanMap {
    /// Records the MS1 scan of `precursor_id`. A precursor has exactly one.
    pub fn insert(&mut self, precursor_id: u32, scan_number: u32) -> Result<()> {
        match self.inner.entry(precursor_id) {
            Entry::Vacant(slot) => {
                slot.insert(scan_number);
                Ok(())
            }
            Entry::Occupied(existing) => Err(TimsError::ContractViolation(format!(
                "precursor {} already maps to MS1 scan {}, refusing scan {}",
                precursor_id,
                existing.get(),
                scan_number
            ))),
        }
    }

    pub fn freeze(self) -> FrozenParentScanMap {
        FrozenParentScanMap { inner: self.inner }
    }
}

/// Read only view of a completed [`ParentScanMap`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrozenParentScanMap {
    inner: HashMap<u32, u32>,
}

impl FrozenParentScanMap {
    pub fn get(&self, precursor_id: u32) -> Option<u32> {
        self.inner.get(&precursor_id).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// All scans of a run, in scan number order.
#[derive(Debug, Clone)]
pub struct ScanList {
    pub scans: Vec<TimsDataScan>,
    pub parent_scans: FrozenParentScanMap,
    /// sorted, unique
    pub faulty_frames: Vec<u32>,
    pub mode: AcquisitionMode,
}

impl ScanList {
    pub fn len(&self) -> usize {
        self.scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scans.is_empty()
    }

    /// Scan by its one based number.
    pub fn get(&self, scan_number: u32) -> Option<&TimsDataScan> {
        self.scans.get((scan_number as usize).checked_sub(1)?)
    }

    pub fn count(&self, order: MsOrder) -> usize {
        self.scans.iter().filter(|s| s.ms_order == order).count()
    }
}

/// Result of one independently built unit, usually a frame.
enum UnitOutcome<T> {
    Faulty(u32),
    Built(T),
}

/// Per frame contribution to each PASEF precursor: `(record index, component, raw tic)`.
type FrameComponents = Vec<(usize, MergedPeaks, f64)>;

/// Reconstructs scans from frames.
///
/// Frames are read and merged in parallel, numbering is a sequential pass over
/// the collected results so scan numbers never depend on completion order.
pub struct ScanBuilder<'a> {
    frames: &'a dyn FrameSource,
    converter: &'a dyn IndexConverter,
    mobility: &'a LookupIndexConverter,
    frame_meta: &'a BTreeMap<u32, FrameMeta>,
    config: &'a ReaderConfig,
}

impl<'a> ScanBuilder<'a> {
    pub fn new(
        frames: &'a dyn FrameSource,
        converter: &'a dyn IndexConverter,
        mobility: &'a LookupIndexConverter,
        frame_meta: &'a BTreeMap<u32, FrameMeta>,
        config: &'a ReaderConfig,
    ) -> Self {
        ScanBuilder {
            frames,
            converter,
            mobility,
            frame_meta,
            config,
        }
    }

    /// Builds and numbers every scan of the run.
    pub fn build(&self, prefetch: &Prefetch) -> Result<ScanList> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.config.max_threads)
            .build()?;

        match prefetch.mode {
            AcquisitionMode::MRM => self.build_mrm(&pool, prefetch),
            _ => self.build_ms1_ms2(&pool, prefetch),
        }
    }

    fn build_ms1_ms2(&self, pool: &ThreadPool, prefetch: &Prefetch) -> Result<ScanList> {
        // phase 1: MS1
        let outcomes: Vec<Result<UnitOutcome<Vec<TimsDataScan>>>> = pool.install(|| {
            prefetch
                .ms1_frame_ids
                .par_iter()
                .map(|&frame_id| -> Result<UnitOutcome<Vec<TimsDataScan>>> {
                    let records = prefetch.ms1_records.get(&frame_id).map(Vec::as_slice);
                    match self.load_frame_or_skip(frame_id)? {
                        Some(frame) => Ok(UnitOutcome::Built(self.ms1_scans(&frame, records)?)),
                        None => Ok(UnitOutcome::Faulty(frame_id)),
                    }
                })
                .collect()
        });

        let mut scans: Vec<TimsDataScan> = Vec::new();
        let mut faulty_frames = Vec::new();
        let mut parents = ParentScanMap::default();

        for outcome in outcomes {
            match outcome? {
                UnitOutcome::Faulty(frame_id) => faulty_frames.push(frame_id),
                UnitOutcome::Built(frame_scans) => {
                    for mut scan in frame_scans {
                        scan.scan_number = scans.len() as u32 + 1;
                        if let Some(precursor_id) = scan.precursor_id() {
                            parents.insert(precursor_id, scan.scan_number)?;
                        }
                        scans.push(scan);
                    }
                }
            }
        }
        let parent_scans = parents.freeze();
        log::info!(
            "built {} MS1 scans, {} precursors linked",
            scans.len(),
            parent_scans.len()
        );

        // phase 2: MS2
        let (ms2_scans, ms2_faulty) = self.pasef_scans(pool, &prefetch.pasef_records)?;
        faulty_frames.extend(ms2_faulty);
        let ms1_count = scans.len();

        for mut scan in ms2_scans {
            scan.scan_number = scans.len() as u32 + 1;
            scan.parent_scan_number = scan.precursor_id().and_then(|p| parent_scans.get(p));
            scans.push(scan);
        }
        log::info!("built {} MS2 scans", scans.len() - ms1_count);

        faulty_frames.sort_unstable();
        faulty_frames.dedup();

        Ok(ScanList {
            scans,
            parent_scans,
            faulty_frames,
            mode: prefetch.mode,
        })
    }

    fn build_mrm(&self, pool: &ThreadPool, prefetch: &Prefetch) -> Result<ScanList> {
        let outcomes: Vec<Result<UnitOutcome<Option<TimsDataScan>>>> = pool.install(|| {
            prefetch
                .mrm_records
                .par_iter()
                .map(|record| -> Result<UnitOutcome<Option<TimsDataScan>>> {
                    match self.load_frame_or_skip(record.frame_id)? {
                        Some(frame) => Ok(UnitOutcome::Built(self.mrm_scan(&frame, record)?)),
                        None => Ok(UnitOutcome::Faulty(record.frame_id)),
                    }
                })
                .collect()
        });

        let mut scans = Vec::new();
        let mut faulty_frames = Vec::new();
        for outcome in outcomes {
            match outcome? {
                UnitOutcome::Faulty(frame_id) => faulty_frames.push(frame_id),
                UnitOutcome::Built(None) => (),
                UnitOutcome::Built(Some(mut scan)) => {
                    scan.scan_number = scans.len() as u32 + 1;
                    scans.push(scan);
                }
            }
        }
        log::info!("built {} MRM scans", scans.len());
        faulty_frames.sort_unstable();
        faulty_frames.dedup();

        Ok(ScanList {
            scans,
            parent_scans: FrozenParentScanMap::default(),
            faulty_frames,
            mode: prefetch.mode,
        })
    }

    /// Frame table row of `frame_id`; a frame referenced by precursor
    /// metadata but absent from the table is a contract violation.
    pub fn frame_meta(&self, frame_id: u32) -> Result<&'a FrameMeta> {
        self.frame_meta.get(&frame_id).ok_or_else(|| {
            TimsError::ContractViolation(format!("frame {} has no row in the Frames table", frame_id))
        })
    }

    /// Reads and validates one frame.
    pub fn load_frame(&self, frame_id: u32) -> Result<FrameDecoder> {
        let num_scans = self.frame_meta(frame_id)?.num_scans;
        let payload = self.frames.read_frame(frame_id, num_scans)?;
        Ok(FrameDecoder::new(frame_id, payload, num_scans as usize)?)
    }

    /// Like [`load_frame`](Self::load_frame), but a frame that cannot be read
    /// or decoded is logged and reported as `None`.
    fn load_frame_or_skip(&self, frame_id: u32) -> Result<Option<FrameDecoder>> {
        self.frame_meta(frame_id)?;
        match self.load_frame(frame_id) {
            Ok(frame) => Ok(Some(frame)),
            Err(e) => {
                log::warn!("skipping faulty frame {}: {}", frame_id, e);
                Ok(None)
            }
        }
    }

    /// Calibrates and merges the one based sub-scans `[scan_start, scan_end)`.
    ///
    /// Returns the merged peaks and the summed raw intensity.
    fn merge_frame_range(
        &self,
        frame: &FrameDecoder,
        scan_start: u32,
        scan_end: u32,
    ) -> Result<(MergedPeaks, f64)> {
        if scan_start == 0 || scan_start > scan_end {
            return Err(TimsError::ContractViolation(format!(
                "frame {}: invalid sub-scan range {}-{}",
                frame.frame_id(),
                scan_start,
                scan_end
            )));
        }
        let sub_scans = frame.sub_scans(scan_start as usize - 1..scan_end as usize - 1)?;

        let tofs: Vec<u32> = sub_scans.iter().flat_map(|(indices, _)| indices.iter().copied()).collect();
        let mz = self.converter.tof_indices_to_mz(frame.frame_id(), &tofs)?;
        if mz.len() != tofs.len() {
            return Err(CalibrationError::LengthMismatch {
                function: "tof_to_mz",
                expected: tofs.len(),
                actual: mz.len(),
            }
            .into());
        }

        let mut positions: Vec<&[f64]> = Vec::with_capacity(sub_scans.len());
        let mut start = 0;
        for (indices, _) in &sub_scans {
            positions.push(&mz[start..start + indices.len()]);
            start += indices.len();
        }
        let intensities: Vec<&[u32]> = sub_scans.iter().map(|&(_, i)| i).collect();
        let tic: f64 = intensities.iter().flat_map(|i| i.iter()).map(|&v| v as f64).sum();

        let merged = merge_peak_arrays(&positions, &intensities, &self.config.tolerance)?;
        Ok((merged, tic))
    }

    fn finish_spectrum(&self, merged: MergedPeaks, order: MsOrder) -> MzSpectrum {
        let spectrum = MzSpectrum::from_peaks(merged.positions, &merged.intensities);
        self.config.trim.apply(spectrum, order)
    }

    /// Unnumbered MS1 scans of one frame: one per record, or a single whole
    /// frame scan when the frame has no records.
    pub fn ms1_scans(&self, frame: &FrameDecoder, records: Option<&[Ms1Record]>) -> Result<Vec<TimsDataScan>> {
        let whole_frame;
        let records = match records {
            Some(records) if !records.is_empty() => records,
            _ => {
                whole_frame = [Ms1Record::whole_frame(frame.frame_id(), frame.num_scans() as u32)];
                &whole_frame[..]
            }
        };

        let mut scans = Vec::with_capacity(records.len());
        for record in records {
            if let Some(scan) = self.ms1_scan(frame, record)? {
                scans.push(scan);
            }
        }
        Ok(scans)
    }

    pub fn ms1_scan(&self, frame: &FrameDecoder, record: &Ms1Record) -> Result<Option<TimsDataScan>> {
        let (merged, tic) = self.merge_frame_range(frame, record.scan_start, record.scan_end)?;
        let spectrum = self.finish_spectrum(merged, MsOrder::Ms1);
        if spectrum.is_empty() {
            log::debug!(
                "frame {}: no peaks for precursor {:?} in scans {}-{}",
                frame.frame_id(),
                record.precursor_id,
                record.scan_start,
                record.scan_end
            );
            return Ok(None);
        }

        let meta = self.frame_meta(frame.frame_id())?;
        let origin = match record.precursor_id {
            Some(precursor_id) => ScanOrigin::Precursor {
                frame_id: frame.frame_id(),
                precursor_id,
            },
            None => ScanOrigin::WholeFrame {
                frame_id: frame.frame_id(),
            },
        };

        Ok(Some(TimsDataScan {
            scan_number: 0,
            ms_order: MsOrder::Ms1,
            spectrum,
            parent_scan_number: None,
            origin,
            scan_start: record.scan_start,
            scan_end: record.scan_end,
            polarity: Polarity::from(meta.polarity.as_str()),
            retention_time: meta.time / 60.0,
            injection_time: meta.accumulation_time,
            total_ion_current: tic,
            median_one_over_k0: self.mobility.one_over_k0_at(record.scan_median),
            precursor: None,
        }))
    }

    fn mrm_scan(&self, frame: &FrameDecoder, record: &MrmRecord) -> Result<Option<TimsDataScan>> {
        let (merged, tic) = self.merge_frame_range(frame, record.scan_start, record.scan_end)?;
        let spectrum = self.finish_spectrum(merged, MsOrder::Ms2);
        if spectrum.is_empty() {
            log::debug!("MRM frame {}: no peaks", record.frame_id);
            return Ok(None);
        }

        let meta = self.frame_meta(record.frame_id)?;
        let scan_median = (record.scan_start + record.scan_end) as f64 / 2.0;

        Ok(Some(TimsDataScan {
            scan_number: 0,
            ms_order: MsOrder::Ms2,
            spectrum,
            parent_scan_number: None,
            origin: ScanOrigin::WholeFrame {
                frame_id: record.frame_id,
            },
            scan_start: record.scan_start,
            scan_end: record.scan_end,
            polarity: Polarity::from(meta.polarity.as_str()),
            retention_time: meta.time / 60.0,
            injection_time: meta.accumulation_time,
            total_ion_current: tic,
            median_one_over_k0: self.mobility.one_over_k0_at(scan_median),
            precursor: Some(PrecursorInfo {
                selected_ion_mz: None,
                charge: None,
                intensity: None,
                isolation_mz: record.isolation_mz,
                isolation_width: record.isolation_width,
                collision_energy: record.collision_energy,
                monoisotopic_mz: None,
            }),
        }))
    }

    /// Unnumbered PASEF scans in ascending precursor id, plus faulty frames.
    ///
    /// Every frame is decoded once; its per precursor components are then
    /// merged across frames in frame order.
    fn pasef_scans(&self, pool: &ThreadPool, records: &[PasefRecord]) -> Result<(Vec<TimsDataScan>, Vec<u32>)> {
        let mut users: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (index, record) in records.iter().enumerate() {
            for &frame_id in &record.frame_ids {
                users.entry(frame_id).or_default().push(index);
            }
        }
        let frames: Vec<(u32, Vec<usize>)> = users.into_iter().collect();

        let outcomes: Vec<Result<UnitOutcome<FrameComponents>>> = pool.install(|| {
            frames
                .par_iter()
                .map(|(frame_id, users)| -> Result<UnitOutcome<FrameComponents>> {
                    let Some(frame) = self.load_frame_or_skip(*frame_id)? else {
                        return Ok(UnitOutcome::Faulty(*frame_id));
                    };
                    let mut components = Vec::with_capacity(users.len());
                    for &index in users {
                        let record = &records[index];
                        let (merged, tic) =
                            self.merge_frame_range(&frame, record.scan_start, record.scan_end)?;
                        components.push((index, merged, tic));
                    }
                    Ok(UnitOutcome::Built(components))
                })
                .collect()
        });

        // frames are visited ascending, so components land in frame list order
        let mut per_record: Vec<(Vec<MergedPeaks>, f64)> = vec![(Vec::new(), 0.0); records.len()];
        let mut faulty = Vec::new();
        for outcome in outcomes {
            match outcome? {
                UnitOutcome::Faulty(frame_id) => faulty.push(frame_id),
                UnitOutcome::Built(components) => {
                    for (index, merged, tic) in components {
                        per_record[index].0.push(merged);
                        per_record[index].1 += tic;
                    }
                }
            }
        }

        let built: Vec<Result<Option<TimsDataScan>>> = pool.install(|| {
            records
                .par_iter()
                .zip(per_record.par_iter())
                .map(|(record, (components, tic))| self.pasef_scan(record, components, *tic))
                .collect()
        });

        let mut scans = Vec::with_capacity(records.len());
        for scan in built {
            if let Some(scan) = scan? {
                scans.push(scan);
            }
        }
        Ok((scans, faulty))
    }

    /// One unnumbered PASEF scan, reading its frames sequentially.
    pub fn pasef_scan_for_record(&self, record: &PasefRecord) -> Result<Option<TimsDataScan>> {
        let mut components = Vec::with_capacity(record.frame_ids.len());
        let mut tic = 0.0;
        for &frame_id in &record.frame_ids {
            let frame = self.load_frame(frame_id)?;
            let (merged, frame_tic) = self.merge_frame_range(&frame, record.scan_start, record.scan_end)?;
            components.push(merged);
            tic += frame_tic;
        }
        self.pasef_scan(record, &components, tic)
    }

    fn pasef_scan(&self, record: &PasefRecord, components: &[MergedPeaks], tic: f64) -> Result<Option<TimsDataScan>> {
        let positions: Vec<&[f64]> = components.iter().map(|c| c.positions.as_slice()).collect();
        let intensities: Vec<&[u64]> = components.iter().map(|c| c.intensities.as_slice()).collect();
        let merged = merge_peak_arrays(&positions, &intensities, &self.config.tolerance)?;

        let spectrum = self.finish_spectrum(merged, MsOrder::Ms2);
        if spectrum.is_empty() {
            log::debug!("precursor {}: no fragment peaks", record.precursor_id);
            return Ok(None);
        }

        let (first, last) = match (record.frame_ids.first(), record.frame_ids.last()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => return Ok(None),
        };
        let meta = self.frame_meta(first)?;
        let injection_time: f64 = self
            .frame_meta
            .range(first..=last)
            .map(|(_, frame)| frame.accumulation_time)
            .sum();

        Ok(Some(TimsDataScan {
            scan_number: 0,
            ms_order: MsOrder::Ms2,
            spectrum,
            parent_scan_number: None,
            origin: ScanOrigin::Pasef {
                frame_ids: record.frame_ids.clone(),
                precursor_id: record.precursor_id,
            },
            scan_start: record.scan_start,
            scan_end: record.scan_end,
            polarity: Polarity::from(meta.polarity.as_str()),
            retention_time: meta.time / 60.0,
            injection_time,
            total_ion_current: tic,
            median_one_over_k0: self.mobility.one_over_k0_at(record.scan_median),
            precursor: Some(PrecursorInfo {
                selected_ion_mz: Some(record.largest_peak_mz),
                charge: Some(record.charge),
                intensity: Some(record.intensity),
                isolation_mz: record.isolation_mz,
                isolation_width: record.isolation_width,
                collision_energy: record.collision_energy,
                monoisotopic_mz: Some(record.monoisotopic_mz),
            }),
        }))
    }
}
