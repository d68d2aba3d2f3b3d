use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::data::meta::FrameMeta;
use crate::data::raw::SharedTimsLibrary;
use crate::data::utility::{
    assemble_payload, lzf_decompress, parse_decompressed_bruker_binary_data,
    parse_decompressed_bruker_binary_type1, zstd_decompress,
};
use crate::error::{FrameError, Result, TimsError};

/// Produces raw frame payloads in the layout read by
/// [`FrameDecoder`](crate::data::frame::FrameDecoder).
pub trait FrameSource: Send + Sync {
    fn read_frame(&self, frame_id: u32, num_scans: u32) -> Result<Vec<u32>>;
}

/// Frames read through `tims_read_scans_v2`.
pub struct BrukerLibFrameSource {
    bruker_lib: SharedTimsLibrary,
}

impl BrukerLibFrameSource {
    pub fn new(bruker_lib: SharedTimsLibrary) -> Self {
        BrukerLibFrameSource { bruker_lib }
    }
}

impl FrameSource for BrukerLibFrameSource {
    fn read_frame(&self, frame_id: u32, num_scans: u32) -> Result<Vec<u32>> {
        Ok(self.bruker_lib.read_frame(frame_id, num_scans)?)
    }
}

#[derive(Debug, Clone, Copy)]
struct FrameLocation {
    offset: u64,
    num_peaks: u32,
}

/// Frames read straight from `analysis.tdf_bin`, without the vendor library.
///
/// Every read opens its own file handle, so reads can run in parallel.
pub struct TdfBinFrameSource {
    bin_path: PathBuf,
    compression_type: i64,
    frames: HashMap<u32, FrameLocation>,
}

impl TdfBinFrameSource {
    pub fn new(data_path: &Path, compression_type: i64, frame_meta: &[FrameMeta]) -> Result<Self> {
        if compression_type != 1 && compression_type != 2 {
            return Err(TimsError::Metadata(format!(
                "TimsCompressionType {} is not 1 or 2",
                compression_type
            )));
        }
        let frames = frame_meta
            .iter()
            .map(|frame| {
                (
                    frame.id,
                    FrameLocation {
                        offset: frame.tims_id,
                        num_peaks: frame.num_peaks,
                    },
                )
            })
            .collect();
        Ok(TdfBinFrameSource {
            bin_path: data_path.join("analysis.tdf_bin"),
            compression_type,
            frames,
        })
    }

    fn read_type2(&self, frame_id: u32, infile: &mut File, bin_size: usize, num_scans: u32) -> Result<Vec<u32>> {
        let mut compressed_data = vec![0u8; bin_size.saturating_sub(8)];
        infile.read_exact(&mut compressed_data)?;

        let decompressed_bytes = zstd_decompress(&compressed_data).map_err(|e| FrameError::Decompression {
            frame_id,
            reason: e.to_string(),
        })?;
        Ok(parse_decompressed_bruker_binary_data(
            frame_id,
            &decompressed_bytes,
            num_scans as usize,
        )?)
    }

    fn read_type1(
        &self,
        frame_id: u32,
        infile: &mut File,
        bin_size: usize,
        num_scans: u32,
        num_peaks: u32,
    ) -> Result<Vec<u32>> {
        let scan_count = num_scans as usize;
        let compression_offset = 8 + (scan_count + 1) * 4;

        let mut scan_offsets_buffer = vec![0u8; (scan_count + 1) * 4];
        infile.read_exact(&mut scan_offsets_buffer)?;

        let mut scan_offsets = Vec::with_capacity(scan_count + 1);
        let mut rdr = Cursor::new(&scan_offsets_buffer);
        for _ in 0..(scan_count + 1) {
            let offset = rdr.read_i32::<LittleEndian>()? as i64 - compression_offset as i64;
            scan_offsets.push(offset.max(0) as usize);
        }

        let remaining_size = bin_size.saturating_sub(compression_offset);
        let mut compressed_data = vec![0u8; remaining_size];
        infile.read_exact(&mut compressed_data)?;

        let max_output_size = num_peaks as usize * 8;
        let mut counts = Vec::with_capacity(scan_count);
        let mut tof_indices = Vec::with_capacity(num_peaks as usize);
        let mut intensities = Vec::with_capacity(num_peaks as usize);

        for scan_index in 0..scan_count {
            let (start, end) = (scan_offsets[scan_index], scan_offsets[scan_index + 1]);
            if start >= end {
                counts.push(0);
                continue;
            }
            if end > compressed_data.len() {
                return Err(FrameError::Truncated {
                    frame_id,
                    required: end,
                    available: compressed_data.len(),
                }
                .into());
            }
            let decompressed_bytes = lzf_decompress(frame_id, &compressed_data[start..end], max_output_size)?;
            let peaks = parse_decompressed_bruker_binary_type1(
                &decompressed_bytes,
                &mut tof_indices,
                &mut intensities,
            );
            counts.push(peaks as u32);
        }

        Ok(assemble_payload(&counts, &tof_indices, &intensities, scan_count))
    }
}

impl FrameSource for TdfBinFrameSource {
    fn read_frame(&self, frame_id: u32, num_scans: u32) -> Result<Vec<u32>> {
        let location = *self.frames.get(&frame_id).ok_or(FrameError::Missing(frame_id))?;

        // empty frames may have no blob at all
        if location.num_peaks == 0 {
            return Ok(vec![0; num_scans as usize]);
        }

        let mut infile = File::open(&self.bin_path)?;
        infile.seek(SeekFrom::Start(location.offset))?;

        let bin_size = infile.read_u32::<LittleEndian>()? as usize;
        // scan count as stored in the blob, the frame table is authoritative
        let _ = infile.read_u32::<LittleEndian>()?;

        match self.compression_type {
            1 => self.read_type1(frame_id, &mut infile, bin_size, num_scans, location.num_peaks),
            _ => self.read_type2(frame_id, &mut infile, bin_size, num_scans),
        }
    }
}

/// Payloads kept in memory, keyed by frame id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFrameSource {
    frames: HashMap<u32, Vec<u32>>,
}

impl InMemoryFrameSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, frame_id: u32, payload: Vec<u32>) {
        self.frames.insert(frame_id, payload);
    }

    /// Stores a frame given as per sub-scan `(tof_indices, intensities)` pairs.
    pub fn insert_sub_scans(&mut self, frame_id: u32, sub_scans: &[(Vec<u32>, Vec<u32>)]) {
        let counts: Vec<u32> = sub_scans.iter().map(|(tof, _)| tof.len() as u32).collect();
        let tofs: Vec<u32> = sub_scans.iter().flat_map(|(tof, _)| tof.iter().copied()).collect();
        let intensities: Vec<u32> = sub_scans.iter().flat_map(|(_, i)| i.iter().copied()).collect();
        self.insert(
            frame_id,
            assemble_payload(&counts, &tofs, &intensities, sub_scans.len()),
        );
    }
}

impl FrameSource for InMemoryFrameSource {
    fn read_frame(&self, frame_id: u32, _num_scans: u32) -> Result<Vec<u32>> {
        self.frames
            .get(&frame_id)
            .cloned()
            .ok_or_else(|| FrameError::Missing(frame_id).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::frame::FrameDecoder;
    use crate::data::utility::compress_frame_type2;
    use std::io::Write;

    fn frame_meta(id: u32, tims_id: u64, num_scans: u32, num_peaks: u32) -> FrameMeta {
        FrameMeta {
            id,
            time: 1.0,
            polarity: "+".to_string(),
            scan_mode: 8,
            ms_ms_type: 0,
            tims_id,
            num_scans,
            num_peaks,
            accumulation_time: 100.0,
        }
    }

    #[test]
    fn test_tdf_bin_type2_frames() {
        let dir = tempfile::tempdir().unwrap();

        let first = compress_frame_type2(&[1, 2], &[4, 8, 9], &[40, 80, 90], 1).unwrap();
        let second = compress_frame_type2(&[0, 0, 1], &[7], &[70], 1).unwrap();

        let mut file = File::create(dir.path().join("analysis.tdf_bin")).unwrap();
        file.write_all(&first).unwrap();
        file.write_all(&second).unwrap();

        let frames = vec![
            frame_meta(1, 0, 2, 3),
            frame_meta(2, first.len() as u64, 3, 1),
            frame_meta(3, 0, 4, 0),
        ];
        let source = TdfBinFrameSource::new(dir.path(), 2, &frames).unwrap();

        let decoded = FrameDecoder::new(1, source.read_frame(1, 2).unwrap(), 2).unwrap();
        assert_eq!(decoded.index_slice(1).unwrap(), &[8, 9]);
        assert_eq!(decoded.intensity_slice(1).unwrap(), &[80, 90]);

        let decoded = FrameDecoder::new(2, source.read_frame(2, 3).unwrap(), 3).unwrap();
        assert_eq!(decoded.index_slice(2).unwrap(), &[7]);
        assert!(decoded.index_slice(0).unwrap().is_empty());

        assert_eq!(source.read_frame(3, 4).unwrap(), vec![0, 0, 0, 0]);
        assert!(matches!(
            source.read_frame(9, 1),
            Err(TimsError::Frame(FrameError::Missing(9)))
        ));
    }

    #[test]
    fn test_rejects_unknown_compression() {
        let dir = tempfile::tempdir().unwrap();
        assert!(TdfBinFrameSource::new(dir.path(), 3, &[]).is_err());
    }

    #[test]
    fn test_in_memory_sub_scans() {
        let mut source = InMemoryFrameSource::new();
        source.insert_sub_scans(5, &[(vec![1, 2], vec![10, 20]), (vec![], vec![])]);
        let decoded = FrameDecoder::new(5, source.read_frame(5, 2).unwrap(), 2).unwrap();
        assert_eq!(decoded.sub_scan_peak_count(0).unwrap(), 2);
        assert_eq!(decoded.sub_scan_peak_count(1).unwrap(), 0);
    }
}
