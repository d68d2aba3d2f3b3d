use byteorder::{ByteOrder, LittleEndian};
use std::io;
use std::io::Read;

use crate::error::FrameError;

/// Decompresses a ZSTD compressed byte array
///
/// # Arguments
///
/// * `compressed_data` - A byte slice that holds the compressed data
///
/// # Returns
///
/// * `decompressed_data` - A vector of u8 that holds the decompressed data
///
pub fn zstd_decompress(compressed_data: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = zstd::Decoder::new(compressed_data)?;
    let mut decompressed_data = Vec::new();
    decoder.read_to_end(&mut decompressed_data)?;
    Ok(decompressed_data)
}

/// Compresses a byte array using ZSTD
#[cfg(test)]
pub(crate) fn zstd_compress(decompressed_data: &[u8], compression_level: i32) -> io::Result<Vec<u8>> {
    use std::io::Write;
    let mut encoder = zstd::Encoder::new(Vec::new(), compression_level)?;
    encoder.write_all(decompressed_data)?;
    encoder.finish()
}

pub fn lzf_decompress(frame_id: u32, data: &[u8], max_output_size: usize) -> Result<Vec<u8>, FrameError> {
    lzf::decompress(data, max_output_size).map_err(|e| FrameError::Decompression {
        frame_id,
        reason: format!("LZF decompression failed: {}", e),
    })
}

/// Lays per sub-scan peaks out as a frame payload: `num_scans` counts, then
/// for every sub-scan its TOF indices followed by its intensities.
///
/// Missing trailing counts are padded with zero, surplus sub-scans are dropped.
pub fn assemble_payload(counts: &[u32], tof_indices: &[u32], intensities: &[u32], num_scans: usize) -> Vec<u32> {
    let mut counts: Vec<u32> = counts.to_vec();
    counts.resize(num_scans, 0);

    let kept: usize = counts.iter().map(|&c| c as usize).sum();
    let mut payload = Vec::with_capacity(num_scans + 2 * kept);
    payload.extend_from_slice(&counts);

    let mut start = 0usize;
    for &count in &counts {
        let end = start + count as usize;
        payload.extend_from_slice(&tof_indices[start..end]);
        payload.extend_from_slice(&intensities[start..end]);
        start = end;
    }
    payload
}

/// Parses a decompressed compression type 2 frame into a payload.
///
/// The decompressed bytes are a byte-transposed u32 buffer: the sub-scan count,
/// then doubled peak counts of sub-scans `0..N-1` (the last one is implied),
/// then interleaved (TOF delta, intensity) pairs. TOF deltas restart at every
/// sub-scan and are one based.
///
/// # Arguments
///
/// * `frame_id` - id of the frame, used in error reports
/// * `decompressed_bytes` - A byte slice that holds the decompressed data
/// * `num_scans` - sub-scan count of the frame from the frame table
///
pub fn parse_decompressed_bruker_binary_data(
    frame_id: u32,
    decompressed_bytes: &[u8],
    num_scans: usize,
) -> Result<Vec<u32>, FrameError> {
    if decompressed_bytes.len() % 4 != 0 {
        return Err(FrameError::Misaligned {
            frame_id,
            len: decompressed_bytes.len(),
        });
    }

    let n = decompressed_bytes.len() / 4;
    let buffer_u32: Vec<u32> = (0..n)
        .map(|i| {
            LittleEndian::read_u32(&[
                decompressed_bytes[i],
                decompressed_bytes[i + n],
                decompressed_bytes[i + 2 * n],
                decompressed_bytes[i + 3 * n],
            ])
        })
        .collect();

    let scan_count = match buffer_u32.first() {
        Some(&count) if (count as usize) <= n && count > 0 => count as usize,
        _ => {
            return Err(FrameError::Truncated {
                frame_id,
                required: 1,
                available: n,
            })
        }
    };

    let pairs = &buffer_u32[scan_count..];
    let total_peaks = pairs.len() / 2;

    let mut counts: Vec<u32> = buffer_u32[1..scan_count].iter().map(|&c| c / 2).collect();
    let listed: usize = counts.iter().map(|&c| c as usize).sum();
    let last = total_peaks.checked_sub(listed).ok_or(FrameError::Truncated {
        frame_id,
        required: scan_count + 2 * listed,
        available: n,
    })?;
    counts.push(last as u32);

    let mut tof_indices = Vec::with_capacity(total_peaks);
    let mut intensities = Vec::with_capacity(total_peaks);
    let mut peak = 0usize;
    for &count in &counts {
        let mut current_sum = 0u32;
        for _ in 0..count {
            current_sum = current_sum.wrapping_add(pairs[2 * peak]);
            // zero based
            tof_indices.push(current_sum.wrapping_sub(1));
            intensities.push(pairs[2 * peak + 1]);
            peak += 1;
        }
    }

    Ok(assemble_payload(&counts, &tof_indices, &intensities, num_scans))
}

/// Parses one decompressed compression type 1 sub-scan.
///
/// Non-negative values are intensities at the next TOF index, negative values
/// skip ahead by their magnitude. Returns the number of peaks appended.
pub fn parse_decompressed_bruker_binary_type1(
    decompressed_bytes: &[u8],
    tof_indices: &mut Vec<u32>,
    intensities: &mut Vec<u32>,
) -> usize {
    let mut tof_index = -1i64;
    let mut previous_was_intensity = true;
    let mut peaks = 0usize;

    for chunk in decompressed_bytes.chunks_exact(4) {
        let value = LittleEndian::read_i32(chunk);
        if value >= 0 {
            if previous_was_intensity {
                tof_index += 1;
            }
            tof_indices.push(tof_index as u32);
            intensities.push(value as u32);
            previous_was_intensity = true;
            peaks += 1;
        } else {
            tof_index -= value as i64;
            previous_was_intensity = false;
        }
    }
    peaks
}

/// Encodes per sub-scan peaks as a compression type 2 frame blob, header included.
///
/// `tof_indices` are zero based; `counts` lists the peaks of every sub-scan.
#[cfg(test)]
pub(crate) fn compress_frame_type2(
    counts: &[u32],
    tof_indices: &[u32],
    intensities: &[u32],
    compression_level: i32,
) -> io::Result<Vec<u8>> {
    let total_scans = counts.len() as u32;

    let mut values: Vec<u32> = Vec::with_capacity(counts.len() + 2 * tof_indices.len());
    values.push(total_scans);
    values.extend(counts.iter().take(counts.len().saturating_sub(1)).map(|&c| c * 2));

    let mut start = 0usize;
    for &count in counts {
        let mut last_tof = -1i64;
        for peak in start..start + count as usize {
            let tof = tof_indices[peak] as i64;
            values.push((tof - last_tof) as u32);
            values.push(intensities[peak]);
            last_tof = tof;
        }
        start += count as usize;
    }

    let n = values.len();
    let mut transposed = vec![0u8; n * 4];
    for (i, value) in values.iter().enumerate() {
        for (byte_index, byte) in value.to_le_bytes().into_iter().enumerate() {
            transposed[i + byte_index * n] = byte;
        }
    }

    let compressed_data = zstd_compress(&transposed, compression_level)?;

    let mut final_data = Vec::with_capacity(compressed_data.len() + 8);
    final_data.extend_from_slice(&(compressed_data.len() as u32 + 8).to_le_bytes());
    final_data.extend_from_slice(&total_scans.to_le_bytes());
    final_data.extend_from_slice(&compressed_data);
    Ok(final_data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_payload_pads_and_drops() {
        let payload = assemble_payload(&[1, 2], &[5, 6, 7], &[50, 60, 70], 3);
        assert_eq!(payload, vec![1, 2, 0, 5, 50, 6, 7, 60, 70]);

        let payload = assemble_payload(&[1, 2], &[5, 6, 7], &[50, 60, 70], 1);
        assert_eq!(payload, vec![1, 5, 50]);
    }

    #[test]
    fn test_type2_blob_decodes_into_payload() {
        let counts = [2, 0, 1];
        let tofs = [10, 15, 3];
        let intensities = [100, 150, 30];

        let blob = compress_frame_type2(&counts, &tofs, &intensities, 1).unwrap();
        let declared = LittleEndian::read_u32(&blob[0..4]) as usize;
        assert_eq!(declared, blob.len());
        assert_eq!(LittleEndian::read_u32(&blob[4..8]), 3);

        let decompressed = zstd_decompress(&blob[8..]).unwrap();
        let payload = parse_decompressed_bruker_binary_data(1, &decompressed, 3).unwrap();
        assert_eq!(payload, vec![2, 0, 1, 10, 15, 100, 150, 3, 30]);
    }

    #[test]
    fn test_type2_rejects_garbage() {
        assert!(matches!(
            parse_decompressed_bruker_binary_data(1, &[1, 2, 3], 1),
            Err(FrameError::Misaligned { len: 3, .. })
        ));
        assert!(matches!(
            parse_decompressed_bruker_binary_data(1, &[], 1),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn test_type1_tof_jumps() {
        let values: [i32; 5] = [7, -3, 9, 4, -1];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let mut tofs = Vec::new();
        let mut intensities = Vec::new();

        let peaks = parse_decompressed_bruker_binary_type1(&bytes, &mut tofs, &mut intensities);
        assert_eq!(peaks, 3);
        assert_eq!(tofs, vec![0, 3, 4]);
        assert_eq!(intensities, vec![7, 9, 4]);
    }
}
