use byteorder::{ByteOrder, LittleEndian};
use std::ops::Range;

use crate::error::FrameError;

/// A decoded frame payload.
///
/// Layout: `N` u32 peak counts, then for every sub-scan `i` its index array
/// followed by its intensity array, each `count[i]` entries long.
/// The prefix sums over the counts are built once at construction, after which
/// every slice accessor is O(1) and borrows from the owned payload.
#[derive(Clone, Debug)]
pub struct FrameDecoder {
    frame_id: u32,
    payload: Vec<u32>,
    offsets: Vec<usize>,
}

impl FrameDecoder {
    /// Validates `payload` against `num_scans` declared sub-scans.
    ///
    /// # Arguments
    ///
    /// * `frame_id` - id of the frame, used in error reports
    /// * `payload` - the raw frame buffer
    /// * `num_scans` - number of sub-scans the frame declares
    ///
    /// # Example
    ///
    /// ```
    /// use timsdf::data::frame::FrameDecoder;
    ///
    /// let frame = FrameDecoder::new(1, vec![1, 0, 7, 42], 2).unwrap();
    /// assert_eq!(frame.index_slice(0).unwrap(), &[7]);
    /// assert_eq!(frame.intensity_slice(0).unwrap(), &[42]);
    /// assert!(frame.index_slice(1).unwrap().is_empty());
    /// ```
    pub fn new(frame_id: u32, payload: Vec<u32>, num_scans: usize) -> Result<Self, FrameError> {
        if payload.len() < num_scans {
            return Err(FrameError::Truncated {
                frame_id,
                required: num_scans,
                available: payload.len(),
            });
        }

        let mut offsets = Vec::with_capacity(num_scans + 1);
        offsets.push(0usize);
        let mut total = 0usize;
        for &count in &payload[..num_scans] {
            total += count as usize;
            offsets.push(total);
        }

        let required = num_scans + 2 * total;
        if required > payload.len() {
            return Err(FrameError::Truncated {
                frame_id,
                required,
                available: payload.len(),
            });
        }

        Ok(FrameDecoder {
            frame_id,
            payload,
            offsets,
        })
    }

    /// Builds a decoder from a little endian byte buffer.
    pub fn from_le_bytes(frame_id: u32, bytes: &[u8], num_scans: usize) -> Result<Self, FrameError> {
        if bytes.len() % 4 != 0 {
            return Err(FrameError::Misaligned {
                frame_id,
                len: bytes.len(),
            });
        }
        let mut payload = vec![0u32; bytes.len() / 4];
        LittleEndian::read_u32_into(bytes, &mut payload);
        FrameDecoder::new(frame_id, payload, num_scans)
    }

    pub fn frame_id(&self) -> u32 {
        self.frame_id
    }

    pub fn num_scans(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Total number of peaks over all sub-scans.
    pub fn total_peaks(&self) -> usize {
        self.offsets[self.num_scans()]
    }

    fn check(&self, index: usize) -> Result<(), FrameError> {
        if index >= self.num_scans() {
            return Err(FrameError::IndexOutOfRange {
                frame_id: self.frame_id,
                index,
                count: self.num_scans(),
            });
        }
        Ok(())
    }

    pub fn sub_scan_peak_count(&self, index: usize) -> Result<usize, FrameError> {
        self.check(index)?;
        Ok(self.payload[index] as usize)
    }

    /// Boundaries of sub-scan `index` in peak units.
    pub fn peak_range(&self, index: usize) -> Result<Range<usize>, FrameError> {
        self.check(index)?;
        Ok(self.offsets[index]..self.offsets[index + 1])
    }

    pub fn index_slice(&self, index: usize) -> Result<&[u32], FrameError> {
        let count = self.sub_scan_peak_count(index)?;
        let start = self.num_scans() + 2 * self.offsets[index];
        Ok(&self.payload[start..start + count])
    }

    pub fn intensity_slice(&self, index: usize) -> Result<&[u32], FrameError> {
        let count = self.sub_scan_peak_count(index)?;
        let start = self.num_scans() + 2 * self.offsets[index] + count;
        Ok(&self.payload[start..start + count])
    }

    /// Index and intensity slices of every sub-scan in `range`, zero based.
    ///
    /// A range reaching past the last sub-scan is rejected.
    pub fn sub_scans(&self, range: Range<usize>) -> Result<Vec<(&[u32], &[u32])>, FrameError> {
        if range.end > self.num_scans() {
            return Err(FrameError::IndexOutOfRange {
                frame_id: self.frame_id,
                index: range.end - 1,
                count: self.num_scans(),
            });
        }
        range
            .map(|i| Ok((self.index_slice(i)?, self.intensity_slice(i)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_scan_payload() -> Vec<u32> {
        // counts [2, 0, 3]
        let mut payload = vec![2, 0, 3];
        payload.extend([10, 11]); // scan 0 indices
        payload.extend([100, 110]); // scan 0 intensities
        payload.extend([20, 21, 22]); // scan 2 indices
        payload.extend([200, 210, 220]); // scan 2 intensities
        payload
    }

    #[test]
    fn test_decode_three_sub_scans() {
        let frame = FrameDecoder::new(7, three_scan_payload(), 3).unwrap();

        assert_eq!(frame.num_scans(), 3);
        assert_eq!(frame.total_peaks(), 5);

        assert_eq!(frame.sub_scan_peak_count(0).unwrap(), 2);
        assert_eq!(frame.sub_scan_peak_count(1).unwrap(), 0);
        assert_eq!(frame.sub_scan_peak_count(2).unwrap(), 3);

        assert_eq!(frame.peak_range(0).unwrap(), 0..2);
        assert_eq!(frame.peak_range(1).unwrap(), 2..2);
        assert_eq!(frame.peak_range(2).unwrap(), 2..5);

        assert_eq!(frame.index_slice(0).unwrap(), &[10, 11]);
        assert_eq!(frame.intensity_slice(0).unwrap(), &[100, 110]);
        assert!(frame.index_slice(1).unwrap().is_empty());
        assert!(frame.intensity_slice(1).unwrap().is_empty());
        assert_eq!(frame.index_slice(2).unwrap(), &[20, 21, 22]);
        assert_eq!(frame.intensity_slice(2).unwrap(), &[200, 210, 220]);
    }

    #[test]
    fn test_out_of_range_sub_scan() {
        let frame = FrameDecoder::new(7, three_scan_payload(), 3).unwrap();
        assert!(matches!(
            frame.index_slice(3),
            Err(FrameError::IndexOutOfRange { index: 3, count: 3, .. })
        ));
    }

    #[test]
    fn test_truncated_payloads() {
        let mut payload = three_scan_payload();
        payload.pop();
        assert!(matches!(
            FrameDecoder::new(7, payload, 3),
            Err(FrameError::Truncated { required: 13, available: 12, .. })
        ));

        assert!(matches!(
            FrameDecoder::new(7, vec![1], 3),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn test_from_le_bytes() {
        let bytes: Vec<u8> = three_scan_payload()
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let frame = FrameDecoder::from_le_bytes(7, &bytes, 3).unwrap();
        assert_eq!(frame.intensity_slice(2).unwrap(), &[200, 210, 220]);

        assert!(matches!(
            FrameDecoder::from_le_bytes(7, &bytes[..5], 1),
            Err(FrameError::Misaligned { len: 5, .. })
        ));
    }

    #[test]
    fn test_sub_scans_range() {
        let frame = FrameDecoder::new(7, three_scan_payload(), 3).unwrap();
        let scans = frame.sub_scans(1..3).unwrap();
        assert_eq!(scans.len(), 2);
        assert_eq!(scans[1].0, &[20, 21, 22]);
        assert!(frame.sub_scans(3..3).unwrap().is_empty());
        assert!(frame.sub_scans(2..1).unwrap().is_empty());
    }

    #[test]
    fn test_sub_scans_past_the_frame_fail() {
        let frame = FrameDecoder::new(7, three_scan_payload(), 3).unwrap();
        assert!(matches!(
            frame.sub_scans(1..10),
            Err(FrameError::IndexOutOfRange {
                frame_id: 7,
                index: 9,
                count: 3
            })
        ));
        assert!(frame.sub_scans(0..4).is_err());
    }
}
