use std::ops::Range;

use log::{debug, trace};

use crate::err::{FormatError, FormatResult};
use crate::hive::Hive;
use crate::hive_header::{HIVE_HEADER_SIZE, HiveHeader};
use crate::source::{ReadAt, read_available};
use crate::utils::{ByteCursor, bytes};

pub const HIVE_BIN_SIGNATURE: &[u8; 4] = b"hbin";
pub const HIVE_BIN_HEADER_SIZE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiveBinHeader {
    /// Offset of this bin relative to the start of the hive bins data, as stored.
    pub offset: u32,
    pub size: u32,
    /// FILETIME ticks, only meaningful in the first bin.
    pub timestamp: u64,
    pub spare: u32,
}

impl HiveBinHeader {
    /// `position` is the absolute offset of `buf[0]`.
    pub fn from_bytes(buf: &[u8], position: u64) -> FormatResult<HiveBinHeader> {
        let mut cursor = ByteCursor::new(buf, position);
        let magic = cursor.array::<4>("hive bin signature")?;
        if &magic != HIVE_BIN_SIGNATURE {
            return Err(FormatError::BadSignature {
                what: "hive bin",
                offset: position,
                expected: HIVE_BIN_SIGNATURE,
                found: magic.to_vec(),
            });
        }

        let offset = cursor.u32_named("hive bin offset")?;
        let size = cursor.u32_named("hive bin size")?;
        cursor.advance(8, "hive bin reserved")?;
        let timestamp = cursor.u64_named("hive bin timestamp")?;
        let spare = cursor.u32_named("hive bin spare")?;

        Ok(HiveBinHeader {
            offset,
            size,
            timestamp,
            spare,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiveBin {
    /// Absolute offset of the bin header.
    pub position: u64,
    pub header: HiveBinHeader,
}

impl HiveBin {
    /// Absolute byte range of the cells in this bin.
    pub fn data_range(&self) -> Range<u64> {
        self.position + HIVE_BIN_HEADER_SIZE as u64..self.position + u64::from(self.header.size)
    }

    /// Walk the cells of this bin in storage order, allocated or not.
    pub fn cells<'h, S: ReadAt>(&self, hive: &'h Hive<S>) -> BinCells<'h, S> {
        let range = self.data_range();
        BinCells {
            source: hive.source(),
            next: range.start,
            end: range.end,
            done: false,
        }
    }
}

/// Lazy sequence of hive bins, starting right after the base block.
///
/// Ends at a zero sized bin, at the end of the source, or once the declared bins data size is
/// consumed. A bad signature is yielded once as an error, then the sequence ends.
pub struct HiveBins<'h, S: ReadAt + ?Sized> {
    source: &'h S,
    next: u64,
    end: Option<u64>,
    done: bool,
}

impl<'h, S: ReadAt + ?Sized> HiveBins<'h, S> {
    pub fn new(source: &'h S, header: &HiveHeader) -> Self {
        let end = match header.hive_bins_data_size {
            0 => None,
            size => Some(HIVE_HEADER_SIZE as u64 + u64::from(size)),
        };

        HiveBins {
            source,
            next: HIVE_HEADER_SIZE as u64,
            end,
            done: false,
        }
    }
}

impl<S: ReadAt + ?Sized> Iterator for HiveBins<'_, S> {
    type Item = FormatResult<HiveBin>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.end.is_some_and(|end| self.next >= end) {
            return None;
        }

        let mut buf = [0_u8; HIVE_BIN_HEADER_SIZE];
        let n = match read_available(self.source, self.next, &mut buf) {
            Ok(n) => n,
            Err(FormatError::OffsetOutOfRange { .. }) => {
                debug!("hive ends at 0x{:08x}, before the declared bins data size", self.next);
                self.done = true;
                return None;
            }
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        if n < HIVE_BIN_HEADER_SIZE {
            debug!("Offset `0x{:08x}`: truncated hive bin header", self.next);
            self.done = true;
            return None;
        }

        let header = match HiveBinHeader::from_bytes(&buf, self.next) {
            Ok(header) => header,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        if header.size == 0 {
            trace!("Offset `0x{:08x}`: zero sized hive bin ends the sequence", self.next);
            self.done = true;
            return None;
        }

        let bin = HiveBin {
            position: self.next,
            header,
        };
        trace!("{:?}", bin);
        self.next += u64::from(bin.header.size);

        Some(Ok(bin))
    }
}

/// Inventory entry for one cell of a bin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellInfo {
    /// Absolute offset of the size field.
    pub offset: u64,
    pub size: u32,
    pub allocated: bool,
    /// `None` when the cell is too small to carry one.
    pub tag: Option<[u8; 2]>,
}

pub struct BinCells<'h, S: ReadAt + ?Sized> {
    source: &'h S,
    next: u64,
    end: u64,
    done: bool,
}

impl<S: ReadAt + ?Sized> Iterator for BinCells<'_, S> {
    type Item = FormatResult<CellInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.next >= self.end {
            return None;
        }

        let mut buf = [0_u8; 6];
        let n = match read_available(self.source, self.next, &mut buf) {
            Ok(n) => n,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        let Some(raw_size) = bytes::read_i32_le(&buf[..n], 0) else {
            self.done = true;
            return None;
        };

        let size = raw_size.unsigned_abs();
        if size == 0 {
            debug!("Offset `0x{:08x}`: zero sized cell, skipping the rest of the bin", self.next);
            self.done = true;
            return None;
        }

        let info = CellInfo {
            offset: self.next,
            size,
            allocated: raw_size < 0,
            tag: if size >= 6 { bytes::read_array::<2>(&buf[..n], 4) } else { None },
        };

        self.next += u64::from(size);
        if self.next > self.end {
            debug!("Offset `0x{:08x}`: cell runs past the end of its bin", info.offset);
            self.done = true;
        }

        Some(Ok(info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn bin(offset: u32, size: u32) -> Vec<u8> {
        let mut buf = vec![0_u8; size as usize];
        buf[..4].copy_from_slice(b"hbin");
        buf[4..8].copy_from_slice(&offset.to_le_bytes());
        buf[8..12].copy_from_slice(&size.to_le_bytes());
        buf
    }

    fn header(bins_size: u32) -> HiveHeader {
        let mut raw = vec![0_u8; HIVE_HEADER_SIZE];
        raw[..4].copy_from_slice(b"regf");
        raw[40..44].copy_from_slice(&bins_size.to_le_bytes());
        HiveHeader::from_bytes(&raw).unwrap()
    }

    #[test]
    fn test_walks_bins_until_declared_size() {
        let mut data = vec![0_u8; HIVE_HEADER_SIZE];
        data.extend(bin(0, 0x1000));
        data.extend(bin(0x1000, 0x2000));
        // Trailing bin beyond the declared size is ignored.
        data.extend(bin(0x3000, 0x1000));

        let header = header(0x3000);
        let bins = HiveBins::new(&data, &header).collect::<FormatResult<Vec<_>>>().unwrap();

        assert_eq!(bins.len(), 2);
        assert_eq!(bins[1].position, 0x2000);
        assert_eq!(bins[1].header.offset, 0x1000);
        assert_eq!(bins[1].data_range(), 0x2020..0x4000);

        // Restartable.
        assert_eq!(HiveBins::new(&data, &header).count(), 2);
    }

    #[test]
    fn test_truncated_source_ends_quietly() {
        let mut data = vec![0_u8; HIVE_HEADER_SIZE];
        data.extend(bin(0, 0x1000));
        data.extend_from_slice(b"hbin");

        let header = header(0x4000);
        let bins = HiveBins::new(&data, &header).collect::<Vec<_>>();
        assert_eq!(bins.len(), 1);
        assert!(bins[0].is_ok());
    }

    #[test]
    fn test_bad_signature_then_stop() {
        let mut data = vec![0_u8; HIVE_HEADER_SIZE];
        data.extend(bin(0, 0x1000));
        let mut garbage = bin(0x1000, 0x1000);
        garbage[..4].copy_from_slice(b"HBIN");
        data.extend(garbage);
        data.extend(bin(0x2000, 0x1000));

        let header = header(0x3000);
        let bins = HiveBins::new(&data, &header).collect::<Vec<_>>();
        assert_eq!(bins.len(), 2);
        assert!(matches!(
            bins[1],
            Err(FormatError::BadSignature {
                what: "hive bin",
                offset: 0x2000,
                ..
            })
        ));
    }

    #[test]
    fn test_zero_sized_bin_terminates() {
        let mut data = vec![0_u8; HIVE_HEADER_SIZE];
        data.extend(bin(0, 0x1000));
        data.extend(bin(0x1000, 0x1000));
        data[HIVE_HEADER_SIZE + 0x1000 + 8..HIVE_HEADER_SIZE + 0x1000 + 12].copy_from_slice(&0_u32.to_le_bytes());

        assert_eq!(HiveBins::new(&data, &header(0x2000)).count(), 1);
    }
}
