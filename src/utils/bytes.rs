//! Byte-slice utilities for bounds-oriented parsing.
//!
//! There are two layers:
//! - **Option layer** (`read_*`): zero-cost helpers that return `Option<T>`.
//! - **Result layer** (`*_r`): wrappers that map `None` to `FormatError::TruncatedRecord`.
//!
//! All numeric reads are **little-endian** (regf data is LE). Offsets are `usize` and are
//! interpreted relative to the slice you pass in; `base` is the absolute hive position of
//! `buf[0]` and is only used to make error messages point at the right place in the file.

use crate::err::FormatError;

/// Read `N` raw bytes at `offset`.
///
/// Returns `None` if the range is out of bounds.
pub(crate) fn read_array<const N: usize>(buf: &[u8], offset: usize) -> Option<[u8; N]> {
    let end = offset.checked_add(N)?;
    let bytes: [u8; N] = buf.get(offset..end)?.try_into().ok()?;
    Some(bytes)
}

/// Read a `u16` (little-endian) at `offset`.
pub(crate) fn read_u16_le(buf: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_le_bytes(read_array::<2>(buf, offset)?))
}

/// Read a `u32` (little-endian) at `offset`.
pub(crate) fn read_u32_le(buf: &[u8], offset: usize) -> Option<u32> {
    Some(u32::from_le_bytes(read_array::<4>(buf, offset)?))
}

/// Read an `i32` (little-endian) at `offset`.
pub(crate) fn read_i32_le(buf: &[u8], offset: usize) -> Option<i32> {
    Some(i32::from_le_bytes(read_array::<4>(buf, offset)?))
}

/// Read a `u64` (little-endian) at `offset`.
pub(crate) fn read_u64_le(buf: &[u8], offset: usize) -> Option<u64> {
    Some(u64::from_le_bytes(read_array::<8>(buf, offset)?))
}

#[inline]
pub(crate) fn truncated(
    what: &'static str,
    base: u64,
    offset: usize,
    need: usize,
    len: usize,
) -> FormatError {
    FormatError::TruncatedRecord {
        what,
        offset: base + offset as u64,
        need,
        have: len.saturating_sub(offset),
    }
}

pub(crate) fn slice_r<'a>(
    buf: &'a [u8],
    base: u64,
    offset: usize,
    len: usize,
    what: &'static str,
) -> Result<&'a [u8], FormatError> {
    let end = offset
        .checked_add(len)
        .ok_or_else(|| truncated(what, base, offset, len, buf.len()))?;
    buf.get(offset..end)
        .ok_or_else(|| truncated(what, base, offset, len, buf.len()))
}

/// Read `N` raw bytes at `offset`, or return `FormatError::TruncatedRecord`.
pub(crate) fn read_array_r<const N: usize>(
    buf: &[u8],
    base: u64,
    offset: usize,
    what: &'static str,
) -> Result<[u8; N], FormatError> {
    read_array::<N>(buf, offset).ok_or_else(|| truncated(what, base, offset, N, buf.len()))
}

/// Read a `u16` (little-endian) at `offset`, or return `FormatError::TruncatedRecord`.
pub(crate) fn read_u16_le_r(
    buf: &[u8],
    base: u64,
    offset: usize,
    what: &'static str,
) -> Result<u16, FormatError> {
    read_u16_le(buf, offset).ok_or_else(|| truncated(what, base, offset, 2, buf.len()))
}

/// Read a `u32` (little-endian) at `offset`, or return `FormatError::TruncatedRecord`.
pub(crate) fn read_u32_le_r(
    buf: &[u8],
    base: u64,
    offset: usize,
    what: &'static str,
) -> Result<u32, FormatError> {
    read_u32_le(buf, offset).ok_or_else(|| truncated(what, base, offset, 4, buf.len()))
}

/// Read a `u64` (little-endian) at `offset`, or return `FormatError::TruncatedRecord`.
pub(crate) fn read_u64_le_r(
    buf: &[u8],
    base: u64,
    offset: usize,
    what: &'static str,
) -> Result<u64, FormatError> {
    read_u64_le(buf, offset).ok_or_else(|| truncated(what, base, offset, 8, buf.len()))
}

/// Read up to `count` little-endian `u32`s starting at `offset`.
///
/// Unlike the `*_r` helpers this never fails: the table is cut short at the end of `buf`.
pub(crate) fn read_u32_table_lossy(buf: &[u8], offset: usize, count: usize) -> Vec<u32> {
    let available = buf.len().saturating_sub(offset) / 4;
    let n = count.min(available);

    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        if let Some(v) = read_u32_le(buf, offset + i * 4) {
            out.push(v);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_reads_little_endian_primitives() {
        let buf = [0x01, 0x02, 0x03, 0x04, 0xF0, 0xFF, 0xFF, 0xFF];
        assert_eq!(read_u16_le(&buf, 0), Some(0x0201));
        assert_eq!(read_u32_le(&buf, 0), Some(0x0403_0201));
        assert_eq!(read_i32_le(&buf, 4), Some(-16));
        assert_eq!(read_u64_le(&buf, 0), Some(0xFFFF_FFF0_0403_0201));
        assert_eq!(read_u32_le(&buf, 6), None);
    }

    #[test]
    fn test_truncated_reports_absolute_offset() {
        let buf = [0u8; 6];
        let err = read_u32_le_r(&buf, 0x1000, 4, "value data offset").unwrap_err();

        match err {
            FormatError::TruncatedRecord {
                what,
                offset,
                need,
                have,
            } => {
                assert_eq!(what, "value data offset");
                assert_eq!(offset, 0x1004);
                assert_eq!(need, 4);
                assert_eq!(have, 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_lossy_table_stops_at_end_of_buffer() {
        let buf = [1, 0, 0, 0, 2, 0, 0, 0, 3, 0];
        assert_eq!(read_u32_table_lossy(&buf, 0, 5), vec![1, 2]);
        assert_eq!(read_u32_table_lossy(&buf, 4, 1), vec![2]);
        assert_eq!(read_u32_table_lossy(&buf, 12, 3), Vec::<u32>::new());
    }
}
