use crate::err::{FormatError, FormatResult};
use crate::utils::bytes;

/// A lightweight cursor over the bytes of a single cell.
///
/// This is the slice/offset equivalent of `Cursor<&[u8]>`, intended for record decoding where:
/// - the cell has already been read from the source, and
/// - we want explicit bounds control so a decoder can never run past the cell it was given.
///
/// `base` is the absolute hive position of `buf[0]`; it only feeds error messages.
///
/// All reads are little-endian and advance the cursor on success.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ByteCursor<'a> {
    buf: &'a [u8],
    base: u64,
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    #[inline]
    pub(crate) fn new(buf: &'a [u8], base: u64) -> Self {
        Self { buf, base, pos: 0 }
    }

    #[inline]
    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    /// Absolute hive position of the cursor.
    #[inline]
    pub(crate) fn position(&self) -> u64 {
        self.base + self.pos as u64
    }

    #[inline]
    pub(crate) fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    #[inline]
    pub(crate) fn advance(&mut self, n: usize, what: &'static str) -> FormatResult<()> {
        let _ = bytes::slice_r(self.buf, self.base, self.pos, n, what)?;
        self.pos += n;
        Ok(())
    }

    #[inline]
    pub(crate) fn take_bytes(&mut self, len: usize, what: &'static str) -> FormatResult<&'a [u8]> {
        let out = bytes::slice_r(self.buf, self.base, self.pos, len, what)?;
        self.pos += len;
        Ok(out)
    }

    #[inline]
    pub(crate) fn array<const N: usize>(&mut self, what: &'static str) -> FormatResult<[u8; N]> {
        let v = bytes::read_array_r::<N>(self.buf, self.base, self.pos, what)?;
        self.pos += N;
        Ok(v)
    }

    #[inline]
    pub(crate) fn u16_named(&mut self, what: &'static str) -> FormatResult<u16> {
        let v = bytes::read_u16_le_r(self.buf, self.base, self.pos, what)?;
        self.pos += 2;
        Ok(v)
    }

    #[inline]
    pub(crate) fn u32_named(&mut self, what: &'static str) -> FormatResult<u32> {
        let v = bytes::read_u32_le_r(self.buf, self.base, self.pos, what)?;
        self.pos += 4;
        Ok(v)
    }

    #[inline]
    pub(crate) fn u64_named(&mut self, what: &'static str) -> FormatResult<u64> {
        let v = bytes::read_u64_le_r(self.buf, self.base, self.pos, what)?;
        self.pos += 8;
        Ok(v)
    }

    /// Read `count` fixed-width items, each decoded by `read_one`.
    ///
    /// `declared_len` is the number of bytes the cell claims to hold (from its size field).
    /// A `count` that cannot fit in the declared cell is a structural error, while running out
    /// of *actual* bytes (the source ended early) just truncates the result.
    pub(crate) fn read_counted_vec<T, const ELEM_BYTES: usize>(
        &mut self,
        count: usize,
        declared_len: usize,
        what: &'static str,
        mut read_one: impl FnMut([u8; ELEM_BYTES]) -> T,
    ) -> FormatResult<Vec<T>> {
        let need = count.saturating_mul(ELEM_BYTES);
        let declared_remaining = declared_len.saturating_sub(self.pos);
        if need > declared_remaining {
            return Err(FormatError::TruncatedRecord {
                what,
                offset: self.position(),
                need,
                have: declared_remaining,
            });
        }

        let available = (self.remaining() / ELEM_BYTES).min(count);
        let mut out = Vec::with_capacity(available);
        for _ in 0..available {
            out.push(read_one(self.array::<ELEM_BYTES>(what)?));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cursor_reads_and_advances() {
        let buf = [b'l', b'i', 0x02, 0x00, 0x20, 0x00, 0x00, 0x00];
        let mut cursor = ByteCursor::new(&buf, 0x1000);

        assert_eq!(&cursor.array::<2>("tag").unwrap(), b"li");
        assert_eq!(cursor.u16_named("count").unwrap(), 2);
        assert_eq!(cursor.position(), 0x1004);
        assert_eq!(cursor.u32_named("item").unwrap(), 0x20);
        assert_eq!(cursor.remaining(), 0);
        assert!(cursor.u16_named("past the end").is_err());
    }

    #[test]
    fn test_counted_vec_is_cut_short_by_missing_bytes() {
        // Declared room for three items, but only one and a half are present.
        let buf = [1, 0, 0, 0, 2, 0];
        let mut cursor = ByteCursor::new(&buf, 0);
        let items = cursor
            .read_counted_vec::<u32, 4>(3, 12, "li items", u32::from_le_bytes)
            .unwrap();

        assert_eq!(items, vec![1]);
    }

    #[test]
    fn test_counted_vec_rejects_counts_larger_than_the_cell() {
        let buf = [0u8; 16];
        let mut cursor = ByteCursor::new(&buf, 0x2000);
        let err = cursor
            .read_counted_vec::<u32, 4>(10, 16, "li items", u32::from_le_bytes)
            .unwrap_err();

        assert!(matches!(
            err,
            FormatError::TruncatedRecord {
                offset: 0x2000,
                need: 40,
                have: 16,
                ..
            }
        ));
    }
}
