//! Subkey index cells: `lf`, `lh` and `li` leaves, and `ri` roots pointing at further leaves.

use log::trace;

use crate::HiveOffset;
use crate::err::FormatResult;
use crate::utils::ByteCursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashLeafItem {
    pub key_offset: HiveOffset,
    /// The first four name characters (`lf`) or a name hash (`lh`). Not used for lookups.
    pub hash: u32,
}

/// `lf` or `lh` leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashLeaf {
    pub items: Vec<HashLeafItem>,
}

/// `li` leaf, bare key offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexLeaf {
    pub key_offsets: Vec<HiveOffset>,
}

/// `ri` root, offsets of other index cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRoot {
    pub leaf_offsets: Vec<HiveOffset>,
}

fn read_header<'a>(data: &'a [u8], base: u64, what: &'static str) -> FormatResult<(ByteCursor<'a>, usize)> {
    let mut cursor = ByteCursor::new(data, base);
    cursor.advance(2, "index signature")?;
    let count = usize::from(cursor.u16_named(what)?);
    Ok((cursor, count))
}

impl HashLeaf {
    pub(crate) fn from_bytes(data: &[u8], declared_len: usize, base: u64) -> FormatResult<HashLeaf> {
        let (mut cursor, count) = read_header(data, base, "hash leaf count")?;
        let items = cursor.read_counted_vec::<_, 8>(count, declared_len, "hash leaf items", |raw| {
            HashLeafItem {
                key_offset: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
                hash: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            }
        })?;

        if items.len() < count {
            trace!("Offset `0x{:08x}`: hash leaf cut short, {}/{} items", base, items.len(), count);
        }

        Ok(HashLeaf { items })
    }

    pub fn key_offsets(&self) -> impl Iterator<Item = HiveOffset> + '_ {
        self.items.iter().map(|item| item.key_offset)
    }
}

impl IndexLeaf {
    pub(crate) fn from_bytes(data: &[u8], declared_len: usize, base: u64) -> FormatResult<IndexLeaf> {
        let (mut cursor, count) = read_header(data, base, "index leaf count")?;
        let key_offsets =
            cursor.read_counted_vec::<_, 4>(count, declared_len, "index leaf items", u32::from_le_bytes)?;

        if key_offsets.len() < count {
            trace!("Offset `0x{:08x}`: index leaf cut short, {}/{} items", base, key_offsets.len(), count);
        }

        Ok(IndexLeaf { key_offsets })
    }
}

impl IndexRoot {
    pub(crate) fn from_bytes(data: &[u8], declared_len: usize, base: u64) -> FormatResult<IndexRoot> {
        let (mut cursor, count) = read_header(data, base, "index root count")?;
        let leaf_offsets =
            cursor.read_counted_vec::<_, 4>(count, declared_len, "index root items", u32::from_le_bytes)?;

        Ok(IndexRoot { leaf_offsets })
    }
}
