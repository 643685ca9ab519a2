use encoding::EncodingRef;
use log::trace;

use crate::err::{FormatError, FormatResult};
use crate::records::{HashLeaf, IndexLeaf, IndexRoot, NamedKey, SecurityKey, ValueKey};
use crate::source::{ReadAt, read_available, read_exact_at};
use crate::utils::bytes;

/// Size of the signed size field at the start of every cell.
pub const CELL_SIZE_FIELD_LEN: usize = 4;
/// Size field plus a 2-byte tag.
const MIN_TAGGED_CELL_SIZE: u32 = 6;

/// A cell as stored: its envelope and whatever bytes follow the size field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCell {
    /// Absolute position of the size field.
    pub offset: u64,
    /// Absolute value of the stored size, including the size field.
    pub size: u32,
    /// The stored size was negative.
    pub allocated: bool,
    /// At most `size - 4` bytes, fewer if the source ends first.
    pub data: Vec<u8>,
}

impl RawCell {
    /// Number of payload bytes the cell claims to hold.
    pub fn declared_len(&self) -> usize {
        (self.size as usize).saturating_sub(CELL_SIZE_FIELD_LEN)
    }

    /// Position of the next cell in the same bin.
    pub fn next_offset(&self) -> u64 {
        self.offset + u64::from(self.size)
    }
}

/// Read the cell envelope at `offset` (absolute) together with its payload bytes.
pub fn read_raw_cell<S: ReadAt + ?Sized>(source: &S, offset: u64) -> FormatResult<RawCell> {
    let mut size_field = [0_u8; CELL_SIZE_FIELD_LEN];
    read_exact_at(source, offset, &mut size_field, "cell size")?;

    let raw_size = i32::from_le_bytes(size_field);
    let size = raw_size.unsigned_abs();
    let allocated = raw_size < 0;

    let data_offset = offset + CELL_SIZE_FIELD_LEN as u64;
    let declared = (size as usize).saturating_sub(CELL_SIZE_FIELD_LEN);
    let available = usize::try_from(source.len().saturating_sub(data_offset)).unwrap_or(usize::MAX);

    let mut data = vec![0_u8; declared.min(available)];
    if !data.is_empty() {
        let n = read_available(source, data_offset, &mut data)?;
        data.truncate(n);
    }

    Ok(RawCell {
        offset,
        size,
        allocated,
        data,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellPayload {
    NamedKey(NamedKey),
    ValueKey(ValueKey),
    /// `lf`
    FastLeaf(HashLeaf),
    /// `lh`
    HashLeaf(HashLeaf),
    /// `li`
    IndexLeaf(IndexLeaf),
    /// `ri`
    IndexRoot(IndexRoot),
    Security(SecurityKey),
    /// Anything else (`db` big data, garbage in a free cell, ...).
    Unknown { tag: [u8; 2] },
}

impl CellPayload {
    pub fn tag(&self) -> [u8; 2] {
        match self {
            CellPayload::NamedKey(_) => *b"nk",
            CellPayload::ValueKey(_) => *b"vk",
            CellPayload::FastLeaf(_) => *b"lf",
            CellPayload::HashLeaf(_) => *b"lh",
            CellPayload::IndexLeaf(_) => *b"li",
            CellPayload::IndexRoot(_) => *b"ri",
            CellPayload::Security(_) => *b"sk",
            CellPayload::Unknown { tag } => *tag,
        }
    }
}

/// A decoded cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub offset: u64,
    pub size: u32,
    pub allocated: bool,
    pub payload: CellPayload,
}

impl Cell {
    pub fn from_raw(raw: &RawCell, ansi_codec: EncodingRef) -> FormatResult<Cell> {
        if raw.size < MIN_TAGGED_CELL_SIZE || raw.data.len() < 2 {
            return Err(FormatError::TruncatedRecord {
                what: "cell tag",
                offset: raw.offset,
                need: MIN_TAGGED_CELL_SIZE as usize,
                have: raw.size.min(raw.data.len() as u32 + CELL_SIZE_FIELD_LEN as u32) as usize,
            });
        }

        let data = raw.data.as_slice();
        let declared_len = raw.declared_len();
        let base = raw.offset + CELL_SIZE_FIELD_LEN as u64;
        let tag = bytes::read_array::<2>(data, 0).unwrap_or_default();

        let payload = match &tag {
            b"nk" => CellPayload::NamedKey(NamedKey::from_bytes(data, declared_len, base, ansi_codec)?),
            b"vk" => CellPayload::ValueKey(ValueKey::from_bytes(data, declared_len, base, ansi_codec)?),
            b"lf" => CellPayload::FastLeaf(HashLeaf::from_bytes(data, declared_len, base)?),
            b"lh" => CellPayload::HashLeaf(HashLeaf::from_bytes(data, declared_len, base)?),
            b"li" => CellPayload::IndexLeaf(IndexLeaf::from_bytes(data, declared_len, base)?),
            b"ri" => CellPayload::IndexRoot(IndexRoot::from_bytes(data, declared_len, base)?),
            b"sk" => CellPayload::Security(SecurityKey::from_bytes(data, declared_len, base)?),
            _ => {
                trace!("Offset `0x{:08x}`: unknown cell tag {:02X?}", raw.offset, tag);
                CellPayload::Unknown { tag }
            }
        };

        Ok(Cell {
            offset: raw.offset,
            size: raw.size,
            allocated: raw.allocated,
            payload,
        })
    }

    pub fn tag(&self) -> [u8; 2] {
        self.payload.tag()
    }

    /// Where the next cell starts, no matter how much of this one the decoder consumed.
    pub fn next_offset(&self) -> u64 {
        self.offset + u64::from(self.size)
    }

    fn unexpected(&self, expected: &'static str) -> FormatError {
        FormatError::UnexpectedCellType {
            offset: self.offset,
            expected,
            found: self.tag(),
        }
    }

    pub fn as_named_key(&self) -> FormatResult<&NamedKey> {
        match &self.payload {
            CellPayload::NamedKey(nk) => Ok(nk),
            _ => Err(self.unexpected("nk")),
        }
    }

    pub fn as_value_key(&self) -> FormatResult<&ValueKey> {
        match &self.payload {
            CellPayload::ValueKey(vk) => Ok(vk),
            _ => Err(self.unexpected("vk")),
        }
    }

    pub fn as_security_key(&self) -> FormatResult<&SecurityKey> {
        match &self.payload {
            CellPayload::Security(sk) => Ok(sk),
            _ => Err(self.unexpected("sk")),
        }
    }
}

/// Decode the cell whose size field is at `offset` (absolute).
pub fn decode_cell<S: ReadAt + ?Sized>(
    source: &S,
    offset: u64,
    ansi_codec: EncodingRef,
) -> FormatResult<Cell> {
    let raw = read_raw_cell(source, offset)?;
    Cell::from_raw(&raw, ansi_codec)
}
