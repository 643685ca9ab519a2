use std::fmt;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Utf16LeDecodeError {
    OddLength,
    InvalidData,
}

impl fmt::Display for Utf16LeDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Utf16LeDecodeError::OddLength => f.write_str("UTF-16LE input has an odd number of bytes"),
            Utf16LeDecodeError::InvalidData => f.write_str("UTF-16LE input contains unpaired surrogates"),
        }
    }
}

impl std::error::Error for Utf16LeDecodeError {}

fn to_units(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

/// Decode a whole UTF-16LE byte slice, embedded NULs included.
pub fn decode_utf16le(bytes: &[u8]) -> Result<String, Utf16LeDecodeError> {
    if !bytes.len().is_multiple_of(2) {
        return Err(Utf16LeDecodeError::OddLength);
    }

    decode_utf16_units(&to_units(bytes))
}

/// Decode a UTF-16LE byte slice until the first NUL (0x0000), if present.
pub fn decode_utf16le_z(bytes: &[u8]) -> Result<String, Utf16LeDecodeError> {
    if !bytes.len().is_multiple_of(2) {
        return Err(Utf16LeDecodeError::OddLength);
    }

    let units = to_units(bytes);
    let end = units.iter().position(|&c| c == 0).unwrap_or(units.len());
    decode_utf16_units(&units[..end])
}

/// Decode UTF-16LE, replacing invalid sequences and ignoring a dangling odd byte.
///
/// Used for key and value names, where a damaged name must still produce a listable entry.
pub(crate) fn decode_utf16le_lossy(bytes: &[u8]) -> String {
    String::from_utf16_lossy(&to_units(bytes))
}

fn decode_utf16_units(units: &[u16]) -> Result<String, Utf16LeDecodeError> {
    // Fast path: if all code units are <= 0x7F, this is pure ASCII and can be converted
    // directly to UTF-8 without surrogate handling overhead.
    if units.iter().all(|&c| c <= 0x7F) {
        return Ok(units.iter().map(|&c| c as u8 as char).collect());
    }

    String::from_utf16(units).map_err(|_| Utf16LeDecodeError::InvalidData)
}
