//! Typed interpretation of the bytes returned by [`crate::Hive::read`].

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::trace;
use serde::Serialize;

use crate::records::ValueType;
use crate::utils::{Utf16LeDecodeError, decode_utf16le, decode_utf16le_lossy, decode_utf16le_z};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ValueData {
    None,
    String(String),
    ExpandString(String),
    Link(String),
    MultiString(Vec<String>),
    Binary(Vec<u8>),
    Dword(u32),
    DwordBigEndian(u32),
    Qword(u64),
    /// Resource lists, unknown types, and integers with too few bytes.
    Other { value_type: ValueType, data: Vec<u8> },
}

impl ValueData {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ValueData::String(s) | ValueData::ExpandString(s) | ValueData::Link(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ValueData::Dword(v) | ValueData::DwordBigEndian(v) => Some(u64::from(*v)),
            ValueData::Qword(v) => Some(*v),
            _ => None,
        }
    }
}

/// Registry strings are not always an even number of bytes long.
fn even(bytes: &[u8]) -> &[u8] {
    &bytes[..bytes.len() & !1]
}

/// Decode a `REG_SZ` / `REG_EXPAND_SZ` payload, up to its first NUL terminator.
pub fn decode_reg_sz(bytes: &[u8]) -> Result<String, Utf16LeDecodeError> {
    decode_utf16le_z(even(bytes))
}

/// Decode a `REG_MULTI_SZ` payload into its NUL separated strings.
///
/// The list ends at the first empty string (the double NUL terminator).
pub fn decode_reg_multi_sz(bytes: &[u8]) -> Result<Vec<String>, Utf16LeDecodeError> {
    let text = decode_utf16le(even(bytes))?;
    Ok(text
        .split('\0')
        .take_while(|s| !s.is_empty())
        .map(str::to_owned)
        .collect())
}

fn lossy_sz(bytes: &[u8]) -> String {
    decode_reg_sz(bytes).unwrap_or_else(|e| {
        trace!("string value is not valid UTF-16 ({}), decoding lossily", e);
        let lossy = decode_utf16le_lossy(bytes);
        match lossy.find('\0') {
            Some(end) => lossy[..end].to_owned(),
            None => lossy,
        }
    })
}

/// Interpret `data` according to `value_type`. Never fails, odd payloads fall back to
/// [`ValueData::Other`] or lossy text.
pub fn decode_value(value_type: ValueType, data: &[u8]) -> ValueData {
    match value_type {
        ValueType::None => ValueData::None,
        ValueType::String => ValueData::String(lossy_sz(data)),
        ValueType::ExpandString => ValueData::ExpandString(lossy_sz(data)),
        ValueType::Link => ValueData::Link(lossy_sz(data)),
        ValueType::MultiString => ValueData::MultiString(
            decode_reg_multi_sz(data).unwrap_or_else(|_| {
                decode_utf16le_lossy(data)
                    .split('\0')
                    .take_while(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            }),
        ),
        ValueType::Binary => ValueData::Binary(data.to_vec()),
        ValueType::Dword if data.len() >= 4 => ValueData::Dword(LittleEndian::read_u32(data)),
        ValueType::DwordBigEndian if data.len() >= 4 => {
            ValueData::DwordBigEndian(BigEndian::read_u32(data))
        }
        ValueType::Qword if data.len() >= 8 => ValueData::Qword(LittleEndian::read_u64(data)),
        other => ValueData::Other {
            value_type: other,
            data: data.to_vec(),
        },
    }
}
