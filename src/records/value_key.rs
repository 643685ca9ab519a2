use std::fmt;

use bitflags::bitflags;
use encoding::EncodingRef;
use log::trace;
use serde::Serialize;

use crate::err::{FormatError, FormatResult};
use crate::utils::{ByteCursor, decode_compressed_name, decode_utf16le_lossy};

/// Top bit of the data size field: the data lives in the data offset field itself.
pub const DATA_IS_RESIDENT_MASK: u32 = 0x8000_0000;
/// Resident storage only has the 4 bytes of the offset field.
pub const MAX_RESIDENT_DATA_SIZE: u32 = 4;

const VALUE_KEY_FIXED_LEN: usize = 20;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ValueFlags: u16 {
        /// The name is stored one byte per character.
        const COMP_NAME = 0x0001;
        const TOMBSTONE = 0x0002;
    }
}

/// Registry data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ValueType {
    None,
    String,
    ExpandString,
    Binary,
    Dword,
    DwordBigEndian,
    Link,
    MultiString,
    ResourceList,
    FullResourceDescriptor,
    ResourceRequirementsList,
    Qword,
    Unknown(u32),
}

impl From<u32> for ValueType {
    fn from(value: u32) -> Self {
        match value {
            0 => ValueType::None,
            1 => ValueType::String,
            2 => ValueType::ExpandString,
            3 => ValueType::Binary,
            4 => ValueType::Dword,
            5 => ValueType::DwordBigEndian,
            6 => ValueType::Link,
            7 => ValueType::MultiString,
            8 => ValueType::ResourceList,
            9 => ValueType::FullResourceDescriptor,
            10 => ValueType::ResourceRequirementsList,
            11 => ValueType::Qword,
            other => ValueType::Unknown(other),
        }
    }
}

impl ValueType {
    pub fn as_u32(self) -> u32 {
        match self {
            ValueType::None => 0,
            ValueType::String => 1,
            ValueType::ExpandString => 2,
            ValueType::Binary => 3,
            ValueType::Dword => 4,
            ValueType::DwordBigEndian => 5,
            ValueType::Link => 6,
            ValueType::MultiString => 7,
            ValueType::ResourceList => 8,
            ValueType::FullResourceDescriptor => 9,
            ValueType::ResourceRequirementsList => 10,
            ValueType::Qword => 11,
            ValueType::Unknown(other) => other,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueType::None => "REG_NONE",
            ValueType::String => "REG_SZ",
            ValueType::ExpandString => "REG_EXPAND_SZ",
            ValueType::Binary => "REG_BINARY",
            ValueType::Dword => "REG_DWORD",
            ValueType::DwordBigEndian => "REG_DWORD_BIG_ENDIAN",
            ValueType::Link => "REG_LINK",
            ValueType::MultiString => "REG_MULTI_SZ",
            ValueType::ResourceList => "REG_RESOURCE_LIST",
            ValueType::FullResourceDescriptor => "REG_FULL_RESOURCE_DESCRIPTOR",
            ValueType::ResourceRequirementsList => "REG_RESOURCE_REQUIREMENTS_LIST",
            ValueType::Qword => "REG_QWORD",
            ValueType::Unknown(_) => "REG_UNKNOWN",
        }
    }

    /// Types whose payload is UTF-16LE text.
    pub fn is_string(self) -> bool {
        matches!(
            self,
            ValueType::String | ValueType::ExpandString | ValueType::MultiString | ValueType::Link
        )
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Unknown(other) => write!(f, "REG_UNKNOWN(0x{other:x})"),
            known => f.write_str(known.name()),
        }
    }
}

/// A registry value (`vk` cell).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueKey {
    /// Empty for the unnamed default value.
    pub name: String,
    /// As stored, including the resident bit.
    pub data_size_raw: u32,
    /// A relative offset, or the data itself for resident values.
    pub data_offset: u32,
    pub value_type: ValueType,
    pub flags: ValueFlags,
    pub spare: u16,
}

impl ValueKey {
    pub(crate) fn from_bytes(
        data: &[u8],
        declared_len: usize,
        base: u64,
        ansi_codec: EncodingRef,
    ) -> FormatResult<ValueKey> {
        let mut cursor = ByteCursor::new(data, base);
        cursor.advance(2, "vk signature")?;

        let name_len = usize::from(cursor.u16_named("vk value name length")?);
        let data_size_raw = cursor.u32_named("vk data size")?;
        let data_offset = cursor.u32_named("vk data offset")?;
        let value_type = ValueType::from(cursor.u32_named("vk data type")?);
        let flags = ValueFlags::from_bits_retain(cursor.u16_named("vk flags")?);
        let spare = cursor.u16_named("vk spare")?;

        let declared_remaining = declared_len.saturating_sub(VALUE_KEY_FIXED_LEN);
        if name_len > declared_remaining {
            return Err(FormatError::TruncatedRecord {
                what: "vk value name",
                offset: cursor.position(),
                need: name_len,
                have: declared_remaining,
            });
        }

        let raw_name = cursor.take_bytes(name_len, "vk value name")?;
        let name = if flags.contains(ValueFlags::COMP_NAME) {
            decode_compressed_name(raw_name, ansi_codec)
        } else {
            decode_utf16le_lossy(raw_name)
        };

        trace!(
            "Offset `0x{:08x}`: vk `{}` ({}, size 0x{:08x})",
            base, name, value_type, data_size_raw
        );

        Ok(ValueKey {
            name,
            data_size_raw,
            data_offset,
            value_type,
            flags,
            spare,
        })
    }

    pub fn is_resident(&self) -> bool {
        self.data_size_raw & DATA_IS_RESIDENT_MASK != 0
    }

    /// Logical size of the data, without the resident bit.
    pub fn data_len(&self) -> u32 {
        self.data_size_raw & !DATA_IS_RESIDENT_MASK
    }

    /// The raw data offset field, which is the value itself when resident.
    pub fn resident_bytes(&self) -> [u8; 4] {
        self.data_offset.to_le_bytes()
    }

    pub fn is_default(&self) -> bool {
        self.name.is_empty()
    }
}
