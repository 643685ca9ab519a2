use bitflags::bitflags;
use encoding::EncodingRef;
use log::trace;

use crate::HiveOffset;
use crate::err::{FormatError, FormatResult};
use crate::utils::{ByteCursor, decode_compressed_name, decode_utf16le_lossy};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct KeyFlags: u16 {
        /// Not stored on disk, exists only in memory.
        const VOLATILE = 0x0001;
        /// Mount point of another hive.
        const HIVE_EXIT = 0x0002;
        /// Root key of this hive.
        const HIVE_ENTRY = 0x0004;
        const NO_DELETE = 0x0008;
        const SYM_LINK = 0x0010;
        /// The name is stored one byte per character.
        const COMP_NAME = 0x0020;
        const PREDEF_HANDLE = 0x0040;
        const VIRT_MIRRORED = 0x0080;
        const VIRT_TARGET = 0x0100;
        const VIRT_STORE = 0x0200;
    }
}

/// Fixed part of an `nk` record, counted from the start of the tag.
const NAMED_KEY_FIXED_LEN: usize = 76;

/// A registry key (`nk` cell).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedKey {
    pub flags: KeyFlags,
    /// FILETIME ticks.
    pub last_written: u64,
    pub access_bits: u32,
    /// Informational only, never followed during traversal.
    pub parent_offset: HiveOffset,
    pub subkey_count: u32,
    pub volatile_subkey_count: u32,
    pub subkey_list_offset: HiveOffset,
    pub volatile_subkey_list_offset: HiveOffset,
    pub value_count: u32,
    pub value_list_offset: HiveOffset,
    pub security_key_offset: HiveOffset,
    pub class_name_offset: HiveOffset,
    pub largest_subkey_name_len: u32,
    pub largest_subkey_class_len: u32,
    pub largest_value_name_len: u32,
    pub largest_value_data_size: u32,
    pub work_var: u32,
    pub class_name_len: u16,
    /// Empty for an unnamed key.
    pub name: String,
}

impl NamedKey {
    /// Decode an `nk` payload. `data` starts at the tag, `declared_len` is the cell size minus
    /// the size field.
    pub(crate) fn from_bytes(
        data: &[u8],
        declared_len: usize,
        base: u64,
        ansi_codec: EncodingRef,
    ) -> FormatResult<NamedKey> {
        let mut cursor = ByteCursor::new(data, base);
        cursor.advance(2, "nk signature")?;

        let flags = KeyFlags::from_bits_retain(cursor.u16_named("nk flags")?);
        let last_written = cursor.u64_named("nk last written timestamp")?;
        let access_bits = cursor.u32_named("nk access bits")?;
        let parent_offset = cursor.u32_named("nk parent")?;
        let subkey_count = cursor.u32_named("nk number of subkeys")?;
        let volatile_subkey_count = cursor.u32_named("nk number of volatile subkeys")?;
        let subkey_list_offset = cursor.u32_named("nk subkeys list offset")?;
        let volatile_subkey_list_offset = cursor.u32_named("nk volatile subkeys list offset")?;
        let value_count = cursor.u32_named("nk number of values")?;
        let value_list_offset = cursor.u32_named("nk values list offset")?;
        let security_key_offset = cursor.u32_named("nk security key offset")?;
        let class_name_offset = cursor.u32_named("nk class name offset")?;
        let largest_subkey_name_len = cursor.u32_named("nk largest subkey name length")?;
        let largest_subkey_class_len = cursor.u32_named("nk largest subkey class length")?;
        let largest_value_name_len = cursor.u32_named("nk largest value name length")?;
        let largest_value_data_size = cursor.u32_named("nk largest value data size")?;
        let work_var = cursor.u32_named("nk work var")?;
        let name_len = usize::from(cursor.u16_named("nk key name length")?);
        let class_name_len = cursor.u16_named("nk class name length")?;
        debug_assert_eq!(cursor.pos(), NAMED_KEY_FIXED_LEN);

        let declared_remaining = declared_len.saturating_sub(NAMED_KEY_FIXED_LEN);
        if name_len > declared_remaining {
            return Err(FormatError::TruncatedRecord {
                what: "nk key name",
                offset: cursor.position(),
                need: name_len,
                have: declared_remaining,
            });
        }

        let raw_name = cursor.take_bytes(name_len, "nk key name")?;
        let name = if flags.contains(KeyFlags::COMP_NAME) {
            decode_compressed_name(raw_name, ansi_codec)
        } else {
            decode_utf16le_lossy(raw_name)
        };

        trace!(
            "Offset `0x{:08x}`: nk `{}` ({} subkeys, {} values)",
            base, name, subkey_count, value_count
        );

        Ok(NamedKey {
            flags,
            last_written,
            access_bits,
            parent_offset,
            subkey_count,
            volatile_subkey_count,
            subkey_list_offset,
            volatile_subkey_list_offset,
            value_count,
            value_list_offset,
            security_key_offset,
            class_name_offset,
            largest_subkey_name_len,
            largest_subkey_class_len,
            largest_value_name_len,
            largest_value_data_size,
            work_var,
            class_name_len,
            name,
        })
    }

    pub fn is_root(&self) -> bool {
        self.flags.contains(KeyFlags::HIVE_ENTRY)
    }

    pub fn has_subkeys(&self) -> bool {
        self.subkey_count > 0 && self.subkey_list_offset != crate::INVALID_OFFSET
    }

    pub fn has_values(&self) -> bool {
        self.value_count > 0 && self.value_list_offset != crate::INVALID_OFFSET
    }
}
