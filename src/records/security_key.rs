use log::trace;

use crate::HiveOffset;
use crate::err::{FormatError, FormatResult};
use crate::utils::ByteCursor;

const SECURITY_KEY_FIXED_LEN: usize = 20;

/// Security descriptor cell (`sk`). The descriptor itself is kept as opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityKey {
    pub previous_offset: HiveOffset,
    pub next_offset: HiveOffset,
    pub reference_count: u32,
    /// Self-relative `SECURITY_DESCRIPTOR`, possibly cut short by the end of the source.
    pub descriptor: Vec<u8>,
}

impl SecurityKey {
    pub(crate) fn from_bytes(data: &[u8], declared_len: usize, base: u64) -> FormatResult<SecurityKey> {
        let mut cursor = ByteCursor::new(data, base);
        cursor.advance(2, "sk signature")?;
        cursor.advance(2, "sk reserved")?;

        let previous_offset = cursor.u32_named("sk flink")?;
        let next_offset = cursor.u32_named("sk blink")?;
        let reference_count = cursor.u32_named("sk reference count")?;
        let descriptor_len = cursor.u32_named("sk descriptor size")? as usize;

        let declared_remaining = declared_len.saturating_sub(SECURITY_KEY_FIXED_LEN);
        if descriptor_len > declared_remaining {
            return Err(FormatError::TruncatedRecord {
                what: "sk descriptor",
                offset: cursor.position(),
                need: descriptor_len,
                have: declared_remaining,
            });
        }

        let available = descriptor_len.min(cursor.remaining());
        let descriptor = cursor.take_bytes(available, "sk descriptor")?.to_vec();

        trace!(
            "Offset `0x{:08x}`: sk with {} references, {} descriptor bytes",
            base, reference_count, descriptor_len
        );

        Ok(SecurityKey {
            previous_offset,
            next_offset,
            reference_count,
            descriptor,
        })
    }
}
