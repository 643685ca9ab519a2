use encoding::{DecoderTrap, EncodingRef};
use log::trace;

/// Decode a "compressed" (single byte per character) registry name.
///
/// Names are stored in the system code page when the compressed flag is set. Every stored byte
/// is kept, NULs included, so lookups match the name exactly as written.
pub(crate) fn decode_compressed_name(bytes: &[u8], ansi_codec: EncodingRef) -> String {
    match ansi_codec.decode(bytes, DecoderTrap::Replace) {
        Ok(s) => s,
        Err(message) => {
            trace!(
                "failed to decode name using {}: {}, falling back to latin-1",
                ansi_codec.name(),
                message
            );
            bytes.iter().map(|&b| b as char).collect()
        }
    }
}
