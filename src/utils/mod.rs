mod ansi;
pub(crate) mod byte_cursor;
pub(crate) mod bytes;
mod time;
mod utf16;

pub(crate) use self::ansi::decode_compressed_name;
pub(crate) use self::byte_cursor::ByteCursor;
pub use self::time::filetime_to_timestamp;
pub(crate) use self::utf16::decode_utf16le_lossy;
pub use self::utf16::{Utf16LeDecodeError, decode_utf16le, decode_utf16le_z};
