#![deny(unused_must_use)]
#![forbid(unsafe_code)]
// Don't allow dbg! prints in release.
#![cfg_attr(not(debug_assertions), deny(clippy::dbg_macro))]

pub use cell::{Cell, CellPayload, RawCell, decode_cell, read_raw_cell};
pub use err::{ErrorKind, FormatError, HiveError};
pub use hive::{Hive, HiveSettings, MAX_CELL_VALUE_SIZE, ValueReader};
pub use hive_bin::{CellInfo, HiveBin, HiveBinHeader, HiveBins};
pub use hive_header::{HeaderAnomaly, HeaderType, HiveHeader};
pub use node::{DEFAULT_NAME, DirPage, Metadata, Node, NodeKind};
pub use records::{KeyFlags, NamedKey, SecurityKey, ValueFlags, ValueKey, ValueType};
pub use resolver::OffsetResolver;
pub use source::{ReadAt, ReadSeek, SeekSource};
pub use value_data::{ValueData, decode_reg_multi_sz, decode_reg_sz, decode_value};
pub use walk::Walk;

pub mod cell;
pub mod err;
pub mod hive;
pub mod hive_bin;
pub mod hive_header;
pub mod node;
pub mod records;
pub mod resolver;
pub mod source;
pub mod utils;
pub mod value_data;
pub mod walk;

/// Offset of a cell, relative to the start of the hive bins data.
pub type HiveOffset = u32;

/// Stored in place of an offset that points nowhere.
pub const INVALID_OFFSET: HiveOffset = 0xFFFF_FFFF;

// For tests, we only initialize logging once.
#[cfg(test)]
use std::sync::Once;

#[cfg(test)]
static LOGGER_INIT: Once = Once::new();

// Rust runs the tests concurrently, so unless we synchronize logging access
// it will crash when attempting to run `cargo test` with some logging facilities.
#[cfg(test)]
pub fn ensure_env_logger_initialized() {
    use std::io::Write;

    LOGGER_INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format(|buf, record| writeln!(buf, "[{}] - {}", record.level(), record.args()))
            .init();
    });
}
