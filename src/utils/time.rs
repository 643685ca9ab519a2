use jiff::Timestamp;

const WINDOWS_TO_UNIX_SECS: i64 = 11_644_473_600;

/// Convert raw FILETIME ticks (100ns intervals since 1601-01-01) to a [`Timestamp`].
///
/// Returns `None` for values outside of the range `jiff` can represent.
pub fn filetime_to_timestamp(filetime: u64) -> Option<Timestamp> {
    let secs = (filetime / 10_000_000) as i64 - WINDOWS_TO_UNIX_SECS;
    let nanos = ((filetime % 10_000_000) * 100) as i32;
    Timestamp::new(secs, nanos).ok()
}
