use crate::err::{FormatError, FormatResult};
use crate::source::{ReadAt, read_available};
use crate::utils::{ByteCursor, bytes, decode_utf16le_z};

use log::{trace, warn};
use serde::Serialize;

pub const HIVE_HEADER_SIGNATURE: &[u8; 4] = b"regf";
/// Size of the base block; hive bin data starts right after it.
pub const HIVE_HEADER_SIZE: usize = 4096;
/// The checksum covers this many leading bytes of the base block.
const CHECKSUMMED_LEN: usize = 508;
/// Everything past the checksum is reserved, except the two boot fields at the very end.
const MINIMAL_HEADER_LEN: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HeaderType {
    Primary,
    TransactionLog,
    Other(u32),
}

impl From<u32> for HeaderType {
    fn from(value: u32) -> Self {
        match value {
            0 => HeaderType::Primary,
            1 | 2 | 6 => HeaderType::TransactionLog,
            other => HeaderType::Other(other),
        }
    }
}

/// Things about a header that are odd, but do not stop us from reading the hive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HeaderAnomaly {
    /// The last write did not complete (a "dirty" hive).
    SequenceMismatch { primary: u32, secondary: u32 },
    UnsupportedVersion { major: u32, minor: u32 },
    NotAPrimaryFile(HeaderType),
    UnknownFormat(u32),
    ChecksumMismatch { stored: u32, calculated: u32 },
    BinsDataSizeUnaligned(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HiveHeader {
    pub primary_sequence_number: u32,
    pub secondary_sequence_number: u32,
    /// FILETIME ticks.
    pub last_written: u64,
    pub major_version: u32,
    pub minor_version: u32,
    pub header_type: HeaderType,
    /// 1 means "direct memory load".
    pub format: u32,
    /// Relative to the start of the hive bins data.
    pub root_key_offset: u32,
    pub hive_bins_data_size: u32,
    pub clustering_factor: u32,
    /// Partial path of the primary file, used by Windows for debugging.
    pub file_name: String,
    /// XOR-32 checksum of the previous 508 bytes, as stored.
    pub checksum: u32,
    /// Checksum recomputed from the bytes we read.
    pub calculated_checksum: u32,
    pub boot_type: u32,
    pub boot_recover: u32,
}

impl HiveHeader {
    pub fn from_source<S: ReadAt + ?Sized>(source: &S) -> FormatResult<HiveHeader> {
        let mut buf = vec![0_u8; HIVE_HEADER_SIZE];
        let n = read_available(source, 0, &mut buf)?;
        buf.truncate(n);

        HiveHeader::from_bytes(&buf)
    }

    /// Decode a base block from its raw bytes.
    ///
    /// Only the signature is validated. Field values are accepted as they are, see
    /// [`HiveHeader::anomalies`] for what looks wrong.
    pub fn from_bytes(buf: &[u8]) -> FormatResult<HiveHeader> {
        let magic = bytes::read_array::<4>(buf, 0).ok_or(FormatError::TruncatedRecord {
            what: "base block signature",
            offset: 0,
            need: 4,
            have: buf.len(),
        })?;

        if &magic != HIVE_HEADER_SIGNATURE {
            return Err(FormatError::BadSignature {
                what: "base block",
                offset: 0,
                expected: HIVE_HEADER_SIGNATURE,
                found: magic.to_vec(),
            });
        }

        let raw = bytes::slice_r(buf, 0, 0, MINIMAL_HEADER_LEN, "base block")?;
        let mut cursor = ByteCursor::new(raw, 0);
        cursor.advance(4, "signature")?;

        let primary_sequence_number = cursor.u32_named("primary sequence number")?;
        let secondary_sequence_number = cursor.u32_named("secondary sequence number")?;
        let last_written = cursor.u64_named("last written timestamp")?;
        let major_version = cursor.u32_named("major version")?;
        let minor_version = cursor.u32_named("minor version")?;
        let header_type = HeaderType::from(cursor.u32_named("file type")?);
        let format = cursor.u32_named("file format")?;
        let root_key_offset = cursor.u32_named("root cell offset")?;
        let hive_bins_data_size = cursor.u32_named("hive bins data size")?;
        let clustering_factor = cursor.u32_named("clustering factor")?;
        let file_name = decode_utf16le_z(cursor.take_bytes(64, "file name")?).unwrap_or_default();

        // Reserved (RM/TM identifiers, flags, offline registry data).
        cursor.advance(CHECKSUMMED_LEN - cursor.pos(), "reserved")?;
        let checksum = cursor.u32_named("checksum")?;

        // The boot fields live at the very end of the base block, which partial captures may lack.
        let boot_type = bytes::read_u32_le(buf, HIVE_HEADER_SIZE - 8).unwrap_or(0);
        let boot_recover = bytes::read_u32_le(buf, HIVE_HEADER_SIZE - 4).unwrap_or(0);

        let header = HiveHeader {
            primary_sequence_number,
            secondary_sequence_number,
            last_written,
            major_version,
            minor_version,
            header_type,
            format,
            root_key_offset,
            hive_bins_data_size,
            clustering_factor,
            file_name,
            checksum,
            calculated_checksum: HiveHeader::calculate_checksum(raw),
            boot_type,
            boot_recover,
        };

        trace!("{:?}", header);
        for anomaly in header.anomalies() {
            warn!("hive header anomaly: {:?}", anomaly);
        }

        Ok(header)
    }

    /// XOR-32 of the first 508 bytes, with the two reserved results remapped.
    pub fn calculate_checksum(header: &[u8]) -> u32 {
        let covered = &header[..CHECKSUMMED_LEN.min(header.len())];
        let sum = covered
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .fold(0_u32, |acc, v| acc ^ v);

        match sum {
            0xFFFF_FFFF => 0xFFFF_FFFE,
            0 => 1,
            other => other,
        }
    }

    pub fn checksum_is_valid(&self) -> bool {
        self.checksum == self.calculated_checksum
    }

    pub fn is_dirty(&self) -> bool {
        self.primary_sequence_number != self.secondary_sequence_number
    }

    pub fn anomalies(&self) -> Vec<HeaderAnomaly> {
        let mut anomalies = vec![];

        if self.is_dirty() {
            anomalies.push(HeaderAnomaly::SequenceMismatch {
                primary: self.primary_sequence_number,
                secondary: self.secondary_sequence_number,
            });
        }
        if self.major_version != 1 || !(2..=6).contains(&self.minor_version) {
            anomalies.push(HeaderAnomaly::UnsupportedVersion {
                major: self.major_version,
                minor: self.minor_version,
            });
        }
        if self.header_type != HeaderType::Primary {
            anomalies.push(HeaderAnomaly::NotAPrimaryFile(self.header_type));
        }
        if self.format != 1 {
            anomalies.push(HeaderAnomaly::UnknownFormat(self.format));
        }
        if !self.checksum_is_valid() {
            anomalies.push(HeaderAnomaly::ChecksumMismatch {
                stored: self.checksum,
                calculated: self.calculated_checksum,
            });
        }
        if !self
            .hive_bins_data_size
            .is_multiple_of(HIVE_HEADER_SIZE as u32)
        {
            anomalies.push(HeaderAnomaly::BinsDataSizeUnaligned(
                self.hive_bins_data_size,
            ));
        }

        anomalies
    }
}
