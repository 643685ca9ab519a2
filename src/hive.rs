use std::fmt::{self, Debug, Formatter};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use encoding::EncodingRef;
use encoding::all::WINDOWS_1252;
use log::{debug, trace};

use crate::err::{FormatError, HiveError, Result};
use crate::hive_bin::HiveBins;
use crate::hive_header::HiveHeader;
use crate::node::{DirPage, Metadata, Node};
use crate::records::{SecurityKey, ValueKey};
use crate::resolver::OffsetResolver;
use crate::source::{ReadAt, ReadSeek, SeekSource};
use crate::utils::decode_utf16le_lossy;
use crate::value_data::{ValueData, decode_value};
use crate::walk::Walk;
use crate::INVALID_OFFSET;

/// Largest value stored in a single data cell. Bigger values use `db` (big data) indirection,
/// which is not followed, so they read as empty.
pub const MAX_CELL_VALUE_SIZE: u32 = 16344;

/// Path of the root key.
pub const ROOT_PATH: &str = ".";
pub const PATH_SEPARATOR: char = '/';

#[derive(Clone)]
pub struct HiveSettings {
    /// Codec for names stored one byte per character.
    ansi_codec: EncodingRef,
    /// Fail to open a hive whose header checksum does not match.
    validate_checksum: bool,
    /// Memoize decoded cells by offset.
    cache_cells: bool,
    /// Follow references into free cells.
    include_unallocated: bool,
    /// Deepest `ri` nesting accepted.
    max_index_depth: usize,
}

impl Debug for HiveSettings {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("HiveSettings")
            .field("ansi_codec", &self.ansi_codec.name())
            .field("validate_checksum", &self.validate_checksum)
            .field("cache_cells", &self.cache_cells)
            .field("include_unallocated", &self.include_unallocated)
            .field("max_index_depth", &self.max_index_depth)
            .finish()
    }
}

impl PartialEq for HiveSettings {
    fn eq(&self, other: &Self) -> bool {
        self.ansi_codec.name() == other.ansi_codec.name()
            && self.validate_checksum == other.validate_checksum
            && self.cache_cells == other.cache_cells
            && self.include_unallocated == other.include_unallocated
            && self.max_index_depth == other.max_index_depth
    }
}

impl Default for HiveSettings {
    fn default() -> Self {
        HiveSettings {
            ansi_codec: WINDOWS_1252,
            validate_checksum: false,
            cache_cells: true,
            include_unallocated: false,
            max_index_depth: 8,
        }
    }
}

impl HiveSettings {
    pub fn new() -> Self {
        HiveSettings::default()
    }

    pub fn ansi_codec(mut self, ansi_codec: EncodingRef) -> Self {
        self.ansi_codec = ansi_codec;
        self
    }

    pub fn validate_checksum(mut self, validate_checksum: bool) -> Self {
        self.validate_checksum = validate_checksum;
        self
    }

    pub fn cache_cells(mut self, cache_cells: bool) -> Self {
        self.cache_cells = cache_cells;
        self
    }

    pub fn include_unallocated(mut self, include_unallocated: bool) -> Self {
        self.include_unallocated = include_unallocated;
        self
    }

    pub fn max_index_depth(mut self, max_index_depth: usize) -> Self {
        self.max_index_depth = max_index_depth;
        self
    }

    pub fn get_ansi_codec(&self) -> EncodingRef {
        self.ansi_codec
    }

    pub fn should_validate_checksum(&self) -> bool {
        self.validate_checksum
    }

    pub fn should_cache_cells(&self) -> bool {
        self.cache_cells
    }

    pub fn should_include_unallocated(&self) -> bool {
        self.include_unallocated
    }

    pub fn get_max_index_depth(&self) -> usize {
        self.max_index_depth
    }

    fn resolver(&self) -> OffsetResolver {
        OffsetResolver::new(self.ansi_codec)
            .cache_cells(self.cache_cells)
            .include_unallocated(self.include_unallocated)
            .max_index_depth(self.max_index_depth)
    }
}

/// A read-only filesystem view over a registry hive.
///
/// Keys are directories and values are files. Every operation decodes the cells it needs from
/// the source on demand, through positioned reads, so a `Hive` can be shared between threads.
pub struct Hive<S: ReadAt> {
    source: S,
    header: HiveHeader,
    resolver: OffsetResolver,
    settings: Arc<HiveSettings>,
}

impl<S: ReadAt> Debug for Hive<S> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Hive")
            .field("header", &self.header)
            .field("resolver", &self.resolver)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Hive<File> {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| HiveError::FailedToOpenFile {
            source: e,
            path: path.to_path_buf(),
        })?;

        Hive::from_source(file)
    }
}

impl Hive<Vec<u8>> {
    pub fn from_buffer(buffer: Vec<u8>) -> Result<Self> {
        Hive::from_source(buffer)
    }
}

impl<R: ReadSeek + Send> Hive<SeekSource<R>> {
    /// Open a hive from a stream. Reads are serialized on the stream's single cursor.
    pub fn from_read_seek(read_seek: R) -> Result<Self> {
        let source = SeekSource::new(read_seek).map_err(|e| FormatError::FailedToRead {
            offset: 0,
            source: e,
        })?;
        Hive::from_source(source)
    }
}

impl<S: ReadAt> Hive<S> {
    pub fn from_source(source: S) -> Result<Self> {
        Hive::from_source_with_settings(source, HiveSettings::default())
    }

    pub fn from_source_with_settings(source: S, settings: HiveSettings) -> Result<Self> {
        let header = HiveHeader::from_source(&source)?;
        check_header(&header, &settings)?;

        Ok(Hive {
            source,
            header,
            resolver: settings.resolver(),
            settings: Arc::new(settings),
        })
    }

    /// Swap the settings of an open hive. Decoded cells cached so far are dropped.
    pub fn with_configuration(mut self, settings: HiveSettings) -> Result<Self> {
        check_header(&self.header, &settings)?;
        self.resolver = settings.resolver();
        self.settings = Arc::new(settings);
        Ok(self)
    }

    pub fn header(&self) -> &HiveHeader {
        &self.header
    }

    pub fn settings(&self) -> &HiveSettings {
        &self.settings
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn resolver(&self) -> &OffsetResolver {
        &self.resolver
    }

    pub fn into_source(self) -> S {
        self.source
    }

    pub fn hive_bins(&self) -> HiveBins<'_, S> {
        HiveBins::new(&self.source, &self.header)
    }

    /// The root key, from the header's root cell offset.
    pub fn root(&self) -> Result<Node> {
        let offset = self.header.root_key_offset;
        let cell = self.resolver.cell(&self.source, offset)?;
        let key = cell.as_named_key()?;

        Ok(Node::key(offset, cell.size, key.clone()))
    }

    /// Resolve a `/` separated path, `.` being the root.
    ///
    /// Names are matched exactly, case included. A value named like a key of the same parent is
    /// shadowed by that key.
    pub fn open(&self, path: &str) -> Result<Node> {
        let mut current = self.root()?;
        let relative = path.strip_prefix("./").unwrap_or(path);
        if relative == ROOT_PATH || relative.is_empty() {
            return Ok(current);
        }

        let mut walked = 0;
        for segment in relative.split(PATH_SEPARATOR) {
            let end = walked + segment.len();
            if !current.is_dir() {
                return Err(HiveError::NotADirectory {
                    path: relative[..walked.saturating_sub(1)].to_owned(),
                });
            }

            let found = if segment.is_empty() {
                None
            } else {
                self.children(&current)?
                    .into_iter()
                    .find(|child| child.name() == segment)
            };

            current = found.ok_or_else(|| HiveError::NotFound {
                path: relative[..end].to_owned(),
            })?;
            trace!("`{}` -> offset 0x{:08x}", &relative[..end], current.offset());
            walked = end + 1;
        }

        Ok(current)
    }

    pub fn stat(&self, node: &Node) -> Metadata {
        node.metadata()
    }

    /// All entries of a key, subkeys and values merged and sorted by name (byte-wise).
    ///
    /// On equal names subkeys come first.
    pub fn children(&self, node: &Node) -> Result<Vec<Node>> {
        let key = node.as_key().ok_or_else(|| HiveError::NotADirectory {
            path: node.name().to_owned(),
        })?;

        let mut entries = self.resolver.subkeys(&self.source, key)?;
        entries.extend(self.resolver.values(&self.source, key));
        entries.sort_by(|a, b| a.name().as_bytes().cmp(b.name().as_bytes()));

        Ok(entries)
    }

    /// One window of the listing of `node`. A `limit` of 0 returns everything from `offset` on.
    pub fn read_dir(&self, node: &Node, offset: usize, limit: usize) -> Result<DirPage> {
        let entries = self.children(node)?;
        let total = entries.len();

        let start = offset.min(total);
        let end = if limit == 0 {
            total
        } else {
            start.saturating_add(limit).min(total)
        };

        Ok(DirPage {
            entries: entries[start..end].to_vec(),
            next_offset: end,
            exhausted: end >= total,
        })
    }

    /// Copy the value's data into `buf`, returning how many bytes were copied.
    pub fn read(&self, node: &Node, buf: &mut [u8]) -> Result<usize> {
        let data = self.read_value(node)?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    /// The value's data bytes.
    ///
    /// Resident data is the 4 bytes of the data offset field. Implausible or unreachable data
    /// reads as empty.
    pub fn read_value(&self, node: &Node) -> Result<Vec<u8>> {
        let value = self.expect_value(node)?;

        if value.is_resident() {
            return Ok(value.resident_bytes().to_vec());
        }
        Ok(self.non_resident_data(value))
    }

    fn non_resident_data(&self, value: &ValueKey) -> Vec<u8> {
        let len = value.data_len();
        if len == 0 {
            return vec![];
        }
        if value.data_offset == 0 || value.data_offset == INVALID_OFFSET {
            debug!("value `{}` has no data cell", value.name);
            return vec![];
        }
        if len > MAX_CELL_VALUE_SIZE {
            debug!(
                "value `{}` declares {} bytes, more than fits in a single cell",
                value.name, len
            );
            return vec![];
        }

        let raw = match self.resolver.raw_cell(&self.source, value.data_offset) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("value `{}`: unreadable data cell: {}", value.name, e);
                return vec![];
            }
        };
        if !raw.allocated && !self.settings.should_include_unallocated() {
            debug!("value `{}`: data cell is free", value.name);
            return vec![];
        }

        let n = (len as usize).min(raw.declared_len()).min(raw.data.len());
        let mut data = raw.data;
        data.truncate(n);
        data
    }

    /// The value's data interpreted according to its type.
    pub fn decode_value(&self, node: &Node) -> Result<ValueData> {
        let value = self.expect_value(node)?;
        Ok(decode_value(value.value_type, &self.read_value(node)?))
    }

    pub fn value_reader(&self, node: &Node) -> Result<ValueReader> {
        Ok(ValueReader {
            data: io::Cursor::new(self.read_value(node)?),
        })
    }

    /// The key's class name, if it has a readable one.
    pub fn class_name(&self, node: &Node) -> Result<Option<String>> {
        let key = self.expect_key(node)?;
        if key.class_name_offset == INVALID_OFFSET || key.class_name_len == 0 {
            return Ok(None);
        }

        match self.resolver.raw_cell(&self.source, key.class_name_offset) {
            Ok(raw) => {
                let n = usize::from(key.class_name_len).min(raw.data.len());
                Ok(Some(decode_utf16le_lossy(&raw.data[..n])))
            }
            Err(e) => {
                debug!("key `{}`: unreadable class name: {}", key.name, e);
                Ok(None)
            }
        }
    }

    /// The key's security cell. The descriptor is returned as opaque bytes.
    pub fn security(&self, node: &Node) -> Result<Option<SecurityKey>> {
        let key = self.expect_key(node)?;
        if key.security_key_offset == INVALID_OFFSET {
            return Ok(None);
        }

        let sk = self
            .resolver
            .cell(&self.source, key.security_key_offset)
            .and_then(|cell| cell.as_security_key().cloned());
        match sk {
            Ok(sk) => Ok(Some(sk)),
            Err(e) => {
                debug!("key `{}`: unreadable security cell: {}", key.name, e);
                Ok(None)
            }
        }
    }

    /// Every node of the hive, depth-first in listing order, starting with the root.
    pub fn walk(&self) -> Walk<'_, S> {
        Walk::new(self)
    }

    fn expect_value<'n>(&self, node: &'n Node) -> Result<&'n ValueKey> {
        node.as_value().ok_or_else(|| HiveError::NotAFile {
            path: node.name().to_owned(),
        })
    }

    fn expect_key<'n>(&self, node: &'n Node) -> Result<&'n crate::records::NamedKey> {
        node.as_key().ok_or_else(|| HiveError::NotADirectory {
            path: node.name().to_owned(),
        })
    }
}

fn check_header(header: &HiveHeader, settings: &HiveSettings) -> Result<()> {
    if settings.should_validate_checksum() && !header.checksum_is_valid() {
        return Err(FormatError::InvalidChecksum {
            expected: header.checksum,
            found: header.calculated_checksum,
        }
        .into());
    }
    Ok(())
}

/// [`Read`] over the data of one value.
#[derive(Debug)]
pub struct ValueReader {
    data: io::Cursor<Vec<u8>>,
}

impl ValueReader {
    pub fn len(&self) -> usize {
        self.data.get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Read for ValueReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.data.read(buf)
    }
}
