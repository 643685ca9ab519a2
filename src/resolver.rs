use std::sync::{Arc, Mutex};

use encoding::EncodingRef;
use hashbrown::{HashMap as FastMap, HashSet as FastSet};
use log::{debug, trace, warn};

use crate::cell::{Cell, CellPayload, RawCell, decode_cell, read_raw_cell};
use crate::err::{FormatResult, HiveError, Result};
use crate::hive_header::HIVE_HEADER_SIZE;
use crate::node::Node;
use crate::records::NamedKey;
use crate::source::ReadAt;
use crate::{HiveOffset, INVALID_OFFSET};

/// Marks a reserved slot in a value list.
pub const VALUE_LIST_SENTINEL: HiveOffset = 0xFFFF_FFF0;

type CellCache = FastMap<HiveOffset, Arc<Cell>, ahash::RandomState>;

/// Turns relative offsets into absolute ones and decodes whatever they point at.
///
/// Relative offsets count from the start of the hive bins data, right after the base block.
pub struct OffsetResolver {
    base: u64,
    ansi_codec: EncodingRef,
    include_unallocated: bool,
    max_index_depth: usize,
    cache: Option<Mutex<CellCache>>,
}

impl OffsetResolver {
    pub fn new(ansi_codec: EncodingRef) -> Self {
        OffsetResolver {
            base: HIVE_HEADER_SIZE as u64,
            ansi_codec,
            include_unallocated: false,
            max_index_depth: 8,
            cache: None,
        }
    }

    pub fn include_unallocated(mut self, include_unallocated: bool) -> Self {
        self.include_unallocated = include_unallocated;
        self
    }

    pub fn max_index_depth(mut self, max_index_depth: usize) -> Self {
        self.max_index_depth = max_index_depth;
        self
    }

    pub fn cache_cells(mut self, cache_cells: bool) -> Self {
        self.cache = if cache_cells {
            Some(Mutex::new(FastMap::with_hasher(ahash::RandomState::new())))
        } else {
            None
        };
        self
    }

    /// Absolute position of a relative offset. Never fails, an out of range result is only
    /// noticed when reading from it.
    pub fn resolve(&self, offset: HiveOffset) -> u64 {
        self.base + u64::from(offset)
    }

    /// Inverse of [`OffsetResolver::resolve`].
    pub fn relative(&self, absolute: u64) -> Option<HiveOffset> {
        absolute
            .checked_sub(self.base)
            .and_then(|rel| HiveOffset::try_from(rel).ok())
    }

    /// Number of cells currently memoized.
    pub fn cached_cells(&self) -> usize {
        self.cache
            .as_ref()
            .map(|cache| cache.lock().map(|c| c.len()).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Decode the cell at `offset`, going through the cache when enabled.
    pub fn cell<S: ReadAt + ?Sized>(&self, source: &S, offset: HiveOffset) -> FormatResult<Arc<Cell>> {
        let Some(cache) = &self.cache else {
            return Ok(Arc::new(decode_cell(source, self.resolve(offset), self.ansi_codec)?));
        };

        if let Ok(cells) = cache.lock() {
            if let Some(cell) = cells.get(&offset) {
                return Ok(Arc::clone(cell));
            }
        }

        let cell = Arc::new(decode_cell(source, self.resolve(offset), self.ansi_codec)?);
        if let Ok(mut cells) = cache.lock() {
            cells.insert(offset, Arc::clone(&cell));
        }
        Ok(cell)
    }

    /// Read a cell without interpreting its payload (value lists, value data, class names).
    pub fn raw_cell<S: ReadAt + ?Sized>(&self, source: &S, offset: HiveOffset) -> FormatResult<RawCell> {
        read_raw_cell(source, self.resolve(offset))
    }

    /// Whether a cell reached through a cross reference may be used.
    fn accepts(&self, offset: HiveOffset, allocated: bool) -> bool {
        if !allocated && !self.include_unallocated {
            debug!("Offset `0x{:08x}`: skipping free cell", offset);
            return false;
        }
        true
    }

    pub fn named_key<S: ReadAt + ?Sized>(&self, source: &S, offset: HiveOffset) -> FormatResult<NamedKey> {
        let cell = self.cell(source, offset)?;
        Ok(cell.as_named_key()?.clone())
    }

    /// Offsets of every subkey of `key`, with `ri` indirection flattened.
    ///
    /// Damaged index cells are skipped. Index cells that reference each other, or nest deeper
    /// than the configured limit, are an error.
    pub fn subkey_offsets<S: ReadAt + ?Sized>(
        &self,
        source: &S,
        key: &NamedKey,
    ) -> Result<Vec<HiveOffset>> {
        // The stored count is not trusted for sizing, only the index cells are.
        let mut offsets = vec![];
        if !key.has_subkeys() {
            return Ok(offsets);
        }

        let mut visited = FastSet::with_hasher(ahash::RandomState::new());
        self.collect_subkey_offsets(source, key.subkey_list_offset, 0, &mut visited, &mut offsets)?;

        if offsets.len() != key.subkey_count as usize {
            debug!(
                "key `{}` declares {} subkeys, index holds {}",
                key.name,
                key.subkey_count,
                offsets.len()
            );
        }
        Ok(offsets)
    }

    fn collect_subkey_offsets<S: ReadAt + ?Sized>(
        &self,
        source: &S,
        index_offset: HiveOffset,
        depth: usize,
        visited: &mut FastSet<HiveOffset, ahash::RandomState>,
        out: &mut Vec<HiveOffset>,
    ) -> Result<()> {
        if depth > self.max_index_depth {
            return Err(HiveError::IndexTooDeep {
                offset: index_offset,
                depth: self.max_index_depth,
            });
        }
        if !visited.insert(index_offset) {
            return Err(HiveError::CycleDetected {
                offset: index_offset,
            });
        }

        let cell = match self.cell(source, index_offset) {
            Ok(cell) => cell,
            Err(e) => {
                debug!("Offset `0x{:08x}`: unreadable subkey index: {}", index_offset, e);
                return Ok(());
            }
        };
        if !self.accepts(index_offset, cell.allocated) {
            return Ok(());
        }

        match &cell.payload {
            CellPayload::FastLeaf(leaf) | CellPayload::HashLeaf(leaf) => out.extend(leaf.key_offsets()),
            CellPayload::IndexLeaf(leaf) => out.extend_from_slice(&leaf.key_offsets),
            CellPayload::IndexRoot(root) => {
                trace!(
                    "Offset `0x{:08x}`: index root with {} leaves",
                    index_offset,
                    root.leaf_offsets.len()
                );
                for &leaf_offset in &root.leaf_offsets {
                    self.collect_subkey_offsets(source, leaf_offset, depth + 1, visited, out)?;
                }
            }
            other => warn!(
                "Offset `0x{:08x}`: expected a subkey index, found `{}`",
                index_offset,
                String::from_utf8_lossy(&other.tag())
            ),
        }
        Ok(())
    }

    /// Every decodable subkey of `key`, in on-disk order.
    pub fn subkeys<S: ReadAt + ?Sized>(
        &self,
        source: &S,
        key: &NamedKey,
    ) -> Result<Vec<Node>> {
        let offsets = self.subkey_offsets(source, key)?;
        let mut subkeys = Vec::with_capacity(offsets.len());

        for offset in offsets {
            match self.cell(source, offset) {
                Ok(cell) => {
                    if !self.accepts(offset, cell.allocated) {
                        continue;
                    }
                    match cell.as_named_key() {
                        Ok(nk) => subkeys.push(Node::key(offset, cell.size, nk.clone())),
                        Err(e) => debug!("dangling subkey reference: {}", e),
                    }
                }
                Err(e) => debug!("Offset `0x{:08x}`: dangling subkey reference: {}", offset, e),
            }
        }
        Ok(subkeys)
    }

    /// Offsets from the value list of `key`, with reserved slots removed.
    pub fn value_offsets<S: ReadAt + ?Sized>(&self, source: &S, key: &NamedKey) -> Vec<HiveOffset> {
        if !key.has_values() {
            return vec![];
        }

        let list = match self.raw_cell(source, key.value_list_offset) {
            Ok(list) => list,
            Err(e) => {
                debug!("key `{}`: unreadable value list: {}", key.name, e);
                return vec![];
            }
        };
        if !self.accepts(key.value_list_offset, list.allocated) {
            return vec![];
        }

        let fits = list.declared_len() / 4;
        let count = key.value_count as usize;
        if count > fits {
            debug!(
                "key `{}` declares {} values, the list cell only holds {}",
                key.name, count, fits
            );
        }

        crate::utils::bytes::read_u32_table_lossy(&list.data, 0, count.min(fits))
            .into_iter()
            .filter(|&offset| offset != VALUE_LIST_SENTINEL && offset != INVALID_OFFSET)
            .collect()
    }

    /// Every decodable value of `key`, in on-disk order.
    pub fn values<S: ReadAt + ?Sized>(&self, source: &S, key: &NamedKey) -> Vec<Node> {
        let mut values = vec![];

        for offset in self.value_offsets(source, key) {
            match self.cell(source, offset) {
                Ok(cell) => {
                    if !self.accepts(offset, cell.allocated) {
                        continue;
                    }
                    match cell.as_value_key() {
                        Ok(vk) => values.push(Node::value(offset, cell.size, vk.clone())),
                        Err(e) => debug!("dangling value reference: {}", e),
                    }
                }
                Err(e) => debug!("Offset `0x{:08x}`: dangling value reference: {}", offset, e),
            }
        }
        values
    }
}

impl std::fmt::Debug for OffsetResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffsetResolver")
            .field("base", &self.base)
            .field("ansi_codec", &self.ansi_codec.name())
            .field("include_unallocated", &self.include_unallocated)
            .field("max_index_depth", &self.max_index_depth)
            .field("cache_cells", &self.cache.is_some())
            .finish()
    }
}
