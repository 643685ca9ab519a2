use jiff::Timestamp;
use serde::Serialize;

use crate::HiveOffset;
use crate::records::{MAX_RESIDENT_DATA_SIZE, NamedKey, ValueKey, ValueType};
use crate::utils::filetime_to_timestamp;

/// Display name of an unnamed value (and of a key with an empty name).
pub const DEFAULT_NAME: &str = "(Default)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Key(NamedKey),
    Value(ValueKey),
}

/// A key (directory) or value (file) in the hive.
///
/// Nodes are plain snapshots of the decoded cell, they hold no reference to the hive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    offset: HiveOffset,
    cell_size: u32,
    kind: NodeKind,
}

impl Node {
    pub(crate) fn key(offset: HiveOffset, cell_size: u32, key: NamedKey) -> Self {
        Node {
            offset,
            cell_size,
            kind: NodeKind::Key(key),
        }
    }

    pub(crate) fn value(offset: HiveOffset, cell_size: u32, value: ValueKey) -> Self {
        Node {
            offset,
            cell_size,
            kind: NodeKind::Value(value),
        }
    }

    /// Relative offset of the node's cell, unique within a hive.
    pub fn offset(&self) -> HiveOffset {
        self.offset
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Key(_))
    }

    /// The name as listed, with [`DEFAULT_NAME`] standing in for an empty one.
    pub fn name(&self) -> &str {
        let raw = self.raw_name();
        if raw.is_empty() { DEFAULT_NAME } else { raw }
    }

    /// The name as stored.
    pub fn raw_name(&self) -> &str {
        match &self.kind {
            NodeKind::Key(nk) => &nk.name,
            NodeKind::Value(vk) => &vk.name,
        }
    }

    /// Keys report their cell size. Values report their logical data size, which is the 4 inline
    /// bytes for resident data.
    pub fn size(&self) -> u64 {
        match &self.kind {
            NodeKind::Key(_) => u64::from(self.cell_size),
            NodeKind::Value(vk) if vk.is_resident() => u64::from(MAX_RESIDENT_DATA_SIZE),
            NodeKind::Value(vk) => u64::from(vk.data_len()),
        }
    }

    pub fn as_key(&self) -> Option<&NamedKey> {
        match &self.kind {
            NodeKind::Key(nk) => Some(nk),
            NodeKind::Value(_) => None,
        }
    }

    pub fn as_value(&self) -> Option<&ValueKey> {
        match &self.kind {
            NodeKind::Value(vk) => Some(vk),
            NodeKind::Key(_) => None,
        }
    }

    /// FILETIME ticks of the last write, keys only.
    pub fn last_written(&self) -> Option<u64> {
        self.as_key().map(|nk| nk.last_written)
    }

    pub fn modified(&self) -> Option<Timestamp> {
        self.last_written().and_then(filetime_to_timestamp)
    }

    pub fn value_type(&self) -> Option<ValueType> {
        self.as_value().map(|vk| vk.value_type)
    }

    pub fn metadata(&self) -> Metadata {
        Metadata {
            name: self.name().to_owned(),
            is_dir: self.is_dir(),
            size: self.size(),
            offset: self.offset,
            last_written: self.last_written(),
            value_type: self.value_type(),
        }
    }
}

/// `stat` view of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub offset: HiveOffset,
    /// Raw FILETIME ticks.
    pub last_written: Option<u64>,
    pub value_type: Option<ValueType>,
}

/// One window of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirPage {
    pub entries: Vec<Node>,
    /// Offset to pass to get the following window.
    pub next_offset: usize,
    /// No entries remain past this window.
    pub exhausted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{nk_bytes, vk_bytes};
    use encoding::all::WINDOWS_1252;
    use pretty_assertions::assert_eq;

    fn value(name: &[u8], size: u32) -> Node {
        let data = vk_bytes(name, 1, size, 0x0000_0002, 4);
        Node::value(0x200, 32, ValueKey::from_bytes(&data, data.len(), 0, WINDOWS_1252).unwrap())
    }

    #[test]
    fn test_default_value_name() {
        let node = value(b"", 0x8000_0004);
        assert_eq!(node.name(), DEFAULT_NAME);
        assert_eq!(node.raw_name(), "");
        assert!(!node.is_dir());
    }

    #[test]
    fn test_sizes() {
        assert_eq!(value(b"Start", 0x8000_0002).size(), 4);
        assert_eq!(value(b"ImagePath", 96).size(), 96);

        let data = nk_bytes(b"Services", 0x20, (0, 0), (0, 0));
        let key = Node::key(0x20, 0x58, NamedKey::from_bytes(&data, data.len(), 0, WINDOWS_1252).unwrap());
        assert_eq!(key.size(), 0x58);
        assert_eq!(
            key.modified().unwrap().to_string(),
            "2011-03-26T20:19:53.015625Z"
        );
    }

    #[test]
    fn test_metadata() {
        let node = value(b"Start", 0x8000_0004);
        assert_eq!(
            node.metadata(),
            Metadata {
                name: "Start".to_owned(),
                is_dir: false,
                size: 4,
                offset: 0x200,
                last_written: None,
                value_type: Some(ValueType::Dword),
            }
        );
    }
}
