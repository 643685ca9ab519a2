#![allow(dead_code)]
use std::sync::Once;

use hivefs::HiveHeader;

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

pub const HEADER_SIZE: usize = 4096;
pub const BIN_SIZE: usize = 4096;
pub const NO_OFFSET: u32 = u32::MAX;
pub const TIMESTAMP: u64 = 129_456_443_930_156_250;

pub const REG_SZ: u32 = 1;
pub const REG_EXPAND_SZ: u32 = 2;
pub const REG_BINARY: u32 = 3;
pub const REG_DWORD: u32 = 4;
pub const REG_MULTI_SZ: u32 = 7;
pub const REG_QWORD: u32 = 11;

pub fn utf16(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

/// UTF-16LE with a NUL terminator, the way `REG_SZ` data is stored.
pub fn reg_sz(s: &str) -> Vec<u8> {
    let mut data = utf16(s);
    data.extend_from_slice(&[0, 0]);
    data
}

pub fn reg_multi_sz(items: &[&str]) -> Vec<u8> {
    let mut data = vec![];
    for item in items {
        data.extend(reg_sz(item));
    }
    data.extend_from_slice(&[0, 0]);
    data
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    FastLeaf,
    HashLeaf,
    IndexLeaf,
    /// `ri` over `li` leaves of two keys each.
    IndexRoot,
}

#[derive(Debug, Clone)]
pub struct ValueSpec {
    pub name: String,
    pub value_type: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct KeySpec {
    pub name: String,
    pub class_name: Option<String>,
    pub index: IndexKind,
    pub keys: Vec<KeySpec>,
    pub values: Vec<ValueSpec>,
}

impl KeySpec {
    pub fn new(name: &str) -> Self {
        KeySpec {
            name: name.to_owned(),
            class_name: None,
            index: IndexKind::FastLeaf,
            keys: vec![],
            values: vec![],
        }
    }

    pub fn index(mut self, index: IndexKind) -> Self {
        self.index = index;
        self
    }

    pub fn class_name(mut self, class_name: &str) -> Self {
        self.class_name = Some(class_name.to_owned());
        self
    }

    pub fn key(mut self, key: KeySpec) -> Self {
        self.keys.push(key);
        self
    }

    pub fn value(mut self, name: &str, value_type: u32, data: impl Into<Vec<u8>>) -> Self {
        self.values.push(ValueSpec {
            name: name.to_owned(),
            value_type,
            data: data.into(),
        });
        self
    }
}

/// Cross references of a hand built `nk` cell.
#[derive(Debug, Clone, Copy)]
pub struct NkFields {
    pub flags: u16,
    pub subkey_count: u32,
    pub subkey_list: u32,
    pub value_count: u32,
    pub value_list: u32,
    pub security: u32,
    pub class_name: u32,
    pub class_name_len: u16,
}

impl Default for NkFields {
    fn default() -> Self {
        NkFields {
            flags: 0x20,
            subkey_count: 0,
            subkey_list: NO_OFFSET,
            value_count: 0,
            value_list: NO_OFFSET,
            security: NO_OFFSET,
            class_name: NO_OFFSET,
            class_name_len: 0,
        }
    }
}

/// Names made of Latin-1 characters are stored one byte per character, others as UTF-16.
fn encode_name(name: &str) -> (Vec<u8>, bool) {
    if name.chars().all(|c| (c as u32) <= 0xFF) {
        (name.chars().map(|c| c as u8).collect(), true)
    } else {
        (utf16(name), false)
    }
}

fn name_hash(name: &str) -> u32 {
    name.to_uppercase()
        .chars()
        .fold(0_u32, |h, c| h.wrapping_mul(37).wrapping_add(c as u32))
}

fn name_hint(name: &str) -> u32 {
    let mut hint = [0_u8; 4];
    for (slot, c) in hint.iter_mut().zip(name.chars()) {
        *slot = c as u8;
    }
    u32::from_le_bytes(hint)
}

/// Builds a single hive in memory, one cell after the other in a run of hive bins.
///
/// Offsets returned by the builder are relative to the hive bins data, like the ones stored in
/// the hive itself.
pub struct HiveBuilder {
    data: Vec<u8>,
    security: u32,
}

impl Default for HiveBuilder {
    fn default() -> Self {
        HiveBuilder::new()
    }
}

impl HiveBuilder {
    pub fn new() -> Self {
        let mut builder = HiveBuilder {
            data: vec![0_u8; 32],
            security: NO_OFFSET,
        };

        let own = builder.next_offset();
        let mut sk = b"sk\0\0".to_vec();
        sk.extend_from_slice(&own.to_le_bytes());
        sk.extend_from_slice(&own.to_le_bytes());
        sk.extend_from_slice(&1_u32.to_le_bytes());
        // Minimal self-relative descriptor: revision, control, no owner/group/acls.
        let descriptor = [1_u8, 0, 0x04, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        sk.extend_from_slice(&(descriptor.len() as u32).to_le_bytes());
        sk.extend_from_slice(&descriptor);
        builder.security = builder.alloc(&sk);

        builder
    }

    pub fn next_offset(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn security_offset(&self) -> u32 {
        self.security
    }

    fn push_cell(&mut self, allocated: bool, payload: &[u8]) -> u32 {
        let offset = self.next_offset();
        let size = (payload.len() + 4).div_ceil(8) * 8;
        let raw_size = if allocated { -(size as i32) } else { size as i32 };

        self.data.extend_from_slice(&raw_size.to_le_bytes());
        self.data.extend_from_slice(payload);
        self.data.resize(offset as usize + size, 0);
        offset
    }

    pub fn alloc(&mut self, payload: &[u8]) -> u32 {
        self.push_cell(true, payload)
    }

    pub fn alloc_free(&mut self, payload: &[u8]) -> u32 {
        self.push_cell(false, payload)
    }

    /// Overwrite bytes of the cell at `cell`; `at` counts from the byte after the size field.
    pub fn patch(&mut self, cell: u32, at: usize, bytes: &[u8]) {
        let start = cell as usize + 4 + at;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn patch_u32(&mut self, cell: u32, at: usize, value: u32) {
        self.patch(cell, at, &value.to_le_bytes());
    }

    pub fn set_cell_size(&mut self, cell: u32, raw_size: i32) {
        let start = cell as usize;
        self.data[start..start + 4].copy_from_slice(&raw_size.to_le_bytes());
    }

    pub fn nk(&mut self, name: &str, fields: &NkFields) -> u32 {
        let (name_bytes, compressed) = encode_name(name);
        let flags = if compressed {
            fields.flags | 0x20
        } else {
            fields.flags & !0x20
        };

        let mut buf = b"nk".to_vec();
        buf.extend_from_slice(&flags.to_le_bytes());
        buf.extend_from_slice(&TIMESTAMP.to_le_bytes());
        buf.extend_from_slice(&0_u32.to_le_bytes()); // access bits
        buf.extend_from_slice(&0_u32.to_le_bytes()); // parent
        buf.extend_from_slice(&fields.subkey_count.to_le_bytes());
        buf.extend_from_slice(&0_u32.to_le_bytes());
        buf.extend_from_slice(&fields.subkey_list.to_le_bytes());
        buf.extend_from_slice(&NO_OFFSET.to_le_bytes());
        buf.extend_from_slice(&fields.value_count.to_le_bytes());
        buf.extend_from_slice(&fields.value_list.to_le_bytes());
        buf.extend_from_slice(&fields.security.to_le_bytes());
        buf.extend_from_slice(&fields.class_name.to_le_bytes());
        buf.extend_from_slice(&[0_u8; 20]);
        buf.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        buf.extend_from_slice(&fields.class_name_len.to_le_bytes());
        buf.extend_from_slice(&name_bytes);

        self.alloc(&buf)
    }

    pub fn vk_raw(&mut self, name: &str, value_type: u32, data_size_raw: u32, data_offset: u32) -> u32 {
        let (name_bytes, compressed) = encode_name(name);
        let flags: u16 = if compressed && !name.is_empty() { 1 } else { 0 };

        let mut buf = b"vk".to_vec();
        buf.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        buf.extend_from_slice(&data_size_raw.to_le_bytes());
        buf.extend_from_slice(&data_offset.to_le_bytes());
        buf.extend_from_slice(&value_type.to_le_bytes());
        buf.extend_from_slice(&flags.to_le_bytes());
        buf.extend_from_slice(&0_u16.to_le_bytes());
        buf.extend_from_slice(&name_bytes);

        self.alloc(&buf)
    }

    /// A value, resident when the data fits in 4 bytes.
    pub fn vk(&mut self, name: &str, value_type: u32, data: &[u8]) -> u32 {
        match data.len() {
            0 => self.vk_raw(name, value_type, 0, NO_OFFSET),
            len @ 1..=4 => {
                let mut inline = [0_u8; 4];
                inline[..len].copy_from_slice(data);
                self.vk_raw(name, value_type, 0x8000_0000 | len as u32, u32::from_le_bytes(inline))
            }
            len => {
                let data_offset = self.alloc(data);
                self.vk_raw(name, value_type, len as u32, data_offset)
            }
        }
    }

    pub fn value_list(&mut self, offsets: &[u32]) -> u32 {
        let buf = offsets.iter().flat_map(|o| o.to_le_bytes()).collect::<Vec<u8>>();
        self.alloc(&buf)
    }

    /// `li` or `ri` cell.
    pub fn index(&mut self, tag: &[u8; 2], items: &[u32]) -> u32 {
        let mut buf = tag.to_vec();
        buf.extend_from_slice(&(items.len() as u16).to_le_bytes());
        for item in items {
            buf.extend_from_slice(&item.to_le_bytes());
        }
        self.alloc(&buf)
    }

    /// `lf` or `lh` cell of `(key offset, hint or hash)` pairs.
    pub fn hash_leaf(&mut self, tag: &[u8; 2], items: &[(u32, u32)]) -> u32 {
        let mut buf = tag.to_vec();
        buf.extend_from_slice(&(items.len() as u16).to_le_bytes());
        for (offset, hash) in items {
            buf.extend_from_slice(&offset.to_le_bytes());
            buf.extend_from_slice(&hash.to_le_bytes());
        }
        self.alloc(&buf)
    }

    pub fn add_key(&mut self, spec: &KeySpec) -> u32 {
        self.add_key_with_flags(spec, 0x20)
    }

    pub fn add_key_with_flags(&mut self, spec: &KeySpec, flags: u16) -> u32 {
        let children = spec
            .keys
            .iter()
            .map(|key| (self.add_key(key), key.name.as_str()))
            .collect::<Vec<_>>();
        let offsets = children.iter().map(|(offset, _)| *offset).collect::<Vec<_>>();

        let subkey_list = if children.is_empty() {
            NO_OFFSET
        } else {
            match spec.index {
                IndexKind::FastLeaf => {
                    let items = children.iter().map(|&(o, n)| (o, name_hint(n))).collect::<Vec<_>>();
                    self.hash_leaf(b"lf", &items)
                }
                IndexKind::HashLeaf => {
                    let items = children.iter().map(|&(o, n)| (o, name_hash(n))).collect::<Vec<_>>();
                    self.hash_leaf(b"lh", &items)
                }
                IndexKind::IndexLeaf => self.index(b"li", &offsets),
                IndexKind::IndexRoot => {
                    let leaves = offsets
                        .chunks(2)
                        .map(|chunk| self.index(b"li", chunk))
                        .collect::<Vec<_>>();
                    self.index(b"ri", &leaves)
                }
            }
        };

        let values = spec
            .values
            .iter()
            .map(|value| self.vk(&value.name, value.value_type, &value.data))
            .collect::<Vec<_>>();
        let value_list = if values.is_empty() {
            NO_OFFSET
        } else {
            self.value_list(&values)
        };

        let (class_name, class_name_len) = match &spec.class_name {
            Some(class) => {
                let bytes = utf16(class);
                (self.alloc(&bytes), bytes.len() as u16)
            }
            None => (NO_OFFSET, 0),
        };

        let fields = NkFields {
            flags,
            subkey_count: children.len() as u32,
            subkey_list,
            value_count: values.len() as u32,
            value_list,
            security: self.security,
            class_name,
            class_name_len,
        };
        self.nk(&spec.name, &fields)
    }

    /// Wrap the cells in hive bins behind a base block whose root cell is `root`.
    pub fn finish(self, root: u32) -> Vec<u8> {
        let mut data = self.data;
        let used = data.len();
        let bins_size = used.div_ceil(BIN_SIZE).max(1) * BIN_SIZE;
        if bins_size > used {
            // The slack at the end of the bin is one free cell.
            data.extend_from_slice(&((bins_size - used) as i32).to_le_bytes());
            data.resize(bins_size, 0);
        }

        // Everything goes into one (large) bin.
        data[..4].copy_from_slice(b"hbin");
        data[4..8].copy_from_slice(&0_u32.to_le_bytes());
        data[8..12].copy_from_slice(&(bins_size as u32).to_le_bytes());
        data[20..28].copy_from_slice(&TIMESTAMP.to_le_bytes());

        let mut hive = vec![0_u8; HEADER_SIZE];
        hive[..4].copy_from_slice(b"regf");
        hive[4..8].copy_from_slice(&1_u32.to_le_bytes());
        hive[8..12].copy_from_slice(&1_u32.to_le_bytes());
        hive[12..20].copy_from_slice(&TIMESTAMP.to_le_bytes());
        hive[20..24].copy_from_slice(&1_u32.to_le_bytes());
        hive[24..28].copy_from_slice(&5_u32.to_le_bytes());
        hive[32..36].copy_from_slice(&1_u32.to_le_bytes());
        hive[36..40].copy_from_slice(&root.to_le_bytes());
        hive[40..44].copy_from_slice(&(bins_size as u32).to_le_bytes());
        hive[44..48].copy_from_slice(&1_u32.to_le_bytes());
        let file_name = utf16("\\SystemRoot\\System32\\Config\\SYSTEM");
        hive[48..48 + file_name.len().min(64)].copy_from_slice(&file_name[..file_name.len().min(64)]);
        let checksum = HiveHeader::calculate_checksum(&hive);
        hive[508..512].copy_from_slice(&checksum.to_le_bytes());

        hive.extend(data);
        hive
    }
}

/// A hive holding exactly the tree described by `root`.
pub fn build_hive(root: &KeySpec) -> Vec<u8> {
    let mut builder = HiveBuilder::new();
    let root = builder.add_key_with_flags(root, 0x2C);
    builder.finish(root)
}

/// A small SYSTEM-like tree, exercising every index kind.
pub fn system_hive_spec() -> KeySpec {
    let services = ["Tcpip", "NetBT", "Dhcp", "afd", "Beep"]
        .iter()
        .fold(KeySpec::new("Services").index(IndexKind::IndexRoot), |services, name| {
            services.key(KeySpec::new(name).value("Start", REG_DWORD, 2_u32.to_le_bytes()))
        });

    let control = KeySpec::new("Control")
        .index(IndexKind::HashLeaf)
        .key(
            KeySpec::new("ComputerName").key(
                KeySpec::new("ComputerName")
                    .value("ComputerName", REG_SZ, reg_sz("WKS-WIN732BITA"))
                    .value("", REG_SZ, reg_sz("mnmsrvc")),
            ),
        )
        .key(
            KeySpec::new("Nls").index(IndexKind::IndexLeaf).key(
                KeySpec::new("CodePage")
                    .value("ACP", REG_SZ, reg_sz("1252"))
                    .value("OEMCP", REG_SZ, reg_sz("437"))
                    .value("MACCP", REG_SZ, reg_sz("10000")),
            ),
        )
        .value("SystemBootDevice", REG_SZ, reg_sz("multi(0)disk(0)rdisk(0)partition(1)"));

    KeySpec::new("CMI-CreateHive{2A7FB991-7BBE-4F9D-B91E-7CB51D4737F5}")
        .key(
            KeySpec::new("ControlSet001")
                .class_name("ControlSetClass")
                .key(control)
                .key(services),
        )
        .key(
            KeySpec::new("Select")
                .value("Current", REG_DWORD, 1_u32.to_le_bytes())
                .value("Default", REG_DWORD, 1_u32.to_le_bytes())
                .value("LastKnownGood", REG_DWORD, 2_u32.to_le_bytes()),
        )
        .key(
            KeySpec::new("MountedDevices")
                .value("\\DosDevices\\C:", REG_BINARY, vec![0xA5_u8; 12])
                .value("\\??\\Volume{a1b2}", REG_BINARY, vec![0x5A_u8; 24]),
        )
        .key(KeySpec::new("Setup").value("SetupType", REG_DWORD, 0_u32.to_le_bytes()))
}

pub fn system_hive() -> Vec<u8> {
    build_hive(&system_hive_spec())
}
