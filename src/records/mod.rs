mod index;
mod named_key;
mod security_key;
mod value_key;

pub use self::index::{HashLeaf, HashLeafItem, IndexLeaf, IndexRoot};
pub use self::named_key::{KeyFlags, NamedKey};
pub use self::security_key::SecurityKey;
pub use self::value_key::{
    DATA_IS_RESIDENT_MASK, MAX_RESIDENT_DATA_SIZE, ValueFlags, ValueKey, ValueType,
};

#[cfg(test)]
pub(crate) use self::named_key::tests::nk_bytes;
#[cfg(test)]
pub(crate) use self::value_key::tests::vk_bytes;
