//! Identifier and address types shared across the loading pipeline.

/// The external node id type, as reported by the backing store.
pub type NodeId = i64;

/// The dense internal node id type, assigned during loading.
pub type MappedId = u64;

/// The node label token type.
pub type LabelId = i64;

/// The relationship type token type.
pub type RelTypeId = i64;

/// The property key token type.
pub type PropertyKeyId = i64;

/// A reference into the backing store's property storage.
pub type PropRef = i64;

/// A global address into paged storage: `page_index << page_shift | offset`.
pub type Address = u64;

/// Marks a record without attached properties.
pub const NO_PROPERTIES: PropRef = -1;

/// Marks a node without relationships in an offset array.
pub const NO_RELATIONSHIPS: Address = u64::MAX;
