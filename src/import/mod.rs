//! Relationship import and its immutable result.

pub mod adjacency;

pub use adjacency::AdjacencyBuilder;

use crate::{
    buffer::RelationshipsBatchBuffer,
    config::{Aggregation, PageBacking},
    error::Result,
    idmap::IdMap,
    paged::{AdjacencyCursor, AdjacencyList, PropertyCursor},
    types::{Address, MappedId, RelTypeId, NO_RELATIONSHIPS},
};
use std::sync::atomic::{AtomicU64, Ordering};

/// Imports the relationships of one type (or of all types at once) from
/// scanned batches into an [`AdjacencyBuilder`].
pub struct SingleTypeImporter {
    rel_type: Option<RelTypeId>,
    key_count: usize,
    builder: AdjacencyBuilder,
    rows: AtomicU64,
}

impl SingleTypeImporter {
    /// `rel_type: None` accepts every record regardless of type.
    pub fn new(
        rel_type: Option<RelTypeId>,
        node_count: usize,
        key_count: usize,
        aggregation: Aggregation,
        concurrency: usize,
    ) -> Self {
        Self {
            rel_type,
            key_count,
            builder: AdjacencyBuilder::new(node_count, key_count, aggregation, concurrency),
            rows: AtomicU64::new(0),
        }
    }

    pub fn rel_type(&self) -> Option<RelTypeId> {
        self.rel_type
    }

    /// Consumes one scanned batch. `columns` holds one decoded property
    /// column per configured key, indexed by batch position. Records whose
    /// source or target was not mapped during node loading are skipped.
    pub fn import_batch(
        &self,
        buffer: &RelationshipsBatchBuffer,
        columns: &[Vec<u64>],
        id_map: &IdMap,
    ) {
        debug_assert_eq!(columns.len(), self.key_count);
        let mut row = vec![0u64; self.key_count];
        for (position, record) in buffer.records().enumerate() {
            if let Some(rel_type) = self.rel_type {
                if record[2] != rel_type {
                    continue;
                }
            }
            self.rows.fetch_add(1, Ordering::Relaxed);
            let (source, target) = match (id_map.to_mapped(record[0]), id_map.to_mapped(record[1]))
            {
                (Some(source), Some(target)) => (source, target),
                _ => continue,
            };
            for (slot, column) in row.iter_mut().zip(columns) {
                *slot = column[position];
            }
            self.builder.add(source, target, &row);
        }
    }

    /// Flushes the collected relationships and freezes the result.
    pub fn build(self, page_size: usize, backing: PageBacking) -> Result<Relationships> {
        let rows = self.rows.into_inner();
        let built = self.builder.build(page_size, backing)?;
        Ok(Relationships {
            rows,
            relationship_count: built.relationship_count,
            adjacency_list: built.adjacency_list,
            adjacency_offsets: built.adjacency_offsets,
            property_list: built.property_list,
            property_offsets: built.property_offsets,
            key_count: self.key_count,
        })
    }
}

/// The immutable relationship topology (and properties) of one import.
pub struct Relationships {
    rows: u64,
    relationship_count: u64,
    adjacency_list: AdjacencyList,
    adjacency_offsets: Box<[Address]>,
    property_list: Option<AdjacencyList>,
    property_offsets: Option<Box<[Address]>>,
    key_count: usize,
}

impl Relationships {
    /// Scanned records accepted by this import's type filter.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Adjacency entries written (after endpoint filtering and
    /// aggregation).
    pub fn relationship_count(&self) -> u64 {
        self.relationship_count
    }

    pub fn adjacency_list(&self) -> &AdjacencyList {
        &self.adjacency_list
    }

    pub fn adjacency_offsets(&self) -> &[Address] {
        &self.adjacency_offsets
    }

    pub fn property_list(&self) -> Option<&AdjacencyList> {
        self.property_list.as_ref()
    }

    pub fn property_offsets(&self) -> Option<&[Address]> {
        self.property_offsets.as_deref()
    }

    /// Number of decoded property keys per relationship.
    pub fn key_count(&self) -> usize {
        self.key_count
    }

    /// The outgoing degree of `node`.
    pub fn degree(&self, node: MappedId) -> u32 {
        match self.adjacency_offsets[node as usize] {
            NO_RELATIONSHIPS => 0,
            offset => self.adjacency_list.degree(offset),
        }
    }

    /// The ascending target list of `node`, or `None` for a node without
    /// relationships.
    pub fn targets(&self, node: MappedId) -> Option<AdjacencyCursor> {
        match self.adjacency_offsets[node as usize] {
            NO_RELATIONSHIPS => None,
            offset => Some(self.adjacency_list.cursor(offset)),
        }
    }

    /// The property rows of `node`, parallel to [`Relationships::targets`].
    pub fn properties(&self, node: MappedId) -> Option<PropertyCursor> {
        let list = self.property_list.as_ref()?;
        let offsets = self.property_offsets.as_ref()?;
        match offsets[node as usize] {
            NO_RELATIONSHIPS => None,
            offset => Some(list.property_cursor(offset, self.key_count)),
        }
    }
}
