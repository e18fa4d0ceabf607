//! A deterministic in-memory store, the record-based reference variant.
//!
//! Record positions are the insertion order of rows, so scans are fully
//! reproducible. Used by the test suite as the fake store and useful as a
//! staging area when the graph is assembled programmatically.

use super::{
    GraphStore, LabelIdList, NodeReference, PropertyReader, RecordConsumer, RelationshipReference,
    ScanSource, SourceCursor,
};
use crate::{
    error::Result,
    types::{LabelId, NodeId, PropRef, PropertyKeyId, RelTypeId, NO_PROPERTIES},
};
use std::sync::Arc;

struct MemNode {
    id: NodeId,
    labels: Vec<LabelId>,
}

struct MemRelationship {
    source: NodeId,
    target: NodeId,
    rel_type: RelTypeId,
    properties: Vec<(PropertyKeyId, f64)>,
}

#[derive(Default)]
struct Inner {
    nodes: Vec<MemNode>,
    relationships: Vec<MemRelationship>,
}

/// An in-memory property graph store.
///
/// Rows are added before loading; a node id may be added more than once
/// (the id mapping merges the observations and unions their labels).
#[derive(Default)]
pub struct MemGraph {
    inner: Arc<Inner>,
}

impl MemGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: NodeId, labels: &[LabelId]) {
        Arc::get_mut(&mut self.inner)
            .expect("graph is shared with a running load")
            .nodes
            .push(MemNode {
                id,
                labels: labels.to_vec(),
            });
    }

    pub fn add_relationship(
        &mut self,
        source: NodeId,
        target: NodeId,
        rel_type: RelTypeId,
        properties: &[(PropertyKeyId, f64)],
    ) {
        Arc::get_mut(&mut self.inner)
            .expect("graph is shared with a running load")
            .relationships
            .push(MemRelationship {
                source,
                target,
                rel_type,
                properties: properties.to_vec(),
            });
    }

    pub fn node_row_count(&self) -> usize {
        self.inner.nodes.len()
    }

    pub fn relationship_row_count(&self) -> usize {
        self.inner.relationships.len()
    }
}

pub struct MemNodeRecord {
    id: NodeId,
    labels: Vec<LabelId>,
}

impl NodeReference for MemNodeRecord {
    fn entity_id(&self) -> NodeId {
        self.id
    }

    fn labels(&self) -> Result<&[LabelId]> {
        Ok(&self.labels)
    }

    fn properties_reference(&self) -> Result<PropRef> {
        Ok(NO_PROPERTIES)
    }
}

pub struct MemNodes {
    inner: Arc<Inner>,
}

impl ScanSource for MemNodes {
    type Reference = MemNodeRecord;
    type Cursor = MemNodeCursor;

    fn record_upper_bound(&self) -> u64 {
        self.inner.nodes.len() as u64
    }

    fn cursor(&self) -> Result<Self::Cursor> {
        Ok(MemNodeCursor {
            inner: self.inner.clone(),
            record: MemNodeRecord {
                id: 0,
                labels: vec![],
            },
        })
    }
}

pub struct MemNodeCursor {
    inner: Arc<Inner>,
    record: MemNodeRecord,
}

impl SourceCursor for MemNodeCursor {
    type Reference = MemNodeRecord;

    fn read_window<C>(&mut self, start: u64, end: u64, consumer: &mut C) -> Result<u64>
    where
        C: RecordConsumer<MemNodeRecord>,
    {
        let end = std::cmp::min(end, self.inner.nodes.len() as u64);
        let mut delivered = 0;
        for pos in start..end {
            let node = &self.inner.nodes[pos as usize];
            self.record.id = node.id;
            self.record.labels.clear();
            self.record.labels.extend_from_slice(&node.labels);
            if !consumer.offer(&self.record)? {
                break;
            }
            delivered += 1;
        }
        Ok(delivered)
    }
}

pub struct MemRelRecord {
    row: i64,
    source: NodeId,
    target: NodeId,
    rel_type: RelTypeId,
    properties_reference: PropRef,
}

impl RelationshipReference for MemRelRecord {
    fn entity_id(&self) -> i64 {
        self.row
    }

    fn source_id(&self) -> NodeId {
        self.source
    }

    fn target_id(&self) -> NodeId {
        self.target
    }

    fn rel_type(&self) -> RelTypeId {
        self.rel_type
    }

    fn properties_reference(&self) -> Result<PropRef> {
        Ok(self.properties_reference)
    }
}

pub struct MemRelationships {
    inner: Arc<Inner>,
}

impl ScanSource for MemRelationships {
    type Reference = MemRelRecord;
    type Cursor = MemRelCursor;

    fn record_upper_bound(&self) -> u64 {
        self.inner.relationships.len() as u64
    }

    fn cursor(&self) -> Result<Self::Cursor> {
        Ok(MemRelCursor {
            inner: self.inner.clone(),
            record: MemRelRecord {
                row: 0,
                source: 0,
                target: 0,
                rel_type: 0,
                properties_reference: NO_PROPERTIES,
            },
        })
    }
}

pub struct MemRelCursor {
    inner: Arc<Inner>,
    record: MemRelRecord,
}

impl SourceCursor for MemRelCursor {
    type Reference = MemRelRecord;

    fn read_window<C>(&mut self, start: u64, end: u64, consumer: &mut C) -> Result<u64>
    where
        C: RecordConsumer<MemRelRecord>,
    {
        let end = std::cmp::min(end, self.inner.relationships.len() as u64);
        let mut delivered = 0;
        for pos in start..end {
            let relationship = &self.inner.relationships[pos as usize];
            self.record.row = pos as i64;
            self.record.source = relationship.source;
            self.record.target = relationship.target;
            self.record.rel_type = relationship.rel_type;
            self.record.properties_reference = if relationship.properties.is_empty() {
                NO_PROPERTIES
            } else {
                pos as PropRef
            };
            if !consumer.offer(&self.record)? {
                break;
            }
            delivered += 1;
        }
        Ok(delivered)
    }
}

pub struct MemPropertyReader {
    inner: Arc<Inner>,
}

impl PropertyReader for MemPropertyReader {
    fn read_properties(
        &mut self,
        property_references: &[PropRef],
        property_keys: &[PropertyKeyId],
        default_values: &[f64],
    ) -> Result<Vec<Vec<u64>>> {
        let mut columns: Vec<Vec<u64>> = property_keys
            .iter()
            .map(|_| Vec::with_capacity(property_references.len()))
            .collect();
        for &reference in property_references {
            for (slot, (&key, &default)) in columns
                .iter_mut()
                .zip(property_keys.iter().zip(default_values))
            {
                let bits = if reference == NO_PROPERTIES {
                    default.to_bits()
                } else {
                    self.inner.relationships[reference as usize]
                        .properties
                        .iter()
                        .find(|&&(candidate, _)| candidate == key)
                        .map_or(default.to_bits(), |&(_, value)| value.to_bits())
                };
                slot.push(bits);
            }
        }
        Ok(columns)
    }
}

impl GraphStore for MemGraph {
    type NodeRef = MemNodeRecord;
    type LabelNodeRef = super::LabelIdRecord;
    type RelRef = MemRelRecord;
    type Nodes = MemNodes;
    type LabelNodes = LabelIdList;
    type Relationships = MemRelationships;
    type Properties = MemPropertyReader;

    fn nodes(&self) -> Result<MemNodes> {
        Ok(MemNodes {
            inner: self.inner.clone(),
        })
    }

    fn label_nodes(&self, label: LabelId) -> Result<LabelIdList> {
        let ids = self
            .inner
            .nodes
            .iter()
            .filter(|node| node.labels.contains(&label))
            .map(|node| node.id)
            .collect();
        Ok(LabelIdList::new(label, ids))
    }

    fn relationships(&self) -> Result<MemRelationships> {
        Ok(MemRelationships {
            inner: self.inner.clone(),
        })
    }

    fn property_reader(&self) -> Result<MemPropertyReader> {
        Ok(MemPropertyReader {
            inner: self.inner.clone(),
        })
    }
}
