//! Contracts between the loading pipeline and an external record store.
//!
//! The store is only ever touched through these traits: a [`ScanSource`]
//! describes one paginated record space (all nodes, the nodes of one label,
//! or all relationships), a [`SourceCursor`] reads one window of it, and the
//! records themselves are handed out as capability references. A reference
//! variant that cannot supply a requested capability fails with
//! [`Error::UnsupportedCapability`](crate::error::Error) instead of
//! returning a default, so that "no data" and "cannot know" stay distinct.

pub mod mem;
pub mod sqlite;

use crate::{
    error::Result,
    types::{LabelId, NodeId, PropRef, PropertyKeyId, RelTypeId},
};

/// A node record handed out by a scan.
///
/// Implementations are short-lived views: a cursor may reuse the backing
/// record between `offer` calls, so consumers copy what they keep.
pub trait NodeReference {
    fn entity_id(&self) -> NodeId;

    /// The label tokens this record reports for the node. A label-index
    /// scan reports only the scanned label; the full membership of a node
    /// is the union over all records observed for its id.
    fn labels(&self) -> Result<&[LabelId]>;

    fn properties_reference(&self) -> Result<PropRef>;
}

/// A relationship record handed out by a scan.
pub trait RelationshipReference {
    fn entity_id(&self) -> i64;

    fn source_id(&self) -> NodeId;

    fn target_id(&self) -> NodeId;

    fn rel_type(&self) -> RelTypeId;

    fn properties_reference(&self) -> Result<PropRef>;
}

/// Receives the records of a reserved batch, usually a batch buffer.
///
/// `offer` returns `Ok(false)` once the consumer cannot take further
/// records. Scanners size their windows to the consumer capacity (see
/// [`StoreScanner::bulk_size`](crate::scan::StoreScanner::bulk_size)), so
/// a window never runs into a full consumer.
pub trait RecordConsumer<R: ?Sized> {
    fn offer(&mut self, record: &R) -> Result<bool>;
}

/// One paginated record space of the store.
///
/// The record space is `[0, record_upper_bound)`; positions may be sparse.
/// Successive windows read through any number of cursors of one source must
/// partition the space without omission or duplication.
pub trait ScanSource: Sync {
    type Reference: ?Sized;
    type Cursor: SourceCursor<Reference = Self::Reference>;

    /// Exclusive end of the record space.
    fn record_upper_bound(&self) -> u64;

    /// A cursor for the calling thread.
    fn cursor(&self) -> Result<Self::Cursor>;
}

/// A per-thread reader over one [`ScanSource`].
pub trait SourceCursor {
    type Reference: ?Sized;

    /// Delivers every record positioned in `[start, end)` to `consumer`,
    /// returning how many records were delivered.
    fn read_window<C>(&mut self, start: u64, end: u64, consumer: &mut C) -> Result<u64>
    where
        C: RecordConsumer<Self::Reference>;
}

/// Decodes relationship property values in batches.
///
/// One reader per worker; `read_properties` turns the properties-reference
/// column of a whole batch into one column of raw `u64` bit patterns per
/// requested key. A property absent at some position yields that key's
/// default. `f64` values are moved as bit patterns so no precision or
/// signalling state is lost.
pub trait PropertyReader {
    fn read_properties(
        &mut self,
        property_references: &[PropRef],
        property_keys: &[PropertyKeyId],
        default_values: &[f64],
    ) -> Result<Vec<Vec<u64>>>;
}

/// Factory surface of a backing store.
///
/// Sources own everything they need to open per-thread cursors, so they can
/// outlive the borrow that created them and move into scan workers.
pub trait GraphStore: Sync {
    type NodeRef: NodeReference + ?Sized;
    type LabelNodeRef: NodeReference + ?Sized;
    type RelRef: RelationshipReference + ?Sized;
    type Nodes: ScanSource<Reference = Self::NodeRef>;
    type LabelNodes: ScanSource<Reference = Self::LabelNodeRef>;
    type Relationships: ScanSource<Reference = Self::RelRef>;
    type Properties: PropertyReader;

    /// Source over every node record.
    fn nodes(&self) -> Result<Self::Nodes>;

    /// Source over the node records of one label.
    fn label_nodes(&self, label: LabelId) -> Result<Self::LabelNodes>;

    /// Source over every relationship record.
    fn relationships(&self) -> Result<Self::Relationships>;

    /// A property reader for the calling worker.
    fn property_reader(&self) -> Result<Self::Properties>;
}

/// An index-based node source: the materialized, ordered id list of one
/// label.
///
/// This is the reference variant backing label-restricted scans. It knows
/// the scanned label but has no way back into the store's property
/// storage, so `properties_reference` fails with an unsupported-capability
/// error instead of inventing a default.
pub struct LabelIdList {
    label: LabelId,
    ids: std::sync::Arc<Vec<NodeId>>,
}

impl LabelIdList {
    pub fn new(label: LabelId, ids: Vec<NodeId>) -> Self {
        Self {
            label,
            ids: std::sync::Arc::new(ids),
        }
    }

    pub fn label(&self) -> LabelId {
        self.label
    }
}

impl ScanSource for LabelIdList {
    type Reference = LabelIdRecord;
    type Cursor = LabelIdListCursor;

    fn record_upper_bound(&self) -> u64 {
        self.ids.len() as u64
    }

    fn cursor(&self) -> Result<Self::Cursor> {
        Ok(LabelIdListCursor {
            ids: self.ids.clone(),
            record: LabelIdRecord {
                id: 0,
                label: [self.label],
            },
        })
    }
}

pub struct LabelIdListCursor {
    ids: std::sync::Arc<Vec<NodeId>>,
    record: LabelIdRecord,
}

impl SourceCursor for LabelIdListCursor {
    type Reference = LabelIdRecord;

    fn read_window<C>(&mut self, start: u64, end: u64, consumer: &mut C) -> Result<u64>
    where
        C: RecordConsumer<LabelIdRecord>,
    {
        let end = std::cmp::min(end, self.ids.len() as u64);
        let mut delivered = 0;
        for pos in start..end {
            self.record.id = self.ids[pos as usize];
            if !consumer.offer(&self.record)? {
                break;
            }
            delivered += 1;
        }
        Ok(delivered)
    }
}

pub struct LabelIdRecord {
    id: NodeId,
    label: [LabelId; 1],
}

impl NodeReference for LabelIdRecord {
    fn entity_id(&self) -> NodeId {
        self.id
    }

    fn labels(&self) -> Result<&[LabelId]> {
        Ok(&self.label)
    }

    fn properties_reference(&self) -> Result<PropRef> {
        Err(crate::error::Error::UnsupportedCapability(
            "properties reference on a label index scan",
        ))
    }
}
