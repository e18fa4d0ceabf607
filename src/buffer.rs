//! Fixed-capacity batch buffers between the scanning and importing layers.
//!
//! A buffer holds the raw records of one scan batch. Capacity is fixed at
//! construction and never grows: a full buffer must be drained before the
//! next batch is requested, which decouples the scan rate from the slower
//! import rate. Buffers are reused across many `scan` calls; resetting
//! keeps the allocated storage.

use crate::{
    error::Result,
    scan::BatchCursor,
    store::{NodeReference, RecordConsumer, RelationshipReference},
    types::{LabelId, NodeId, PropRef},
};

/// Width of one relationship record: source, target, type,
/// properties-reference.
pub const RELATIONSHIP_RECORD_SIZE: usize = 4;

/// One batch of raw node records: external ids plus, optionally, the label
/// tokens each record reported.
pub struct NodesBatchBuffer {
    capacity: usize,
    ids: Vec<NodeId>,
    label_offsets: Vec<u32>,
    label_tokens: Vec<LabelId>,
    read_labels: bool,
}

impl NodesBatchBuffer {
    pub fn new(capacity: usize, read_labels: bool) -> Self {
        Self {
            capacity,
            ids: Vec::with_capacity(capacity),
            label_offsets: if read_labels {
                let mut offsets = Vec::with_capacity(capacity + 1);
                offsets.push(0);
                offsets
            } else {
                vec![0]
            },
            label_tokens: vec![],
            read_labels,
        }
    }

    /// Resets the buffer, then pulls records from `cursor` until at least
    /// one record lands or the store is exhausted. Returns whether any
    /// record was read.
    pub fn scan<R, T>(&mut self, cursor: &mut T) -> Result<bool>
    where
        R: NodeReference + ?Sized,
        T: BatchCursor<R>,
    {
        self.reset();
        while cursor.bulk_next(self)? {
            if !self.ids.is_empty() {
                return Ok(true);
            }
        }
        Ok(!self.ids.is_empty())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ids.len() == self.capacity
    }

    pub fn ids(&self) -> &[NodeId] {
        &self.ids
    }

    /// Label tokens reported by record `index`. Empty when the buffer was
    /// created without label reading.
    pub fn labels_of(&self, index: usize) -> &[LabelId] {
        if !self.read_labels {
            return &[];
        }
        let start = self.label_offsets[index] as usize;
        let end = self.label_offsets[index + 1] as usize;
        &self.label_tokens[start..end]
    }

    fn reset(&mut self) {
        self.ids.clear();
        self.label_offsets.clear();
        self.label_offsets.push(0);
        self.label_tokens.clear();
    }
}

impl<R: NodeReference + ?Sized> RecordConsumer<R> for NodesBatchBuffer {
    fn offer(&mut self, record: &R) -> Result<bool> {
        if self.is_full() {
            return Ok(false);
        }
        self.ids.push(record.entity_id());
        if self.read_labels {
            self.label_tokens.extend_from_slice(record.labels()?);
            self.label_offsets.push(self.label_tokens.len() as u32);
        }
        Ok(true)
    }
}

/// One batch of raw relationship records in a fixed-width layout of
/// [`RELATIONSHIP_RECORD_SIZE`] `i64` columns per record.
pub struct RelationshipsBatchBuffer {
    capacity: usize,
    buffer: Vec<i64>,
}

impl RelationshipsBatchBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffer: Vec::with_capacity(capacity * RELATIONSHIP_RECORD_SIZE),
        }
    }

    /// Resets the buffer, then pulls records from `cursor` until at least
    /// one record lands or the store is exhausted. Returns whether any
    /// record was read.
    pub fn scan<R, T>(&mut self, cursor: &mut T) -> Result<bool>
    where
        R: RelationshipReference + ?Sized,
        T: BatchCursor<R>,
    {
        self.buffer.clear();
        while cursor.bulk_next(self)? {
            if !self.buffer.is_empty() {
                return Ok(true);
            }
        }
        Ok(!self.buffer.is_empty())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buffer.len() / RELATIONSHIP_RECORD_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    /// The records of this batch as `[source, target, type, prop_ref]` rows.
    pub fn records(&self) -> impl Iterator<Item = &[i64]> {
        self.buffer.chunks_exact(RELATIONSHIP_RECORD_SIZE)
    }

    /// Copies the properties-reference column into `out` (cleared first).
    pub fn copy_property_references(&self, out: &mut Vec<PropRef>) {
        out.clear();
        out.extend(self.records().map(|record| record[3]));
    }
}

impl<R: RelationshipReference + ?Sized> RecordConsumer<R> for RelationshipsBatchBuffer {
    fn offer(&mut self, record: &R) -> Result<bool> {
        if self.is_full() {
            return Ok(false);
        }
        self.buffer.push(record.source_id());
        self.buffer.push(record.target_id());
        self.buffer.push(record.rel_type());
        self.buffer.push(record.properties_reference()?);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NO_PROPERTIES;

    struct TestNode {
        id: NodeId,
        labels: Vec<LabelId>,
    }

    impl NodeReference for TestNode {
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

    #[test]
    fn test_nodes_buffer_capacity() {
        let mut buffer = NodesBatchBuffer::new(2, true);
        for id in 0..3 {
            let accepted = buffer
                .offer(&TestNode {
                    id,
                    labels: vec![id * 10],
                })
                .unwrap();
            assert_eq!(accepted, id < 2);
        }
        assert!(buffer.is_full());
        assert_eq!(buffer.ids(), [0, 1]);
        assert_eq!(buffer.labels_of(1), [10]);
    }

    #[test]
    fn test_nodes_buffer_reset_keeps_capacity() {
        let mut buffer = NodesBatchBuffer::new(4, true);
        buffer
            .offer(&TestNode {
                id: 7,
                labels: vec![1, 2],
            })
            .unwrap();
        buffer.reset();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 4);
        buffer
            .offer(&TestNode {
                id: 8,
                labels: vec![3],
            })
            .unwrap();
        assert_eq!(buffer.labels_of(0), [3]);
    }

    struct TestRel([i64; 4]);

    impl RelationshipReference for TestRel {
        fn entity_id(&self) -> i64 {
            self.0[3]
        }

        fn source_id(&self) -> NodeId {
            self.0[0]
        }

        fn target_id(&self) -> NodeId {
            self.0[1]
        }

        fn rel_type(&self) -> i64 {
            self.0[2]
        }

        fn properties_reference(&self) -> Result<PropRef> {
            Ok(self.0[3])
        }
    }

    #[test]
    fn test_relationships_buffer_layout() {
        let mut buffer = RelationshipsBatchBuffer::new(2);
        buffer.offer(&TestRel([1, 2, 0, 9])).unwrap();
        buffer.offer(&TestRel([3, 4, 1, NO_PROPERTIES])).unwrap();
        assert!(buffer.is_full());
        let records: Vec<_> = buffer.records().collect();
        assert_eq!(records, [&[1, 2, 0, 9][..], &[3, 4, 1, NO_PROPERTIES][..]]);
        let mut refs = vec![];
        buffer.copy_property_references(&mut refs);
        assert_eq!(refs, [9, NO_PROPERTIES]);
    }
}
