//! Concurrent construction of the id mapping.

use super::{BitSet, IdMap};
use crate::{
    buffer::NodesBatchBuffer,
    error::{Error, Result},
    types::{LabelId, MappedId, NodeId},
};
use dashmap::{mapref::entry::Entry, DashMap};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A bit vector with atomic set, used while batches arrive concurrently.
struct AtomicBitSet {
    words: Box<[AtomicU64]>,
}

impl AtomicBitSet {
    fn new(bits: usize) -> Self {
        Self {
            words: (0..(bits + 63) / 64).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn set(&self, bit: usize) {
        self.words[bit >> 6].fetch_or(1 << (bit & 63), Ordering::Relaxed);
    }

    fn into_bitset(self, len: usize) -> BitSet {
        let words = self
            .words
            .into_vec()
            .into_iter()
            .take((len + 63) / 64)
            .map(AtomicU64::into_inner)
            .collect();
        BitSet::from_words(words, len)
    }
}

/// Assigns dense internal ids to externally observed nodes.
///
/// Batches from any number of scan workers may be added concurrently. The
/// first observation of an external id wins the next free internal id, so
/// the assignment is deterministic within one run but not reproducible
/// across runs with different worker counts. Within a run every external
/// id maps to exactly one internal id: the existence check and the counter
/// advance happen under the id's map shard lock, so two workers can never
/// both win for the same external id.
pub struct IdMapBuilder {
    map: DashMap<NodeId, MappedId>,
    next: AtomicU64,
    label_bits: DashMap<LabelId, AtomicBitSet>,
    capacity: usize,
}

impl IdMapBuilder {
    /// `capacity` bounds the internal id space: the total number of record
    /// positions the scan can deliver (distinct nodes can only be fewer).
    pub fn new(capacity: usize) -> Self {
        Self {
            map: DashMap::new(),
            next: AtomicU64::new(0),
            label_bits: DashMap::new(),
            capacity,
        }
    }

    /// Records one observation of `external` carrying `labels`, returning
    /// its internal id.
    pub fn add(&self, external: NodeId, labels: &[LabelId]) -> MappedId {
        let mapped = match self.map.entry(external) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                let mapped = self.next.fetch_add(1, Ordering::SeqCst);
                entry.insert(mapped);
                mapped
            }
        };
        for &label in labels {
            self.label_bits
                .entry(label)
                .or_insert_with(|| AtomicBitSet::new(self.capacity))
                .set(mapped as usize);
        }
        mapped
    }

    /// Records every node of one scanned batch.
    pub fn import_batch(&self, buffer: &NodesBatchBuffer) {
        for (index, &external) in buffer.ids().iter().enumerate() {
            self.add(external, buffer.labels_of(index));
        }
    }

    /// Number of distinct external ids observed so far.
    pub fn node_count(&self) -> usize {
        self.map.len()
    }

    /// Compacts the intermediate structures into the immutable [`IdMap`].
    ///
    /// Verifies that the assignment is a bijection onto `[0, N)`; any
    /// violation would silently corrupt the adjacency structure and is
    /// reported as [`Error::IdMappingConflict`].
    pub fn finish(self) -> Result<IdMap> {
        let count = self.next.load(Ordering::SeqCst) as usize;
        let mut pairs: Vec<(MappedId, NodeId)> = Vec::with_capacity(count);
        let mut to_internal = HashMap::with_capacity(count);
        for (external, mapped) in self.map.into_iter() {
            pairs.push((mapped, external));
            to_internal.insert(external, mapped);
        }
        pairs.par_sort_unstable();
        if pairs.len() != count {
            let external = pairs.last().map_or(0, |&(_, external)| external);
            return Err(Error::IdMappingConflict { external });
        }
        for (expected, &(mapped, external)) in pairs.iter().enumerate() {
            if mapped != expected as u64 {
                return Err(Error::IdMappingConflict { external });
            }
        }
        let to_external: Box<[NodeId]> = pairs.iter().map(|&(_, external)| external).collect();
        let labels = self
            .label_bits
            .into_iter()
            .map(|(label, bits)| (label, bits.into_bitset(count)))
            .collect();
        Ok(IdMap::new(to_external, to_internal, labels))
    }
}
