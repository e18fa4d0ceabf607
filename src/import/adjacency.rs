//! Intermediate per-node relationship collection and the final flush into
//! paged storage.
//!
//! Scan batches deliver a node's relationships in no particular order and
//! spread over many workers, so targets are first collected into chunked
//! lists partitioned by contiguous internal-id ranges (one lock per range;
//! contention scales with the range count, not the worker count). Once
//! every batch is drained, the ranges are flushed in parallel: per node,
//! targets are sorted, optionally aggregated, delta-compressed, and written
//! through one page slice, with the slice address recorded in the
//! node-indexed offset array. Results are merged by internal node id, never
//! by arrival order.

use crate::{
    config::{Aggregation, PageBacking},
    error::Result,
    paged::{vlong::encode_deltas, AdjacencyList, PageAllocator},
    types::{Address, MappedId, NO_RELATIONSHIPS},
};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};

/// Targets and property rows pending for the nodes of one id range.
struct ChunkedTargets {
    targets: Vec<Vec<MappedId>>,
    /// Parallel to `targets`, `key_count` values per entry.
    properties: Vec<Vec<u64>>,
}

impl ChunkedTargets {
    fn new(len: usize) -> Self {
        Self {
            targets: vec![Vec::new(); len],
            properties: vec![Vec::new(); len],
        }
    }
}

/// Collects the relationships of one import and builds the compressed
/// adjacency (and property) pages.
pub struct AdjacencyBuilder {
    node_count: usize,
    range_shift: u32,
    key_count: usize,
    aggregation: Aggregation,
    ranges: Vec<Mutex<ChunkedTargets>>,
}

impl AdjacencyBuilder {
    pub fn new(
        node_count: usize,
        key_count: usize,
        aggregation: Aggregation,
        concurrency: usize,
    ) -> Self {
        let range_shift = range_shift(node_count, concurrency);
        let range_size = 1usize << range_shift;
        let range_count = (node_count + range_size - 1) / range_size;
        let ranges = (0..range_count)
            .map(|range| {
                let start = range * range_size;
                let len = std::cmp::min(range_size, node_count - start);
                Mutex::new(ChunkedTargets::new(len))
            })
            .collect();
        Self {
            node_count,
            range_shift,
            key_count,
            aggregation,
            ranges,
        }
    }

    /// Appends one relationship; `properties` holds `key_count` raw bit
    /// patterns.
    pub fn add(&self, source: MappedId, target: MappedId, properties: &[u64]) {
        debug_assert_eq!(properties.len(), self.key_count);
        let range = (source >> self.range_shift) as usize;
        let local = (source & ((1u64 << self.range_shift) - 1)) as usize;
        let mut chunk = self.ranges[range].lock();
        chunk.targets[local].push(target);
        chunk.properties[local].extend_from_slice(properties);
    }

    /// Flushes every pending run into fresh page storage and returns the
    /// frozen lists, the node-indexed offset arrays, and the number of
    /// adjacency entries written.
    pub fn build(
        self,
        page_size: usize,
        backing: PageBacking,
    ) -> Result<BuiltAdjacency> {
        let allocator = PageAllocator::new(page_size, backing)?;
        let property_allocator = if self.key_count > 0 {
            Some(PageAllocator::new(page_size, backing)?)
        } else {
            None
        };
        let written = AtomicU64::new(0);
        let range_size = 1usize << self.range_shift;
        let mut offsets = vec![NO_RELATIONSHIPS; self.node_count];
        let mut property_offsets = vec![NO_RELATIONSHIPS; if self.key_count > 0 { self.node_count } else { 0 }];
        let ranges: Vec<ChunkedTargets> =
            self.ranges.into_iter().map(Mutex::into_inner).collect();
        let flush = FlushContext {
            key_count: self.key_count,
            aggregation: self.aggregation,
            allocator: &allocator,
            property_allocator: property_allocator.as_ref(),
            written: &written,
        };
        if self.key_count > 0 {
            ranges
                .into_par_iter()
                .zip(offsets.par_chunks_mut(range_size))
                .zip(property_offsets.par_chunks_mut(range_size))
                .try_for_each(|((chunk, adjacency_out), property_out)| {
                    flush.flush_range(chunk, adjacency_out, Some(property_out))
                })?;
        } else {
            ranges
                .into_par_iter()
                .zip(offsets.par_chunks_mut(range_size))
                .try_for_each(|(chunk, adjacency_out)| {
                    flush.flush_range(chunk, adjacency_out, None)
                })?;
        }
        Ok(BuiltAdjacency {
            adjacency_list: allocator.into_list(),
            adjacency_offsets: offsets.into_boxed_slice(),
            property_list: property_allocator.map(PageAllocator::into_list),
            property_offsets: if self.key_count > 0 {
                Some(property_offsets.into_boxed_slice())
            } else {
                None
            },
            relationship_count: written.into_inner(),
        })
    }
}

/// The output of [`AdjacencyBuilder::build`].
pub struct BuiltAdjacency {
    pub adjacency_list: AdjacencyList,
    pub adjacency_offsets: Box<[Address]>,
    pub property_list: Option<AdjacencyList>,
    pub property_offsets: Option<Box<[Address]>>,
    pub relationship_count: u64,
}

struct FlushContext<'a> {
    key_count: usize,
    aggregation: Aggregation,
    allocator: &'a PageAllocator,
    property_allocator: Option<&'a PageAllocator>,
    written: &'a AtomicU64,
}

impl<'a> FlushContext<'a> {
    fn flush_range(
        &self,
        chunk: ChunkedTargets,
        adjacency_out: &mut [Address],
        mut property_out: Option<&mut [Address]>,
    ) -> Result<()> {
        let mut order: Vec<u32> = vec![];
        let mut targets: Vec<MappedId> = vec![];
        let mut properties: Vec<u64> = vec![];
        let mut run: Vec<u8> = vec![];
        for (local, (pending_targets, pending_properties)) in chunk
            .targets
            .into_iter()
            .zip(chunk.properties.into_iter())
            .enumerate()
        {
            if pending_targets.is_empty() {
                continue;
            }
            self.sort_and_aggregate(
                &pending_targets,
                &pending_properties,
                &mut order,
                &mut targets,
                &mut properties,
            );
            self.written.fetch_add(targets.len() as u64, Ordering::Relaxed);

            run.clear();
            run.extend_from_slice(&(targets.len() as u32).to_le_bytes());
            encode_deltas(&targets, &mut run);
            let mut slice = self.allocator.allocate(run.len())?;
            adjacency_out[local] = slice.address();
            slice.insert(&run);

            if let Some(property_allocator) = self.property_allocator {
                run.clear();
                run.extend_from_slice(&(targets.len() as u32).to_le_bytes());
                for &bits in &properties {
                    run.extend_from_slice(&bits.to_le_bytes());
                }
                let mut slice = property_allocator.allocate(run.len())?;
                if let Some(out) = property_out.as_mut() {
                    out[local] = slice.address();
                }
                slice.insert(&run);
            }
        }
        Ok(())
    }

    /// Sorts one node's pending relationships by target and applies the
    /// configured aggregation, leaving the final run in `targets` and
    /// `properties`.
    fn sort_and_aggregate(
        &self,
        pending_targets: &[MappedId],
        pending_properties: &[u64],
        order: &mut Vec<u32>,
        targets: &mut Vec<MappedId>,
        properties: &mut Vec<u64>,
    ) {
        let key_count = self.key_count;
        order.clear();
        order.extend(0..pending_targets.len() as u32);
        order.sort_unstable_by_key(|&index| pending_targets[index as usize]);
        targets.clear();
        properties.clear();
        for &index in order.iter() {
            let target = pending_targets[index as usize];
            let row = &pending_properties[index as usize * key_count..][..key_count];
            if self.aggregation != Aggregation::None && targets.last() == Some(&target) {
                let merged = properties.len() - key_count;
                for (slot, &bits) in properties[merged..].iter_mut().zip(row) {
                    *slot = aggregate(self.aggregation, *slot, bits);
                }
            } else {
                targets.push(target);
                properties.extend_from_slice(row);
            }
        }
    }
}

fn aggregate(aggregation: Aggregation, current: u64, incoming: u64) -> u64 {
    let (current, incoming) = (f64::from_bits(current), f64::from_bits(incoming));
    match aggregation {
        Aggregation::None | Aggregation::Single => current.to_bits(),
        Aggregation::Sum => (current + incoming).to_bits(),
        Aggregation::Min => current.min(incoming).to_bits(),
        Aggregation::Max => current.max(incoming).to_bits(),
    }
}

/// Picks the id-range width: several ranges per worker to keep the range
/// locks uncontended, bounded so tiny graphs still get a few ranges.
fn range_shift(node_count: usize, concurrency: usize) -> u32 {
    let per_range = node_count / std::cmp::max(concurrency * 4, 1);
    let size = std::cmp::max(per_range, 1)
        .next_power_of_two()
        .max(1 << 4)
        .min(1 << 20);
    size.trailing_zeros()
}
