//! Synchronized batch scanning over paginated record sources.
//!
//! A [`StoreScanner`] partitions one record space into non-overlapping,
//! monotonically increasing batches for an arbitrary number of concurrent
//! workers. Reservation of the next batch is the sole synchronized step (one
//! atomic fetch-add on a shared batch pointer); reading the reserved window
//! happens per thread. No batch is issued twice and none is skipped for a
//! single logical scan, under any worker count.

pub mod composite;

pub use composite::{CompositeCursor, CompositeScan};

use crate::{
    error::Result,
    store::{RecordConsumer, ScanSource, SourceCursor},
};
use std::sync::atomic::{AtomicU64, Ordering};

/// Reserves and delivers scan batches; implemented by [`ScanCursor`] and
/// [`CompositeCursor`].
pub trait BatchCursor<R: ?Sized> {
    /// Reserves the next batch and delivers its records to `consumer`.
    /// Returns `Ok(false)` once the underlying record space is exhausted
    /// (a normal termination signal, not an error).
    fn bulk_next<C>(&mut self, consumer: &mut C) -> Result<bool>
    where
        C: RecordConsumer<R>;
}

/// Scans one record source in shared batches.
pub struct StoreScanner<S: ScanSource> {
    source: S,
    batch_size: u64,
    upper_bound: u64,
    next_batch: AtomicU64,
}

impl<S: ScanSource> StoreScanner<S> {
    pub fn new(source: S, batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch size must be positive");
        let upper_bound = source.record_upper_bound();
        Self {
            source,
            batch_size: batch_size as u64,
            upper_bound,
            next_batch: AtomicU64::new(0),
        }
    }

    /// Number of record positions covered by one batch; batch buffers fed
    /// from this scanner are sized with it.
    pub fn bulk_size(&self) -> usize {
        self.batch_size as usize
    }

    /// A scan cursor for the calling thread. All cursors of one scanner
    /// share the same batch pointer.
    pub fn cursor(&self) -> Result<ScanCursor<'_, S>> {
        Ok(ScanCursor {
            inner: self.source.cursor()?,
            scanner: self,
        })
    }

    /// Atomically reserves the next batch window, or `None` when the
    /// record space is exhausted.
    fn reserve(&self) -> Option<(u64, u64)> {
        let batch = self.next_batch.fetch_add(1, Ordering::SeqCst);
        let start = batch.checked_mul(self.batch_size)?;
        if start >= self.upper_bound {
            return None;
        }
        Some((start, std::cmp::min(start + self.batch_size, self.upper_bound)))
    }
}

/// A per-thread cursor over a [`StoreScanner`].
pub struct ScanCursor<'a, S: ScanSource> {
    inner: S::Cursor,
    scanner: &'a StoreScanner<S>,
}

impl<'a, S: ScanSource> BatchCursor<S::Reference> for ScanCursor<'a, S> {
    fn bulk_next<C>(&mut self, consumer: &mut C) -> Result<bool>
    where
        C: RecordConsumer<S::Reference>,
    {
        match self.scanner.reserve() {
            Some((start, end)) => {
                self.inner.read_window(start, end, consumer)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        store::NodeReference,
        types::{LabelId, NodeId, PropRef, NO_PROPERTIES},
    };
    use rayon::prelude::*;
    use std::sync::Arc;

    pub(crate) struct FakeRecord {
        pub id: NodeId,
        pub labels: Vec<LabelId>,
    }

    impl NodeReference for FakeRecord {
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

    /// A record space where position `i` holds the id `ids[i]`.
    pub(crate) struct FakeSource {
        pub ids: Arc<Vec<NodeId>>,
    }

    pub(crate) struct FakeCursor {
        ids: Arc<Vec<NodeId>>,
        record: FakeRecord,
    }

    impl ScanSource for FakeSource {
        type Reference = FakeRecord;
        type Cursor = FakeCursor;

        fn record_upper_bound(&self) -> u64 {
            self.ids.len() as u64
        }

        fn cursor(&self) -> Result<Self::Cursor> {
            Ok(FakeCursor {
                ids: self.ids.clone(),
                record: FakeRecord {
                    id: 0,
                    labels: vec![],
                },
            })
        }
    }

    impl SourceCursor for FakeCursor {
        type Reference = FakeRecord;

        fn read_window<C>(&mut self, start: u64, end: u64, consumer: &mut C) -> Result<u64>
        where
            C: RecordConsumer<FakeRecord>,
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

    pub(crate) struct Collector {
        pub ids: Vec<NodeId>,
    }

    impl RecordConsumer<FakeRecord> for Collector {
        fn offer(&mut self, record: &FakeRecord) -> Result<bool> {
            self.ids.push(record.id);
            Ok(true)
        }
    }

    #[test]
    fn test_single_worker_sees_everything() {
        let ids: Vec<NodeId> = (0..107).collect();
        let scanner = StoreScanner::new(
            FakeSource {
                ids: Arc::new(ids.clone()),
            },
            10,
        );
        let mut cursor = scanner.cursor().unwrap();
        let mut collector = Collector { ids: vec![] };
        while cursor.bulk_next(&mut collector).unwrap() {}
        assert_eq!(collector.ids, ids);
    }

    #[test]
    fn test_concurrent_workers_partition_without_gaps_or_duplicates() {
        let ids: Vec<NodeId> = (0..9973).map(|i| i * 3 + 1).collect();
        let checksum: i64 = ids.iter().sum();
        let scanner = StoreScanner::new(
            FakeSource {
                ids: Arc::new(ids.clone()),
            },
            64,
        );
        let delivered: Vec<Vec<NodeId>> = (0..8)
            .into_par_iter()
            .map(|_| {
                let mut cursor = scanner.cursor().unwrap();
                let mut collector = Collector { ids: vec![] };
                while cursor.bulk_next(&mut collector).unwrap() {}
                collector.ids
            })
            .collect();
        let mut union: Vec<NodeId> = delivered.into_iter().flatten().collect();
        assert_eq!(union.iter().sum::<i64>(), checksum);
        union.sort_unstable();
        assert_eq!(union, ids);
    }

    #[test]
    fn test_exhausted_scanner_stays_exhausted() {
        let scanner = StoreScanner::new(
            FakeSource {
                ids: Arc::new(vec![1, 2]),
            },
            8,
        );
        let mut cursor = scanner.cursor().unwrap();
        let mut collector = Collector { ids: vec![] };
        assert!(cursor.bulk_next(&mut collector).unwrap());
        assert!(!cursor.bulk_next(&mut collector).unwrap());
        assert!(!cursor.bulk_next(&mut collector).unwrap());
        assert_eq!(collector.ids, [1, 2]);
    }
}
