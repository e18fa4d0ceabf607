//! Lock-step coordination of several label sub-scans.
//!
//! When a load is restricted to several labels, each label is scanned
//! through its own [`StoreScanner`], but all workers must advance the
//! sub-scans on one cadence so that batch `k` covers the same logical
//! window of every sub-scan. Reserving windows from every still-active
//! sub-scan happens in a single critical section; reading the reserved
//! windows happens outside of it, unsynchronized per thread.

use super::{BatchCursor, ScanCursor, StoreScanner};
use crate::{
    error::Result,
    store::{RecordConsumer, ScanSource, SourceCursor},
};
use parking_lot::Mutex;

/// Coordinates one [`StoreScanner`] per label sub-scan.
pub struct CompositeScan<S: ScanSource> {
    scanners: Vec<StoreScanner<S>>,
    batch_size: usize,
    lock: Mutex<()>,
}

impl<S: ScanSource> CompositeScan<S> {
    pub fn new(sources: Vec<S>, batch_size: usize) -> Self {
        Self {
            scanners: sources
                .into_iter()
                .map(|source| StoreScanner::new(source, batch_size))
                .collect(),
            batch_size,
            lock: Mutex::new(()),
        }
    }

    /// Capacity a batch buffer needs to hold one composite batch: one
    /// window from every sub-scan.
    pub fn buffer_size(&self) -> usize {
        self.batch_size * std::cmp::max(self.scanners.len(), 1)
    }

    /// Total record positions across all sub-scans; an upper bound for the
    /// number of distinct nodes the composite scan can deliver.
    pub fn record_capacity(&self) -> u64 {
        self.scanners
            .iter()
            .map(|scanner| scanner.upper_bound)
            .sum()
    }

    /// A composite cursor for the calling thread.
    pub fn cursor(&self) -> Result<CompositeCursor<'_, S>> {
        let subs = self
            .scanners
            .iter()
            .map(|scanner| {
                Ok(SubCursor {
                    cursor: scanner.cursor()?,
                    pending: None,
                    active: true,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(CompositeCursor { scan: self, subs })
    }
}

struct SubCursor<'a, S: ScanSource> {
    cursor: ScanCursor<'a, S>,
    pending: Option<(u64, u64)>,
    active: bool,
}

/// A per-thread cursor over a [`CompositeScan`].
pub struct CompositeCursor<'a, S: ScanSource> {
    scan: &'a CompositeScan<S>,
    subs: Vec<SubCursor<'a, S>>,
}

impl<'a, S: ScanSource> CompositeCursor<'a, S> {
    /// Advances every sub-scan that still has data by one batch and
    /// delivers the reserved windows to `consumer`. A sub-scan that
    /// reports exhaustion is permanently removed from this cursor's
    /// active set. Returns true iff at least one window was reserved.
    pub fn scan_batch<C>(&mut self, consumer: &mut C) -> Result<bool>
    where
        C: RecordConsumer<S::Reference>,
    {
        let mut reserved_any = false;
        {
            let _guard = self.scan.lock.lock();
            for sub in self.subs.iter_mut().filter(|sub| sub.active) {
                match sub.cursor.scanner.reserve() {
                    Some(window) => {
                        sub.pending = Some(window);
                        reserved_any = true;
                    }
                    None => sub.active = false,
                }
            }
        }
        if !reserved_any {
            return Ok(false);
        }
        for sub in self.subs.iter_mut() {
            if let Some((start, end)) = sub.pending.take() {
                sub.cursor.inner.read_window(start, end, consumer)?;
            }
        }
        Ok(true)
    }
}

impl<'a, S: ScanSource> BatchCursor<S::Reference> for CompositeCursor<'a, S> {
    fn bulk_next<C>(&mut self, consumer: &mut C) -> Result<bool>
    where
        C: RecordConsumer<S::Reference>,
    {
        self.scan_batch(consumer)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{Collector, FakeSource};
    use super::*;
    use std::sync::Arc;

    fn sources(lengths: &[usize]) -> Vec<FakeSource> {
        lengths
            .iter()
            .enumerate()
            .map(|(scan, &len)| FakeSource {
                ids: Arc::new((0..len as i64).map(|i| scan as i64 * 1000 + i).collect()),
            })
            .collect()
    }

    #[test]
    fn test_batch_cadence_follows_longest_sub_scan() {
        // lengths 25, 10, 4 with batch size 10: ceil(25 / 10) = 3 batches
        let scan = CompositeScan::new(sources(&[25, 10, 4]), 10);
        let mut cursor = scan.cursor().unwrap();
        let mut collector = Collector { ids: vec![] };
        let mut batches = 0;
        while cursor.scan_batch(&mut collector).unwrap() {
            batches += 1;
        }
        assert_eq!(batches, 3);
        assert_eq!(collector.ids.len(), 25 + 10 + 4);
    }

    #[test]
    fn test_every_active_sub_scan_advances_each_batch() {
        let scan = CompositeScan::new(sources(&[12, 7]), 5);
        let mut cursor = scan.cursor().unwrap();
        let mut counts = vec![];
        loop {
            let mut collector = Collector { ids: vec![] };
            if !cursor.scan_batch(&mut collector).unwrap() {
                break;
            }
            let first = collector.ids.iter().filter(|&&id| id < 1000).count();
            let second = collector.ids.len() - first;
            counts.push((first, second));
        }
        // batch 1: 5 + 5, batch 2: 5 + 2, batch 3: 2 + 0 (second exhausted)
        assert_eq!(counts, [(5, 5), (5, 2), (2, 0)]);
    }

    #[test]
    fn test_empty_composite_scan() {
        let scan = CompositeScan::new(sources(&[]), 5);
        let mut cursor = scan.cursor().unwrap();
        let mut collector = Collector { ids: vec![] };
        assert!(!cursor.scan_batch(&mut collector).unwrap());
    }
}
