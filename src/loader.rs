//! End-to-end orchestration of one load operation.

use crate::{
    buffer::{NodesBatchBuffer, RelationshipsBatchBuffer},
    config::LoadConfig,
    error::Result,
    idmap::{IdMap, IdMapBuilder},
    import::{Relationships, SingleTypeImporter},
    scan::{CompositeScan, StoreScanner},
    store::{GraphStore, PropertyReader, ScanSource},
    types::{PropRef, PropertyKeyId, RelTypeId},
};
use itertools::Itertools;
use log::{debug, info};
use rayon::prelude::*;
use std::time::Instant;

/// The two immutable structures a finished load hands back.
pub struct LoadedGraph {
    pub id_map: IdMap,
    pub relationships: Vec<(Option<RelTypeId>, Relationships)>,
}

/// Drives a full load: nodes first, then relationships.
///
/// Workers are tasks on the rayon thread pool; `config.concurrency` sets
/// how many scan workers are spawned per phase. A load either returns both
/// result structures or fails with the first worker error; there is no
/// partial success.
pub struct Loader<S: GraphStore> {
    store: S,
    config: LoadConfig,
}

impl<S: GraphStore> Loader<S> {
    pub fn new(store: S, config: LoadConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn load(&self) -> Result<LoadedGraph> {
        let time_now = Instant::now();
        let id_map = self.load_nodes()?;
        info!(
            "mapped {} nodes in {}ms",
            id_map.node_count(),
            time_now.elapsed().as_millis()
        );
        let time_now = Instant::now();
        let relationships = self.load_relationships(&id_map)?;
        info!(
            "imported {} relationships in {}ms",
            relationships
                .iter()
                .map(|(_, relationships)| relationships.relationship_count())
                .sum::<u64>(),
            time_now.elapsed().as_millis()
        );
        Ok(LoadedGraph {
            id_map,
            relationships,
        })
    }

    fn load_nodes(&self) -> Result<IdMap> {
        let workers = self.config.workers();
        if self.config.label_filter.is_empty() {
            info!("scanning all nodes...");
            let source = self.store.nodes()?;
            let builder = IdMapBuilder::new(source.record_upper_bound() as usize);
            let scanner = StoreScanner::new(source, self.config.batch_size);
            (0..workers)
                .into_par_iter()
                .try_for_each(|worker| -> Result<()> {
                    let mut cursor = scanner.cursor()?;
                    let mut buffer = NodesBatchBuffer::new(scanner.bulk_size(), true);
                    let mut batches = 0u64;
                    while buffer.scan(&mut cursor)? {
                        builder.import_batch(&buffer);
                        batches += 1;
                    }
                    debug!("node worker {} drained {} batches", worker, batches);
                    Ok(())
                })?;
            builder.finish()
        } else {
            info!(
                "scanning labels [{}]...",
                self.config.label_filter.iter().join(", ")
            );
            let sources = self
                .config
                .label_filter
                .iter()
                .map(|&label| self.store.label_nodes(label))
                .collect::<Result<Vec<_>>>()?;
            let scan = CompositeScan::new(sources, self.config.batch_size);
            let builder = IdMapBuilder::new(scan.record_capacity() as usize);
            (0..workers)
                .into_par_iter()
                .try_for_each(|worker| -> Result<()> {
                    let mut cursor = scan.cursor()?;
                    let mut buffer = NodesBatchBuffer::new(scan.buffer_size(), true);
                    let mut batches = 0u64;
                    while buffer.scan(&mut cursor)? {
                        builder.import_batch(&buffer);
                        batches += 1;
                    }
                    debug!("composite worker {} drained {} batches", worker, batches);
                    Ok(())
                })?;
            builder.finish()
        }
    }

    fn load_relationships(
        &self,
        id_map: &IdMap,
    ) -> Result<Vec<(Option<RelTypeId>, Relationships)>> {
        let workers = self.config.workers();
        let keys: Vec<PropertyKeyId> = self
            .config
            .property_keys
            .iter()
            .map(|mapping| mapping.key)
            .collect();
        let defaults: Vec<f64> = self
            .config
            .property_keys
            .iter()
            .map(|mapping| mapping.default)
            .collect();
        let importers: Vec<SingleTypeImporter> = if self.config.relationship_types.is_empty() {
            vec![SingleTypeImporter::new(
                None,
                id_map.node_count(),
                keys.len(),
                self.config.aggregation,
                workers,
            )]
        } else {
            self.config
                .relationship_types
                .iter()
                .map(|&rel_type| {
                    SingleTypeImporter::new(
                        Some(rel_type),
                        id_map.node_count(),
                        keys.len(),
                        self.config.aggregation,
                        workers,
                    )
                })
                .collect()
        };
        info!("scanning relationships...");
        let scanner = StoreScanner::new(self.store.relationships()?, self.config.batch_size);
        (0..workers)
            .into_par_iter()
            .try_for_each(|worker| -> Result<()> {
                let mut cursor = scanner.cursor()?;
                let mut buffer = RelationshipsBatchBuffer::new(scanner.bulk_size());
                let mut reader = if keys.is_empty() {
                    None
                } else {
                    Some(self.store.property_reader()?)
                };
                let mut references: Vec<PropRef> = vec![];
                let mut batches = 0u64;
                while buffer.scan(&mut cursor)? {
                    let columns = match reader.as_mut() {
                        Some(reader) => {
                            buffer.copy_property_references(&mut references);
                            reader.read_properties(&references, &keys, &defaults)?
                        }
                        None => vec![],
                    };
                    for importer in &importers {
                        importer.import_batch(&buffer, &columns, id_map);
                    }
                    batches += 1;
                }
                debug!("relationship worker {} drained {} batches", worker, batches);
                Ok(())
            })?;
        importers
            .into_iter()
            .map(|importer| {
                let rel_type = importer.rel_type();
                let relationships =
                    importer.build(self.config.page_size, self.config.page_backing)?;
                Ok((rel_type, relationships))
            })
            .collect()
    }
}
