//! A SQLite-backed store, the cursor-based reference variant.
//!
//! The store file must have the following schema:
//!
//! ```sql
//! CREATE TABLE nodes (id INT, label INT);
//! CREATE TABLE edges (src INT, dst INT, etype INT);
//! CREATE TABLE edge_props (eid INT, key INT, value REAL);
//! ```
//!
//! A node carries one row per label (or a single row with a NULL label);
//! `edge_props.eid` references `edges.rowid`. The record space of a scan
//! is the rowid range of its table, so windows partition the store without
//! coordination between connections. Every cursor owns its own connection;
//! the store itself only carries the path.

use super::{
    GraphStore, LabelIdList, NodeReference, PropertyReader, RecordConsumer, RelationshipReference,
    ScanSource, SourceCursor,
};
use crate::{
    error::Result,
    types::{LabelId, NodeId, PropRef, PropertyKeyId, RelTypeId},
};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

/// A property graph stored in a SQLite3 file.
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    /// Opens the store, verifying the file is reachable.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        Connection::open(&path)?;
        Ok(Self { path })
    }

    /// Creates the expected tables in `conn`.
    pub fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS nodes (id INT, label INT);
             CREATE TABLE IF NOT EXISTS edges (src INT, dst INT, etype INT);
             CREATE TABLE IF NOT EXISTS edge_props (eid INT, key INT, value REAL);",
        )
    }

    pub fn node_row_count(&self) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn relationship_row_count(&self) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM edges", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn connect(&self) -> Result<Connection> {
        Ok(Connection::open(&self.path)?)
    }

    fn max_rowid(&self, table: &str) -> Result<u64> {
        let conn = self.connect()?;
        let max: i64 = conn.query_row(
            &format!("SELECT COALESCE(MAX(rowid), 0) FROM {}", table),
            [],
            |row| row.get(0),
        )?;
        Ok(max as u64)
    }
}

pub struct SqliteNodeRecord {
    id: NodeId,
    labels: Vec<LabelId>,
}

impl NodeReference for SqliteNodeRecord {
    fn entity_id(&self) -> NodeId {
        self.id
    }

    fn labels(&self) -> Result<&[LabelId]> {
        Ok(&self.labels)
    }

    fn properties_reference(&self) -> Result<PropRef> {
        // nodes carry no properties in this schema
        Ok(crate::types::NO_PROPERTIES)
    }
}

pub struct SqliteNodes {
    path: PathBuf,
    upper_bound: u64,
}

impl ScanSource for SqliteNodes {
    type Reference = SqliteNodeRecord;
    type Cursor = SqliteNodeCursor;

    fn record_upper_bound(&self) -> u64 {
        self.upper_bound
    }

    fn cursor(&self) -> Result<Self::Cursor> {
        Ok(SqliteNodeCursor {
            conn: Connection::open(&self.path)?,
            record: SqliteNodeRecord {
                id: 0,
                labels: vec![],
            },
        })
    }
}

pub struct SqliteNodeCursor {
    conn: Connection,
    record: SqliteNodeRecord,
}

impl SourceCursor for SqliteNodeCursor {
    type Reference = SqliteNodeRecord;

    fn read_window<C>(&mut self, start: u64, end: u64, consumer: &mut C) -> Result<u64>
    where
        C: RecordConsumer<SqliteNodeRecord>,
    {
        let Self { conn, record } = self;
        let mut stmt = conn.prepare_cached(
            "SELECT id, label FROM nodes WHERE rowid > ?1 AND rowid <= ?2 ORDER BY rowid",
        )?;
        let mut rows = stmt.query(params![start as i64, end as i64])?;
        let mut delivered = 0;
        while let Some(row) = rows.next()? {
            record.id = row.get(0)?;
            record.labels.clear();
            let label: Option<LabelId> = row.get(1)?;
            if let Some(label) = label {
                record.labels.push(label);
            }
            if !consumer.offer(record)? {
                break;
            }
            delivered += 1;
        }
        Ok(delivered)
    }
}

pub struct SqliteRelRecord {
    row: i64,
    source: NodeId,
    target: NodeId,
    rel_type: RelTypeId,
}

impl RelationshipReference for SqliteRelRecord {
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
        Ok(self.row)
    }
}

pub struct SqliteRelationships {
    path: PathBuf,
    upper_bound: u64,
}

impl ScanSource for SqliteRelationships {
    type Reference = SqliteRelRecord;
    type Cursor = SqliteRelCursor;

    fn record_upper_bound(&self) -> u64 {
        self.upper_bound
    }

    fn cursor(&self) -> Result<Self::Cursor> {
        Ok(SqliteRelCursor {
            conn: Connection::open(&self.path)?,
            record: SqliteRelRecord {
                row: 0,
                source: 0,
                target: 0,
                rel_type: 0,
            },
        })
    }
}

pub struct SqliteRelCursor {
    conn: Connection,
    record: SqliteRelRecord,
}

impl SourceCursor for SqliteRelCursor {
    type Reference = SqliteRelRecord;

    fn read_window<C>(&mut self, start: u64, end: u64, consumer: &mut C) -> Result<u64>
    where
        C: RecordConsumer<SqliteRelRecord>,
    {
        let Self { conn, record } = self;
        let mut stmt = conn.prepare_cached(
            "SELECT rowid, src, dst, etype FROM edges WHERE rowid > ?1 AND rowid <= ?2 \
             ORDER BY rowid",
        )?;
        let mut rows = stmt.query(params![start as i64, end as i64])?;
        let mut delivered = 0;
        while let Some(row) = rows.next()? {
            record.row = row.get(0)?;
            record.source = row.get(1)?;
            record.target = row.get(2)?;
            record.rel_type = row.get::<_, Option<RelTypeId>>(3)?.unwrap_or(0);
            if !consumer.offer(record)? {
                break;
            }
            delivered += 1;
        }
        Ok(delivered)
    }
}

pub struct SqlitePropertyReader {
    conn: Connection,
}

impl PropertyReader for SqlitePropertyReader {
    fn read_properties(
        &mut self,
        property_references: &[PropRef],
        property_keys: &[PropertyKeyId],
        default_values: &[f64],
    ) -> Result<Vec<Vec<u64>>> {
        let mut columns: Vec<Vec<u64>> = property_keys
            .iter()
            .zip(default_values)
            .map(|(_, &default)| vec![default.to_bits(); property_references.len()])
            .collect();
        let mut stmt = self
            .conn
            .prepare_cached("SELECT key, value FROM edge_props WHERE eid = ?1")?;
        for (position, &reference) in property_references.iter().enumerate() {
            if reference == crate::types::NO_PROPERTIES {
                continue;
            }
            let mut rows = stmt.query(params![reference])?;
            while let Some(row) = rows.next()? {
                let key: PropertyKeyId = row.get(0)?;
                let value: f64 = row.get(1)?;
                if let Some(column) = property_keys
                    .iter()
                    .position(|&candidate| candidate == key)
                {
                    columns[column][position] = value.to_bits();
                }
            }
        }
        Ok(columns)
    }
}

impl GraphStore for SqliteStore {
    type NodeRef = SqliteNodeRecord;
    type LabelNodeRef = super::LabelIdRecord;
    type RelRef = SqliteRelRecord;
    type Nodes = SqliteNodes;
    type LabelNodes = LabelIdList;
    type Relationships = SqliteRelationships;
    type Properties = SqlitePropertyReader;

    fn nodes(&self) -> Result<SqliteNodes> {
        Ok(SqliteNodes {
            path: self.path.clone(),
            upper_bound: self.max_rowid("nodes")?,
        })
    }

    fn label_nodes(&self, label: LabelId) -> Result<LabelIdList> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT id FROM nodes WHERE label = ?1 ORDER BY rowid")?;
        let ids = stmt
            .query_map(params![label], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<NodeId>>>()?;
        Ok(LabelIdList::new(label, ids))
    }

    fn relationships(&self) -> Result<SqliteRelationships> {
        Ok(SqliteRelationships {
            path: self.path.clone(),
            upper_bound: self.max_rowid("edges")?,
        })
    }

    fn property_reader(&self) -> Result<SqlitePropertyReader> {
        Ok(SqlitePropertyReader {
            conn: self.connect()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::NodesBatchBuffer;
    use crate::scan::StoreScanner;

    fn fixture() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.db");
        let conn = Connection::open(&path).unwrap();
        SqliteStore::create_tables(&conn).unwrap();
        for &(id, label) in &[(7i64, None), (3, None), (19, Some(1i64)), (3, None)] {
            conn.execute("INSERT INTO nodes VALUES (?1, ?2)", params![id, label])
                .unwrap();
        }
        conn.execute("INSERT INTO edges VALUES (7, 3, 0)", []).unwrap();
        conn.execute("INSERT INTO edges VALUES (3, 19, 0)", []).unwrap();
        conn.execute("INSERT INTO edge_props VALUES (1, 5, 2.5)", [])
            .unwrap();
        (dir, SqliteStore::open(path).unwrap())
    }

    #[test]
    fn test_node_scan_windows() {
        let (_dir, store) = fixture();
        let scanner = StoreScanner::new(store.nodes().unwrap(), 3);
        let mut cursor = scanner.cursor().unwrap();
        let mut buffer = NodesBatchBuffer::new(3, true);
        let mut ids = vec![];
        while buffer.scan(&mut cursor).unwrap() {
            ids.extend_from_slice(buffer.ids());
        }
        assert_eq!(ids, [7, 3, 19, 3]);
    }

    #[test]
    fn test_label_scan_materializes_ids() {
        let (_dir, store) = fixture();
        let source = store.label_nodes(1).unwrap();
        assert_eq!(source.record_upper_bound(), 1);
    }

    #[test]
    fn test_property_reader_reads_and_defaults() {
        let (_dir, store) = fixture();
        let mut reader = store.property_reader().unwrap();
        let columns = reader.read_properties(&[1, 2], &[5], &[0.25]).unwrap();
        assert_eq!(
            columns[0]
                .iter()
                .map(|&bits| f64::from_bits(bits))
                .collect::<Vec<_>>(),
            [2.5, 0.25]
        );
    }
}
