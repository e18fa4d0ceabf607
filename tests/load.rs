use pgload::{
    config::{LoadConfig, PropertyMapping},
    loader::{LoadedGraph, Loader},
    store::mem::MemGraph,
    store::sqlite::SqliteStore,
};
use rusqlite::{params, Connection};
use std::collections::HashSet;

/// The store holds node records {7, 3, 19, 3}; 19 carries label 1 and id 3
/// is observed twice. Loading with two workers and single-record batches
/// must yield exactly three internal ids and a single bit in the label
/// bitset, with no duplicate assignment for id 3.
#[test]
fn test_duplicate_observations_collapse_to_one_internal_id() {
    let mut graph = MemGraph::new();
    graph.add_node(7, &[]);
    graph.add_node(3, &[]);
    graph.add_node(19, &[1]);
    graph.add_node(3, &[]);
    let config = LoadConfig {
        concurrency: 2,
        batch_size: 1,
        ..LoadConfig::default()
    };
    let loaded = Loader::new(graph, config).load().unwrap();
    let id_map = &loaded.id_map;
    assert_eq!(id_map.node_count(), 3);
    let mapped: HashSet<_> = [7, 3, 19]
        .iter()
        .map(|&external| id_map.to_mapped(external).unwrap())
        .collect();
    assert_eq!(mapped, (0..3).collect());
    let bits = id_map.label_bitset(1).unwrap();
    assert_eq!(bits.cardinality(), 1);
    assert!(bits.get(id_map.to_mapped(19).unwrap() as usize));
}

fn decode_triples(loaded: &LoadedGraph) -> HashSet<(i64, i64, i64)> {
    let (_, relationships) = &loaded.relationships[0];
    let mut triples = HashSet::new();
    for node in 0..loaded.id_map.node_count() as u64 {
        let targets = match relationships.targets(node) {
            Some(cursor) => cursor.collect::<Vec<_>>(),
            None => continue,
        };
        let mut values = vec![0i64; targets.len()];
        if let Some(mut cursor) = relationships.properties(node) {
            let mut row = [0u64];
            for value in values.iter_mut() {
                assert!(cursor.next_row(&mut row));
                *value = f64::from_bits(row[0]) as i64;
            }
        }
        for (&target, &value) in targets.iter().zip(&values) {
            triples.insert((
                loaded.id_map.to_external(node),
                loaded.id_map.to_external(target),
                value,
            ));
        }
    }
    triples
}

/// Builds a 4-node, 6-relationship graph with one integer-valued property
/// and asserts exact recovery of every (source, target, property) triple
/// from the pages and offsets, independent of import order.
#[test]
fn test_adjacency_round_trip() {
    let edges = [
        (1i64, 2i64, 12i64),
        (1, 3, 13),
        (1, 4, 14),
        (2, 3, 23),
        (3, 4, 34),
        (4, 1, 41),
    ];
    for batch_size in &[1usize, 2, 100] {
        let mut graph = MemGraph::new();
        for id in 1..=4 {
            graph.add_node(id, &[]);
        }
        for &(source, target, value) in &edges {
            graph.add_relationship(source, target, 0, &[(9, value as f64)]);
        }
        let config = LoadConfig {
            property_keys: vec![PropertyMapping::new(9, 0.0)],
            concurrency: 4,
            batch_size: *batch_size,
            ..LoadConfig::default()
        };
        let loaded = Loader::new(graph, config).load().unwrap();
        let expected: HashSet<_> = edges.iter().copied().collect();
        assert_eq!(decode_triples(&loaded), expected);
        let (_, relationships) = &loaded.relationships[0];
        assert_eq!(relationships.rows(), 6);
        assert_eq!(relationships.relationship_count(), 6);
    }
}

#[test]
fn test_sqlite_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.db");
    let conn = Connection::open(&path).unwrap();
    SqliteStore::create_tables(&conn).unwrap();
    for &(id, label) in &[
        (7i64, None),
        (3, Some(2i64)),
        (19, Some(1)),
        (3, Some(1)),
        (42, Some(2)),
    ] {
        conn.execute("INSERT INTO nodes VALUES (?1, ?2)", params![id, label])
            .unwrap();
    }
    for &(source, target, rel_type) in &[(7i64, 3i64, 0i64), (3, 19, 0), (19, 7, 1), (42, 7, 0)] {
        conn.execute(
            "INSERT INTO edges VALUES (?1, ?2, ?3)",
            params![source, target, rel_type],
        )
        .unwrap();
    }
    conn.execute("INSERT INTO edge_props VALUES (2, 5, 1.5)", [])
        .unwrap();
    drop(conn);

    let store = SqliteStore::open(&path).unwrap();
    let config = LoadConfig {
        property_keys: vec![PropertyMapping::new(5, -1.0)],
        batch_size: 2,
        ..LoadConfig::default()
    };
    let loaded = Loader::new(store, config).load().unwrap();
    assert_eq!(loaded.id_map.node_count(), 4);
    assert_eq!(loaded.id_map.label_bitset(1).unwrap().cardinality(), 2);
    assert_eq!(loaded.id_map.label_bitset(2).unwrap().cardinality(), 2);
    let (_, relationships) = &loaded.relationships[0];
    assert_eq!(relationships.rows(), 4);
    assert_eq!(relationships.relationship_count(), 4);
    // the 3 -> 19 relationship carries the property, the rest default
    let source = loaded.id_map.to_mapped(3).unwrap();
    let mut cursor = relationships.properties(source).unwrap();
    let mut row = [0u64];
    assert!(cursor.next_row(&mut row));
    assert_eq!(f64::from_bits(row[0]), 1.5);
}

/// Label-filtered loading drives the composite scan: only nodes of the
/// requested labels are mapped, and a node observed by two sub-scans still
/// gets one internal id with both label bits set.
#[test]
fn test_sqlite_label_filtered_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.db");
    let conn = Connection::open(&path).unwrap();
    SqliteStore::create_tables(&conn).unwrap();
    for &(id, label) in &[
        (1i64, Some(10i64)),
        (2, Some(20)),
        (3, Some(10)),
        (3, Some(20)),
        (4, Some(30)),
        (5, None),
    ] {
        conn.execute("INSERT INTO nodes VALUES (?1, ?2)", params![id, label])
            .unwrap();
    }
    conn.execute("INSERT INTO edges VALUES (1, 3, 0)", []).unwrap();
    conn.execute("INSERT INTO edges VALUES (1, 4, 0)", []).unwrap();
    drop(conn);

    let store = SqliteStore::open(&path).unwrap();
    let config = LoadConfig {
        label_filter: vec![10, 20],
        concurrency: 2,
        batch_size: 1,
        ..LoadConfig::default()
    };
    let loaded = Loader::new(store, config).load().unwrap();
    assert_eq!(loaded.id_map.node_count(), 3);
    assert!(loaded.id_map.to_mapped(4).is_none());
    assert!(loaded.id_map.to_mapped(5).is_none());
    let three = loaded.id_map.to_mapped(3).unwrap();
    assert!(loaded.id_map.has_label(three, 10));
    assert!(loaded.id_map.has_label(three, 20));
    // 1 -> 4 loses its endpoint, 1 -> 3 survives
    let (_, relationships) = &loaded.relationships[0];
    assert_eq!(relationships.relationship_count(), 1);
    assert_eq!(
        relationships
            .targets(loaded.id_map.to_mapped(1).unwrap())
            .unwrap()
            .collect::<Vec<_>>(),
        [three]
    );
}
