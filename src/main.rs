use clap::{load_yaml, App, AppSettings, ArgMatches};
use itertools::Itertools;
use pgload::{
    config::{Aggregation, LoadConfig, PageBacking, PropertyMapping},
    loader::Loader,
    store::sqlite::SqliteStore,
};
use std::error::Error;
use std::time::Instant;

fn parse_tokens(tokens: &str) -> Result<Vec<i64>, Box<dyn Error>> {
    tokens
        .split(',')
        .map(|token| token.trim().parse::<i64>().map_err(Into::into))
        .collect()
}

fn parse_property(property: &str) -> Result<PropertyMapping, Box<dyn Error>> {
    let mut parts = property.splitn(2, ':');
    let key = parts.next().unwrap().trim().parse()?;
    let default = match parts.next() {
        Some(default) => default.trim().parse()?,
        None => 0.0,
    };
    Ok(PropertyMapping::new(key, default))
}

fn parse_aggregation(aggregation: &str) -> Aggregation {
    match aggregation {
        "none" => Aggregation::None,
        "single" => Aggregation::Single,
        "sum" => Aggregation::Sum,
        "min" => Aggregation::Min,
        "max" => Aggregation::Max,
        _ => unreachable!(),
    }
}

fn handle_load(matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let store = SqliteStore::open(matches.value_of("SQLITE3").unwrap())?;
    let mut config = LoadConfig::default();
    if let Some(labels) = matches.value_of("labels") {
        config.label_filter = parse_tokens(labels)?;
    }
    if let Some(types) = matches.value_of("types") {
        config.relationship_types = parse_tokens(types)?;
    }
    if let Some(properties) = matches.values_of("property") {
        config.property_keys = properties
            .map(parse_property)
            .collect::<Result<_, _>>()?;
    }
    config.aggregation = parse_aggregation(matches.value_of("aggregation").unwrap());
    if let Some(concurrency) = matches.value_of("concurrency") {
        config.concurrency = concurrency.parse()?;
    }
    config.batch_size = matches.value_of("batch-size").unwrap().parse()?;
    if let Some(page_size) = matches.value_of("page-size") {
        config.page_size = page_size.parse()?;
    }
    if matches.is_present("mmap-pages") {
        config.page_backing = PageBacking::Mmap;
    }
    let time_now = Instant::now();
    let graph = Loader::new(store, config).load()?;
    eprintln!("load_time: {}", time_now.elapsed().as_millis());
    println!("node_count: {}", graph.id_map.node_count());
    for label in graph.id_map.labels().sorted() {
        println!(
            "label {}: {} nodes",
            label,
            graph
                .id_map
                .label_bitset(label)
                .map_or(0, |bits| bits.cardinality())
        );
    }
    for (rel_type, relationships) in &graph.relationships {
        let name = rel_type.map_or(String::from("all types"), |rel_type| {
            format!("type {}", rel_type)
        });
        println!(
            "{}: {} rows, {} relationships, {} pages",
            name,
            relationships.rows(),
            relationships.relationship_count(),
            relationships.adjacency_list().page_count()
        );
    }
    Ok(())
}

fn handle_info(matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let store = SqliteStore::open(matches.value_of("SQLITE3").unwrap())?;
    println!("node_rows: {}", store.node_row_count()?);
    println!("relationship_rows: {}", store.relationship_row_count()?);
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let yaml = load_yaml!("cli.yml");
    let matches = App::from_yaml(yaml)
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .get_matches();
    if let Some(matches) = matches.subcommand_matches("load") {
        handle_load(matches)?;
    } else if let Some(matches) = matches.subcommand_matches("info") {
        handle_info(matches)?;
    }
    Ok(())
}
