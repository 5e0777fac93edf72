//! # olap-segment-engine 使用案例
//!
//! 1. 用 JSON 配置描述 schema 与星型树
//! 2. 生成两个不可变段（其中一个带星型树）
//! 3. 加载段并执行聚合、group-by、selection 查询
//! 4. 实时段边写边读，再转成不可变段

use std::sync::Arc;
use olap_segment_engine::{
    config::{QueryExecutorConfig, ReadMode, SegmentGeneratorConfig, StarTreeIndexConfig},
    field_type::{Schema, Value},
    logging::init_logging,
    query::{AggregationInfo, FilterNode, OrderBy, QueryExecutor, QueryRequest, QueryResult},
    record::{GenericRow, GenericRowRecordReader},
    segment::{ImmutableSegmentLoader, IndexSegment, MutableSegment, RealtimeSegmentRecordReader, SegmentCreator},
};

const SCHEMA: &str = r#"{
    "schemaName": "orders",
    "fieldSpecs": [
        {"name": "country", "dataType": "STRING", "fieldType": "DIMENSION"},
        {"name": "device",  "dataType": "STRING", "fieldType": "DIMENSION"},
        {"name": "tags",    "dataType": "STRING", "fieldType": "DIMENSION", "singleValue": false},
        {"name": "amount",  "dataType": "LONG",   "fieldType": "METRIC"}
    ]
}"#;

fn orders(seed: i64) -> Vec<GenericRow> {
    let countries = ["us", "cn", "de", "fr"];
    let devices = ["ios", "android", "web"];
    (0..200i64)
        .map(|i| {
            GenericRow::from_pairs([
                ("country", Value::from(countries[(i % 4) as usize])),
                ("device", Value::from(devices[((i + seed) % 3) as usize])),
                ("tags", Value::List(vec![Value::from(format!("t{}", i % 5))])),
                ("amount", Value::Long((i * 7 + seed) % 100)),
            ])
        })
        .collect()
}

fn print_result(title: &str, result: &QueryResult) {
    println!("── {title}");
    match result {
        QueryResult::Aggregation(values) => {
            for (name, v) in values {
                println!("   {name:<16} {v}");
            }
        }
        QueryResult::GroupBy(results) => {
            for r in results {
                println!("   {}", r.function);
                for (key, v) in &r.groups {
                    println!("     {key:?} => {v}");
                }
            }
        }
        QueryResult::Table { columns, rows } => {
            println!("   {columns:?}");
            for row in rows {
                println!("   {row:?}");
            }
        }
    }
}

fn main() -> olap_segment_engine::Result<()> {
    init_logging("info");
    let schema = Schema::from_json_str(SCHEMA)?;
    let work = std::env::temp_dir().join(format!("olap-segment-demo-{}", std::process::id()));
    std::fs::create_dir_all(&work)?;

    // 1. 生成段
    let star = StarTreeIndexConfig::new(&["country", "device"], &["SUM__amount", "COUNT__*"])
        .with_max_leaf_records(4);
    let plain_dir = SegmentCreator::new(SegmentGeneratorConfig::new("orders", "orders_0", &work), schema.clone())?
        .create(&mut GenericRowRecordReader::new(orders(0), schema.clone()))?;
    let star_dir = SegmentCreator::new(
        SegmentGeneratorConfig::new("orders", "orders_1", &work).with_star_tree(star),
        schema.clone(),
    )?
    .create(&mut GenericRowRecordReader::new(orders(1), schema.clone()))?;

    // 2. 加载
    let segments: Vec<Arc<dyn IndexSegment>> = vec![
        Arc::new(ImmutableSegmentLoader::load(&plain_dir, ReadMode::Mmap)?),
        Arc::new(ImmutableSegmentLoader::load(&star_dir, ReadMode::Heap)?),
    ];
    let executor = QueryExecutor::new(QueryExecutorConfig::default())?;

    // 3. 查询
    let totals = QueryRequest::aggregation("orders", vec![
        AggregationInfo::count(),
        AggregationInfo::parse("sum", "amount")?,
        AggregationInfo::parse("avg", "amount")?,
    ]);
    let response = executor.process_query(&totals, &segments)?;
    print_result("totals", &response.result);
    println!("   stats: {:?}", response.stats);

    let by_device = QueryRequest::aggregation("orders", vec![AggregationInfo::parse("sum", "amount")?])
        .with_filter(FilterNode::in_values("country", ["us", "cn"]))
        .with_group_by(&["device"], 3);
    let response = executor.process_query(&by_device, &segments)?;
    print_result("sum(amount) by device, country in (us, cn)", &response.result);
    println!("   docs scanned: {}", response.stats.num_docs_scanned);

    let sql = QueryRequest::aggregation("orders", vec![AggregationInfo::count()])
        .with_group_by(&["country", "device"], 10)
        .with_sql_order_by(vec![OrderBy::desc("count(*)"), OrderBy::asc("country")], 5);
    print_result("top 5 (country, device)", &executor.process_query(&sql, &segments)?.result);

    let selection = QueryRequest::selection("orders", &["country", "tags", "amount"], 3)
        .with_selection_order_by(vec![OrderBy::desc("amount")]);
    print_result("largest orders", &executor.process_query(&selection, &segments)?.result);

    // 4. 实时段
    let realtime = MutableSegment::new("orders_rt", schema.clone());
    for row in orders(2).iter().take(20) {
        realtime.index(row)?;
    }
    let mut reader = RealtimeSegmentRecordReader::new(&realtime, Some("country"))?;
    let converted = SegmentCreator::new(SegmentGeneratorConfig::new("orders", "orders_rt_0", &work), schema)?
        .create(&mut reader)?;
    let converted: Arc<dyn IndexSegment> = Arc::new(ImmutableSegmentLoader::load(&converted, ReadMode::Mmap)?);
    let response = executor.process_query(&totals, &[converted])?;
    print_result("realtime segment totals", &response.result);

    std::fs::remove_dir_all(&work)?;
    Ok(())
}
