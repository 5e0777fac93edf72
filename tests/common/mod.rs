#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use olap_segment_engine::config::{
    QueryExecutorConfig, ReadMode, SegmentGeneratorConfig, StarTreeFormatVersion, StarTreeIndexConfig,
};
use olap_segment_engine::field_type::{DataType, FieldSpec, Schema, Value};
use olap_segment_engine::record::{GenericRow, GenericRowRecordReader};
use olap_segment_engine::segment::{ImmutableSegment, ImmutableSegmentLoader, IndexSegment, SegmentCreator};
use olap_segment_engine::query::QueryExecutor;

/// A ∈ {0,1}、B ∈ {0,1,2}、C ∈ {0,1}，m 为 LONG 指标
pub fn abc_schema() -> Schema {
    Schema::new("abc", vec![
        FieldSpec::dimension("A", DataType::Int, true),
        FieldSpec::dimension("B", DataType::Int, true),
        FieldSpec::dimension("C", DataType::Int, true),
        FieldSpec::metric("m", DataType::Long),
    ])
}

/// 每个维度组合一行，m = 100a + 10b + c + 1
pub fn abc_rows() -> Vec<GenericRow> {
    let mut rows = Vec::new();
    for a in 0..2 {
        for b in 0..3 {
            for c in 0..2 {
                rows.push(GenericRow::from_pairs([
                    ("A", Value::Int(a)),
                    ("B", Value::Int(b)),
                    ("C", Value::Int(c)),
                    ("m", Value::Long((100 * a + 10 * b + c + 1) as i64)),
                ]));
            }
        }
    }
    rows
}

pub fn abc_star_tree() -> StarTreeIndexConfig {
    StarTreeIndexConfig::new(&["A", "B", "C"], &["SUM__m", "COUNT__*", "MAX__m", "MIN__m"])
        .with_max_leaf_records(1)
}

/// d0..d3 为 INT 维度（基数 3、4、5、6），m 为 LONG 指标
pub fn random_schema() -> Schema {
    Schema::new("rnd", vec![
        FieldSpec::dimension("d0", DataType::Int, true),
        FieldSpec::dimension("d1", DataType::Int, true),
        FieldSpec::dimension("d2", DataType::Int, true),
        FieldSpec::dimension("d3", DataType::Int, true),
        FieldSpec::metric("m", DataType::Long),
    ])
}

/// 固定种子的随机行；m 取整数，SUM 在 f64 中精确
pub fn random_rows(seed: u64, n: usize) -> Vec<GenericRow> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            GenericRow::from_pairs([
                ("d0", Value::Int(rng.gen_range(0..3))),
                ("d1", Value::Int(rng.gen_range(0..4))),
                ("d2", Value::Int(rng.gen_range(0..5))),
                ("d3", Value::Int(rng.gen_range(0..6))),
                ("m", Value::Long(rng.gen_range(0..1000))),
            ])
        })
        .collect()
}

pub fn random_star_tree(max_leaf_records: usize, skip_star: &[&str]) -> StarTreeIndexConfig {
    StarTreeIndexConfig::new(&["d0", "d1", "d2", "d3"], &["SUM__m", "COUNT__*", "MAX__m", "MIN__m"])
        .with_max_leaf_records(max_leaf_records)
        .with_skip_star_node_creation(skip_star)
}

pub fn create_random_segment(out: &Path, name: &str, rows: Vec<GenericRow>, config: StarTreeIndexConfig) -> PathBuf {
    let cfg = SegmentGeneratorConfig::new("rnd", name, out).with_star_tree(config);
    SegmentCreator::new(cfg, random_schema()).unwrap()
        .create(&mut GenericRowRecordReader::new(rows, random_schema()))
        .unwrap()
}

pub fn create_segment(out: &Path, name: &str, config: Option<StarTreeIndexConfig>, format: StarTreeFormatVersion) -> PathBuf {
    let mut cfg = SegmentGeneratorConfig::new("abc", name, out).with_star_tree_format(format);
    if let Some(st) = config {
        cfg = cfg.with_star_tree(st);
    }
    SegmentCreator::new(cfg, abc_schema()).unwrap()
        .create(&mut GenericRowRecordReader::new(abc_rows(), abc_schema()))
        .unwrap()
}

pub fn load(dir: &Path) -> Arc<dyn IndexSegment> {
    let segment: ImmutableSegment = ImmutableSegmentLoader::load(dir, ReadMode::Mmap).unwrap();
    Arc::new(segment)
}

pub fn executor(enable_star_tree: bool) -> QueryExecutor {
    QueryExecutor::new(QueryExecutorConfig { enable_star_tree, ..QueryExecutorConfig::default() }).unwrap()
}
