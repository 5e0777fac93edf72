//! 段生成：记录流 → 段目录
//!
//! 1. 第一遍扫描（经过 transformer）：每列的取值集合、值总数、单行最多值数、时间范围
//! 2. 写有序字典
//! 3. `rewind()` 后第二遍扫描，写定宽正排
//! 4. V2：以堆模式打开刚写好的列，构建每棵星型树并写入 `star_tree_index`
//! 5. 最后写 `metadata.json` 与 `creation.meta`
//!
//! 旧格式（V1）星型树另走 `create_legacy`：先用原始记录建树，
//! 合并后的原始记录与聚合记录一起成为段的行。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use crate::common::{DictId, DocId, OlapError, Result, SegmentVersion};
use crate::config::{SegmentGeneratorConfig, StarTreeFormatVersion, StarTreeIndexConfig};
use crate::dictionary::Dictionary;
use crate::field_type::{FieldSpec, FieldType, Schema, Value};
use crate::io::{bitset, FixedBitMultiValueWriter, FixedBitSingleValueWriter, ReadMode};
use crate::query::aggregation::AggregationFunctionType;
use crate::record::{GenericRow, RecordReader};
use crate::startree::node::STAR_IN_FORWARD_INDEX;
use crate::startree::tree::write_tree_file;
use crate::startree::{
    write_star_tree_index, AggregationFunctionColumnPair, BuiltStarTree, StarTreeBuilder,
    StarTreeIndexEntry, StarTreeRecord, STAR,
};
use crate::transform::{CompositeTransformer, RecordTransformer};
use super::immutable::load_columns;
use super::metadata::{compute_crc, write_creation_meta, ColumnMetadata, LegacyStarTreeMetadata};
use super::{
    dictionary_file, forward_index_file, DataSource, SegmentMetadata, StarTreeMetadata,
    LEGACY_STAR_TREE_FILE,
};

/// 第一遍扫描的单列统计
#[derive(Default)]
struct ColumnStats {
    distinct:         HashMap<Vec<u8>, Value>,
    total_entries:    usize,
    max_multi_values: usize,
}

impl ColumnStats {
    fn collect(&mut self, value: &Value) {
        let items = values_of(value);
        self.total_entries += items.len();
        self.max_multi_values = self.max_multi_values.max(items.len());
        for v in items {
            self.distinct.entry(v.to_sort_key()).or_insert_with(|| v.clone());
        }
    }

    fn build_dictionary(&self, field: &FieldSpec) -> Result<Dictionary> {
        Dictionary::build(field.data_type, self.distinct.values())
    }
}

/// 多值列的元素；单值按一个元素处理
fn values_of(value: &Value) -> &[Value] {
    value.as_values().unwrap_or(std::slice::from_ref(value))
}

enum ColumnWriter {
    Single(FixedBitSingleValueWriter),
    Multi(FixedBitMultiValueWriter),
}

impl ColumnWriter {
    fn close(self) -> Result<()> {
        match self {
            Self::Single(w) => w.close(),
            Self::Multi(w)  => w.close(),
        }
    }
}

struct FirstPass {
    stats:      Vec<ColumnStats>,
    num_docs:   usize,
    time_range: Option<(i64, i64)>,
}

pub struct SegmentCreator {
    config:      SegmentGeneratorConfig,
    schema:      Schema,
    transformer: CompositeTransformer,
}

impl SegmentCreator {
    pub fn new(config: SegmentGeneratorConfig, schema: Schema) -> Result<Self> {
        let transformer = CompositeTransformer::default_for(&schema)?;
        let creator = Self { config, schema, transformer };
        creator.validate()?;
        Ok(creator)
    }

    pub fn schema(&self) -> &Schema { &self.schema }

    /// 生成段目录并返回其路径；目录已存在时报错
    pub fn create(&self, reader: &mut dyn RecordReader) -> Result<PathBuf> {
        let dir = self.config.segment_dir();
        if dir.exists() {
            return Err(OlapError::Config(format!("segment directory {} already exists", dir.display())));
        }
        std::fs::create_dir_all(&dir)?;

        let first = self.first_pass(reader)?;
        let metadata = match (self.config.star_tree_format_version, self.config.star_tree_index_configs.first()) {
            (StarTreeFormatVersion::V1, Some(cfg)) => self.create_legacy(&dir, reader, cfg, first)?,
            _ => self.create_v2(&dir, reader, first)?,
        };

        metadata.write(&dir)?;
        let crc = compute_crc(&dir)?;
        write_creation_meta(&dir, crc, metadata.creation_time_ms)?;
        info!(
            segment = %metadata.segment_name,
            version = %metadata.version,
            docs = metadata.num_docs,
            total_docs = metadata.total_docs,
            star_trees = metadata.star_trees.as_ref().map_or(0, Vec::len),
            "created segment",
        );
        Ok(dir)
    }

    // ── 校验 ──────────────────────────────────────────────────────────────────

    fn validate(&self) -> Result<()> {
        for cfg in &self.config.star_tree_index_configs {
            cfg.validate()?;
            for dim in &cfg.dimensions_split_order {
                let field = self.field(dim)?;
                if field.field_type == FieldType::Metric || !field.single_value {
                    return Err(OlapError::Config(format!(
                        "star-tree dimension {dim} must be a single-value dimension column",
                    )));
                }
            }
            for name in &cfg.function_column_pairs {
                let pair = AggregationFunctionColumnPair::from_column_name(name)?;
                if pair.function != AggregationFunctionType::Count {
                    self.check_metric_column(&pair.column)?;
                }
            }
        }
        if self.config.star_tree_format_version == StarTreeFormatVersion::V1
            && !self.config.star_tree_index_configs.is_empty()
        {
            if self.config.star_tree_index_configs.len() != 1 {
                return Err(OlapError::Config("legacy star-tree format supports exactly one star-tree".into()));
            }
            let split = &self.config.star_tree_index_configs[0].dimensions_split_order;
            for name in self.schema.dimension_names() {
                if !split.iter().any(|d| d == name) {
                    return Err(OlapError::Config(format!(
                        "legacy star-tree split order must contain every dimension, missing {name}",
                    )));
                }
            }
            for name in self.schema.metric_names() {
                self.check_metric_column(name)?;
            }
        }
        Ok(())
    }

    fn field(&self, name: &str) -> Result<&FieldSpec> {
        self.schema.field_spec(name)
            .ok_or_else(|| OlapError::Config(format!("column {name} is not in schema {}", self.schema.schema_name)))
    }

    fn check_metric_column(&self, name: &str) -> Result<()> {
        let field = self.field(name)?;
        if !field.data_type.is_numeric() || !field.single_value {
            return Err(OlapError::Config(format!("column {name} must be a single-value numeric column")));
        }
        Ok(())
    }

    // ── 扫描 ──────────────────────────────────────────────────────────────────

    fn first_pass(&self, reader: &mut dyn RecordReader) -> Result<FirstPass> {
        let fields = &self.schema.field_specs;
        let time_column = self.schema.time_column().map(|f| f.name.as_str());
        let mut stats: Vec<ColumnStats> = fields.iter().map(|_| ColumnStats::default()).collect();
        let mut time_range: Option<(i64, i64)> = None;
        let mut num_docs = 0;

        let mut row = GenericRow::new();
        while reader.has_next() {
            self.next_row(reader, &mut row)?;
            for (field, s) in fields.iter().zip(stats.iter_mut()) {
                s.collect(row.get_value(&field.name).unwrap_or(&Value::Null));
            }
            if let Some(t) = time_column.and_then(|c| row.get_value(c)).and_then(Value::as_i64) {
                time_range = Some(match time_range {
                    Some((lo, hi)) => (lo.min(t), hi.max(t)),
                    None => (t, t),
                });
            }
            num_docs += 1;
        }
        debug!(segment = %self.config.segment_name, docs = num_docs, "first pass done");
        Ok(FirstPass { stats, num_docs, time_range })
    }

    fn next_row(&self, reader: &mut dyn RecordReader, row: &mut GenericRow) -> Result<()> {
        reader.next(row)?;
        self.transformer.transform(row)
    }

    fn base_metadata(&self, version: SegmentVersion, first: &FirstPass, columns: Vec<ColumnMetadata>) -> SegmentMetadata {
        SegmentMetadata {
            segment_name: self.config.segment_name.clone(),
            table_name: self.config.table_name.clone(),
            version,
            num_docs: first.num_docs,
            total_docs: first.num_docs,
            time_column: self.schema.time_column().map(|f| f.name.clone()),
            start_time: first.time_range.map(|(lo, _)| lo),
            end_time: first.time_range.map(|(_, hi)| hi),
            creation_time_ms: now_ms(),
            schema: self.schema.clone(),
            columns,
            star_trees: None,
            legacy_star_tree: None,
        }
    }

    // ── V2 ────────────────────────────────────────────────────────────────────

    fn create_v2(&self, dir: &Path, reader: &mut dyn RecordReader, first: FirstPass) -> Result<SegmentMetadata> {
        let fields = &self.schema.field_specs;
        let mut dictionaries = Vec::with_capacity(fields.len());
        let mut columns = Vec::with_capacity(fields.len());
        let mut writers = Vec::with_capacity(fields.len());
        for (field, stats) in fields.iter().zip(&first.stats) {
            let dict = stats.build_dictionary(field)?;
            dict.write_to(&dir.join(dictionary_file(&field.name)))?;
            let column = column_metadata(field, &dict, stats.total_entries, stats.max_multi_values);
            let path = dir.join(forward_index_file(&field.name, field.single_value));
            writers.push(if field.single_value {
                ColumnWriter::Single(FixedBitSingleValueWriter::create(&path, first.num_docs, column.bits_per_element)?)
            } else {
                ColumnWriter::Multi(FixedBitMultiValueWriter::create(
                    &path, first.num_docs, stats.total_entries, stats.max_multi_values, column.bits_per_element,
                )?)
            });
            dictionaries.push(dict);
            columns.push(column);
        }

        reader.rewind()?;
        let mut row = GenericRow::new();
        let mut ids: Vec<DictId> = Vec::new();
        let mut doc: usize = 0;
        while reader.has_next() {
            self.next_row(reader, &mut row)?;
            if doc >= first.num_docs {
                return Err(OlapError::Internal("record reader yielded more rows after rewind".into()));
            }
            for ((field, dict), writer) in fields.iter().zip(&dictionaries).zip(writers.iter_mut()) {
                let value = row.get_value(&field.name).unwrap_or(&Value::Null);
                match writer {
                    ColumnWriter::Single(w) => w.set_int(doc as DocId, lookup(dict, &field.name, value)?),
                    ColumnWriter::Multi(w) => {
                        ids.clear();
                        for v in values_of(value) {
                            ids.push(lookup(dict, &field.name, v)?);
                        }
                        w.set_int_array(doc as DocId, &ids)?;
                    }
                }
            }
            doc += 1;
        }
        if doc != first.num_docs {
            return Err(OlapError::Internal(format!(
                "record reader yielded {doc} rows after rewind, {} before", first.num_docs,
            )));
        }
        for w in writers {
            w.close()?;
        }

        let mut metadata = self.base_metadata(SegmentVersion::V2, &first, columns);
        if !self.config.star_tree_index_configs.is_empty() {
            let sources = load_columns(dir, &metadata, ReadMode::Heap)?;
            let trees = self.config.star_tree_index_configs.iter()
                .map(|cfg| build_star_tree(cfg, &metadata, &sources))
                .collect::<Result<Vec<_>>>()?;
            let entries: Vec<StarTreeIndexEntry<'_>> = trees.iter()
                .map(|(m, built, bits)| StarTreeIndexEntry { metadata: m, built, dimension_bits: bits })
                .collect();
            write_star_tree_index(dir, &entries)?;
            metadata.star_trees = Some(trees.into_iter().map(|(m, ..)| m).collect());
        }
        Ok(metadata)
    }

    // ── V1 ────────────────────────────────────────────────────────────────────

    fn create_legacy(
        &self,
        dir:    &Path,
        reader: &mut dyn RecordReader,
        cfg:    &StarTreeIndexConfig,
        first:  FirstPass,
    ) -> Result<SegmentMetadata> {
        let split = &cfg.dimensions_split_order;
        let metric_names = self.schema.metric_names();
        let dim_dicts = split.iter()
            .map(|d| {
                let i = self.field_index(d)?;
                first.stats[i].build_dictionary(&self.schema.field_specs[i])
            })
            .collect::<Result<Vec<_>>>()?;

        reader.rewind()?;
        let mut row = GenericRow::new();
        let mut records = Vec::with_capacity(first.num_docs);
        while reader.has_next() {
            self.next_row(reader, &mut row)?;
            let dimensions = split.iter().zip(&dim_dicts)
                .map(|(d, dict)| lookup(dict, d, row.get_value(d).unwrap_or(&Value::Null)))
                .collect::<Result<Vec<_>>>()?;
            let metrics = metric_names.iter()
                .map(|m| {
                    let v = row.get_value(m).unwrap_or(&Value::Null);
                    v.as_f64().ok_or_else(|| OlapError::TypeConversion(format!("metric {m} value {v} is not numeric")))
                })
                .collect::<Result<Vec<_>>>()?;
            records.push(StarTreeRecord { dimensions, metrics });
        }

        let pairs: Vec<_> = metric_names.iter()
            .map(|m| AggregationFunctionColumnPair::new(AggregationFunctionType::Sum, m))
            .collect();
        let built = StarTreeBuilder::new(split.len(), pairs, cfg.max_leaf_records, &skip_star_indexes(cfg))
            .build(records);
        let total_docs = built.records.len();

        let mut columns = Vec::with_capacity(self.schema.field_specs.len());
        for field in &self.schema.field_specs {
            let path = dir.join(forward_index_file(&field.name, true));
            if let Some(d) = split.iter().position(|s| *s == field.name) {
                let dict = &dim_dicts[d];
                let column = column_metadata(field, dict, total_docs, 1);
                let mut w = FixedBitSingleValueWriter::create(&path, total_docs, column.bits_per_element)?;
                for (doc, r) in built.records.iter().enumerate() {
                    let id = r.dimensions[d];
                    w.set_int(doc as DocId, if id == STAR { STAR_IN_FORWARD_INDEX } else { id });
                }
                w.close()?;
                dict.write_to(&dir.join(dictionary_file(&field.name)))?;
                columns.push(column);
            } else {
                // 聚合后的指标值重新建字典
                let m = metric_names.iter().position(|n| *n == field.name)
                    .ok_or_else(|| OlapError::Internal(format!("column {} is neither dimension nor metric", field.name)))?;
                let values = built.records.iter()
                    .map(|r| Value::Double(r.metrics[m]).coerce_scalar(field.data_type))
                    .collect::<Result<Vec<_>>>()?;
                let dict = Dictionary::build(field.data_type, &values)?;
                let column = column_metadata(field, &dict, total_docs, 1);
                let mut w = FixedBitSingleValueWriter::create(&path, total_docs, column.bits_per_element)?;
                for (doc, v) in values.iter().enumerate() {
                    w.set_int(doc as DocId, lookup(&dict, &field.name, v)?);
                }
                w.close()?;
                dict.write_to(&dir.join(dictionary_file(&field.name)))?;
                columns.push(column);
            }
        }
        write_tree_file(&dir.join(LEGACY_STAR_TREE_FILE), &built.root, split, built.num_nodes)?;

        let mut metadata = self.base_metadata(SegmentVersion::V1, &first, columns);
        metadata.num_docs = built.num_raw_records;
        metadata.total_docs = total_docs;
        metadata.legacy_star_tree = Some(LegacyStarTreeMetadata {
            dimensions_split_order: split.clone(),
            max_leaf_records: cfg.max_leaf_records,
        });
        Ok(metadata)
    }

    fn field_index(&self, name: &str) -> Result<usize> {
        self.schema.field_specs.iter().position(|f| f.name == name)
            .ok_or_else(|| OlapError::Config(format!("column {name} is not in schema")))
    }
}

// ── 星型树（V2）─────────────────────────────────────────────────────────────

fn build_star_tree(
    cfg:      &StarTreeIndexConfig,
    segment:  &SegmentMetadata,
    sources:  &HashMap<String, Arc<DataSource>>,
) -> Result<(StarTreeMetadata, BuiltStarTree, Vec<u32>)> {
    let source = |name: &str| {
        sources.get(name).cloned()
            .ok_or_else(|| OlapError::Internal(format!("freshly written column {name} is missing")))
    };
    let pairs = cfg.function_column_pairs.iter()
        .map(|p| AggregationFunctionColumnPair::from_column_name(p))
        .collect::<Result<Vec<_>>>()?;
    let dims = cfg.dimensions_split_order.iter().map(|d| source(d)).collect::<Result<Vec<_>>>()?;
    let metrics = pairs.iter()
        .map(|p| match p.function {
            AggregationFunctionType::Count => Ok(None),
            _ => source(&p.column).map(Some),
        })
        .collect::<Result<Vec<_>>>()?;
    let dimension_bits = cfg.dimensions_split_order.iter()
        .map(|d| segment.column(d).map(|c| c.bits_per_element)
            .ok_or_else(|| OlapError::Internal(format!("no metadata for column {d}"))))
        .collect::<Result<Vec<_>>>()?;

    let mut records = Vec::with_capacity(segment.num_docs);
    for doc in 0..segment.num_docs as DocId {
        let dimensions = dims.iter()
            .map(|d| d.dict_id(doc).ok_or_else(|| {
                OlapError::Internal(format!("star-tree dimension {} is not a single-value column", d.column()))
            }))
            .collect::<Result<Vec<_>>>()?;
        let metrics = pairs.iter().zip(&metrics)
            .map(|(p, s)| p.initial_value(s.as_ref().and_then(|s| s.double_value(doc)).unwrap_or(0.0)))
            .collect();
        records.push(StarTreeRecord { dimensions, metrics });
    }

    let built = StarTreeBuilder::new(dims.len(), pairs.clone(), cfg.max_leaf_records, &skip_star_indexes(cfg))
        .build(records);
    let metadata = StarTreeMetadata {
        num_docs: built.records.len(),
        dimensions_split_order: cfg.dimensions_split_order.clone(),
        function_column_pairs: pairs.iter().map(|p| p.to_column_name()).collect(),
        max_leaf_records: cfg.max_leaf_records,
        skip_star_node_creation_for_dimensions: cfg.skip_star_node_creation_for_dimensions.clone(),
    };
    Ok((metadata, built, dimension_bits))
}

fn skip_star_indexes(cfg: &StarTreeIndexConfig) -> Vec<usize> {
    cfg.skip_star_node_creation_for_dimensions.iter()
        .filter_map(|d| cfg.dimensions_split_order.iter().position(|s| s == d))
        .collect()
}

// ── 工具 ──────────────────────────────────────────────────────────────────────

fn column_metadata(field: &FieldSpec, dict: &Dictionary, total_entries: usize, max_multi_values: usize) -> ColumnMetadata {
    ColumnMetadata {
        name: field.name.clone(),
        data_type: field.data_type,
        field_type: field.field_type,
        single_value: field.single_value,
        cardinality: dict.cardinality(),
        bits_per_element: bitset::num_bits_per_value(dict.cardinality().saturating_sub(1) as u32),
        total_number_of_entries: total_entries,
        max_number_of_multi_values: max_multi_values,
        has_dictionary: true,
    }
}

fn lookup(dict: &Dictionary, column: &str, value: &Value) -> Result<DictId> {
    dict.index_of(value)
        .ok_or_else(|| OlapError::Internal(format!("value {value} of column {column} is missing from its dictionary")))
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis() as i64)
}
