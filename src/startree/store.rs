//! 星型树落盘与加载
//!
//! V2：段内所有星型树写进同一个 `star_tree_index`：
//! ```text
//! tree 0: [星型树二进制][维度 0 正排]…[维度 n 正排][pair 0 f64 列]…
//! tree 1: …
//! ```
//! 各区间记录在 `star_tree_index_map`。维度正排与段内同名列共用字典和位宽，
//! star 维度写成 dict_id 0。
//!
//! 旧格式（V1）：树单独存在 `star_tree.bin`，文档就是段本身的 `[0, total_docs)` 行，
//! 加载时把段列直接包装成维度列和 `SUM__metric` 列。

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use crate::common::{OlapError, Result};
use crate::io::{bitset, fixed_byte, DataBuffer, FixedBitSingleValueReader, FixedByteDoubleReader, MappedOutput, ReadMode};
use crate::query::aggregation::AggregationFunctionType;
use crate::segment::{
    DataSource, ForwardIndex, SegmentMetadata, StarTreeMetadata,
    LEGACY_STAR_TREE_FILE, STAR_TREE_INDEX_FILE, STAR_TREE_INDEX_MAP_FILE,
};
use super::builder::BuiltStarTree;
use super::function_pair::AggregationFunctionColumnPair;
use super::index_map::{StarTreeIndexMap, StarTreeIndexType};
use super::node::{STAR, STAR_IN_FORWARD_INDEX};
use super::tree::{serialize_tree, PackedStarTree};

// ── 写入 ──────────────────────────────────────────────────────────────────────

pub struct StarTreeIndexEntry<'a> {
    pub metadata:       &'a StarTreeMetadata,
    pub built:          &'a BuiltStarTree,
    /// 与拆分顺序一一对应，取段内同名列的位宽
    pub dimension_bits: &'a [u32],
}

pub fn write_star_tree_index(dir: &Path, trees: &[StarTreeIndexEntry<'_>]) -> Result<()> {
    let mut data: Vec<u8> = Vec::new();
    let mut map = StarTreeIndexMap::default();
    let mut push = |data: &mut Vec<u8>, id: usize, ty: StarTreeIndexType, column: Option<&str>, bytes: Vec<u8>| {
        map.add(id, ty, column, data.len() as u64, bytes.len() as u64);
        data.extend_from_slice(&bytes);
    };

    for (id, t) in trees.iter().enumerate() {
        let records = &t.built.records;
        let dims    = &t.metadata.dimensions_split_order;
        let tree    = serialize_tree(&t.built.root, dims, t.built.num_nodes)?;
        push(&mut data, id, StarTreeIndexType::StarTree, None, tree);

        for (d, name) in dims.iter().enumerate() {
            let bits = t.dimension_bits[d];
            let mut packed = vec![0u8; bitset::packed_size(records.len(), bits)];
            for (doc, r) in records.iter().enumerate() {
                let v = r.dimensions[d];
                let v = if v == STAR { STAR_IN_FORWARD_INDEX } else { v };
                bitset::write_int(&mut packed, doc, bits, v as u32);
            }
            push(&mut data, id, StarTreeIndexType::ForwardIndex, Some(name), packed);
        }

        for (p, pair) in t.metadata.function_column_pairs.iter().enumerate() {
            let values: Vec<f64> = records.iter().map(|r| r.metrics[p]).collect();
            push(&mut data, id, StarTreeIndexType::ForwardIndex, Some(pair), fixed_byte::encode_doubles(&values));
        }
    }

    let mut out = MappedOutput::create(&dir.join(STAR_TREE_INDEX_FILE), data.len())?;
    out.as_mut_slice().copy_from_slice(&data);
    out.flush()?;
    map.write_to(&dir.join(STAR_TREE_INDEX_MAP_FILE))
}

// ── 加载 ──────────────────────────────────────────────────────────────────────

/// 查询期的一棵星型树
#[derive(Debug)]
pub struct StarTree {
    metadata:     StarTreeMetadata,
    tree:         PackedStarTree,
    pairs:        Vec<AggregationFunctionColumnPair>,
    data_sources: HashMap<String, Arc<DataSource>>,
}

impl StarTree {
    pub fn metadata(&self) -> &StarTreeMetadata { &self.metadata }
    pub fn tree(&self) -> &PackedStarTree { &self.tree }
    pub fn num_docs(&self) -> usize { self.metadata.num_docs }
    pub fn dimension_names(&self) -> &[String] { &self.metadata.dimensions_split_order }
    pub fn function_column_pairs(&self) -> &[AggregationFunctionColumnPair] { &self.pairs }

    pub fn has_pair(&self, pair: &AggregationFunctionColumnPair) -> bool {
        self.pairs.contains(pair)
    }

    /// 维度名或 pair 列名（`SUM__price`）
    pub fn data_source(&self, column: &str) -> Result<&Arc<DataSource>> {
        self.data_sources.get(column)
            .ok_or_else(|| OlapError::ColumnNotFound(format!("{column} (star-tree)")))
    }
}

#[derive(Debug, Default)]
pub struct StarTreeIndexContainer {
    star_trees: Vec<Arc<StarTree>>,
}

impl StarTreeIndexContainer {
    pub fn star_trees(&self) -> &[Arc<StarTree>] { &self.star_trees }

    pub fn load(
        dir:      &Path,
        metadata: &SegmentMetadata,
        columns:  &HashMap<String, Arc<DataSource>>,
        mode:     ReadMode,
    ) -> Result<Self> {
        if let Some(trees) = &metadata.star_trees {
            let buffer = DataBuffer::open(&dir.join(STAR_TREE_INDEX_FILE), mode)?;
            let map    = StarTreeIndexMap::load(&dir.join(STAR_TREE_INDEX_MAP_FILE))?;
            let star_trees = trees.iter().enumerate()
                .map(|(id, m)| load_v2(id, m, &buffer, &map, metadata, columns).map(Arc::new))
                .collect::<Result<Vec<_>>>()?;
            info!(segment = %metadata.segment_name, count = star_trees.len(), "loaded star-trees");
            return Ok(Self { star_trees });
        }
        if let Some(legacy) = &metadata.legacy_star_tree {
            let buffer = DataBuffer::open(&dir.join(LEGACY_STAR_TREE_FILE), mode)?;
            let tree   = PackedStarTree::load(buffer)?;
            check_dimensions(&tree, &legacy.dimensions_split_order)?;

            let mut data_sources = HashMap::new();
            for name in &legacy.dimensions_split_order {
                data_sources.insert(name.clone(), segment_column(columns, name)?);
            }
            let mut pairs = Vec::new();
            for metric in metadata.schema.metric_names() {
                let pair = AggregationFunctionColumnPair::new(AggregationFunctionType::Sum, metric);
                data_sources.insert(pair.to_column_name(), segment_column(columns, metric)?);
                pairs.push(pair);
            }
            let star_tree = StarTree {
                metadata: StarTreeMetadata {
                    num_docs: metadata.total_docs,
                    dimensions_split_order: legacy.dimensions_split_order.clone(),
                    function_column_pairs: pairs.iter().map(|p| p.to_column_name()).collect(),
                    max_leaf_records: legacy.max_leaf_records,
                    skip_star_node_creation_for_dimensions: Vec::new(),
                },
                tree,
                pairs,
                data_sources,
            };
            info!(segment = %metadata.segment_name, "converted legacy star-tree");
            return Ok(Self { star_trees: vec![Arc::new(star_tree)] });
        }
        Ok(Self::default())
    }
}

fn segment_column(columns: &HashMap<String, Arc<DataSource>>, name: &str) -> Result<Arc<DataSource>> {
    columns.get(name).cloned()
        .ok_or_else(|| OlapError::corruption(format!("star-tree column {name} missing from segment")))
}

fn check_dimensions(tree: &PackedStarTree, expected: &[String]) -> Result<()> {
    if tree.dimension_names() != expected {
        return Err(OlapError::corruption(format!(
            "star-tree dimensions {:?} disagree with metadata {expected:?}", tree.dimension_names(),
        )));
    }
    Ok(())
}

fn load_v2(
    id:       usize,
    meta:     &StarTreeMetadata,
    buffer:   &DataBuffer,
    map:      &StarTreeIndexMap,
    segment:  &SegmentMetadata,
    columns:  &HashMap<String, Arc<DataSource>>,
) -> Result<StarTree> {
    let (offset, size) = map.lookup(id, StarTreeIndexType::StarTree, None)?;
    let tree = PackedStarTree::load(buffer.view(offset, size)?)?;
    check_dimensions(&tree, &meta.dimensions_split_order)?;

    let mut data_sources = HashMap::new();
    for name in &meta.dimensions_split_order {
        let column = segment.column(name)
            .ok_or_else(|| OlapError::corruption(format!("star-tree dimension {name} missing from metadata")))?;
        let (offset, size) = map.lookup(id, StarTreeIndexType::ForwardIndex, Some(name))?;
        let reader = FixedBitSingleValueReader::new(buffer.view(offset, size)?, meta.num_docs, column.bits_per_element)?;
        let source = segment_column(columns, name)?.with_forward(ForwardIndex::SingleValue(reader));
        data_sources.insert(name.clone(), Arc::new(source));
    }

    let mut pairs = Vec::new();
    for name in &meta.function_column_pairs {
        let pair = AggregationFunctionColumnPair::from_column_name(name)
            .map_err(|e| OlapError::corruption(format!("star-tree metadata: {e}")))?;
        let (offset, size) = map.lookup(id, StarTreeIndexType::ForwardIndex, Some(name))?;
        let reader = FixedByteDoubleReader::new(buffer.view(offset, size)?, meta.num_docs)?;
        data_sources.insert(name.clone(), Arc::new(DataSource::raw_double(name, reader)));
        pairs.push(pair);
    }

    Ok(StarTree { metadata: meta.clone(), tree, pairs, data_sources })
}
