//! 星型树构建
//!
//! 1. 记录按拆分顺序的维度排序，维度完全相同的记录合并
//! 2. 从根开始 `construct`：按下一维分组出非 star 孩子；该维不在 skip 列表且
//!    孩子多于一个时，拷贝区间、把该维置为 STAR、重新排序合并后追加为 star 孩子；
//!    区间超过 `max_leaf_records` 的孩子继续拆分
//! 3. 后序遍历生成聚合文档（追加在记录末尾）

use std::collections::{BTreeMap, HashSet};
use tracing::debug;
use crate::common::DictId;
use super::function_pair::AggregationFunctionColumnPair;
use super::node::{TreeNode, ALL, STAR};

/// 星型树文档：每个拆分维度一个 dict_id，每个 pair 一个聚合输入
#[derive(Debug, Clone, PartialEq)]
pub struct StarTreeRecord {
    pub dimensions: Vec<DictId>,
    pub metrics:    Vec<f64>,
}

#[derive(Debug)]
pub struct BuiltStarTree {
    pub root:      TreeNode,
    pub num_nodes: usize,
    /// 下标即星型树内的 doc id
    pub records:   Vec<StarTreeRecord>,
    /// 排序合并后的原始记录数（其后为 star 拷贝与聚合文档）
    pub num_raw_records: usize,
}

pub struct StarTreeBuilder {
    num_dimensions:   usize,
    max_leaf_records: usize,
    skip_star:        HashSet<usize>,
    pairs:            Vec<AggregationFunctionColumnPair>,
    records:          Vec<StarTreeRecord>,
    num_nodes:        usize,
}

impl StarTreeBuilder {
    /// `skip_star_dimensions` 为拆分顺序中的下标
    pub fn new(
        num_dimensions:       usize,
        pairs:                Vec<AggregationFunctionColumnPair>,
        max_leaf_records:     usize,
        skip_star_dimensions: &[usize],
    ) -> Self {
        Self {
            num_dimensions,
            max_leaf_records: max_leaf_records.max(1),
            skip_star: skip_star_dimensions.iter().copied().collect(),
            pairs,
            records: Vec::new(),
            num_nodes: 0,
        }
    }

    pub fn build(mut self, mut records: Vec<StarTreeRecord>) -> BuiltStarTree {
        self.sort_and_merge(&mut records);
        let num_raw_records = records.len();
        self.records = records;

        let mut root = TreeNode::root(num_raw_records);
        self.num_nodes = 1;
        self.construct(&mut root);
        self.create_aggregated_docs(&mut root);

        debug!(
            raw = num_raw_records, total = self.records.len(), nodes = self.num_nodes,
            "star-tree built",
        );
        BuiltStarTree { root, num_nodes: self.num_nodes, records: self.records, num_raw_records }
    }

    fn merge_into(&self, into: &mut [f64], from: &[f64]) {
        for ((a, b), pair) in into.iter_mut().zip(from).zip(&self.pairs) {
            *a = pair.merge(*a, *b);
        }
    }

    fn sort_and_merge(&self, records: &mut Vec<StarTreeRecord>) {
        records.sort_by(|a, b| a.dimensions.cmp(&b.dimensions));
        // dedup_by 传入 (后一个, 保留的前一个)
        records.dedup_by(|later, kept| {
            if later.dimensions == kept.dimensions {
                self.merge_into(&mut kept.metrics, &later.metrics);
                true
            } else {
                false
            }
        });
    }

    fn construct(&mut self, node: &mut TreeNode) {
        let child_dim = (node.dimension_id + 1) as usize;
        if child_dim == self.num_dimensions {
            return;
        }
        let (start, end) = (node.start_doc_id as usize, node.end_doc_id as usize);

        let mut children = BTreeMap::new();
        let mut i = start;
        while i < end {
            let value = self.records[i].dimensions[child_dim];
            let mut j = i + 1;
            while j < end && self.records[j].dimensions[child_dim] == value {
                j += 1;
            }
            children.insert(value, TreeNode::new(child_dim as i32, value, i, j));
            i = j;
        }
        if children.is_empty() {
            return;
        }
        self.num_nodes += children.len();

        if !self.skip_star.contains(&child_dim) && children.len() > 1 {
            let star = self.construct_star_node(start, end, child_dim);
            children.insert(ALL, star);
            self.num_nodes += 1;
        }

        for child in children.values_mut() {
            if child.num_docs() > self.max_leaf_records {
                self.construct(child);
            }
        }
        node.children = Some(children);
    }

    fn construct_star_node(&mut self, start: usize, end: usize, dim: usize) -> TreeNode {
        let mut copies: Vec<StarTreeRecord> = self.records[start..end].iter()
            .map(|r| {
                let mut r = r.clone();
                r.dimensions[dim] = STAR;
                r
            })
            .collect();
        self.sort_and_merge(&mut copies);
        let star_start = self.records.len();
        self.records.extend(copies);
        TreeNode::new(dim as i32, ALL, star_start, self.records.len())
    }

    fn star_deeper_dimensions(&self, record: &mut StarTreeRecord, dimension_id: i32) {
        for d in (dimension_id + 1) as usize..self.num_dimensions {
            record.dimensions[d] = STAR;
        }
    }

    fn append(&mut self, record: StarTreeRecord) -> i32 {
        self.records.push(record);
        (self.records.len() - 1) as i32
    }

    fn create_aggregated_docs(&mut self, node: &mut TreeNode) -> Option<StarTreeRecord> {
        let (start, end) = (node.start_doc_id as usize, node.end_doc_id as usize);
        let (aggregated, aggregated_doc_id) = match node.children.as_mut() {
            None if start == end => return None,
            None if end - start == 1 => (self.records[start].clone(), start as i32),
            None => {
                let mut agg = self.records[start].clone();
                for i in start + 1..end {
                    self.merge_into(&mut agg.metrics, &self.records[i].metrics);
                }
                self.star_deeper_dimensions(&mut agg, node.dimension_id);
                let id = self.append(agg.clone());
                (agg, id)
            }
            Some(children) if children.contains_key(&ALL) => {
                let mut star = None;
                for child in children.values_mut() {
                    let r = self.create_aggregated_docs(child);
                    if child.dimension_value == ALL {
                        star = r.map(|r| (r, child.aggregated_doc_id));
                    }
                }
                star?
            }
            Some(children) => {
                let mut agg: Option<StarTreeRecord> = None;
                for child in children.values_mut() {
                    if let Some(r) = self.create_aggregated_docs(child) {
                        match agg.as_mut() {
                            None    => agg = Some(r),
                            Some(a) => self.merge_into(&mut a.metrics, &r.metrics),
                        }
                    }
                }
                let mut agg = agg?;
                self.star_deeper_dimensions(&mut agg, node.dimension_id);
                let id = self.append(agg.clone());
                (agg, id)
            }
        };
        node.aggregated_doc_id = aggregated_doc_id;
        Some(aggregated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::INVALID_ID;

    fn rec(dims: &[i32], m: f64) -> StarTreeRecord {
        StarTreeRecord { dimensions: dims.to_vec(), metrics: vec![1.0, m] }
    }

    fn pairs() -> Vec<AggregationFunctionColumnPair> {
        vec![
            AggregationFunctionColumnPair::count_star(),
            AggregationFunctionColumnPair::from_column_name("SUM__m").unwrap(),
        ]
    }

    fn check_invariants(node: &TreeNode, records: &[StarTreeRecord]) {
        if let Some(children) = &node.children {
            let child_dim = node.dimension_id + 1;
            for (value, child) in children {
                assert_eq!(child.dimension_id, child_dim);
                assert_eq!(*value, child.dimension_value);
                if *value != ALL {
                    for r in &records[child.start_doc_id as usize..child.end_doc_id as usize] {
                        assert_eq!(r.dimensions[child_dim as usize], *value);
                    }
                }
                check_invariants(child, records);
            }
        }
        if node.end_doc_id > node.start_doc_id {
            assert_ne!(node.aggregated_doc_id, INVALID_ID);
        }
    }

    #[test]
    fn test_merge_duplicates() {
        let built = StarTreeBuilder::new(2, pairs(), 10, &[])
            .build(vec![rec(&[1, 0], 2.0), rec(&[0, 1], 5.0), rec(&[1, 0], 3.0)]);
        assert_eq!(built.num_raw_records, 2);
        assert_eq!(built.records[0], rec(&[0, 1], 5.0));
        assert_eq!(built.records[1], StarTreeRecord { dimensions: vec![1, 0], metrics: vec![2.0, 5.0] });
    }

    #[test]
    fn test_leaf_threshold_and_star_nodes() {
        // A ∈ {0,1}, B ∈ {0,1,2}
        let mut input = Vec::new();
        for a in 0..2 {
            for b in 0..3 {
                input.push(rec(&[a, b], (a * 10 + b) as f64));
            }
        }
        let built = StarTreeBuilder::new(2, pairs(), 1, &[]).build(input);
        assert_eq!(built.num_nodes, built.root.count_nodes());
        check_invariants(&built.root, &built.records);

        let root_children = built.root.children.as_ref().unwrap();
        assert_eq!(root_children.keys().copied().collect::<Vec<_>>(), vec![ALL, 0, 1]);
        // 根的聚合文档复用 star 孩子的
        assert_eq!(built.root.aggregated_doc_id, root_children[&ALL].aggregated_doc_id);
        let total = &built.records[built.root.aggregated_doc_id as usize];
        assert_eq!(total.metrics, vec![6.0, 36.0]);
        assert_eq!(total.dimensions, vec![STAR, STAR]);

        // A=1 下每个 B 值是单文档叶子，聚合文档就是原始文档
        let a1 = &root_children[&1];
        for (b, leaf) in a1.children.as_ref().unwrap() {
            if *b == ALL { continue; }
            assert!(leaf.is_leaf());
            assert_eq!(leaf.num_docs(), 1);
            assert_eq!(leaf.aggregated_doc_id, leaf.start_doc_id);
            assert_eq!(built.records[leaf.start_doc_id as usize].dimensions, vec![1, *b]);
        }
    }

    #[test]
    fn test_skip_star_and_single_child() {
        let input = vec![rec(&[0, 0], 1.0), rec(&[0, 1], 2.0), rec(&[1, 0], 4.0)];
        let built = StarTreeBuilder::new(2, pairs(), 1, &[0]).build(input);
        let root_children = built.root.children.as_ref().unwrap();
        assert!(!root_children.contains_key(&ALL));
        // A=1 只有一个 B 值：不建 star 孩子
        assert!(!root_children[&1].children.as_ref().map_or(false, |c| c.contains_key(&ALL)));
        // 没有 star 孩子的根自己合并出聚合文档
        let total = &built.records[built.root.aggregated_doc_id as usize];
        assert_eq!(total.metrics, vec![3.0, 7.0]);
        check_invariants(&built.root, &built.records);
    }

    #[test]
    fn test_multi_doc_leaf_aggregates_deeper_dims() {
        let input = vec![rec(&[0, 0], 1.0), rec(&[0, 1], 2.0), rec(&[1, 1], 4.0)];
        let built = StarTreeBuilder::new(2, pairs(), 10, &[]).build(input);
        let a0 = &built.root.children.as_ref().unwrap()[&0];
        assert!(a0.is_leaf());
        let agg = &built.records[a0.aggregated_doc_id as usize];
        assert_eq!(agg.dimensions, vec![0, STAR]);
        assert_eq!(agg.metrics, vec![2.0, 3.0]);
    }

    #[test]
    fn test_empty_input() {
        let built = StarTreeBuilder::new(2, pairs(), 10, &[]).build(Vec::new());
        assert!(built.root.is_leaf());
        assert_eq!(built.root.aggregated_doc_id, INVALID_ID);
        assert_eq!(built.num_nodes, 1);
    }
}
