//! 星型树过滤：把维度谓词与 group-by 列映射到星型树文档集合
//!
//! BFS 下降，每下一层就把该层维度从剩余谓词列、剩余 group-by 列中去掉：
//! - 两者都已为空：取节点的聚合文档
//! - 叶子：取原始区间 `[start, end)`，再用叶子上剩余的谓词逐行过滤
//! - 非叶子：子维度有谓词则走匹配的孩子；子维度既无谓词、也不被 group-by、
//!   也不在任何已到达叶子的剩余谓词里时走 star 孩子；否则走全部非 star 孩子
//!
//! 一个节点要么贡献聚合文档，要么贡献原始区间，不会两者都有。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use roaring::RoaringBitmap;
use tracing::trace;
use crate::common::{DictId, DocId, Result};
use super::node::ALL;
use super::store::StarTree;
use super::tree::StarTreeNodeRef;

struct SearchEntry<'a> {
    node:                 StarTreeNodeRef<'a>,
    remaining_predicates: HashSet<&'a str>,
    remaining_group_by:   HashSet<&'a str>,
}

pub struct StarTreeFilterOperator {
    star_tree:         Arc<StarTree>,
    /// 维度 → 升序、去重的匹配 dict_id
    matching_dict_ids: HashMap<String, Vec<DictId>>,
    group_by_columns:  HashSet<String>,
}

impl StarTreeFilterOperator {
    pub fn new(
        star_tree:         Arc<StarTree>,
        matching_dict_ids: HashMap<String, Vec<DictId>>,
        group_by_columns:  HashSet<String>,
    ) -> Self {
        Self { star_tree, matching_dict_ids, group_by_columns }
    }

    pub fn star_tree(&self) -> &Arc<StarTree> { &self.star_tree }

    /// 匹配的星型树文档
    pub fn get_bitmap(&self) -> Result<RoaringBitmap> {
        let mut result = RoaringBitmap::new();
        // 任何谓词都没有匹配值时结果为空
        if self.matching_dict_ids.values().any(Vec::is_empty) {
            return Ok(result);
        }

        let tree  = self.star_tree.tree();
        let names = tree.dimension_names();
        let mut global_remaining: HashSet<&str> = HashSet::new();
        let mut leaves: Vec<(StarTreeNodeRef<'_>, HashSet<&str>)> = Vec::new();

        let mut queue = VecDeque::new();
        queue.push_back(SearchEntry {
            node:                 tree.root(),
            remaining_predicates: self.matching_dict_ids.keys().map(String::as_str).collect(),
            remaining_group_by:   self.group_by_columns.iter().map(String::as_str).collect(),
        });

        while let Some(entry) = queue.pop_front() {
            let node = entry.node;
            if entry.remaining_predicates.is_empty() && entry.remaining_group_by.is_empty() {
                if node.aggregated_doc_id() >= 0 {
                    result.insert(node.aggregated_doc_id() as u32);
                }
                continue;
            }
            if node.is_leaf() {
                global_remaining.extend(entry.remaining_predicates.iter().copied());
                leaves.push((node, entry.remaining_predicates));
                continue;
            }

            let child_dim = names[node.child_dimension_id() as usize].as_str();
            let mut remaining_predicates = entry.remaining_predicates.clone();
            let mut remaining_group_by   = entry.remaining_group_by.clone();
            remaining_predicates.remove(child_dim);
            remaining_group_by.remove(child_dim);
            let mut push = |child| {
                queue.push_back(SearchEntry {
                    node: child,
                    remaining_predicates: remaining_predicates.clone(),
                    remaining_group_by: remaining_group_by.clone(),
                });
            };

            if let Some(ids) = entry.remaining_predicates.contains(child_dim)
                .then(|| self.matching_dict_ids.get(child_dim))
                .flatten()
            {
                for id in ids {
                    if let Some(child) = node.child_for_dimension_value(*id) {
                        push(child);
                    }
                }
                continue;
            }

            let star = (!global_remaining.contains(child_dim) && !self.group_by_columns.contains(child_dim))
                .then(|| node.child_for_dimension_value(ALL))
                .flatten();
            match star {
                Some(star) => push(star),
                None => node.children()
                    .filter(|c| c.dimension_value() != ALL)
                    .for_each(push),
            }
        }

        for (leaf, remaining) in leaves {
            self.add_leaf_range(&mut result, leaf, &remaining)?;
        }
        trace!(docs = result.len(), "star-tree filter");
        Ok(result)
    }

    fn add_leaf_range(
        &self,
        result:    &mut RoaringBitmap,
        leaf:      StarTreeNodeRef<'_>,
        remaining: &HashSet<&str>,
    ) -> Result<()> {
        let (start, end) = (leaf.start_doc_id() as u32, leaf.end_doc_id() as u32);
        if remaining.is_empty() {
            result.insert_range(start..end);
            return Ok(());
        }
        let mut checks = Vec::with_capacity(remaining.len());
        for column in remaining {
            let source = self.star_tree.data_source(column)?;
            checks.push((source, &self.matching_dict_ids[*column]));
        }
        for doc in start..end {
            let matched = checks.iter().all(|(source, ids)| {
                source.dict_id(doc as DocId).map_or(false, |id| ids.binary_search(&id).is_ok())
            });
            if matched {
                result.insert(doc);
            }
        }
        Ok(())
    }
}
