//! 星型树构建期节点

use std::collections::BTreeMap;
use crate::common::INVALID_ID;

/// 文件类型标识
pub const MAGIC_MARKER: i64 = 0xBADD_A55B_00DA_D00Du64 as i64;
pub const VERSION: i32 = 1;
/// 单个节点落盘大小：7 个 i32
pub const NODE_SIZE: usize = 28;
/// star 边的维度值；比任何 dict_id 都小，因此总是排在第一个孩子
pub const ALL: i32 = -1;
/// 构建期记录中被 star 掉的维度
pub const STAR: i32 = ALL;
/// star 维度写进星型树正排索引时的 dict_id
pub const STAR_IN_FORWARD_INDEX: i32 = 0;

/// `dimension_id` 是进入该节点那条边的维度（根节点为 INVALID），
/// 节点向下拆分的维度是 `dimension_id + 1`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub dimension_id:      i32,
    pub dimension_value:   i32,
    pub start_doc_id:      i32,
    pub end_doc_id:        i32,
    pub aggregated_doc_id: i32,
    /// None 表示叶子；key 为 dimension_value，天然升序
    pub children:          Option<BTreeMap<i32, TreeNode>>,
}

impl TreeNode {
    pub fn new(dimension_id: i32, dimension_value: i32, start_doc_id: usize, end_doc_id: usize) -> Self {
        Self {
            dimension_id,
            dimension_value,
            start_doc_id: start_doc_id as i32,
            end_doc_id: end_doc_id as i32,
            aggregated_doc_id: INVALID_ID,
            children: None,
        }
    }

    pub fn root(num_docs: usize) -> Self {
        Self::new(INVALID_ID, INVALID_ID, 0, num_docs)
    }

    pub fn is_leaf(&self) -> bool { self.children.is_none() }

    pub fn num_docs(&self) -> usize { (self.end_doc_id - self.start_doc_id) as usize }

    /// 子树节点数（含自身）
    pub fn count_nodes(&self) -> usize {
        1 + self.children.as_ref()
            .map(|c| c.values().map(TreeNode::count_nodes).sum())
            .unwrap_or(0)
    }
}
