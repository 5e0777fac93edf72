//! 星型树二进制格式
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ magic marker     i64  0xBADDA55B00DAD00D      │
//! │ version          i32  1                       │
//! │ header size      i32                          │
//! │ num dimensions   i32                          │
//! │ × num dimensions:                             │
//! │    index i32 │ name len i32 │ name utf8       │
//! │ num nodes        i32                          │
//! ├──────────────────────────────────────────────┤
//! │ node × num nodes（BFS 顺序，每个 28 字节）     │
//! │   dimension_id │ dimension_value              │
//! │   start_doc_id │ end_doc_id                   │
//! │   aggregated_doc_id                           │
//! │   first_child_id │ last_child_id  (叶子为 -1) │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! 永远小端。孩子按 dimension_value 升序入队，因此同一父节点的孩子 id 连续，
//! 查找某个值的孩子只需在 `[first, last]` 上二分。

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use byteorder::{LittleEndian, WriteBytesExt};
use crate::common::{OlapError, Result, INVALID_ID};
use crate::io::{DataBuffer, MappedOutput};
use super::node::{TreeNode, MAGIC_MARKER, NODE_SIZE, VERSION};

// ── 序列化 ────────────────────────────────────────────────────────────────────

fn header_size(dimensions: &[String]) -> usize {
    // magic + version + header size + num dimensions
    let mut size = 20;
    for d in dimensions {
        size += 8 + d.len();
    }
    size + 4
}

pub fn serialized_size(dimensions: &[String], num_nodes: usize) -> usize {
    header_size(dimensions) + num_nodes * NODE_SIZE
}

/// 序列化整棵树
pub fn serialize_tree(root: &TreeNode, dimensions: &[String], num_nodes: usize) -> Result<Vec<u8>> {
    let header = header_size(dimensions);
    let mut out = Vec::with_capacity(serialized_size(dimensions, num_nodes));
    out.write_i64::<LittleEndian>(MAGIC_MARKER)?;
    out.write_i32::<LittleEndian>(VERSION)?;
    out.write_i32::<LittleEndian>(header as i32)?;
    out.write_i32::<LittleEndian>(dimensions.len() as i32)?;
    for (i, d) in dimensions.iter().enumerate() {
        out.write_i32::<LittleEndian>(i as i32)?;
        out.write_i32::<LittleEndian>(d.len() as i32)?;
        out.extend_from_slice(d.as_bytes());
    }
    out.write_i32::<LittleEndian>(num_nodes as i32)?;

    let mut queue: VecDeque<&TreeNode> = VecDeque::new();
    queue.push_back(root);
    let mut current_node_id = 0usize;
    while let Some(node) = queue.pop_front() {
        let (first, last) = match &node.children {
            Some(children) if !children.is_empty() => {
                let first = current_node_id + queue.len() + 1;
                let last  = first + children.len() - 1;
                queue.extend(children.values());
                (first as i32, last as i32)
            }
            _ => (INVALID_ID, INVALID_ID),
        };
        for v in [
            node.dimension_id, node.dimension_value, node.start_doc_id,
            node.end_doc_id, node.aggregated_doc_id, first, last,
        ] {
            out.write_i32::<LittleEndian>(v)?;
        }
        current_node_id += 1;
    }

    if current_node_id != num_nodes {
        return Err(OlapError::Internal(format!(
            "star-tree has {current_node_id} nodes but {num_nodes} were declared",
        )));
    }
    Ok(out)
}

/// 写入独立文件（旧格式 `star_tree.bin`）
pub fn write_tree_file(path: &Path, root: &TreeNode, dimensions: &[String], num_nodes: usize) -> Result<()> {
    let bytes = serialize_tree(root, dimensions, num_nodes)?;
    let mut out = MappedOutput::create(path, bytes.len())?;
    out.as_mut_slice().copy_from_slice(&bytes);
    out.flush()
}

// ── 只读加载 ──────────────────────────────────────────────────────────────────

/// 直接在（映射的）字节上遍历的星型树
#[derive(Debug, Clone)]
pub struct PackedStarTree {
    buffer:          DataBuffer,
    dimension_names: Vec<String>,
    num_nodes:       usize,
    nodes_offset:    usize,
}

impl PackedStarTree {
    pub fn load(buffer: DataBuffer) -> Result<Self> {
        if buffer.len() < 24 {
            return Err(OlapError::corruption(format!("star-tree too short: {} bytes", buffer.len())));
        }
        let magic = buffer.get_i64(0);
        if magic != MAGIC_MARKER {
            return Err(OlapError::corruption(format!("bad star-tree magic marker {magic:#x}")));
        }
        let version = buffer.get_i32(8);
        if version != VERSION {
            return Err(OlapError::corruption(format!("unsupported star-tree version {version}")));
        }
        let header = buffer.get_i32(12);
        if header < 24 || header as usize > buffer.len() {
            return Err(OlapError::corruption(format!("invalid star-tree header size {header}")));
        }
        let header = header as usize;
        let num_dimensions = buffer.get_i32(16);
        if num_dimensions < 0 {
            return Err(OlapError::corruption("negative star-tree dimension count"));
        }

        let bytes = buffer.as_slice();
        let mut names = vec![String::new(); num_dimensions as usize];
        let mut pos = 20usize;
        for _ in 0..num_dimensions {
            if pos + 8 > header {
                return Err(OlapError::corruption("truncated star-tree header"));
            }
            let index = buffer.get_i32(pos);
            let len   = buffer.get_i32(pos + 4);
            pos += 8;
            if index < 0 || index >= num_dimensions || len < 0 || pos + len as usize > header {
                return Err(OlapError::corruption("invalid star-tree dimension entry"));
            }
            let name = std::str::from_utf8(&bytes[pos..pos + len as usize])
                .map_err(|_| OlapError::corruption("star-tree dimension name is not UTF-8"))?;
            names[index as usize] = name.to_string();
            pos += len as usize;
        }
        if pos + 4 != header {
            return Err(OlapError::corruption(format!(
                "star-tree header size {header} disagrees with parsed header {}", pos + 4,
            )));
        }
        let num_nodes = buffer.get_i32(pos);
        if num_nodes <= 0 {
            return Err(OlapError::corruption(format!("invalid star-tree node count {num_nodes}")));
        }
        let num_nodes = num_nodes as usize;
        if header + num_nodes * NODE_SIZE > buffer.len() {
            return Err(OlapError::corruption(format!(
                "truncated star-tree: {num_nodes} nodes need {} bytes, got {}",
                header + num_nodes * NODE_SIZE, buffer.len(),
            )));
        }

        let tree = Self { buffer, dimension_names: names, num_nodes, nodes_offset: header };
        tree.validate_children()?;
        Ok(tree)
    }

    fn validate_children(&self) -> Result<()> {
        for id in 0..self.num_nodes {
            let node = self.node(id);
            if node.is_leaf() {
                continue;
            }
            let (first, last) = (node.field(5), node.field(6));
            if first <= id as i32 || last < first || last as usize >= self.num_nodes {
                return Err(OlapError::corruption(format!(
                    "star-tree node {id} has invalid child range [{first}, {last}]",
                )));
            }
        }
        Ok(())
    }

    pub fn dimension_names(&self) -> &[String] { &self.dimension_names }
    pub fn num_nodes(&self) -> usize { self.num_nodes }

    pub fn root(&self) -> StarTreeNodeRef<'_> { self.node(0) }

    pub fn node(&self, id: usize) -> StarTreeNodeRef<'_> {
        StarTreeNodeRef { tree: self, id }
    }

    /// 还原成构建期结构（重新序列化、调试用）
    pub fn to_tree_node(&self) -> TreeNode {
        self.root().to_tree_node()
    }
}

/// 指向某个落盘节点的轻量句柄
#[derive(Clone, Copy)]
pub struct StarTreeNodeRef<'a> {
    tree: &'a PackedStarTree,
    id:   usize,
}

impl<'a> StarTreeNodeRef<'a> {
    #[inline]
    fn field(&self, index: usize) -> i32 {
        self.tree.buffer.get_i32(self.tree.nodes_offset + self.id * NODE_SIZE + index * 4)
    }

    pub fn id(&self) -> usize { self.id }
    pub fn dimension_id(&self)      -> i32 { self.field(0) }
    pub fn dimension_value(&self)   -> i32 { self.field(1) }
    pub fn start_doc_id(&self)      -> i32 { self.field(2) }
    pub fn end_doc_id(&self)        -> i32 { self.field(3) }
    pub fn aggregated_doc_id(&self) -> i32 { self.field(4) }
    pub fn is_leaf(&self) -> bool { self.field(5) == INVALID_ID }

    pub fn num_children(&self) -> usize {
        if self.is_leaf() { 0 } else { (self.field(6) - self.field(5) + 1) as usize }
    }

    /// 向下拆分的维度；叶子为 INVALID
    pub fn child_dimension_id(&self) -> i32 {
        if self.is_leaf() { INVALID_ID } else { self.tree.node(self.field(5) as usize).dimension_id() }
    }

    pub fn children(&self) -> impl Iterator<Item = StarTreeNodeRef<'a>> + 'a {
        let tree = self.tree;
        let range = if self.is_leaf() { 0..0 } else { self.field(5) as usize..self.field(6) as usize + 1 };
        range.map(move |id| tree.node(id))
    }

    pub fn child_for_dimension_value(&self, value: i32) -> Option<StarTreeNodeRef<'a>> {
        if self.is_leaf() {
            return None;
        }
        let (mut lo, mut hi) = (self.field(5) as usize, self.field(6) as usize + 1);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let v = self.tree.node(mid).dimension_value();
            match v.cmp(&value) {
                std::cmp::Ordering::Equal   => return Some(self.tree.node(mid)),
                std::cmp::Ordering::Less    => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        None
    }

    fn to_tree_node(&self) -> TreeNode {
        let children = (!self.is_leaf()).then(|| {
            self.children()
                .map(|c| (c.dimension_value(), c.to_tree_node()))
                .collect::<BTreeMap<_, _>>()
        });
        TreeNode {
            dimension_id:      self.dimension_id(),
            dimension_value:   self.dimension_value(),
            start_doc_id:      self.start_doc_id(),
            end_doc_id:        self.end_doc_id(),
            aggregated_doc_id: self.aggregated_doc_id(),
            children,
        }
    }
}

impl std::fmt::Debug for StarTreeNodeRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StarTreeNode")
            .field("id", &self.id)
            .field("dimension_id", &self.dimension_id())
            .field("dimension_value", &self.dimension_value())
            .field("docs", &(self.start_doc_id()..self.end_doc_id()))
            .field("aggregated_doc_id", &self.aggregated_doc_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::startree::node::ALL;

    /// root ─┬─ * (2 docs)
    ///       ├─ 0 ─┬─ 0
    ///       │     └─ 1
    ///       └─ 1
    fn sample_tree() -> (TreeNode, Vec<String>) {
        let mut a0 = TreeNode::new(0, 0, 0, 2);
        let mut grand = BTreeMap::new();
        grand.insert(1, TreeNode::new(1, 1, 1, 2));
        grand.insert(0, TreeNode::new(1, 0, 0, 1));
        a0.children = Some(grand);
        let mut children = BTreeMap::new();
        children.insert(0, a0);
        children.insert(1, TreeNode::new(0, 1, 2, 3));
        children.insert(ALL, TreeNode::new(0, ALL, 3, 5));
        let mut root = TreeNode::root(3);
        root.children = Some(children);
        (root, vec!["a".to_string(), "b".to_string()])
    }

    #[test]
    fn test_bfs_layout() {
        let (root, dims) = sample_tree();
        let bytes = serialize_tree(&root, &dims, 6).unwrap();
        assert_eq!(bytes.len(), serialized_size(&dims, 6));
        let tree = PackedStarTree::load(DataBuffer::from_vec(bytes)).unwrap();
        assert_eq!(tree.dimension_names(), &dims[..]);

        let r = tree.root();
        assert_eq!(r.dimension_id(), INVALID_ID);
        assert_eq!(r.num_children(), 3);
        assert_eq!(r.child_dimension_id(), 0);
        let values: Vec<i32> = r.children().map(|c| c.dimension_value()).collect();
        assert_eq!(values, vec![ALL, 0, 1]);
        // 孙子节点排在第二层全部节点之后
        let a0 = r.child_for_dimension_value(0).unwrap();
        assert_eq!(a0.id(), 2);
        assert_eq!(a0.children().map(|c| c.id()).collect::<Vec<_>>(), vec![4, 5]);
        assert!(r.child_for_dimension_value(7).is_none());
        assert!(tree.node(3).is_leaf());
        assert!(tree.node(3).child_for_dimension_value(0).is_none());
    }

    #[test]
    fn test_reserialize_is_identical() {
        let (root, dims) = sample_tree();
        let bytes = serialize_tree(&root, &dims, 6).unwrap();
        let tree  = PackedStarTree::load(DataBuffer::from_vec(bytes.clone())).unwrap();
        let again = serialize_tree(&tree.to_tree_node(), tree.dimension_names(), tree.num_nodes()).unwrap();
        assert_eq!(bytes, again);
    }

    #[test]
    fn test_node_count_mismatch() {
        let (root, dims) = sample_tree();
        assert!(serialize_tree(&root, &dims, 5).is_err());
    }

    #[test]
    fn test_corruption_detected() {
        let (root, dims) = sample_tree();
        let bytes = serialize_tree(&root, &dims, 6).unwrap();

        let mut bad_magic = bytes.clone();
        bad_magic[0] ^= 0xff;
        assert!(PackedStarTree::load(DataBuffer::from_vec(bad_magic)).unwrap_err().is_corruption());

        let mut bad_version = bytes.clone();
        bad_version[8] = 9;
        assert!(PackedStarTree::load(DataBuffer::from_vec(bad_version)).unwrap_err().is_corruption());

        let mut bad_header = bytes.clone();
        bad_header[12] += 1;
        assert!(PackedStarTree::load(DataBuffer::from_vec(bad_header)).unwrap_err().is_corruption());

        let truncated = bytes[..bytes.len() - 3].to_vec();
        assert!(PackedStarTree::load(DataBuffer::from_vec(truncated)).unwrap_err().is_corruption());
    }
}
