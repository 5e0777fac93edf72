//! `star_tree_index_map`：描述 `star_tree_index` 内每个索引的字节区间

use std::path::Path;
use serde::{Deserialize, Serialize};
use crate::common::{OlapError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StarTreeIndexType {
    StarTree,
    ForwardIndex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMapEntry {
    pub star_tree_id: usize,
    pub index_type:   StarTreeIndexType,
    /// 维度名或 pair 列名；树本身为 None
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column:       Option<String>,
    pub offset:       u64,
    pub size:         u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StarTreeIndexMap {
    pub entries: Vec<IndexMapEntry>,
}

impl StarTreeIndexMap {
    pub fn add(&mut self, star_tree_id: usize, index_type: StarTreeIndexType, column: Option<&str>, offset: u64, size: u64) {
        self.entries.push(IndexMapEntry {
            star_tree_id, index_type, column: column.map(str::to_string), offset, size,
        });
    }

    /// 返回 (offset, size)；缺项视为损坏
    pub fn lookup(&self, star_tree_id: usize, index_type: StarTreeIndexType, column: Option<&str>) -> Result<(usize, usize)> {
        self.entries.iter()
            .find(|e| e.star_tree_id == star_tree_id && e.index_type == index_type && e.column.as_deref() == column)
            .map(|e| (e.offset as usize, e.size as usize))
            .ok_or_else(|| OlapError::corruption(format!(
                "star-tree index map has no {index_type:?} entry for tree {star_tree_id} column {column:?}",
            )))
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| OlapError::Internal(format!("serialize star-tree index map: {e}")))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| OlapError::corruption(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| OlapError::corruption(format!("invalid star-tree index map: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let mut map = StarTreeIndexMap::default();
        map.add(0, StarTreeIndexType::StarTree, None, 0, 100);
        map.add(0, StarTreeIndexType::ForwardIndex, Some("country"), 100, 8);
        map.add(1, StarTreeIndexType::ForwardIndex, Some("country"), 300, 4);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("star_tree_index_map");
        map.write_to(&path).unwrap();
        let loaded = StarTreeIndexMap::load(&path).unwrap();
        assert_eq!(loaded.lookup(0, StarTreeIndexType::StarTree, None).unwrap(), (0, 100));
        assert_eq!(loaded.lookup(1, StarTreeIndexType::ForwardIndex, Some("country")).unwrap(), (300, 4));
        assert!(loaded.lookup(1, StarTreeIndexType::StarTree, None).unwrap_err().is_corruption());
    }
}
