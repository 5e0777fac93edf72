//! 段元数据（`metadata.json`）与校验文件（`creation.meta`）
//!
//! `creation.meta`：
//! ```text
//! crc32 of index files (u64 LE) │ creation time millis (i64 LE)
//! ```
//! CRC 覆盖段目录下除 `creation.meta` 外的全部文件，按文件名排序依次喂入。

use std::io::Read;
use std::path::Path;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use crate::common::{OlapError, Result, SegmentVersion};
use crate::field_type::{DataType, FieldType, Schema};
use super::{CREATION_META_FILE, METADATA_FILE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetadata {
    pub name:           String,
    pub data_type:      DataType,
    pub field_type:     FieldType,
    pub single_value:   bool,
    pub cardinality:    usize,
    pub bits_per_element: u32,
    /// 单值列等于 total_docs；多值列为全部值个数
    pub total_number_of_entries:    usize,
    pub max_number_of_multi_values: usize,
    pub has_dictionary: bool,
}

/// 星型树（V2）元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StarTreeMetadata {
    pub num_docs:               usize,
    pub dimensions_split_order: Vec<String>,
    pub function_column_pairs:  Vec<String>,
    pub max_leaf_records:       usize,
    #[serde(default)]
    pub skip_star_node_creation_for_dimensions: Vec<String>,
}

/// 旧格式星型树：聚合文档直接是段里 `[num_docs, total_docs)` 的行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyStarTreeMetadata {
    pub dimensions_split_order: Vec<String>,
    pub max_leaf_records:       usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentMetadata {
    pub segment_name: String,
    pub table_name:   String,
    pub version:      SegmentVersion,
    /// 可查询的原始行数
    pub num_docs:     usize,
    /// 列文件中的总行数；旧格式星型树段大于 num_docs
    pub total_docs:   usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_column:  Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time:   Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time:     Option<i64>,
    pub creation_time_ms: i64,
    pub schema:       Schema,
    pub columns:      Vec<ColumnMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub star_trees:   Option<Vec<StarTreeMetadata>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_star_tree: Option<LegacyStarTreeMetadata>,
}

impl SegmentMetadata {
    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn write(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| OlapError::Internal(format!("serialize segment metadata: {e}")))?;
        std::fs::write(dir.join(METADATA_FILE), json)?;
        Ok(())
    }

    /// 元数据缺失或无法解析都视为段损坏
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(METADATA_FILE);
        let bytes = std::fs::read(&path).map_err(|e| {
            OlapError::corruption(format!("cannot read {}: {e}", path.display()))
        })?;
        let meta: Self = serde_json::from_slice(&bytes)
            .map_err(|e| OlapError::corruption(format!("invalid segment metadata: {e}")))?;
        if meta.num_docs > meta.total_docs {
            return Err(OlapError::corruption(format!(
                "numDocs {} exceeds totalDocs {}", meta.num_docs, meta.total_docs,
            )));
        }
        Ok(meta)
    }
}

// ── creation.meta ─────────────────────────────────────────────────────────────

/// 段目录下除 `creation.meta` 外全部文件的 CRC32
pub fn compute_crc(dir: &Path) -> Result<u64> {
    let mut names: Vec<String> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|n| n != CREATION_META_FILE)
        .collect();
    names.sort();

    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    for name in names {
        let mut f = std::fs::File::open(dir.join(&name))?;
        loop {
            let n = f.read(&mut buf)?;
            if n == 0 { break; }
            hasher.update(&buf[..n]);
        }
    }
    Ok(hasher.finalize() as u64)
}

pub fn write_creation_meta(dir: &Path, crc: u64, creation_time_ms: i64) -> Result<()> {
    let mut out = Vec::with_capacity(16);
    out.write_u64::<LittleEndian>(crc)?;
    out.write_i64::<LittleEndian>(creation_time_ms)?;
    std::fs::write(dir.join(CREATION_META_FILE), out)?;
    Ok(())
}

/// 返回 (crc, creation_time_ms)
pub fn read_creation_meta(dir: &Path) -> Result<(u64, i64)> {
    let bytes = std::fs::read(dir.join(CREATION_META_FILE))?;
    if bytes.len() != 16 {
        return Err(OlapError::corruption(format!("creation.meta has {} bytes", bytes.len())));
    }
    let mut cur = &bytes[..];
    Ok((cur.read_u64::<LittleEndian>()?, cur.read_i64::<LittleEndian>()?))
}

/// 比对 creation.meta 中记录的 CRC 与目录实际内容
pub fn verify_crc(dir: &Path) -> Result<u64> {
    let (expected, _) = read_creation_meta(dir)?;
    let actual = compute_crc(dir)?;
    if expected != actual {
        return Err(OlapError::ChecksumMismatch(format!(
            "{}: recorded {expected:#010x}, computed {actual:#010x}", dir.display(),
        )));
    }
    Ok(actual)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_detects_change() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.dict"), b"abc").unwrap();
        std::fs::write(dir.path().join("b.fwd"), b"123").unwrap();
        let crc = compute_crc(dir.path()).unwrap();
        write_creation_meta(dir.path(), crc, 1234).unwrap();
        assert_eq!(read_creation_meta(dir.path()).unwrap(), (crc, 1234));
        assert_eq!(verify_crc(dir.path()).unwrap(), crc);

        std::fs::write(dir.path().join("b.fwd"), b"124").unwrap();
        let err = verify_crc(dir.path()).unwrap_err();
        assert!(matches!(err, OlapError::ChecksumMismatch(_)));
        assert!(err.is_corruption());
    }

    #[test]
    fn test_missing_metadata_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SegmentMetadata::load(dir.path()).unwrap_err().is_corruption());
        std::fs::write(dir.path().join(METADATA_FILE), b"{not json").unwrap();
        assert!(SegmentMetadata::load(dir.path()).unwrap_err().is_corruption());
    }
}
