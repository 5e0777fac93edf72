//! Segment：不可变列式存储单元
//!
//! 目录布局：
//! ```text
//! <segment>/
//!   metadata.json            段与列元数据、星型树元数据
//!   creation.meta            CRC + 创建时间
//!   <col>.dict               有序字典
//!   <col>.sv.unsorted.fwd    单值正排（无头部）
//!   <col>.mv.fwd             多值正排
//!   star_tree_index          V2 星型树（全部树与其列）
//!   star_tree_index_map      V2 星型树字节区间（JSON）
//!   star_tree.bin            V1 旧格式星型树
//! ```

pub mod metadata;
pub mod datasource;
pub mod creator;
pub mod immutable;
pub mod mutable;

use std::sync::Arc;
use crate::common::Result;
use crate::startree::StarTree;

pub use creator::SegmentCreator;
pub use datasource::{DataSource, ForwardIndex};
pub use immutable::{ImmutableSegment, ImmutableSegmentLoader};
pub use metadata::{ColumnMetadata, LegacyStarTreeMetadata, SegmentMetadata, StarTreeMetadata};
pub use mutable::{MutableSegment, RealtimeSegmentRecordReader};

pub const METADATA_FILE: &str        = "metadata.json";
pub const CREATION_META_FILE: &str   = "creation.meta";
pub const DICTIONARY_SUFFIX: &str    = ".dict";
pub const SV_FORWARD_SUFFIX: &str    = ".sv.unsorted.fwd";
pub const MV_FORWARD_SUFFIX: &str    = ".mv.fwd";
pub const STAR_TREE_INDEX_FILE: &str = "star_tree_index";
pub const STAR_TREE_INDEX_MAP_FILE: &str = "star_tree_index_map";
pub const LEGACY_STAR_TREE_FILE: &str    = "star_tree.bin";

pub fn dictionary_file(column: &str) -> String { format!("{column}{DICTIONARY_SUFFIX}") }

pub fn forward_index_file(column: &str, single_value: bool) -> String {
    if single_value {
        format!("{column}{SV_FORWARD_SUFFIX}")
    } else {
        format!("{column}{MV_FORWARD_SUFFIX}")
    }
}

/// 查询侧看到的段
pub trait IndexSegment: Send + Sync {
    fn segment_name(&self) -> &str;
    /// 可查询的行数
    fn num_docs(&self) -> usize;
    /// 按 schema 顺序
    fn column_names(&self) -> Vec<String>;
    /// 列不存在返回 `ColumnNotFound`
    fn data_source(&self, column: &str) -> Result<Arc<DataSource>>;
    fn star_trees(&self) -> &[Arc<StarTree>] { &[] }
}
