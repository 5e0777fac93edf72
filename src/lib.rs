//! # olap-segment-engine
//!
//! OLAP 段存储与查询执行核心：
//! - **段存储**：字典编码 + 定宽位打包正排（单值 / 多值），只读段支持 heap 与 mmap
//! - **星型树**：按切分维度预聚合，支持 V2 存储与旧版 V1 段
//! - **实时段**：边写边读的可变段，可按列排序后导出生成不可变段
//! - **查询**：Filter → DocIdSet → Projection → 聚合 / group-by / selection
//!   → 跨段合并 → 实例响应
//!
//! ## 整体架构
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        QueryExecutor                          │
//! │   QueryQuota ──▶ InstancePlanMaker ──▶ CombinePlanNode        │
//! │                                         │  QueryExecutorService│
//! │                          ┌──────────────┴───────────┐  (线程池) │
//! │                    SegmentPlanNode × N        星型树计划        │
//! └──────────────────────────┬───────────────────────────────────┘
//!                            │ IndexSegment
//!         ┌──────────────────┼────────────────────┐
//!  ImmutableSegment    MutableSegment       StarTree (容器)
//!   │ metadata.json      │ MutableDictionary   │ star_tree_index(+_map)
//!   │ creation.meta(CRC) │ 多列定长读写器       │ star_tree.bin (V1)
//!   │ <col>.dict         │                     │
//!   │ <col>.sv.unsorted.fwd / <col>.mv.fwd      │
//!   └──────────── io: DataBuffer / 位打包读写器 ─┘
//!
//! SegmentCreator: RecordReader ─▶ RecordTransformer ─▶ 字典 + 正排 + 星型树
//! ```

pub mod common;
pub mod config;
pub mod logging;

// ── 存储 ──────────────────────────────────────────────────────────────────────
pub mod field_type;
pub mod io;
pub mod dictionary;
pub mod record;
pub mod transform;
pub mod startree;
pub mod segment;

// ── 查询 ──────────────────────────────────────────────────────────────────────
pub mod query;

pub use common::{OlapError, Result};
