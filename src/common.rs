//! 全局基础类型与错误定义

use thiserror::Error;

// ── ID 类型别名 ───────────────────────────────────────────────────────────────

/// Segment 内部的稠密行号 `[0, num_docs)`
pub type DocId  = u32;
/// 列字典中的稠密编码 `[0, cardinality)`
pub type DictId = i32;

/// 星型树节点 / 文档号的无效值（落盘格式中也是 -1）
pub const INVALID_ID: i32 = -1;

// ── 段格式版本 ────────────────────────────────────────────────────────────────

/// Segment 目录格式版本
///
/// - `V1`：旧格式，星型树（若有）以单文件 `star_tree.bin` 存放，聚合文档直接追加在普通列之后
/// - `V2`：星型树统一写入 `star_tree_index`，由 `star_tree_index_map` 描述各段字节范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SegmentVersion {
    V1,
    V2,
}

impl std::fmt::Display for SegmentVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V1 => write!(f, "v1"),
            Self::V2 => write!(f, "v2"),
        }
    }
}

// ── 错误 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum OlapError {
    /// 预期内的 I/O 失败（文件不存在、磁盘满等）
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// 文件损坏：magic / version 不符、截断、越界
    #[error("corrupted segment data: {0}")]
    Corruption(String),
    #[error("checksum mismatch: {0}")]
    ChecksumMismatch(String),
    /// 非法查询，属于客户端错误，服务端不重试
    #[error("bad query request: {0}")]
    BadQuery(String),
    #[error("column not found: {0}")]
    ColumnNotFound(String),
    /// 规划阶段超过截止时间
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("query quota exceeded for table: {0}")]
    QuotaExceeded(String),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("type conversion error: {0}")]
    TypeConversion(String),
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl OlapError {
    /// 是否为客户端错误（调用方应返回 4xx 而非重试）
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::BadQuery(_) | Self::ColumnNotFound(_))
    }

    /// 段文件损坏类错误：必须中止整个 segment 加载
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption(_) | Self::ChecksumMismatch(_))
    }

    pub fn corruption(msg: impl Into<String>) -> Self { Self::Corruption(msg.into()) }
    pub fn bad_query(msg: impl Into<String>)  -> Self { Self::BadQuery(msg.into()) }
}

pub type Result<T> = std::result::Result<T, OlapError>;
