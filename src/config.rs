//! 配置项
//!
//! 全部为 serde 结构体，字段名 camelCase，可从 JSON 字符串或文件加载，缺省字段取默认值。

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use crate::common::{OlapError, Result};

pub use crate::io::ReadMode;

fn parse_json<T: DeserializeOwned>(s: &str, what: &str) -> Result<T> {
    serde_json::from_str(s).map_err(|e| OlapError::Config(format!("invalid {what}: {e}")))
}

fn read_json_file<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    parse_json(&std::fs::read_to_string(path)?, what)
}

// ── 星型树 ────────────────────────────────────────────────────────────────────

pub const DEFAULT_MAX_LEAF_RECORDS: usize = 10_000;

fn default_max_leaf_records() -> usize { DEFAULT_MAX_LEAF_RECORDS }

/// 单棵星型树的构建配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StarTreeIndexConfig {
    /// 维度拆分顺序
    pub dimensions_split_order: Vec<String>,
    #[serde(default)]
    pub skip_star_node_creation_for_dimensions: Vec<String>,
    /// `FUNCTION__column`，如 `SUM__amount`、`COUNT__*`
    pub function_column_pairs: Vec<String>,
    #[serde(default = "default_max_leaf_records")]
    pub max_leaf_records: usize,
}

impl StarTreeIndexConfig {
    pub fn new(split_order: &[&str], function_column_pairs: &[&str]) -> Self {
        Self {
            dimensions_split_order: split_order.iter().map(|s| s.to_string()).collect(),
            skip_star_node_creation_for_dimensions: Vec::new(),
            function_column_pairs: function_column_pairs.iter().map(|s| s.to_string()).collect(),
            max_leaf_records: DEFAULT_MAX_LEAF_RECORDS,
        }
    }

    pub fn with_max_leaf_records(mut self, n: usize) -> Self {
        self.max_leaf_records = n; self
    }

    pub fn with_skip_star_node_creation(mut self, dims: &[&str]) -> Self {
        self.skip_star_node_creation_for_dimensions = dims.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.dimensions_split_order.is_empty() {
            return Err(OlapError::Config("star-tree needs at least one split dimension".into()));
        }
        if self.max_leaf_records == 0 {
            return Err(OlapError::Config("maxLeafRecords must be positive".into()));
        }
        for d in &self.skip_star_node_creation_for_dimensions {
            if !self.dimensions_split_order.contains(d) {
                return Err(OlapError::Config(format!("skip-star dimension {d} is not in the split order")));
            }
        }
        Ok(())
    }
}

/// 星型树在段目录中的存放格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StarTreeFormatVersion {
    /// 旧格式：单棵树写入 `star_tree.bin`，聚合文档追加在段的普通列之后
    V1,
    #[default]
    V2,
}

// ── 段生成 ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentGeneratorConfig {
    pub table_name:   String,
    pub segment_name: String,
    pub out_dir:      PathBuf,
    #[serde(default)]
    pub star_tree_index_configs: Vec<StarTreeIndexConfig>,
    #[serde(default)]
    pub star_tree_format_version: StarTreeFormatVersion,
}

impl SegmentGeneratorConfig {
    pub fn new(table_name: &str, segment_name: &str, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            table_name: table_name.into(),
            segment_name: segment_name.into(),
            out_dir: out_dir.into(),
            star_tree_index_configs: Vec::new(),
            star_tree_format_version: StarTreeFormatVersion::V2,
        }
    }

    pub fn with_star_tree(mut self, cfg: StarTreeIndexConfig) -> Self {
        self.star_tree_index_configs.push(cfg); self
    }

    pub fn with_star_tree_format(mut self, v: StarTreeFormatVersion) -> Self {
        self.star_tree_format_version = v; self
    }

    pub fn segment_dir(&self) -> PathBuf {
        self.out_dir.join(&self.segment_name)
    }

    pub fn from_json_str(s: &str) -> Result<Self> { parse_json(s, "segment generator config") }
}

// ── 查询执行 ──────────────────────────────────────────────────────────────────

/// 单次拉取 doc id 的上限，同时也是默认值
pub const MAX_DOC_PER_CALL: usize = 10_000;
pub const DEFAULT_NUM_GROUPS_LIMIT: usize = 100_000;
pub const DEFAULT_PLANNING_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 15_000;
/// 不超过该数量的 plan node 在调用线程上顺序执行
pub const DEFAULT_MIN_SEGMENTS_PER_THREAD: usize = 10;
pub const MAX_PLAN_THREADS_CAP: usize = 10;

/// `max(1, min(10, cpus / 2))`
pub fn default_max_plan_threads() -> usize {
    (num_cpus::get() / 2).min(MAX_PLAN_THREADS_CAP).max(1)
}

fn default_max_doc_per_call() -> usize { MAX_DOC_PER_CALL }
fn default_num_groups_limit() -> usize { DEFAULT_NUM_GROUPS_LIMIT }
fn default_planning_timeout_ms() -> u64 { DEFAULT_PLANNING_TIMEOUT_MS }
fn default_query_timeout_ms() -> u64 { DEFAULT_QUERY_TIMEOUT_MS }
fn default_min_segments_per_thread() -> usize { DEFAULT_MIN_SEGMENTS_PER_THREAD }
fn default_true() -> bool { true }

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryExecutorConfig {
    #[serde(default = "default_max_doc_per_call")]
    pub max_doc_per_call: usize,
    #[serde(default = "default_num_groups_limit")]
    pub num_groups_limit: usize,
    #[serde(default = "default_planning_timeout_ms")]
    pub planning_timeout_ms: u64,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    #[serde(default = "default_min_segments_per_thread")]
    pub min_segments_per_thread: usize,
    #[serde(default = "default_max_plan_threads")]
    pub max_plan_threads: usize,
    #[serde(default = "default_true")]
    pub enable_star_tree: bool,
}

impl Default for QueryExecutorConfig {
    fn default() -> Self {
        Self {
            max_doc_per_call:        MAX_DOC_PER_CALL,
            num_groups_limit:        DEFAULT_NUM_GROUPS_LIMIT,
            planning_timeout_ms:     DEFAULT_PLANNING_TIMEOUT_MS,
            query_timeout_ms:        DEFAULT_QUERY_TIMEOUT_MS,
            min_segments_per_thread: DEFAULT_MIN_SEGMENTS_PER_THREAD,
            max_plan_threads:        default_max_plan_threads(),
            enable_star_tree:        true,
        }
    }
}

impl QueryExecutorConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: Self = parse_json(s, "query executor config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let cfg: Self = read_json_file(path, "query executor config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_doc_per_call == 0 || self.max_doc_per_call > MAX_DOC_PER_CALL {
            return Err(OlapError::Config(format!(
                "maxDocPerCall must be in (0, {MAX_DOC_PER_CALL}], got {}", self.max_doc_per_call,
            )));
        }
        if self.max_plan_threads == 0 || self.min_segments_per_thread == 0 {
            return Err(OlapError::Config("thread settings must be positive".into()));
        }
        Ok(())
    }
}

// ── 配额 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaConfig {
    /// 整个集群的 QPS 上限（字符串，兼容 "100" / "12.5"）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_queries_per_second: Option<String>,
    /// 存储配额，如 "10G"；这里只做透传
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
}

impl QuotaConfig {
    pub fn with_max_qps(qps: &str) -> Self {
        Self { max_queries_per_second: Some(qps.into()), storage: None }
    }

    /// 解析后的 QPS；未配置返回 None
    pub fn max_qps(&self) -> Result<Option<f64>> {
        match &self.max_queries_per_second {
            None => Ok(None),
            Some(s) => {
                let qps: f64 = s.trim().parse()
                    .map_err(|_| OlapError::Config(format!("maxQueriesPerSecond is not a number: {s}")))?;
                if !(qps.is_finite() && qps > 0.0) {
                    return Err(OlapError::Config(format!("maxQueriesPerSecond must be positive: {s}")));
                }
                Ok(Some(qps))
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.max_qps().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_defaults_from_json() {
        let cfg = QueryExecutorConfig::from_json_str(r#"{"numGroupsLimit": 5}"#).unwrap();
        assert_eq!(cfg.num_groups_limit, 5);
        assert_eq!(cfg.max_doc_per_call, 10_000);
        assert_eq!(cfg.planning_timeout_ms, 10_000);
        assert!(cfg.max_plan_threads >= 1 && cfg.max_plan_threads <= 10);
        assert!(QueryExecutorConfig::from_json_str(r#"{"maxDocPerCall": 20000}"#).is_err());
        assert!(QueryExecutorConfig::from_json_str(r#"{"maxDocPerCall": 0}"#).is_err());
    }

    #[test]
    fn test_star_tree_config() {
        let cfg: StarTreeIndexConfig = serde_json::from_str(r#"{
            "dimensionsSplitOrder": ["a", "b"],
            "functionColumnPairs": ["COUNT__*", "SUM__m"]
        }"#).unwrap();
        assert_eq!(cfg.max_leaf_records, DEFAULT_MAX_LEAF_RECORDS);
        cfg.validate().unwrap();
        assert!(cfg.clone().with_skip_star_node_creation(&["c"]).validate().is_err());
        assert!(cfg.with_max_leaf_records(0).validate().is_err());
    }

    #[test]
    fn test_quota_validation() {
        assert_eq!(QuotaConfig::with_max_qps("12.5").max_qps().unwrap(), Some(12.5));
        assert_eq!(QuotaConfig::default().max_qps().unwrap(), None);
        assert!(QuotaConfig::with_max_qps("abc").validate().is_err());
        assert!(QuotaConfig::with_max_qps("-1").validate().is_err());
        assert!(QuotaConfig::with_max_qps("0").validate().is_err());
    }

    #[test]
    fn test_generator_config_json() {
        let cfg = SegmentGeneratorConfig::from_json_str(r#"{
            "tableName": "t", "segmentName": "s0", "outDir": "/tmp/out",
            "starTreeFormatVersion": "V1"
        }"#).unwrap();
        assert_eq!(cfg.star_tree_format_version, StarTreeFormatVersion::V1);
        assert_eq!(cfg.segment_dir(), PathBuf::from("/tmp/out/s0"));
    }
}
