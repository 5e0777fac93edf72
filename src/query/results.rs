//! 段内中间结果、执行统计与实例响应

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use crate::field_type::Value;
use super::aggregation::AggregationResult;

/// group-by 的组：按列顺序的值
#[derive(Debug, Clone)]
pub struct GroupKey(pub Vec<Value>);

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self.0.iter().zip(&other.0).all(|(a, b)| a.kind() == b.kind() && a.to_sort_key() == b.to_sort_key())
    }
}

impl Eq for GroupKey {}

impl Hash for GroupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for v in &self.0 {
            v.kind().hash(state);
            v.to_sort_key().hash(state);
        }
    }
}

pub type GroupByResultMap = HashMap<GroupKey, Vec<AggregationResult>>;

#[derive(Debug, Clone)]
pub enum ResultsBlockData {
    Aggregation(Vec<AggregationResult>),
    GroupBy(GroupByResultMap),
    Selection { columns: Vec<String>, rows: Vec<Vec<Value>> },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStatistics {
    pub num_docs_scanned:       u64,
    pub num_segments_processed: u64,
    /// 至少匹配一行的段
    pub num_segments_matched:   u64,
    pub total_docs:             u64,
}

impl ExecutionStatistics {
    pub fn for_segment(num_docs_scanned: u64, total_docs: u64) -> Self {
        Self {
            num_docs_scanned,
            num_segments_processed: 1,
            num_segments_matched: u64::from(num_docs_scanned > 0),
            total_docs,
        }
    }

    pub fn merge(&mut self, other: &Self) {
        self.num_docs_scanned       += other.num_docs_scanned;
        self.num_segments_processed += other.num_segments_processed;
        self.num_segments_matched   += other.num_segments_matched;
        self.total_docs             += other.total_docs;
    }
}

/// 单个段算子的产出
#[derive(Debug, Clone)]
pub struct IntermediateResultsBlock {
    pub data:  ResultsBlockData,
    pub stats: ExecutionStatistics,
    pub num_groups_limit_reached: bool,
}

// ── 实例响应 ──────────────────────────────────────────────────────────────────

/// PQL group-by：一个聚合的 top-N 组（按值降序）
#[derive(Debug, Clone, PartialEq)]
pub struct GroupByResult {
    pub function: String,
    pub groups:   Vec<(Vec<Value>, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// `(结果名, 值)`
    Aggregation(Vec<(String, f64)>),
    GroupBy(Vec<GroupByResult>),
    /// SQL group-by 与 selection 都是一张表
    Table { columns: Vec<String>, rows: Vec<Vec<Value>> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceResponse {
    pub result: QueryResult,
    pub stats:  ExecutionStatistics,
    pub num_groups_limit_reached: bool,
    pub planning_time_ms:  u64,
    pub execution_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_key_identity() {
        let a = GroupKey(vec![Value::from("us"), Value::Int(1)]);
        let b = GroupKey(vec![Value::from("us"), Value::Int(1)]);
        let c = GroupKey(vec![Value::from("us"), Value::Long(1)]);
        let mut map: HashMap<GroupKey, u32> = HashMap::new();
        *map.entry(a).or_default() += 1;
        *map.entry(b).or_default() += 1;
        *map.entry(c).or_default() += 1;
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_stats_merge() {
        let mut s = ExecutionStatistics::for_segment(0, 10);
        s.merge(&ExecutionStatistics::for_segment(4, 20));
        assert_eq!(s, ExecutionStatistics {
            num_docs_scanned: 4, num_segments_processed: 2, num_segments_matched: 1, total_docs: 30,
        });
    }
}
