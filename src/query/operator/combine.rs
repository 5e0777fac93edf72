//! 跨段合并
//!
//! 多于一个段时每个段一个任务，提交到共享执行器并以查询截止时间等待；
//! 任何段失败或超时都让整个查询失败，不返回残缺结果。

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use crate::common::{OlapError, Result};
use crate::field_type::Value;
use crate::query::aggregation::AggregationResult;
use crate::query::executor::{CancellationToken, QueryExecutorService, Task};
use crate::query::request::{GroupByMode, QueryRequest};
use crate::query::results::{
    ExecutionStatistics, GroupByResult, GroupByResultMap, IntermediateResultsBlock, QueryResult,
    ResultsBlockData,
};
use super::selection::{compare_rows, sort_keys};
use super::SegmentOperator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineStrategy {
    /// 按 order-by 排序并截断到 limit
    SqlGroupBy,
    /// 合并时受 numGroupsLimit 约束，每个聚合取 top-N
    PqlGroupBy,
    Generic,
}

impl CombineStrategy {
    pub fn for_request(request: &QueryRequest) -> Self {
        match (request.is_group_by(), request.options.group_by_mode) {
            (true, GroupByMode::Sql) => Self::SqlGroupBy,
            (true, GroupByMode::Pql) => Self::PqlGroupBy,
            _ => Self::Generic,
        }
    }
}

/// 合并后的结果
pub struct CombinedResult {
    pub result: QueryResult,
    pub stats:  ExecutionStatistics,
    pub num_groups_limit_reached: bool,
}

pub struct CombineOperator {
    operators:        Vec<SegmentOperator>,
    request:          Arc<QueryRequest>,
    executor:         Arc<QueryExecutorService>,
    deadline:         Instant,
    num_groups_limit: usize,
}

impl CombineOperator {
    pub fn new(
        operators:        Vec<SegmentOperator>,
        request:          Arc<QueryRequest>,
        executor:         Arc<QueryExecutorService>,
        deadline:         Instant,
        num_groups_limit: usize,
    ) -> Self {
        Self { operators, request, executor, deadline, num_groups_limit }
    }

    pub fn strategy(&self) -> CombineStrategy { CombineStrategy::for_request(&self.request) }

    pub fn execute(self) -> Result<CombinedResult> {
        let strategy = self.strategy();
        let blocks = if self.operators.len() <= 1 {
            let mut blocks = Vec::with_capacity(self.operators.len());
            for op in self.operators {
                if Instant::now() >= self.deadline {
                    return Err(OlapError::Timeout("query execution".into()));
                }
                blocks.push(op.execute()?);
            }
            blocks
        } else {
            let tasks: Vec<Task<IntermediateResultsBlock>> = self.operators.into_iter()
                .map(|op| Box::new(move |_: &CancellationToken| op.execute()) as Task<IntermediateResultsBlock>)
                .collect();
            self.executor.run_with_deadline(tasks, self.deadline, "query execution")?
        };
        debug!(segments = blocks.len(), ?strategy, "combining results");

        let mut stats = ExecutionStatistics::default();
        let mut limit_reached = false;
        for b in &blocks {
            stats.merge(&b.stats);
            limit_reached |= b.num_groups_limit_reached;
        }

        let request = &*self.request;
        let result = match strategy {
            CombineStrategy::SqlGroupBy => {
                let groups = merge_groups(blocks, usize::MAX, &mut limit_reached);
                sql_group_by_table(request, groups)?
            }
            CombineStrategy::PqlGroupBy => {
                let groups = merge_groups(blocks, self.num_groups_limit, &mut limit_reached);
                pql_group_by_result(request, &groups)
            }
            CombineStrategy::Generic if request.is_aggregation() => merge_aggregations(request, blocks),
            CombineStrategy::Generic => merge_selections(request, blocks)?,
        };
        Ok(CombinedResult { result, stats, num_groups_limit_reached: limit_reached })
    }
}

fn merge_aggregations(request: &QueryRequest, blocks: Vec<IntermediateResultsBlock>) -> QueryResult {
    let mut merged: Vec<AggregationResult> = request.aggregations.iter()
        .map(|a| AggregationResult::initial(a.function))
        .collect();
    for block in blocks {
        if let ResultsBlockData::Aggregation(results) = block.data {
            for (acc, r) in merged.iter_mut().zip(&results) {
                acc.merge(r);
            }
        }
    }
    QueryResult::Aggregation(
        request.aggregations.iter().zip(&merged)
            .map(|(a, r)| (a.result_name(), r.final_value()))
            .collect(),
    )
}

fn merge_groups(blocks: Vec<IntermediateResultsBlock>, limit: usize, limit_reached: &mut bool) -> GroupByResultMap {
    let mut merged: GroupByResultMap = HashMap::new();
    for block in blocks {
        let ResultsBlockData::GroupBy(groups) = block.data else { continue };
        for (key, results) in groups {
            if let Some(accs) = merged.get_mut(&key) {
                accs.iter_mut().zip(&results).for_each(|(acc, r)| acc.merge(r));
            } else if merged.len() >= limit {
                *limit_reached = true;
            } else {
                merged.insert(key, results);
            }
        }
    }
    merged
}

fn compare_keys(a: &[Value], b: &[Value]) -> Ordering {
    a.iter().zip(b).map(|(x, y)| x.compare(y)).find(|o| o.is_ne()).unwrap_or(Ordering::Equal)
}

fn pql_group_by_result(request: &QueryRequest, groups: &GroupByResultMap) -> QueryResult {
    let top_n = request.group_by.as_ref().map_or(0, |g| g.top_n);
    let results = request.aggregations.iter().enumerate()
        .map(|(i, a)| {
            let mut values: Vec<(Vec<Value>, f64)> = groups.iter()
                .map(|(k, r)| (k.0.clone(), r[i].final_value()))
                .collect();
            values.sort_by(|x, y| y.1.total_cmp(&x.1).then_with(|| compare_keys(&x.0, &y.0)));
            values.truncate(top_n);
            GroupByResult { function: a.result_name(), groups: values }
        })
        .collect();
    QueryResult::GroupBy(results)
}

fn sql_group_by_table(request: &QueryRequest, groups: GroupByResultMap) -> Result<QueryResult> {
    let mut columns: Vec<String> = request.group_by_columns().to_vec();
    columns.extend(request.aggregations.iter().map(|a| a.result_name()));

    let mut rows: Vec<Vec<Value>> = groups.into_iter()
        .map(|(key, results)| {
            let mut row = key.0;
            row.extend(results.iter().map(|r| Value::Double(r.final_value())));
            row
        })
        .collect();
    let keys = if request.order_by.is_empty() {
        (0..request.group_by_columns().len()).map(|i| (i, true)).collect()
    } else {
        sort_keys(&columns, &request.order_by)?
    };
    rows.sort_by(|a, b| compare_rows(a, b, &keys));
    rows.truncate(request.limit);
    Ok(QueryResult::Table { columns, rows })
}

fn merge_selections(request: &QueryRequest, blocks: Vec<IntermediateResultsBlock>) -> Result<QueryResult> {
    let Some(selection) = &request.selection else {
        return Err(OlapError::Internal("selection combine without a selection".into()));
    };
    let mut columns = selection.columns.clone();
    let mut rows = Vec::new();
    for block in blocks {
        if let ResultsBlockData::Selection { columns: c, rows: r } = block.data {
            columns = c;
            rows.extend(r);
        }
    }
    if !selection.order_by.is_empty() {
        let keys = sort_keys(&columns, &selection.order_by)?;
        rows.sort_by(|a, b| compare_rows(a, b, &keys));
    }
    let rows = rows.into_iter().skip(selection.offset).take(selection.size).collect();
    Ok(QueryResult::Table { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::aggregation::AggregationFunctionType;
    use crate::query::request::{AggregationInfo, OrderBy};
    use crate::query::results::GroupKey;

    fn group_block(entries: &[(&str, f64)]) -> IntermediateResultsBlock {
        let mut groups = GroupByResultMap::new();
        for (k, v) in entries {
            let mut sum = AggregationResult::initial(AggregationFunctionType::Sum);
            sum.add_value(*v);
            groups.insert(GroupKey(vec![Value::from(*k)]), vec![sum]);
        }
        IntermediateResultsBlock {
            data: ResultsBlockData::GroupBy(groups),
            stats: ExecutionStatistics::for_segment(entries.len() as u64, 10),
            num_groups_limit_reached: false,
        }
    }

    fn sum_request() -> QueryRequest {
        QueryRequest::aggregation("t", vec![AggregationInfo::new(AggregationFunctionType::Sum, "m")])
            .with_group_by(&["d"], 2)
    }

    #[test]
    fn test_pql_merge_respects_groups_limit() {
        let blocks = vec![group_block(&[("a", 1.0), ("b", 2.0)]), group_block(&[("a", 5.0), ("c", 9.0)])];
        let mut reached = false;
        let groups = merge_groups(blocks, 2, &mut reached);
        assert!(reached);
        assert_eq!(groups.len(), 2);

        let QueryResult::GroupBy(results) = pql_group_by_result(&sum_request(), &groups) else { panic!() };
        assert_eq!(results[0].function, "sum(m)");
        assert_eq!(results[0].groups[0], (vec![Value::from("a")], 6.0));
        assert_eq!(results[0].groups[1], (vec![Value::from("b")], 2.0));
    }

    #[test]
    fn test_known_groups_merge_after_limit_reached() {
        let blocks = vec![
            group_block(&[("a", 1.0)]),
            group_block(&[("b", 2.0), ("a", 3.0)]),
            group_block(&[("b", 4.0), ("a", 5.0)]),
        ];
        let mut reached = false;
        let groups = merge_groups(blocks, 1, &mut reached);
        assert!(reached);
        assert_eq!(groups.len(), 1);
        let QueryResult::GroupBy(results) = pql_group_by_result(&sum_request(), &groups) else { panic!() };
        assert_eq!(results[0].groups, vec![(vec![Value::from("a")], 9.0)]);

        let mut reached = false;
        let groups = merge_groups(vec![group_block(&[("a", 1.0)]), group_block(&[("a", 2.0)])], 1, &mut reached);
        assert!(!reached);
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn test_sql_order_by_and_limit() {
        let blocks = vec![group_block(&[("a", 1.0), ("b", 2.0)]), group_block(&[("a", 5.0), ("c", 3.0)])];
        let mut reached = false;
        let groups = merge_groups(blocks, usize::MAX, &mut reached);
        let request = sum_request().with_sql_order_by(vec![OrderBy::asc("sum(m)")], 2);
        let QueryResult::Table { columns, rows } = sql_group_by_table(&request, groups).unwrap() else { panic!() };
        assert_eq!(columns, vec!["d".to_string(), "sum(m)".to_string()]);
        assert_eq!(rows, vec![
            vec![Value::from("b"), Value::Double(2.0)],
            vec![Value::from("c"), Value::Double(3.0)],
        ]);
        assert!(!reached);
    }

    #[test]
    fn test_strategy_selection() {
        assert_eq!(CombineStrategy::for_request(&sum_request()), CombineStrategy::PqlGroupBy);
        let sql = sum_request().with_sql_order_by(Vec::new(), 5);
        assert_eq!(CombineStrategy::for_request(&sql), CombineStrategy::SqlGroupBy);
        let sel = QueryRequest::selection("t", &["d"], 5);
        assert_eq!(CombineStrategy::for_request(&sel), CombineStrategy::Generic);
    }
}
