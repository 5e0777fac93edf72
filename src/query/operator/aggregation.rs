//! 聚合与 group-by 聚合算子
//!
//! 普通投影逐行读原始值；星型树投影读预聚合列（`FUNCTION__column`），
//! AVG 同时读 `SUM__column` 与 `COUNT__*`。

use std::collections::HashMap;
use std::sync::Arc;
use crate::common::{DictId, DocId, OlapError, Result};
use crate::field_type::Value;
use crate::query::aggregation::{AggregationFunctionType, AggregationResult};
use crate::query::request::AggregationInfo;
use crate::query::results::{
    ExecutionStatistics, GroupByResultMap, GroupKey, IntermediateResultsBlock, ResultsBlockData,
};
use crate::segment::DataSource;
use super::projection::ProjectionOperator;

/// 一个聚合的取值方式
enum AggregationInput {
    Count,
    Raw(Arc<DataSource>),
    PreAggregated {
        value: Arc<DataSource>,
        count: Option<Arc<DataSource>>,
    },
}

impl AggregationInput {
    fn resolve(info: &AggregationInfo, projection: &ProjectionOperator, star_tree: bool) -> Result<Self> {
        if star_tree {
            let mut columns = info.function_column_pairs().into_iter().map(|p| p.to_column_name());
            let value = match columns.next() {
                Some(c) => Arc::clone(projection.data_source(&c)?),
                None => return Err(OlapError::Internal(format!("no pre-aggregated column for {}", info.result_name()))),
            };
            let count = columns.next().map(|c| projection.data_source(&c).cloned()).transpose()?;
            return Ok(Self::PreAggregated { value, count });
        }
        if info.function == AggregationFunctionType::Count {
            return Ok(Self::Count);
        }
        let source = Arc::clone(projection.data_source(&info.column)?);
        if !source.is_single_value() || !source.data_type().is_numeric() {
            return Err(OlapError::bad_query(format!(
                "{} needs a single-value numeric column, {} is not", info.function, info.column,
            )));
        }
        Ok(Self::Raw(source))
    }

    #[inline]
    fn aggregate(&self, doc: DocId, acc: &mut AggregationResult) {
        match self {
            Self::Count => acc.add_value(0.0),
            Self::Raw(source) => {
                if let Some(v) = source.double_value(doc) {
                    acc.add_value(v);
                }
            }
            Self::PreAggregated { value, count } => {
                let v = value.double_value(doc).unwrap_or(0.0);
                let c = count.as_ref().and_then(|c| c.double_value(doc)).unwrap_or(0.0);
                acc.add_pre_aggregated(v, c);
            }
        }
    }
}

fn resolve_inputs(
    aggregations: &[AggregationInfo],
    projection:   &ProjectionOperator,
    star_tree:    bool,
) -> Result<Vec<AggregationInput>> {
    aggregations.iter().map(|a| AggregationInput::resolve(a, projection, star_tree)).collect()
}

fn initial_results(aggregations: &[AggregationInfo]) -> Vec<AggregationResult> {
    aggregations.iter().map(|a| AggregationResult::initial(a.function)).collect()
}

// ── AggregationOperator ───────────────────────────────────────────────────────

pub struct AggregationOperator {
    projection:   ProjectionOperator,
    aggregations: Vec<AggregationInfo>,
    star_tree:    bool,
    total_docs:   u64,
}

impl AggregationOperator {
    pub fn new(projection: ProjectionOperator, aggregations: Vec<AggregationInfo>, star_tree: bool, total_docs: u64) -> Self {
        Self { projection, aggregations, star_tree, total_docs }
    }

    pub fn execute(mut self) -> Result<IntermediateResultsBlock> {
        let inputs = resolve_inputs(&self.aggregations, &self.projection, self.star_tree)?;
        let mut results = initial_results(&self.aggregations);
        while let Some(block) = self.projection.next_block()? {
            for (input, acc) in inputs.iter().zip(results.iter_mut()) {
                for doc in &block {
                    input.aggregate(*doc, acc);
                }
            }
        }
        Ok(IntermediateResultsBlock {
            data: ResultsBlockData::Aggregation(results),
            stats: ExecutionStatistics::for_segment(self.projection.num_docs_scanned(), self.total_docs),
            num_groups_limit_reached: false,
        })
    }
}

// ── AggregationGroupByOperator ────────────────────────────────────────────────

pub struct AggregationGroupByOperator {
    projection:       ProjectionOperator,
    aggregations:     Vec<AggregationInfo>,
    group_by:         Vec<String>,
    num_groups_limit: usize,
    star_tree:        bool,
    total_docs:       u64,
}

impl AggregationGroupByOperator {
    pub fn new(
        projection:       ProjectionOperator,
        aggregations:     Vec<AggregationInfo>,
        group_by:         Vec<String>,
        num_groups_limit: usize,
        star_tree:        bool,
        total_docs:       u64,
    ) -> Self {
        Self { projection, aggregations, group_by, num_groups_limit, star_tree, total_docs }
    }

    pub fn execute(mut self) -> Result<IntermediateResultsBlock> {
        let inputs = resolve_inputs(&self.aggregations, &self.projection, self.star_tree)?;
        let mut group_sources = Vec::with_capacity(self.group_by.len());
        for column in &self.group_by {
            let source = Arc::clone(self.projection.data_source(column)?);
            if !source.is_single_value() || source.dictionary().is_none() {
                return Err(OlapError::bad_query(format!("cannot group by multi-value or raw column {column}")));
            }
            group_sources.push(source);
        }

        // 段内以 dict_id 元组为 key，结束时再翻译成值
        let mut groups: HashMap<Vec<DictId>, Vec<AggregationResult>> = HashMap::new();
        let mut limit_reached = false;
        let mut key: Vec<DictId> = Vec::with_capacity(group_sources.len());
        while let Some(block) = self.projection.next_block()? {
            for doc in block {
                key.clear();
                key.extend(group_sources.iter().map(|s| s.dict_id(doc).unwrap_or_default()));
                if !groups.contains_key(&key) {
                    if groups.len() >= self.num_groups_limit {
                        limit_reached = true;
                        continue;
                    }
                    groups.insert(key.clone(), initial_results(&self.aggregations));
                }
                let Some(accs) = groups.get_mut(&key) else { continue };
                for (input, acc) in inputs.iter().zip(accs.iter_mut()) {
                    input.aggregate(doc, acc);
                }
            }
        }

        let mut result: GroupByResultMap = HashMap::with_capacity(groups.len());
        for (ids, accs) in groups {
            let values = ids.iter().zip(&group_sources)
                .map(|(id, s)| s.dictionary().map_or(Value::Int(*id), |d| d.get(*id)))
                .collect();
            result.insert(GroupKey(values), accs);
        }
        Ok(IntermediateResultsBlock {
            data: ResultsBlockData::GroupBy(result),
            stats: ExecutionStatistics::for_segment(self.projection.num_docs_scanned(), self.total_docs),
            num_groups_limit_reached: limit_reached,
        })
    }
}
