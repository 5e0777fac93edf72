//! Selection 算子：按列取行，多值列以数组返回

use std::cmp::Ordering;
use std::sync::Arc;
use crate::common::{OlapError, Result};
use crate::field_type::Value;
use crate::query::request::OrderBy;
use crate::query::results::{ExecutionStatistics, IntermediateResultsBlock, ResultsBlockData};
use crate::segment::DataSource;
use super::projection::ProjectionOperator;

/// 排序键：(列下标, 升序)
pub(crate) type SortKeys = Vec<(usize, bool)>;

pub(crate) fn sort_keys(columns: &[String], order_by: &[OrderBy]) -> Result<SortKeys> {
    order_by.iter()
        .map(|o| {
            columns.iter().position(|c| *c == o.expression)
                .map(|i| (i, o.ascending))
                .ok_or_else(|| OlapError::bad_query(format!("order-by column {} is not selected", o.expression)))
        })
        .collect()
}

pub(crate) fn compare_rows(a: &[Value], b: &[Value], keys: &[(usize, bool)]) -> Ordering {
    for &(i, ascending) in keys {
        let ord = a[i].compare(&b[i]);
        if ord != Ordering::Equal {
            return if ascending { ord } else { ord.reverse() };
        }
    }
    Ordering::Equal
}

pub struct SelectionOperator {
    projection: ProjectionOperator,
    columns:    Vec<String>,
    order_by:   Vec<OrderBy>,
    /// offset + size：单段最多需要的行数
    limit:      usize,
    total_docs: u64,
}

impl SelectionOperator {
    pub fn new(
        projection: ProjectionOperator,
        columns:    Vec<String>,
        order_by:   Vec<OrderBy>,
        limit:      usize,
        total_docs: u64,
    ) -> Self {
        Self { projection, columns, order_by, limit, total_docs }
    }

    pub fn execute(mut self) -> Result<IntermediateResultsBlock> {
        let keys = sort_keys(&self.columns, &self.order_by)?;
        let sources: Vec<Arc<DataSource>> = self.columns.iter()
            .map(|c| self.projection.data_source(c).cloned())
            .collect::<Result<_>>()?;
        let mut contexts: Vec<_> = sources.iter().map(|s| s.create_mv_context()).collect();

        let mut rows: Vec<Vec<Value>> = Vec::new();
        'scan: while self.limit > 0 {
            let Some(block) = self.projection.next_block()? else { break };
            for doc in block {
                let row = sources.iter().zip(contexts.iter_mut())
                    .map(|(s, ctx)| s.value(doc, ctx.as_mut()))
                    .collect();
                rows.push(row);
                if keys.is_empty() {
                    if rows.len() >= self.limit {
                        break 'scan;
                    }
                } else if rows.len() >= self.limit * 2 {
                    // 边扫边裁剪，内存只保留两倍 limit
                    rows.sort_by(|a, b| compare_rows(a, b, &keys));
                    rows.truncate(self.limit);
                }
            }
        }
        if !keys.is_empty() {
            rows.sort_by(|a, b| compare_rows(a, b, &keys));
        }
        rows.truncate(self.limit);

        Ok(IntermediateResultsBlock {
            data: ResultsBlockData::Selection { columns: self.columns, rows },
            stats: ExecutionStatistics::for_segment(self.projection.num_docs_scanned(), self.total_docs),
            num_groups_limit_reached: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_rows_multi_key() {
        let rows = vec![
            vec![Value::from("b"), Value::Int(1)],
            vec![Value::from("a"), Value::Int(2)],
            vec![Value::from("a"), Value::Int(5)],
        ];
        let columns = vec!["name".to_string(), "n".to_string()];
        let keys = sort_keys(&columns, &[OrderBy::asc("name"), OrderBy::desc("n")]).unwrap();
        let mut sorted = rows.clone();
        sorted.sort_by(|a, b| compare_rows(a, b, &keys));
        assert_eq!(sorted[0][1], Value::Int(5));
        assert_eq!(sorted[1][1], Value::Int(2));
        assert_eq!(sorted[2][0], Value::from("b"));
        assert!(sort_keys(&columns, &[OrderBy::asc("missing")]).is_err());
    }
}
