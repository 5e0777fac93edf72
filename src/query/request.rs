//! 已解析的逻辑查询
//!
//! 查询以结构化形式到达（不做 SQL 解析）：过滤树、聚合或 selection、
//! 可选的 group-by 与排序。`validate` 把所有结构性错误报告为 `BadQuery`。

use std::collections::BTreeSet;
use crate::common::{OlapError, Result};
use crate::field_type::Value;
use crate::startree::function_pair::STAR_COLUMN;
use crate::startree::AggregationFunctionColumnPair;
use super::aggregation::AggregationFunctionType;

// ── 过滤 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(Value),
    NotEq(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    /// `(值, 是否包含)`，至少一端有界
    Range {
        lower: Option<(Value, bool)>,
        upper: Option<(Value, bool)>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Predicate { column: String, predicate: Predicate },
}

impl FilterNode {
    pub fn predicate(column: &str, predicate: Predicate) -> Self {
        Self::Predicate { column: column.to_string(), predicate }
    }

    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self::predicate(column, Predicate::Eq(value.into()))
    }

    pub fn not_eq(column: &str, value: impl Into<Value>) -> Self {
        Self::predicate(column, Predicate::NotEq(value.into()))
    }

    pub fn in_values<V: Into<Value>>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
        Self::predicate(column, Predicate::In(values.into_iter().map(Into::into).collect()))
    }

    pub fn not_in<V: Into<Value>>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
        Self::predicate(column, Predicate::NotIn(values.into_iter().map(Into::into).collect()))
    }

    pub fn range(column: &str, lower: Option<(Value, bool)>, upper: Option<(Value, bool)>) -> Self {
        Self::predicate(column, Predicate::Range { lower, upper })
    }

    pub fn and(children: Vec<FilterNode>) -> Self { Self::And(children) }
    pub fn or(children: Vec<FilterNode>) -> Self { Self::Or(children) }

    /// 过滤树引用的全部列
    pub fn columns(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::And(children) | Self::Or(children) => children.iter().for_each(|c| c.columns(out)),
            Self::Predicate { column, .. } => { out.insert(column.clone()); }
        }
    }

    /// 只由 AND 与谓词组成时返回全部谓词，否则 None
    pub fn conjuncts(&self) -> Option<Vec<(&str, &Predicate)>> {
        let mut out = Vec::new();
        self.collect_conjuncts(&mut out).then_some(out)
    }

    fn collect_conjuncts<'a>(&'a self, out: &mut Vec<(&'a str, &'a Predicate)>) -> bool {
        match self {
            Self::And(children) => children.iter().all(|c| c.collect_conjuncts(out)),
            Self::Or(_) => false,
            Self::Predicate { column, predicate } => {
                out.push((column.as_str(), predicate));
                true
            }
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::And(children) | Self::Or(children) => {
                if children.is_empty() {
                    return Err(OlapError::bad_query("AND/OR filter without children"));
                }
                children.iter().try_for_each(Self::validate)
            }
            Self::Predicate { column, predicate } => match predicate {
                Predicate::In(vs) | Predicate::NotIn(vs) if vs.is_empty() => {
                    Err(OlapError::bad_query(format!("IN predicate on {column} has no values")))
                }
                Predicate::Range { lower: None, upper: None } => {
                    Err(OlapError::bad_query(format!("range predicate on {column} has no bound")))
                }
                _ => Ok(()),
            },
        }
    }
}

// ── 聚合 / group-by / selection ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregationInfo {
    pub function: AggregationFunctionType,
    /// COUNT 为 `*`
    pub column:   String,
}

impl AggregationInfo {
    pub fn new(function: AggregationFunctionType, column: &str) -> Self {
        let column = if function == AggregationFunctionType::Count { STAR_COLUMN } else { column };
        Self { function, column: column.to_string() }
    }

    /// 按函数名构造；未知函数是 `BadQuery`
    pub fn parse(function: &str, column: &str) -> Result<Self> {
        Ok(Self::new(AggregationFunctionType::from_name(function)?, column))
    }

    pub fn count() -> Self { Self::new(AggregationFunctionType::Count, STAR_COLUMN) }

    /// 结果列名，如 `sum(amount)`、`count(*)`
    pub fn result_name(&self) -> String {
        format!("{}({})", self.function.name().to_ascii_lowercase(), self.column)
    }

    /// 在星型树上回答该聚合所需的预聚合列
    pub fn function_column_pairs(&self) -> Vec<AggregationFunctionColumnPair> {
        match self.function {
            AggregationFunctionType::Avg => vec![
                AggregationFunctionColumnPair::new(AggregationFunctionType::Sum, &self.column),
                AggregationFunctionColumnPair::count_star(),
            ],
            f => vec![AggregationFunctionColumnPair::new(f, &self.column)],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupBy {
    pub columns: Vec<String>,
    /// PQL 模式下每个聚合返回的组数
    pub top_n:   usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// 列名或聚合结果名（`sum(amount)`）
    pub expression: String,
    pub ascending:  bool,
}

impl OrderBy {
    pub fn asc(expression: &str) -> Self { Self { expression: expression.into(), ascending: true } }
    pub fn desc(expression: &str) -> Self { Self { expression: expression.into(), ascending: false } }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// `*` 表示全部列
    pub columns:  Vec<String>,
    pub order_by: Vec<OrderBy>,
    pub offset:   usize,
    pub size:     usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupByMode {
    /// 每个聚合各自返回 top-N 组
    #[default]
    Pql,
    /// 结果是一张表，按 order-by 排序并截断到 limit
    Sql,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryOptions {
    pub group_by_mode:    GroupByMode,
    /// 覆盖服务端的查询超时
    pub timeout_ms:       Option<u64>,
    pub num_groups_limit: Option<usize>,
}

pub const DEFAULT_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub table_name:   String,
    pub filter:       Option<FilterNode>,
    pub aggregations: Vec<AggregationInfo>,
    pub group_by:     Option<GroupBy>,
    pub selection:    Option<Selection>,
    /// SQL group-by 模式的排序
    pub order_by:     Vec<OrderBy>,
    /// SQL group-by 模式的行数上限
    pub limit:        usize,
    pub options:      QueryOptions,
}

impl QueryRequest {
    fn empty(table_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            filter: None,
            aggregations: Vec::new(),
            group_by: None,
            selection: None,
            order_by: Vec::new(),
            limit: DEFAULT_LIMIT,
            options: QueryOptions::default(),
        }
    }

    pub fn aggregation(table_name: &str, aggregations: Vec<AggregationInfo>) -> Self {
        Self { aggregations, ..Self::empty(table_name) }
    }

    pub fn selection(table_name: &str, columns: &[&str], size: usize) -> Self {
        let selection = Selection {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            order_by: Vec::new(),
            offset: 0,
            size,
        };
        Self { selection: Some(selection), ..Self::empty(table_name) }
    }

    pub fn with_filter(mut self, filter: FilterNode) -> Self {
        self.filter = Some(filter); self
    }

    pub fn with_group_by(mut self, columns: &[&str], top_n: usize) -> Self {
        self.group_by = Some(GroupBy { columns: columns.iter().map(|c| c.to_string()).collect(), top_n });
        self
    }

    /// 切到 SQL group-by 模式
    pub fn with_sql_order_by(mut self, order_by: Vec<OrderBy>, limit: usize) -> Self {
        self.options.group_by_mode = GroupByMode::Sql;
        self.order_by = order_by;
        self.limit = limit;
        self
    }

    pub fn with_selection_order_by(mut self, order_by: Vec<OrderBy>) -> Self {
        if let Some(s) = &mut self.selection {
            s.order_by = order_by;
        }
        self
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options; self
    }

    pub fn is_aggregation(&self) -> bool { !self.aggregations.is_empty() }

    pub fn is_group_by(&self) -> bool { self.is_aggregation() && self.group_by.is_some() }

    pub fn group_by_columns(&self) -> &[String] {
        self.group_by.as_ref().map_or(&[], |g| &g.columns)
    }

    /// 过滤、聚合、group-by 与 selection 引用的全部列（不含 `*`）
    pub fn referenced_columns(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        if let Some(f) = &self.filter {
            f.columns(&mut out);
        }
        for a in &self.aggregations {
            if a.column != STAR_COLUMN {
                out.insert(a.column.clone());
            }
        }
        out.extend(self.group_by_columns().iter().cloned());
        if let Some(s) = &self.selection {
            out.extend(s.columns.iter().filter(|c| *c != STAR_COLUMN).cloned());
        }
        out
    }

    pub fn validate(&self) -> Result<()> {
        match (self.is_aggregation(), &self.selection) {
            (true, Some(_)) => return Err(OlapError::bad_query("query has both aggregations and a selection")),
            (false, None)   => return Err(OlapError::bad_query("query has neither aggregations nor a selection")),
            _ => {}
        }
        if let Some(f) = &self.filter {
            f.validate()?;
        }
        for a in &self.aggregations {
            if a.function != AggregationFunctionType::Count && (a.column.is_empty() || a.column == STAR_COLUMN) {
                return Err(OlapError::bad_query(format!("{} needs a column", a.function)));
            }
        }
        if let Some(g) = &self.group_by {
            if g.columns.is_empty() {
                return Err(OlapError::bad_query("group-by without columns"));
            }
            if g.top_n == 0 {
                return Err(OlapError::bad_query("group-by topN must be positive"));
            }
        }
        if self.options.group_by_mode == GroupByMode::Sql && self.is_group_by() {
            let names: Vec<String> = self.aggregations.iter().map(AggregationInfo::result_name).collect();
            for o in &self.order_by {
                if !self.group_by_columns().contains(&o.expression) && !names.contains(&o.expression) {
                    return Err(OlapError::bad_query(format!(
                        "order-by {} is neither a group-by column nor an aggregation", o.expression,
                    )));
                }
            }
        }
        if let Some(s) = &self.selection {
            if s.columns.is_empty() {
                return Err(OlapError::bad_query("selection without columns"));
            }
            let star = s.columns.iter().any(|c| c == STAR_COLUMN);
            for o in &s.order_by {
                if !star && !s.columns.contains(&o.expression) {
                    return Err(OlapError::bad_query(format!("order-by column {} is not selected", o.expression)));
                }
            }
        }
        if self.options.num_groups_limit == Some(0) {
            return Err(OlapError::bad_query("numGroupsLimit must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation() {
        let ok = QueryRequest::aggregation("t", vec![AggregationInfo::count()])
            .with_filter(FilterNode::and(vec![FilterNode::eq("a", 1), FilterNode::in_values("b", ["x", "y"])]));
        ok.validate().unwrap();

        let both = QueryRequest { selection: QueryRequest::selection("t", &["a"], 1).selection, ..ok.clone() };
        assert!(both.validate().unwrap_err().is_client_error());

        let empty_in = ok.clone().with_filter(FilterNode::not_in::<i32>("a", []));
        assert!(empty_in.validate().is_err());

        let bad_order = QueryRequest::aggregation("t", vec![AggregationInfo::parse("sum", "m").unwrap()])
            .with_group_by(&["a"], 10)
            .with_sql_order_by(vec![OrderBy::desc("max(m)")], 5);
        assert!(bad_order.validate().is_err());
        let good_order = bad_order.clone().with_sql_order_by(vec![OrderBy::desc("sum(m)"), OrderBy::asc("a")], 5);
        good_order.validate().unwrap();

        assert!(AggregationInfo::parse("median", "m").is_err());
    }

    #[test]
    fn test_conjuncts_and_pairs() {
        let f = FilterNode::and(vec![FilterNode::eq("a", 1), FilterNode::and(vec![FilterNode::not_eq("b", 2)])]);
        assert_eq!(f.conjuncts().unwrap().len(), 2);
        let or = FilterNode::or(vec![FilterNode::eq("a", 1), FilterNode::eq("a", 2)]);
        assert!(FilterNode::and(vec![or]).conjuncts().is_none());

        let avg = AggregationInfo::parse("AVG", "price").unwrap();
        assert_eq!(avg.result_name(), "avg(price)");
        let names: Vec<String> = avg.function_column_pairs().iter().map(|p| p.to_column_name()).collect();
        assert_eq!(names, vec!["SUM__price", "COUNT__*"]);
        assert_eq!(AggregationInfo::count().result_name(), "count(*)");
    }
}
