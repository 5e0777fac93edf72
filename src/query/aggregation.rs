//! 聚合函数与中间结果
//!
//! 函数按名字注册（大小写不敏感）。段内聚合产出 `AggregationResult`，
//! 跨段合并用 `merge`，最后由 `final_value` 得到结果值。
//! 空输入时 MIN 为 +∞、MAX 为 -∞、AVG 为 -∞。

use std::collections::HashMap;
use std::fmt;
use once_cell::sync::Lazy;
use crate::common::{OlapError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationFunctionType {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

static FUNCTIONS: Lazy<HashMap<&'static str, AggregationFunctionType>> = Lazy::new(|| {
    use AggregationFunctionType::*;
    [Count, Sum, Min, Max, Avg].into_iter().map(|f| (f.name(), f)).collect()
});

impl AggregationFunctionType {
    pub fn from_name(name: &str) -> Result<Self> {
        FUNCTIONS.get(name.to_ascii_uppercase().as_str())
            .copied()
            .ok_or_else(|| OlapError::bad_query(format!("unsupported aggregation function: {name}")))
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum   => "SUM",
            Self::Min   => "MIN",
            Self::Max   => "MAX",
            Self::Avg   => "AVG",
        }
    }

    /// 能直接物化成星型树预聚合列的函数
    pub fn is_value_aggregator(self) -> bool {
        !matches!(self, Self::Avg)
    }
}

impl fmt::Display for AggregationFunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── 中间结果 ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregationResult {
    Count(i64),
    Sum(f64),
    Min(f64),
    Max(f64),
    Avg { sum: f64, count: i64 },
}

impl AggregationResult {
    pub fn initial(function: AggregationFunctionType) -> Self {
        match function {
            AggregationFunctionType::Count => Self::Count(0),
            AggregationFunctionType::Sum   => Self::Sum(0.0),
            AggregationFunctionType::Min   => Self::Min(f64::INFINITY),
            AggregationFunctionType::Max   => Self::Max(f64::NEG_INFINITY),
            AggregationFunctionType::Avg   => Self::Avg { sum: 0.0, count: 0 },
        }
    }

    /// 累加一行原始值（COUNT 忽略值本身）
    pub fn add_value(&mut self, value: f64) {
        match self {
            Self::Count(c) => *c += 1,
            Self::Sum(s)   => *s += value,
            Self::Min(m)   => *m = m.min(value),
            Self::Max(m)   => *m = m.max(value),
            Self::Avg { sum, count } => {
                *sum += value;
                *count += 1;
            }
        }
    }

    /// 累加一条星型树预聚合文档：`value` 为本函数 pair 列的值，
    /// AVG 取 `SUM__col` 与 `COUNT__*` 两列
    pub fn add_pre_aggregated(&mut self, value: f64, count: f64) {
        match self {
            Self::Count(c) => *c += value as i64,
            Self::Avg { sum, count: n } => {
                *sum += value;
                *n += count as i64;
            }
            _ => self.add_value(value),
        }
    }

    pub fn merge(&mut self, other: &Self) {
        match (self, other) {
            (Self::Count(a), Self::Count(b)) => *a += b,
            (Self::Sum(a), Self::Sum(b))     => *a += b,
            (Self::Min(a), Self::Min(b))     => *a = a.min(*b),
            (Self::Max(a), Self::Max(b))     => *a = a.max(*b),
            (Self::Avg { sum, count }, Self::Avg { sum: s, count: c }) => {
                *sum += s;
                *count += c;
            }
            (a, b) => debug_assert!(false, "merging {a:?} with {b:?}"),
        }
    }

    pub fn final_value(&self) -> f64 {
        match *self {
            Self::Count(c) => c as f64,
            Self::Sum(v) | Self::Min(v) | Self::Max(v) => v,
            Self::Avg { count: 0, .. } => f64::NEG_INFINITY,
            Self::Avg { sum, count } => sum / count as f64,
        }
    }
}
