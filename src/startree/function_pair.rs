//! 预聚合列：`FUNCTION__column`
//!
//! 星型树为每个 function-column pair 物化一列 f64。构建时每条原始记录先经
//! `initial_value` 转成聚合输入（COUNT 为 1），合并记录时用 `merge`。

use std::fmt;
use crate::common::{OlapError, Result};
use crate::query::aggregation::AggregationFunctionType;

pub const DELIMITER: &str = "__";
/// `COUNT__*`
pub const STAR_COLUMN: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregationFunctionColumnPair {
    pub function: AggregationFunctionType,
    pub column:   String,
}

impl AggregationFunctionColumnPair {
    pub fn new(function: AggregationFunctionType, column: &str) -> Self {
        let column = if function == AggregationFunctionType::Count { STAR_COLUMN } else { column };
        Self { function, column: column.to_string() }
    }

    pub fn count_star() -> Self {
        Self::new(AggregationFunctionType::Count, STAR_COLUMN)
    }

    pub fn from_column_name(name: &str) -> Result<Self> {
        let (function, column) = name.split_once(DELIMITER)
            .ok_or_else(|| OlapError::Config(format!("invalid function-column pair: {name}")))?;
        let function = AggregationFunctionType::from_name(function)
            .map_err(|_| OlapError::Config(format!("unknown function in pair: {name}")))?;
        if !function.is_value_aggregator() {
            return Err(OlapError::Config(format!("{function} cannot be pre-aggregated: {name}")));
        }
        if function != AggregationFunctionType::Count && (column.is_empty() || column == STAR_COLUMN) {
            return Err(OlapError::Config(format!("{function} needs a column: {name}")));
        }
        Ok(Self::new(function, column))
    }

    pub fn to_column_name(&self) -> String {
        format!("{}{DELIMITER}{}", self.function.name(), self.column)
    }

    /// 原始值 → 聚合输入
    pub fn initial_value(&self, raw: f64) -> f64 {
        match self.function {
            AggregationFunctionType::Count => 1.0,
            _ => raw,
        }
    }

    pub fn merge(&self, a: f64, b: f64) -> f64 {
        match self.function {
            AggregationFunctionType::Min => a.min(b),
            AggregationFunctionType::Max => a.max(b),
            _ => a + b,
        }
    }
}

impl fmt::Display for AggregationFunctionColumnPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_column_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let p = AggregationFunctionColumnPair::from_column_name("SUM__price").unwrap();
        assert_eq!(p.function, AggregationFunctionType::Sum);
        assert_eq!(p.column, "price");
        assert_eq!(p.to_column_name(), "SUM__price");
        assert_eq!(AggregationFunctionColumnPair::from_column_name("count__*").unwrap(), AggregationFunctionColumnPair::count_star());
        assert!(AggregationFunctionColumnPair::from_column_name("SUM").is_err());
        assert!(AggregationFunctionColumnPair::from_column_name("AVG__price").is_err());
        assert!(AggregationFunctionColumnPair::from_column_name("MAX__*").is_err());
    }

    #[test]
    fn test_value_aggregation() {
        let count = AggregationFunctionColumnPair::count_star();
        assert_eq!(count.initial_value(42.0), 1.0);
        assert_eq!(count.merge(2.0, 3.0), 5.0);
        let min = AggregationFunctionColumnPair::from_column_name("MIN__x").unwrap();
        assert_eq!(min.merge(2.0, -3.0), -3.0);
        let max = AggregationFunctionColumnPair::from_column_name("MAX__x").unwrap();
        assert_eq!(max.merge(2.0, -3.0), 2.0);
    }
}
