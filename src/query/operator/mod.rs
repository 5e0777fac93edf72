//! 查询算子
//!
//! 算子是一次性的：由计划节点 `run()` 产出，绑定到一个段（或多个段的合并），
//! `execute(self)` 消费自身。段内算子拉取 doc id 批次：
//!
//! ```text
//! Filter ─► DocIdSet ─► Projection ─► Aggregation | GroupBy | Selection
//!                                                  │
//!                                  Combine (跨段) ◄─┘ ─► InstanceResponse
//! ```

pub mod filter;
pub mod projection;
pub mod aggregation;
pub mod selection;
pub mod combine;
pub mod instance_response;

pub use aggregation::{AggregationGroupByOperator, AggregationOperator};
pub use combine::{CombineOperator, CombineStrategy};
pub use filter::FilterOperator;
pub use instance_response::InstanceResponseOperator;
pub use projection::{DocIdSetOperator, ProjectionOperator};
pub use selection::SelectionOperator;

use crate::common::Result;
use crate::query::results::IntermediateResultsBlock;

/// 单个段的顶层算子
pub enum SegmentOperator {
    Aggregation(AggregationOperator),
    GroupBy(AggregationGroupByOperator),
    Selection(SelectionOperator),
}

impl SegmentOperator {
    pub fn execute(self) -> Result<IntermediateResultsBlock> {
        match self {
            Self::Aggregation(op) => op.execute(),
            Self::GroupBy(op)     => op.execute(),
            Self::Selection(op)   => op.execute(),
        }
    }
}
