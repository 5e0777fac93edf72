//! 查询执行层
//!
//! ```text
//! QueryExecutor::process_query
//!   ├─ QueryQuota::acquire          配额不足立即拒绝
//!   ├─ QueryRequest::validate       非法查询 → BadQuery
//!   ├─ InstancePlanMaker            每段一个计划，能用星型树时走星型树
//!   └─ InstanceResponsePlanNode::run → InstanceResponseOperator::execute
//! ```

pub mod aggregation;
pub mod request;
pub mod predicate;
pub mod results;
pub mod operator;
pub mod plan;
pub mod executor;
pub mod quota;

pub use aggregation::{AggregationFunctionType, AggregationResult};
pub use executor::{CancellationToken, QueryExecutor, QueryExecutorService};
pub use plan::{InstancePlanMaker, PlanNode};
pub use quota::{QueryQuota, TableQueryQuotaManager};
pub use request::{
    AggregationInfo, FilterNode, GroupByMode, OrderBy, Predicate, QueryOptions, QueryRequest,
};
pub use results::{ExecutionStatistics, GroupByResult, InstanceResponse, QueryResult};
