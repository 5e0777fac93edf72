use std::time::Instant;
use crate::common::Result;
use crate::query::results::InstanceResponse;
use super::combine::CombineOperator;

/// 把合并结果包装成实例响应，附带执行统计与耗时
pub struct InstanceResponseOperator {
    combine:          CombineOperator,
    planning_time_ms: u64,
}

impl InstanceResponseOperator {
    pub fn new(combine: CombineOperator, planning_time_ms: u64) -> Self {
        Self { combine, planning_time_ms }
    }

    pub fn execute(self) -> Result<InstanceResponse> {
        let start = Instant::now();
        let combined = self.combine.execute()?;
        Ok(InstanceResponse {
            result: combined.result,
            stats: combined.stats,
            num_groups_limit_reached: combined.num_groups_limit_reached,
            planning_time_ms: self.planning_time_ms,
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}
