//! 查询执行服务与查询入口
//!
//! `QueryExecutorService` 包装一个共享线程池：提交一批任务，以绝对截止时间
//! 收集结果。任一任务失败或超时即设置取消标记，尚未开始的任务直接跳过，
//! 迟到的结果被丢弃。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use crossbeam::channel::{unbounded, RecvTimeoutError};
use threadpool::ThreadPool;
use tracing::{debug, warn};
use crate::common::{OlapError, Result};
use crate::config::QueryExecutorConfig;
use crate::query::plan::{InstancePlanMaker, PlanNode};
use crate::query::quota::{QueryQuota, TableQueryQuotaManager};
use crate::query::request::QueryRequest;
use crate::query::results::InstanceResponse;
use crate::segment::IndexSegment;

/// 一批任务共享的取消标记
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self { Self::default() }
    pub fn cancel(&self) { self.0.store(true, Ordering::Release); }
    pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::Acquire) }
}

pub type Task<T> = Box<dyn FnOnce(&CancellationToken) -> Result<T> + Send>;

pub struct QueryExecutorService {
    pool: ThreadPool,
}

impl QueryExecutorService {
    pub fn new(num_threads: usize) -> Self {
        Self { pool: ThreadPool::with_name("query-worker".into(), num_threads.max(1)) }
    }

    pub fn with_default_threads() -> Self { Self::new(num_cpus::get()) }

    pub fn num_threads(&self) -> usize { self.pool.max_count() }

    /// 并行执行并按提交顺序返回结果
    ///
    /// 客户端错误与超时原样返回，其余失败（含 panic）统一为 `Internal`。
    pub fn run_with_deadline<T: Send + 'static>(
        &self,
        tasks:    Vec<Task<T>>,
        deadline: Instant,
        what:     &str,
    ) -> Result<Vec<T>> {
        let num_tasks = tasks.len();
        let token = CancellationToken::new();
        let (tx, rx) = unbounded::<(usize, Result<T>)>();

        for (i, task) in tasks.into_iter().enumerate() {
            let tx = tx.clone();
            let token = token.clone();
            self.pool.execute(move || {
                let result = if token.is_cancelled() {
                    Err(OlapError::Internal("cancelled".into()))
                } else {
                    catch_unwind(AssertUnwindSafe(|| task(&token)))
                        .unwrap_or_else(|panic| Err(OlapError::Internal(panic_message(&panic))))
                };
                // 接收端可能已放弃
                let _ = tx.send((i, result));
            });
        }
        drop(tx);

        let mut slots: Vec<Option<T>> = (0..num_tasks).map(|_| None).collect();
        for _ in 0..num_tasks {
            match rx.recv_deadline(deadline) {
                Ok((i, Ok(v))) => slots[i] = Some(v),
                Ok((i, Err(e))) => {
                    token.cancel();
                    debug!(task = i, error = %e, "{what} task failed");
                    return Err(triage(e, what));
                }
                Err(RecvTimeoutError::Timeout) => {
                    token.cancel();
                    warn!(tasks = num_tasks, "{what} timed out, cancelling outstanding tasks");
                    return Err(OlapError::Timeout(what.to_string()));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    token.cancel();
                    return Err(OlapError::Internal(format!("{what} workers disconnected")));
                }
            }
        }
        slots.into_iter()
            .map(|s| s.ok_or_else(|| OlapError::Internal(format!("{what} task produced no result"))))
            .collect()
    }
}

fn triage(e: OlapError, what: &str) -> OlapError {
    match e {
        e if e.is_client_error() => e,
        e @ (OlapError::Timeout(_) | OlapError::Internal(_)) => e,
        e => OlapError::Internal(format!("{what} failed: {e}")),
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic.downcast_ref::<&str>().map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .map_or_else(|| "task panicked".to_string(), |m| format!("task panicked: {m}"))
}

// ── 查询入口 ──────────────────────────────────────────────────────────────────

/// 服务端查询入口：配额 → 校验 → 规划 → 执行
pub struct QueryExecutor {
    config:     QueryExecutorConfig,
    service:    Arc<QueryExecutorService>,
    quota:      Arc<dyn QueryQuota>,
    plan_maker: InstancePlanMaker,
}

impl QueryExecutor {
    pub fn new(config: QueryExecutorConfig) -> Result<Self> {
        Self::with_service(
            config,
            Arc::new(QueryExecutorService::with_default_threads()),
            Arc::new(TableQueryQuotaManager::default()),
        )
    }

    pub fn with_service(
        config:  QueryExecutorConfig,
        service: Arc<QueryExecutorService>,
        quota:   Arc<dyn QueryQuota>,
    ) -> Result<Self> {
        config.validate()?;
        let plan_maker = InstancePlanMaker::new(config.clone());
        Ok(Self { config, service, quota, plan_maker })
    }

    pub fn with_quota(mut self, quota: Arc<dyn QueryQuota>) -> Self {
        self.quota = quota; self
    }

    pub fn config(&self) -> &QueryExecutorConfig { &self.config }

    pub fn process_query(
        &self,
        request:  &QueryRequest,
        segments: &[Arc<dyn IndexSegment>],
    ) -> Result<InstanceResponse> {
        if !self.quota.acquire(&request.table_name) {
            warn!(table = %request.table_name, "rejecting query over quota");
            return Err(OlapError::QuotaExceeded(request.table_name.clone()));
        }
        request.validate()?;

        let timeout_ms = request.options.timeout_ms.unwrap_or(self.config.query_timeout_ms);
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let plan = self.plan_maker.make_instance_plan(request, segments, Arc::clone(&self.service), deadline)?;
        debug!(table = %request.table_name, "instance plan:\n{}", plan.show_tree(""));
        plan.run()?.execute()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_in_submission_order() {
        let service = QueryExecutorService::new(4);
        let tasks: Vec<Task<usize>> = (0..20usize)
            .map(|i| Box::new(move |_: &CancellationToken| {
                std::thread::sleep(Duration::from_millis((20 - i) as u64));
                Ok(i)
            }) as Task<usize>)
            .collect();
        let out = service.run_with_deadline(tasks, Instant::now() + Duration::from_secs(10), "test").unwrap();
        assert_eq!(out, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_error_triage() {
        let service = QueryExecutorService::new(2);
        let bad: Vec<Task<()>> = vec![
            Box::new(|_: &CancellationToken| Ok(())),
            Box::new(|_: &CancellationToken| Err(OlapError::bad_query("bad range"))),
        ];
        let err = service.run_with_deadline(bad, Instant::now() + Duration::from_secs(5), "test").unwrap_err();
        assert!(matches!(err, OlapError::BadQuery(_)));

        let io: Vec<Task<()>> = vec![Box::new(|_: &CancellationToken| {
            Err(OlapError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk")))
        })];
        let err = service.run_with_deadline(io, Instant::now() + Duration::from_secs(5), "test").unwrap_err();
        assert!(matches!(err, OlapError::Internal(_)));

        let panicking: Vec<Task<()>> = vec![Box::new(|_: &CancellationToken| panic!("boom"))];
        let err = service.run_with_deadline(panicking, Instant::now() + Duration::from_secs(5), "test").unwrap_err();
        assert!(matches!(err, OlapError::Internal(m) if m.contains("boom")));
    }

    #[test]
    fn test_deadline_cancels() {
        let service = QueryExecutorService::new(1);
        let started = Instant::now();
        let tasks: Vec<Task<()>> = (0..5)
            .map(|_| Box::new(|token: &CancellationToken| {
                if !token.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(200));
                }
                Ok(())
            }) as Task<()>)
            .collect();
        let err = service.run_with_deadline(tasks, Instant::now() + Duration::from_millis(20), "test").unwrap_err();
        assert!(matches!(err, OlapError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_millis(200));
    }
}
