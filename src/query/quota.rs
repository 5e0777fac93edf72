//! 表级查询配额
//!
//! 每个配置了 `maxQueriesPerSecond` 的物理表（`xxx_OFFLINE` / `xxx_REALTIME`）
//! 持有一个令牌桶，速率为 `总速率 / 在线 broker 数`；另有 1 秒窗口的命中计数。
//! 没有配额的表总是放行。

use std::collections::HashMap;
use std::time::Instant;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use crate::common::Result;
use crate::config::QuotaConfig;

pub const OFFLINE_SUFFIX: &str  = "_OFFLINE";
pub const REALTIME_SUFFIX: &str = "_REALTIME";

/// 查询入口消费的配额协作者
pub trait QueryQuota: Send + Sync {
    /// 拿不到令牌时返回 false，调用方立即拒绝，不排队
    fn acquire(&self, table_name: &str) -> bool;
}

// ── 令牌桶 ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct RateLimiter {
    rate:        f64,
    capacity:    f64,
    tokens:      f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// 初始只有一个令牌，之后按速率补充，最多攒一秒
    fn new(rate: f64, now: Instant) -> Self {
        Self { rate, capacity: rate.max(1.0), tokens: 1.0, last_refill: now }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn set_rate(&mut self, rate: f64, now: Instant) {
        self.refill(now);
        self.rate = rate;
        self.capacity = rate.max(1.0);
        self.tokens = self.tokens.min(self.capacity);
    }
}

// ── 命中计数 ──────────────────────────────────────────────────────────────────

const HIT_BUCKETS: usize = 100;
const HIT_BUCKET_MS: u64 = 10;

/// 1 秒滑动窗口，100 个 10ms 桶
#[derive(Debug)]
struct HitCounter {
    origin: Instant,
    counts: [u32; HIT_BUCKETS],
    slots:  [u64; HIT_BUCKETS],
}

impl HitCounter {
    fn new(origin: Instant) -> Self {
        Self { origin, counts: [0; HIT_BUCKETS], slots: [u64::MAX; HIT_BUCKETS] }
    }

    fn slot(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.origin).as_millis() as u64 / HIT_BUCKET_MS
    }

    fn hit(&mut self, now: Instant) {
        let slot = self.slot(now);
        let idx = (slot % HIT_BUCKETS as u64) as usize;
        if self.slots[idx] != slot {
            self.slots[idx] = slot;
            self.counts[idx] = 0;
        }
        self.counts[idx] += 1;
    }

    fn hit_count(&self, now: Instant) -> u32 {
        let current = self.slot(now);
        self.slots.iter().zip(&self.counts)
            .filter(|(s, _)| **s != u64::MAX && current.saturating_sub(**s) < HIT_BUCKETS as u64)
            .map(|(_, c)| *c)
            .sum()
    }
}

// ── 管理器 ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct TableQuota {
    overall_rate: f64,
    limiter:      RateLimiter,
    hits:         HitCounter,
}

#[derive(Debug)]
pub struct TableQueryQuotaManager {
    tables:               Mutex<HashMap<String, TableQuota>>,
    online_broker_count:  Mutex<usize>,
}

impl TableQueryQuotaManager {
    pub fn new(online_broker_count: usize) -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            online_broker_count: Mutex::new(online_broker_count.max(1)),
        }
    }

    /// 按配置创建或替换表的配额；未配置 QPS 时移除已有配额
    pub fn init_table_quota(&self, table_name_with_type: &str, config: &QuotaConfig) -> Result<()> {
        let Some(overall_rate) = config.max_qps()? else {
            info!(table = table_name_with_type, "no qps quota configured");
            self.drop_table_quota(table_name_with_type);
            return Ok(());
        };
        let brokers = *self.online_broker_count.lock();
        let rate = overall_rate / brokers as f64;
        let now = Instant::now();
        self.tables.lock().insert(table_name_with_type.to_string(), TableQuota {
            overall_rate,
            limiter: RateLimiter::new(rate, now),
            hits: HitCounter::new(now),
        });
        info!(table = table_name_with_type, overall_rate, per_broker_rate = rate, brokers, "initialized query quota");
        Ok(())
    }

    pub fn drop_table_quota(&self, table_name_with_type: &str) {
        if self.tables.lock().remove(table_name_with_type).is_some() {
            info!(table = table_name_with_type, "dropped query quota");
        }
    }

    /// 在线 broker 数变化时重算每张表的单 broker 速率
    pub fn update_online_broker_count(&self, count: usize) {
        let count = count.max(1);
        *self.online_broker_count.lock() = count;
        let now = Instant::now();
        let mut rebuilt = 0;
        for (table, quota) in self.tables.lock().iter_mut() {
            let rate = quota.overall_rate / count as f64;
            if (rate - quota.limiter.rate).abs() > 0.001 {
                debug!(table = %table, previous = quota.limiter.rate, rate, "rescaled query quota");
                quota.limiter.set_rate(rate, now);
                rebuilt += 1;
            }
        }
        info!(brokers = count, rebuilt, "processed query quota change");
    }

    /// 单 broker 速率；表无配额时为 None
    pub fn rate(&self, table_name_with_type: &str) -> Option<f64> {
        self.tables.lock().get(table_name_with_type).map(|q| q.limiter.rate)
    }

    /// 最近一秒的请求数
    pub fn hit_count(&self, table_name_with_type: &str) -> u32 {
        self.tables.lock().get(table_name_with_type).map_or(0, |q| q.hits.hit_count(Instant::now()))
    }

    pub fn num_tables(&self) -> usize { self.tables.lock().len() }

    fn try_acquire_table(&self, table_name_with_type: &str, now: Instant) -> bool {
        let mut tables = self.tables.lock();
        let Some(quota) = tables.get_mut(table_name_with_type) else { return true };
        quota.hits.hit(now);
        if quota.limiter.try_acquire(now) {
            return true;
        }
        warn!(
            table = table_name_with_type,
            per_broker_rate = quota.limiter.rate,
            current_qps = quota.hits.hit_count(now),
            "query quota exceeded",
        );
        false
    }
}

impl Default for TableQueryQuotaManager {
    fn default() -> Self { Self::new(1) }
}

impl QueryQuota for TableQueryQuotaManager {
    fn acquire(&self, table_name: &str) -> bool {
        let now = Instant::now();
        if table_name.ends_with(OFFLINE_SUFFIX) || table_name.ends_with(REALTIME_SUFFIX) {
            return self.try_acquire_table(table_name, now);
        }
        // 原始表名：离线与实时两张物理表都要放行；按原名配置的配额也生效
        let offline  = self.try_acquire_table(&format!("{table_name}{OFFLINE_SUFFIX}"), now);
        let realtime = self.try_acquire_table(&format!("{table_name}{REALTIME_SUFFIX}"), now);
        let raw      = self.try_acquire_table(table_name, now);
        offline && realtime && raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_no_quota_always_acquires() {
        let mgr = TableQueryQuotaManager::new(1);
        for _ in 0..100 {
            assert!(mgr.acquire("events"));
        }
        mgr.init_table_quota("events_OFFLINE", &QuotaConfig::default()).unwrap();
        assert_eq!(mgr.num_tables(), 0);
    }

    #[test]
    fn test_rate_limit_rejects_burst() {
        let mgr = TableQueryQuotaManager::new(1);
        mgr.init_table_quota("events_OFFLINE", &QuotaConfig::with_max_qps("1")).unwrap();
        assert!(mgr.acquire("events"));
        assert!(!mgr.acquire("events_OFFLINE"));
        assert_eq!(mgr.hit_count("events_OFFLINE"), 2);
        assert!(mgr.acquire("other"));
    }

    #[test]
    fn test_broker_count_rescales_rate() {
        let mgr = TableQueryQuotaManager::new(2);
        mgr.init_table_quota("events_REALTIME", &QuotaConfig::with_max_qps("100")).unwrap();
        assert_eq!(mgr.rate("events_REALTIME"), Some(50.0));
        mgr.update_online_broker_count(4);
        assert_eq!(mgr.rate("events_REALTIME"), Some(25.0));
        assert!(mgr.init_table_quota("bad_OFFLINE", &QuotaConfig::with_max_qps("abc")).is_err());
    }

    #[test]
    fn test_token_bucket_refills() {
        let t0 = Instant::now();
        let mut limiter = RateLimiter::new(10.0, t0);
        assert!(limiter.try_acquire(t0));
        assert!(!limiter.try_acquire(t0));
        assert!(limiter.try_acquire(t0 + Duration::from_millis(150)));
        // 最多攒一秒的量
        let later = t0 + Duration::from_secs(10);
        let granted = (0..20).filter(|_| limiter.try_acquire(later)).count();
        assert_eq!(granted, 10);
    }

    #[test]
    fn test_hit_counter_window() {
        let t0 = Instant::now();
        let mut hits = HitCounter::new(t0);
        hits.hit(t0);
        hits.hit(t0 + Duration::from_millis(500));
        assert_eq!(hits.hit_count(t0 + Duration::from_millis(900)), 2);
        assert_eq!(hits.hit_count(t0 + Duration::from_millis(1200)), 1);
        assert_eq!(hits.hit_count(t0 + Duration::from_secs(3)), 0);
    }
}
