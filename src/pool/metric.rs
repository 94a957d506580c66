//! 节点统计指标
//! 每个指标是独立的原子整数，指标名到访问器/比较方向通过查找表映射

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::PoolError;

/// 单个节点的探测统计
///
/// 各字段独立读写（Relaxed），不保证跨字段的一致快照：
/// 读者可能看到来自相邻两轮探测的 `total` 与 `success`。
#[derive(Debug, Default)]
pub struct NodeStats {
    pub(crate) total: AtomicI64,
    pub(crate) success: AtomicI64,
    pub(crate) failures: AtomicI64,
    pub(crate) round_trip_ms: AtomicI64,
    pub(crate) usability: AtomicI64,
    pub(crate) last_probe: AtomicI64,
    pub(crate) active: AtomicI64,
}

impl NodeStats {
    /// 按当前成功数/总数重新计算可用率（向下取整）
    pub(crate) fn refresh_usability(&self) {
        let total = self.total.load(Ordering::Relaxed);
        let success = self.success.load(Ordering::Relaxed);
        let usability = if total > 0 {
            (success.min(total) * 100) / total
        } else {
            0
        };
        self.usability.store(usability, Ordering::Relaxed);
    }
}

/// 指标的优劣方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HigherIsBetter,
    LowerIsBetter,
}

/// 可查询的节点指标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Total,
    SuccessCount,
    ConsecutiveFailures,
    LastRoundTripMillis,
    Usability,
    LastProbeTimestamp,
    ActiveConnections,
}

struct MetricSpec {
    name: &'static str,
    short: &'static str,
    direction: Direction,
    field: fn(&NodeStats) -> &AtomicI64,
}

fn total(s: &NodeStats) -> &AtomicI64 {
    &s.total
}

fn success(s: &NodeStats) -> &AtomicI64 {
    &s.success
}

fn failures(s: &NodeStats) -> &AtomicI64 {
    &s.failures
}

fn round_trip(s: &NodeStats) -> &AtomicI64 {
    &s.round_trip_ms
}

fn usability(s: &NodeStats) -> &AtomicI64 {
    &s.usability
}

fn last_probe(s: &NodeStats) -> &AtomicI64 {
    &s.last_probe
}

fn active(s: &NodeStats) -> &AtomicI64 {
    &s.active
}

// 顺序与 Metric 的判别值一致
static TABLE: [MetricSpec; 7] = [
    MetricSpec {
        name: "total",
        short: "total",
        direction: Direction::HigherIsBetter,
        field: total,
    },
    MetricSpec {
        name: "successCount",
        short: "okcnt",
        direction: Direction::HigherIsBetter,
        field: success,
    },
    MetricSpec {
        name: "consecutiveFailureCount",
        short: "failcnt",
        direction: Direction::LowerIsBetter,
        field: failures,
    },
    MetricSpec {
        name: "lastRoundTripMillis",
        short: "timeout",
        direction: Direction::LowerIsBetter,
        field: round_trip,
    },
    MetricSpec {
        name: "usabilityPercent",
        short: "usability",
        direction: Direction::HigherIsBetter,
        field: usability,
    },
    MetricSpec {
        name: "lastProbeTimestamp",
        short: "last",
        direction: Direction::HigherIsBetter,
        field: last_probe,
    },
    MetricSpec {
        name: "activeConnectionCount",
        short: "count",
        direction: Direction::LowerIsBetter,
        field: active,
    },
];

impl Metric {
    pub const ALL: [Metric; 7] = [
        Metric::Total,
        Metric::SuccessCount,
        Metric::ConsecutiveFailures,
        Metric::LastRoundTripMillis,
        Metric::Usability,
        Metric::LastProbeTimestamp,
        Metric::ActiveConnections,
    ];

    fn spec(self) -> &'static MetricSpec {
        &TABLE[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    pub fn direction(self) -> Direction {
        self.spec().direction
    }

    /// 读取指标当前值
    pub fn load(self, stats: &NodeStats) -> i64 {
        (self.spec().field)(stats).load(Ordering::Relaxed)
    }

    /// `a` 在该指标上是否严格优于 `b`
    pub fn ranks_before(self, a: &NodeStats, b: &NodeStats) -> bool {
        let (a, b) = (self.load(a), self.load(b));
        match self.direction() {
            Direction::HigherIsBetter => b < a,
            Direction::LowerIsBetter => b > a,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = PoolError;

    /// 同时接受完整名称与短名称（如 `usabilityPercent` / `usability`）
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|m| {
                let spec = m.spec();
                spec.name.eq_ignore_ascii_case(s) || spec.short.eq_ignore_ascii_case(s)
            })
            .ok_or_else(|| PoolError::UnknownMetric(s.to_string()))
    }
}
