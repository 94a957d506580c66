//! 代理节点
//! 每个节点独立运行探测循环，统计信息全部为原子字段，无全局锁

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{Local, TimeZone, Utc};
use log::{debug, info};
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;

use super::conn::{BoxConn, PooledConn};
use super::metric::{Metric, NodeStats};

/// 探测目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub network: String,
    pub address: String,
}

impl Target {
    pub fn new(network: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            address: address.into(),
        }
    }

    pub fn tcp(address: impl Into<String>) -> Self {
        Self::new("tcp", address)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.network, self.address)
    }
}

/// 拨号器：经某个代理建立到目标的原始连接
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, network: &str, address: &str) -> io::Result<BoxConn>;
}

/// 探测策略
#[async_trait]
pub trait Checker: Send + Sync {
    /// 全局退出信号，每轮探测前检查一次
    fn is_exit(&self) -> bool;

    /// 本轮探测目标
    fn address(&self) -> Target;

    /// 校验刚建立的探测连接，可自行设置读超时
    async fn check_conn(&self, conn: &mut BoxConn) -> bool;

    /// 拨号错误通知，由实现方过滤掉正常的流结束等情况
    fn show_error(&self, err: &io::Error);
}

/// 探测间隔退避策略
///
/// 间隔 = `base * growth ^ (连续失败数 / step)`，按浮点计算，不超过 `max`。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub growth: f64,
    pub step: u32,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(3),
            growth: 5.0 / 3.0,
            step: 3,
            max: Duration::from_secs(300),
        }
    }
}

impl Backoff {
    pub fn delay(&self, failures: i64) -> Duration {
        let step = i64::from(self.step.max(1));
        let exponent = (failures.max(0) / step).min(i64::from(i32::MAX)) as i32;
        let secs = self.base.as_secs_f64() * self.growth.max(1.0).powi(exponent);

        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// 代理节点
pub struct ProxyNode {
    dialer: Arc<dyn Dialer>,
    backoff: Backoff,
    probing: AtomicBool,
    closed: AtomicBool,
    wake: Notify,
    stats: NodeStats,
}

// 探测循环退出时释放 probing 标记
struct ProbingGuard {
    node: Arc<ProxyNode>,
}

impl Drop for ProbingGuard {
    fn drop(&mut self) {
        self.node.probing.store(false, Ordering::Release);
    }
}

impl ProxyNode {
    pub fn new(dialer: Arc<dyn Dialer>) -> Arc<Self> {
        Self::with_backoff(dialer, Backoff::default())
    }

    pub fn with_backoff(dialer: Arc<dyn Dialer>, backoff: Backoff) -> Arc<Self> {
        Arc::new(Self {
            dialer,
            backoff,
            probing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            wake: Notify::new(),
            stats: NodeStats::default(),
        })
    }

    pub(crate) fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn is_probing(&self) -> bool {
        self.probing.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 请求停止探测
    ///
    /// 正在进行的探测不会被打断，循环在下一轮开始前退出；
    /// 退避等待会被立即唤醒。
    pub fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.wake.notify_one();
        }
    }

    /// 启动后台探测循环
    ///
    /// 同一时刻最多只有一个循环，已在探测时返回 false。
    pub fn start_check(self: &Arc<Self>, checker: Arc<dyn Checker>) -> bool {
        if self
            .probing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let guard = ProbingGuard {
            node: Arc::clone(self),
        };

        tokio::spawn(async move {
            let node = &guard.node;

            while !checker.is_exit() && !node.is_closed() {
                node.probe_once(checker.as_ref()).await;

                tokio::select! {
                    _ = tokio::time::sleep(node.backoff()) => {}
                    _ = node.wake.notified() => {}
                }
            }

            info!("探测循环退出: {}", node);
        });

        true
    }

    /// 执行一轮探测，返回本轮是否成功
    pub async fn probe_once(&self, checker: &dyn Checker) -> bool {
        let started = Instant::now();
        let started_at = Utc::now();

        let target = checker.address();

        self.stats.total.fetch_add(1, Ordering::Relaxed);

        let healthy = match self.dialer.dial(&target.network, &target.address).await {
            Ok(mut conn) => {
                let healthy = checker.check_conn(&mut conn).await;

                if healthy {
                    self.stats.success.fetch_add(1, Ordering::Relaxed);
                    self.stats.failures.store(0, Ordering::Relaxed);
                    let elapsed = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
                    self.stats.round_trip_ms.store(elapsed, Ordering::Relaxed);
                } else {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                }

                if let Err(e) = conn.shutdown().await {
                    debug!("关闭探测连接失败 {}: {}", target, e);
                }

                healthy
            }
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                checker.show_error(&e);
                false
            }
        };

        self.stats.refresh_usability();

        self.stats.last_probe.store(
            started_at.timestamp_nanos_opt().unwrap_or(i64::MAX),
            Ordering::Relaxed,
        );

        debug!(
            "探测 {} {}: {}",
            target,
            if healthy { "成功" } else { "失败" },
            self
        );

        healthy
    }

    /// 按当前连续失败数计算下一次等待时间
    pub fn backoff(&self) -> Duration {
        self.backoff
            .delay(self.stats.failures.load(Ordering::Relaxed))
    }

    /// 经本节点建立业务连接，错误原样返回
    pub async fn dial(self: &Arc<Self>, network: &str, address: &str) -> io::Result<PooledConn> {
        let conn = self.dialer.dial(network, address).await?;
        Ok(PooledConn::new(conn, Arc::clone(self)))
    }

    pub fn metric(&self, metric: Metric) -> i64 {
        metric.load(&self.stats)
    }

    /// 按单个指标比较，self 严格优于 other 时返回 true
    pub fn rank_before(&self, other: &ProxyNode, metric: Metric) -> bool {
        metric.ranks_before(&self.stats, &other.stats)
    }
}

impl fmt::Display for ProxyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self.metric(Metric::LastProbeTimestamp);
        let last = if last > 0 {
            Local
                .timestamp_nanos(last)
                .format("%H:%M:%S%.3f")
                .to_string()
        } else {
            "-".to_string()
        };

        write!(
            f,
            "total={:>6} ok={:>6} fail={:>4} rtt={:>5}ms usability={:>3}% last={:>12} active={:>3}",
            self.metric(Metric::Total),
            self.metric(Metric::SuccessCount),
            self.metric(Metric::ConsecutiveFailures),
            self.metric(Metric::LastRoundTripMillis),
            self.metric(Metric::Usability),
            last,
            self.metric(Metric::ActiveConnections),
        )
    }
}

impl fmt::Debug for ProxyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyNode")
            .field("probing", &self.is_probing())
            .field("closed", &self.is_closed())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::testing::{DuplexDialer, FailingDialer, ScriptedChecker, wait_until};

    fn fast() -> Backoff {
        Backoff {
            base: Duration::from_millis(1),
            growth: 5.0 / 3.0,
            step: 3,
            max: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_backoff_escalates_every_third_failure() {
        let backoff = Backoff::default();

        assert_eq!(backoff.delay(0), Duration::from_secs(3));
        assert_eq!(backoff.delay(2), Duration::from_secs(3));
        assert!((backoff.delay(3).as_secs_f64() - 5.0).abs() < 1e-6);
        assert!(backoff.delay(6) > backoff.delay(3));
        assert_eq!(backoff.delay(10_000), Duration::from_secs(300));
        assert_eq!(backoff.delay(-1), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_always_failing_dialer() {
        let node = ProxyNode::new(Arc::new(FailingDialer::new(io::ErrorKind::ConnectionRefused)));
        let checker = ScriptedChecker::always(true);

        for _ in 0..5 {
            assert!(!node.probe_once(&checker).await);
        }

        assert_eq!(node.metric(Metric::Total), 5);
        assert_eq!(node.metric(Metric::SuccessCount), 0);
        assert_eq!(node.metric(Metric::Usability), 0);
        assert_eq!(node.metric(Metric::ConsecutiveFailures), 5);
        assert_eq!(checker.errors(), 5);
        assert!(node.metric(Metric::LastProbeTimestamp) > 0);
    }

    #[tokio::test]
    async fn test_single_successful_probe() {
        let node = ProxyNode::new(Arc::new(DuplexDialer::new(b"SSH-2.0-OpenSSH")));
        let checker = ScriptedChecker::always(true);

        assert!(node.probe_once(&checker).await);

        assert_eq!(node.metric(Metric::Total), 1);
        assert_eq!(node.metric(Metric::Usability), 100);
        assert!(node.metric(Metric::LastRoundTripMillis) >= 0);
        assert_eq!(node.metric(Metric::ActiveConnections), 0);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let node = ProxyNode::new(Arc::new(DuplexDialer::new(b"x")));
        let checker = ScriptedChecker::script(vec![false, false, false, true, false]);

        for _ in 0..3 {
            node.probe_once(&checker).await;
        }
        assert_eq!(node.metric(Metric::ConsecutiveFailures), 3);

        node.probe_once(&checker).await;
        assert_eq!(node.metric(Metric::ConsecutiveFailures), 0);
        assert_eq!(node.metric(Metric::SuccessCount), 1);

        node.probe_once(&checker).await;
        assert_eq!(node.metric(Metric::ConsecutiveFailures), 1);
        assert_eq!(node.metric(Metric::Total), 5);
        assert_eq!(node.metric(Metric::Usability), 20);
        assert!(node.metric(Metric::SuccessCount) <= node.metric(Metric::Total));
    }

    #[tokio::test]
    async fn test_start_check_runs_single_loop() {
        let node = ProxyNode::with_backoff(Arc::new(DuplexDialer::new(b"x")), fast());
        let checker = Arc::new(ScriptedChecker::always(true));

        assert!(node.start_check(checker.clone()));
        assert!(!node.start_check(checker.clone()));
        assert!(node.is_probing());

        assert!(wait_until(|| node.metric(Metric::Total) >= 3).await);

        node.close();
        assert!(wait_until(|| !node.is_probing()).await);

        // 关闭后重新启动会立即退出
        let total = node.metric(Metric::Total);
        assert!(node.start_check(checker));
        assert!(wait_until(|| !node.is_probing()).await);
        assert_eq!(node.metric(Metric::Total), total);
    }

    #[tokio::test]
    async fn test_concurrent_start_check() {
        let node = ProxyNode::with_backoff(Arc::new(DuplexDialer::new(b"x")), fast());
        let checker = Arc::new(ScriptedChecker::always(true));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let node = node.clone();
                let checker = checker.clone();
                tokio::spawn(async move { node.start_check(checker) })
            })
            .collect();

        let mut started = 0;
        for handle in handles {
            if handle.await.unwrap() {
                started += 1;
            }
        }
        assert_eq!(started, 1);

        node.close();
        assert!(wait_until(|| !node.is_probing()).await);
    }

    #[tokio::test]
    async fn test_checker_exit_stops_loop() {
        let node = ProxyNode::with_backoff(Arc::new(DuplexDialer::new(b"x")), fast());
        let checker = Arc::new(ScriptedChecker::always(true).exit_after(4));

        assert!(node.start_check(checker));
        assert!(wait_until(|| !node.is_probing()).await);

        assert_eq!(node.metric(Metric::Total), 4);
        assert!(!node.is_closed());
    }

    #[tokio::test]
    async fn test_rank_before_by_metric() {
        let good = ProxyNode::new(Arc::new(DuplexDialer::new(b"x")));
        let bad = ProxyNode::new(Arc::new(FailingDialer::new(io::ErrorKind::TimedOut)));
        let checker = ScriptedChecker::always(true);

        good.probe_once(&checker).await;
        bad.probe_once(&checker).await;

        assert!(good.rank_before(&bad, Metric::Usability));
        assert!(good.rank_before(&bad, Metric::SuccessCount));
        assert!(good.rank_before(&bad, Metric::ConsecutiveFailures));
        assert!(!bad.rank_before(&good, Metric::Usability));
        assert!(!good.rank_before(&bad, Metric::Total));
    }

    #[test]
    fn test_summary_line() {
        let node = ProxyNode::new(Arc::new(FailingDialer::new(io::ErrorKind::TimedOut)));
        let line = node.to_string();

        assert!(line.contains("total="));
        assert!(line.contains("usability=  0%"));
        assert!(line.contains(" -"));
        assert!(!line.contains('\n'));
    }
}
