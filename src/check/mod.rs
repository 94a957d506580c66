//! 探测策略
//! 读取目标服务的首包（如 SSH banner）判断代理是否可用

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{error, warn};
use rand::Rng;
use regex::Regex;
use tokio::io::AsyncReadExt;

use crate::config::Config;
use crate::error::{PoolError, PoolResult};
use crate::pool::{BoxConn, Checker, Target};

pub struct Stats {
    pub checked: AtomicU64,
    pub alive: AtomicU64,
    pub failed: AtomicU64,
    pub dial_errors: AtomicU64,
    pub total_bytes: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            checked: AtomicU64::new(0),
            alive: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dial_errors: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
        }
    }

    pub fn record(&self, alive: bool) {
        self.checked.fetch_add(1, Ordering::Relaxed);
        if alive {
            self.alive.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn get_success_rate(&self) -> f64 {
        let checked = self.checked.load(Ordering::Relaxed);
        let alive = self.alive.load(Ordering::Relaxed);

        if checked > 0 {
            (alive as f64 / checked as f64) * 100.0
        } else {
            0.0
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

/// 首包校验探测策略
///
/// 每轮从目标列表中随机选一个，读取首包并用正则匹配；
/// 多个节点可共享同一个实例，`shutdown` 让所有节点的探测循环退出。
pub struct BannerChecker {
    targets: Vec<Target>,
    expect: Regex,
    read_timeout: Duration,
    exit: AtomicBool,
    stats: Arc<Stats>,
}

impl BannerChecker {
    pub fn new(targets: Vec<Target>, expect: &str, read_timeout: Duration) -> PoolResult<Self> {
        if targets.is_empty() {
            return Err(PoolError::InvalidConfig {
                field: "targets",
                reason: "至少需要一个探测目标".to_string(),
            });
        }

        let expect = Regex::new(expect).map_err(|e| PoolError::InvalidConfig {
            field: "expect",
            reason: e.to_string(),
        })?;

        Ok(Self {
            targets,
            expect,
            read_timeout,
            exit: AtomicBool::new(false),
            stats: Arc::new(Stats::new()),
        })
    }

    pub fn from_config(config: &Config) -> PoolResult<Self> {
        let targets = config
            .targets
            .iter()
            .map(|address| Target::new(config.network.as_str(), address.as_str()))
            .collect();

        Self::new(targets, &config.expect, config.get_read_timeout())
    }

    /// 通知所有使用本策略的探测循环退出
    pub fn shutdown(&self) {
        self.exit.store(true, Ordering::Release);
    }

    pub fn get_stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    pub fn print_stats(&self) {
        let checked = self.stats.checked.load(Ordering::Relaxed);
        let alive = self.stats.alive.load(Ordering::Relaxed);
        let failed = self.stats.failed.load(Ordering::Relaxed);
        let dial_errors = self.stats.dial_errors.load(Ordering::Relaxed);
        let total_bytes = self.stats.total_bytes.load(Ordering::Relaxed);

        println!("探测统计:");
        println!("  已校验连接: {}", checked);
        println!("  校验通过: {}", alive);
        println!("  校验失败: {}", failed);
        println!("  拨号失败: {}", dial_errors);
        println!("  读取字节: {}", total_bytes);

        if checked > 0 {
            println!("  成功率: {:.2}%", self.stats.get_success_rate());
        }
    }
}

#[async_trait]
impl Checker for BannerChecker {
    fn is_exit(&self) -> bool {
        self.exit.load(Ordering::Acquire)
    }

    fn address(&self) -> Target {
        let idx = if self.targets.len() > 1 {
            rand::thread_rng().gen_range(0..self.targets.len())
        } else {
            0
        };
        self.targets[idx].clone()
    }

    async fn check_conn(&self, conn: &mut BoxConn) -> bool {
        let mut buffer = [0u8; 1024];

        let alive = match tokio::time::timeout(self.read_timeout, conn.read(&mut buffer)).await {
            Ok(Ok(0)) => {
                warn!("探测连接未收到任何数据");
                false
            }
            Ok(Ok(n)) => {
                self.stats.add_bytes(n as u64);
                self.expect.is_match(&String::from_utf8_lossy(&buffer[..n]))
            }
            Ok(Err(e)) => {
                if e.kind() != io::ErrorKind::UnexpectedEof {
                    error!("读取探测连接失败: {}", e);
                }
                false
            }
            Err(_) => {
                warn!("读取探测连接超时 ({:?})", self.read_timeout);
                false
            }
        };

        self.stats.record(alive);
        alive
    }

    fn show_error(&self, err: &io::Error) {
        self.stats.dial_errors.fetch_add(1, Ordering::Relaxed);

        if err.kind() != io::ErrorKind::UnexpectedEof {
            error!("探测拨号失败: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn conn_with(payload: &'static [u8]) -> BoxConn {
        let (client, mut server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            server.write_all(payload).await.unwrap();
        });
        Box::new(client)
    }

    fn checker() -> BannerChecker {
        BannerChecker::new(
            vec![Target::tcp("elitah.xyz:22")],
            "SSH",
            Duration::from_millis(200),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_banner_match() {
        let checker = checker();

        let mut conn = conn_with(b"SSH-2.0-OpenSSH_8.9\r\n");
        assert!(checker.check_conn(&mut conn).await);

        let mut conn = conn_with(b"HTTP/1.1 400 Bad Request\r\n");
        assert!(!checker.check_conn(&mut conn).await);

        let stats = checker.get_stats();
        assert_eq!(stats.checked.load(Ordering::Relaxed), 2);
        assert_eq!(stats.alive.load(Ordering::Relaxed), 1);
        assert!((stats.get_success_rate() - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_empty_stream_fails() {
        let checker = checker();
        let mut conn = conn_with(b"");
        assert!(!checker.check_conn(&mut conn).await);
    }

    #[tokio::test]
    async fn test_read_timeout_fails() {
        let checker = checker();
        let (client, _server) = tokio::io::duplex(64);
        let mut conn: BoxConn = Box::new(client);

        assert!(!checker.check_conn(&mut conn).await);
        assert_eq!(checker.get_stats().failed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_address_rotates_within_targets() {
        let targets = vec![Target::tcp("a:22"), Target::tcp("b:22")];
        let checker = BannerChecker::new(targets.clone(), "SSH", Duration::from_secs(1)).unwrap();

        for _ in 0..20 {
            assert!(targets.contains(&checker.address()));
        }
    }

    #[test]
    fn test_shutdown_sets_exit() {
        let checker = checker();
        assert!(!checker.is_exit());
        checker.shutdown();
        assert!(checker.is_exit());
    }

    #[test]
    fn test_invalid_settings() {
        assert!(BannerChecker::new(vec![], "SSH", Duration::from_secs(1)).is_err());
        assert!(
            BannerChecker::new(vec![Target::tcp("a:22")], "(", Duration::from_secs(1)).is_err()
        );
    }

    #[test]
    fn test_from_config() {
        let config = Config {
            network: "tcp4".to_string(),
            targets: vec!["example.com:22".to_string()],
            ..Config::default()
        };
        let checker = BannerChecker::from_config(&config).unwrap();
        assert_eq!(checker.address(), Target::new("tcp4", "example.com:22"));
    }
}
