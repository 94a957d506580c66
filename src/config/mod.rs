use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{PoolError, PoolResult};
use crate::pool::{Backoff, RankOrder};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // 日志配置
    pub log_level: String,

    // 代理节点（socks4://host:port?timeout=3s）
    pub proxies: Vec<String>,
    pub dial_timeout: u64,

    // 探测参数
    pub network: String,
    pub targets: Vec<String>,
    pub expect: String,
    pub read_timeout: u64,

    // 探测间隔退避（毫秒）
    pub backoff_base: u64,
    pub backoff_growth: f64,
    pub backoff_step: u32,
    pub backoff_max: u64,

    // 排序与淘汰
    pub rank_order: RankOrder,
    pub close_bad_threshold: i64,
    pub refresh_interval: u64,

    // 业务流量测试
    pub traffic_url: Option<String>,
    pub traffic_timeout: u64,

    // 进度显示
    pub print_progress: bool,
    pub show_top: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            proxies: vec![],
            dial_timeout: 3000,
            network: "tcp".to_string(),
            targets: vec!["elitah.xyz:22".to_string()],
            expect: "SSH".to_string(),
            read_timeout: 10000,
            backoff_base: 3000,
            backoff_growth: 5.0 / 3.0,
            backoff_step: 3,
            backoff_max: 300_000,
            rank_order: RankOrder::Usability,
            close_bad_threshold: 10,
            refresh_interval: 3,
            traffic_url: Some("http://ddns.oray.com/checkip".to_string()),
            traffic_timeout: 10000,
            print_progress: true,
            show_top: 10,
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> PoolResult<()> {
        if self.targets.is_empty() {
            return Err(PoolError::InvalidConfig {
                field: "targets",
                reason: "至少需要一个探测目标".to_string(),
            });
        }

        if !self.backoff_growth.is_finite() || self.backoff_growth < 1.0 {
            return Err(PoolError::InvalidConfig {
                field: "backoff_growth",
                reason: format!("必须 >= 1.0，当前 {}", self.backoff_growth),
            });
        }

        if self.backoff_step == 0 {
            return Err(PoolError::InvalidConfig {
                field: "backoff_step",
                reason: "不能为 0".to_string(),
            });
        }

        if self.backoff_max < self.backoff_base {
            return Err(PoolError::InvalidConfig {
                field: "backoff_max",
                reason: format!("不能小于 backoff_base ({}ms)", self.backoff_base),
            });
        }

        Ok(())
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            base: Duration::from_millis(self.backoff_base),
            growth: self.backoff_growth,
            step: self.backoff_step,
            max: Duration::from_millis(self.backoff_max),
        }
    }

    pub fn get_dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout)
    }

    pub fn get_read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout)
    }

    pub fn get_traffic_timeout(&self) -> Duration {
        Duration::from_millis(self.traffic_timeout)
    }

    pub fn get_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval.max(1))
    }

    pub fn is_traffic_test_enabled(&self) -> bool {
        self.traffic_url.is_some()
    }
}
