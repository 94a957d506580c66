//! 代理池错误类型

use thiserror::Error;

/// 代理池库级错误
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("未知的统计指标: {0}")]
    UnknownMetric(String),

    #[error("未知的排序方式: {0}")]
    UnknownRankOrder(String),

    #[error("不支持的网络类型: {0}")]
    UnsupportedNetwork(String),

    #[error("无效的代理地址 {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("无效的配置项 {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },
}

pub type PoolResult<T = ()> = Result<T, PoolError>;
