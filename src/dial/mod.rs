//! SOCKS4/4a 拨号器
//! 经 socks4 代理建立 TCP 连接，作为节点的拨号能力

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio_socks::tcp::socks4::Socks4Stream;
use url::Url;

use crate::error::{PoolError, PoolResult};
use crate::pool::{BoxConn, Dialer};

const DEFAULT_PORT: u16 = 1080;

#[derive(Debug, Clone)]
pub struct Socks4Dialer {
    proxy: String,
    user_id: String,
    timeout: Duration,
}

impl Socks4Dialer {
    pub fn new(proxy: impl Into<String>, timeout: Duration) -> Self {
        Self {
            proxy: proxy.into(),
            user_id: String::new(),
            timeout,
        }
    }

    /// 解析 `socks4://[user@]host[:port][?timeout=1m30s]`
    pub fn from_url(endpoint: &str, default_timeout: Duration) -> PoolResult<Self> {
        let invalid = |reason: String| PoolError::InvalidEndpoint {
            url: endpoint.to_string(),
            reason,
        };

        let url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;

        if !matches!(url.scheme(), "socks4" | "socks4a") {
            return Err(invalid(format!("不支持的协议 {}", url.scheme())));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("缺少主机地址".to_string()))?;
        let port = url.port().unwrap_or(DEFAULT_PORT);

        let timeout = match url.query_pairs().find(|(k, _)| k == "timeout") {
            Some((_, value)) => humantime::parse_duration(&value)
                .map_err(|e| invalid(format!("无效的超时时间 {}: {}", value, e)))?,
            None => default_timeout,
        };

        Ok(Self {
            proxy: format!("{}:{}", host, port),
            user_id: url.username().to_string(),
            timeout,
        })
    }

    pub fn proxy(&self) -> &str {
        &self.proxy
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn connect(&self, address: &str) -> io::Result<BoxConn> {
        // 域名目标由 socks4a 交给代理解析
        let stream = if self.user_id.is_empty() {
            Socks4Stream::connect(self.proxy.as_str(), address).await
        } else {
            Socks4Stream::connect_with_userid(self.proxy.as_str(), address, &self.user_id).await
        }
        .map_err(socks_error)?;

        Ok(Box::new(stream))
    }
}

fn socks_error(err: tokio_socks::Error) -> io::Error {
    match err {
        tokio_socks::Error::Io(e) => e,
        err @ tokio_socks::Error::InvalidTargetAddress(_) => {
            io::Error::new(io::ErrorKind::InvalidInput, err)
        }
        err => io::Error::new(io::ErrorKind::ConnectionRefused, err),
    }
}

#[async_trait]
impl Dialer for Socks4Dialer {
    async fn dial(&self, network: &str, address: &str) -> io::Result<BoxConn> {
        if !matches!(network, "tcp" | "tcp4") {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                PoolError::UnsupportedNetwork(network.to_string()),
            ));
        }

        debug!("经 {} 拨号 {}", self.proxy, address);

        tokio::time::timeout(self.timeout, self.connect(address))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("经 {} 拨号 {} 超时", self.proxy, address),
                )
            })?
    }
}
