//! 业务流量测试
//! 经排名第一的节点发起一次 HTTP GET

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::client::conn::http1;
use hyper::{Request, StatusCode, header};
use hyper_util::rt::TokioIo;
use log::debug;
use url::Url;

use crate::pool::ProxyNode;

#[derive(Debug)]
pub struct TrafficResponse {
    pub status: StatusCode,
    pub body: String,
    pub elapsed: Duration,
}

pub async fn fetch_via(
    node: &Arc<ProxyNode>,
    target: &str,
    timeout: Duration,
) -> Result<TrafficResponse> {
    let url = Url::parse(target)?;
    if url.scheme() != "http" {
        bail!("仅支持 http 地址: {}", target);
    }

    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("缺少主机地址: {}", target))?;
    let port = url.port_or_known_default().unwrap_or(80);
    let authority = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let path = match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    };

    let started = Instant::now();

    let request = async {
        let conn = node.dial("tcp", &format!("{}:{}", host, port)).await?;

        let (mut sender, connection) = http1::handshake(TokioIo::new(conn)).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("HTTP 连接结束: {}", e);
            }
        });

        let request = Request::get(path)
            .header(header::HOST, authority)
            .header(header::USER_AGENT, concat!("proxy-pool/", env!("CARGO_PKG_VERSION")))
            .body(Empty::<Bytes>::new())?;

        let response = sender.send_request(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();

        Ok::<_, anyhow::Error>(TrafficResponse {
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
            elapsed: started.elapsed(),
        })
    };

    tokio::time::timeout(timeout, request)
        .await
        .map_err(|_| anyhow!("请求 {} 超时 ({:?})", target, timeout))?
}
