//! 连接封装
//! 经节点拨号得到的业务连接，关闭时归还节点的在途计数

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

use super::node::ProxyNode;

/// 拨号器返回的原始连接
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Connection for T {}

pub type BoxConn = Box<dyn Connection>;

/// 业务连接
///
/// 创建时节点在途计数 +1；`shutdown` 完成或被丢弃时 -1，且只会发生一次。
pub struct PooledConn {
    inner: BoxConn,
    node: Option<Arc<ProxyNode>>,
}

impl fmt::Debug for PooledConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConn")
            .field("released", &self.node.is_none())
            .finish()
    }
}

impl PooledConn {
    pub(crate) fn new(inner: BoxConn, node: Arc<ProxyNode>) -> Self {
        node.stats().active.fetch_add(1, Ordering::Relaxed);
        Self {
            inner,
            node: Some(node),
        }
    }

    /// 所属节点（已关闭的连接返回 None）
    pub fn node(&self) -> Option<&Arc<ProxyNode>> {
        self.node.as_ref()
    }

    /// 关闭底层连接并归还计数
    pub async fn close(mut self) -> io::Result<()> {
        let result = self.inner.shutdown().await;
        self.release();
        result
    }

    fn release(&mut self) {
        if let Some(node) = self.node.take() {
            node.stats().active.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

impl AsyncRead for PooledConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for PooledConn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let result = ready!(Pin::new(&mut this.inner).poll_shutdown(cx));
        this.release();
        Poll::Ready(result)
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        self.release();
    }
}
