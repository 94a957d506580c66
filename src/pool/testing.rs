//! 测试用拨号器与探测策略

use std::collections::VecDeque;
use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::conn::BoxConn;
use super::node::{Checker, Dialer, Target};

/// 每次拨号返回一条内存管道，对端先写入固定内容后关闭
pub struct DuplexDialer {
    payload: &'static [u8],
}

impl DuplexDialer {
    pub fn new(payload: &'static [u8]) -> Self {
        Self { payload }
    }
}

#[async_trait]
impl Dialer for DuplexDialer {
    async fn dial(&self, _network: &str, _address: &str) -> io::Result<BoxConn> {
        let (client, mut server) = tokio::io::duplex(1024);
        server.write_all(self.payload).await?;
        drop(server);
        Ok(Box::new(client))
    }
}

pub struct FailingDialer {
    kind: io::ErrorKind,
}

impl FailingDialer {
    pub fn new(kind: io::ErrorKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Dialer for FailingDialer {
    async fn dial(&self, _network: &str, address: &str) -> io::Result<BoxConn> {
        Err(io::Error::new(self.kind, format!("dial {} failed", address)))
    }
}

/// 按脚本返回校验结果，脚本耗尽后使用默认值
pub struct ScriptedChecker {
    script: Mutex<VecDeque<bool>>,
    fallback: bool,
    exit_after: Option<usize>,
    rounds: AtomicUsize,
    errors: AtomicUsize,
}

impl ScriptedChecker {
    pub fn always(healthy: bool) -> Self {
        Self::script_with_fallback(Vec::new(), healthy)
    }

    pub fn script(results: Vec<bool>) -> Self {
        Self::script_with_fallback(results, false)
    }

    fn script_with_fallback(results: Vec<bool>, fallback: bool) -> Self {
        Self {
            script: Mutex::new(results.into()),
            fallback,
            exit_after: None,
            rounds: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
        }
    }

    /// 完成 n 轮探测后报告退出
    pub fn exit_after(mut self, rounds: usize) -> Self {
        self.exit_after = Some(rounds);
        self
    }

    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Checker for ScriptedChecker {
    fn is_exit(&self) -> bool {
        self.exit_after
            .is_some_and(|limit| self.rounds.load(Ordering::SeqCst) >= limit)
    }

    fn address(&self) -> Target {
        self.rounds.fetch_add(1, Ordering::SeqCst);
        Target::tcp("probe.test:22")
    }

    async fn check_conn(&self, _conn: &mut BoxConn) -> bool {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback)
    }

    fn show_error(&self, _err: &io::Error) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

/// 轮询等待条件成立，超时返回 false
pub async fn wait_until(cond: impl Fn() -> bool) -> bool {
    for _ in 0..1000 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    cond()
}
