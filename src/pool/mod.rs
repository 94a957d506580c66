//! 代理池核心
//! 节点探测、统计、排序与淘汰

mod conn;
mod manager;
mod metric;
mod node;
mod rank;

#[cfg(test)]
pub(crate) mod testing;

pub use conn::{BoxConn, Connection, PooledConn};
pub use manager::{MIN_BAD_THRESHOLD, ProxyManager};
pub use metric::{Direction, Metric, NodeStats};
pub use node::{Backoff, Checker, Dialer, ProxyNode, Target};
pub use rank::{RankOrder, RankSort, rank_sort};
