//! 代理池：持续探测一组代理节点，按可用率排序供业务流量选用

pub mod check;
pub mod config;
pub mod dial;
pub mod error;
pub mod pool;
pub mod traffic;
pub mod ui;

pub use error::{PoolError, PoolResult};
pub use pool::{Checker, Dialer, Metric, ProxyManager, ProxyNode, RankOrder, Target};
