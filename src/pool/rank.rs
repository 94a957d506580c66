//! 节点排序
//! 默认按可用率降序、最近探测时间降序的全序排列；
//! `Dominance` 保留"可用率与探测时间同时领先才排前"的偏序规则。

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::metric::Metric;
use super::node::ProxyNode;
use crate::error::PoolError;

/// 快照排序方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankOrder {
    /// 可用率降序，可用率相同时最近探测时间降序
    #[default]
    Usability,
    /// A 的可用率与最近探测时间都严格大于 B 时，A 排在 B 前；
    /// 不可比较的节点之间相对顺序不确定
    Dominance,
}

impl RankOrder {
    /// a 是否排在 b 之前
    pub fn before(self, a: &ProxyNode, b: &ProxyNode) -> bool {
        self.entry_before(&RankEntry::capture(a), &RankEntry::capture(b))
    }

    pub(crate) fn entry_before(self, a: &RankKey, b: &RankKey) -> bool {
        match self {
            RankOrder::Usability => usability_cmp(a, b) == Ordering::Less,
            RankOrder::Dominance => b.usability < a.usability && b.last < a.last,
        }
    }
}

impl fmt::Display for RankOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RankOrder::Usability => f.write_str("usability"),
            RankOrder::Dominance => f.write_str("dominance"),
        }
    }
}

impl FromStr for RankOrder {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "usability" => Ok(RankOrder::Usability),
            "dominance" => Ok(RankOrder::Dominance),
            _ => Err(PoolError::UnknownRankOrder(s.to_string())),
        }
    }
}

pub(crate) fn usability_cmp(a: &RankKey, b: &RankKey) -> Ordering {
    b.usability
        .cmp(&a.usability)
        .then_with(|| b.last.cmp(&a.last))
}

/// 排序期间使用的指标副本，避免探测循环并发更新导致比较结果前后不一致
#[derive(Debug, Clone, Copy)]
pub(crate) struct RankKey {
    usability: i64,
    last: i64,
}

pub(crate) struct RankEntry {
    key: RankKey,
    node: Arc<ProxyNode>,
}

impl RankEntry {
    fn capture(node: &ProxyNode) -> RankKey {
        RankKey {
            usability: node.metric(Metric::Usability),
            last: node.metric(Metric::LastProbeTimestamp),
        }
    }

    pub(crate) fn new(node: Arc<ProxyNode>) -> Self {
        Self {
            key: Self::capture(&node),
            node,
        }
    }

    pub(crate) fn key(&self) -> &RankKey {
        &self.key
    }

    pub(crate) fn node(&self) -> &Arc<ProxyNode> {
        &self.node
    }
}

/// 可原地排序的序列：长度、比较、交换
pub trait RankSort {
    fn len(&self) -> usize;

    /// 第 i 个元素是否应排在第 j 个之前
    fn less(&self, i: usize, j: usize) -> bool;

    fn swap(&mut self, i: usize, j: usize);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 选择排序，`less` 为严格偏序时结果是它的一个线性扩展：
/// 任意可比较的两个元素都按 `less` 排列。
pub fn rank_sort<S: RankSort + ?Sized>(seq: &mut S) {
    let n = seq.len();

    for i in 0..n {
        // 沿"被谁领先"的链前进，单趟扫描即可找到剩余元素中的一个极大元
        let mut best = i;
        for k in (i + 1)..n {
            if seq.less(k, best) {
                best = k;
            }
        }
        if best != i {
            seq.swap(i, best);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// (usability, last) 二元组按双重领先规则排序
    struct Pairs(Vec<(i64, i64)>);

    impl RankSort for Pairs {
        fn len(&self) -> usize {
            self.0.len()
        }

        fn less(&self, i: usize, j: usize) -> bool {
            let (a, b) = (self.0[i], self.0[j]);
            b.0 < a.0 && b.1 < a.1
        }

        fn swap(&mut self, i: usize, j: usize) {
            self.0.swap(i, j);
        }
    }

    fn respects_partial_order(pairs: &Pairs) -> bool {
        for i in 0..pairs.len() {
            for j in (i + 1)..pairs.len() {
                if pairs.less(j, i) {
                    return false;
                }
            }
        }
        true
    }

    #[test]
    fn test_rank_sort_is_linear_extension() {
        let mut pairs = Pairs(vec![(50, 5), (10, 20), (90, 9), (5, 1), (95, 30), (40, 25)]);
        rank_sort(&mut pairs);

        assert!(respects_partial_order(&pairs));
        assert_eq!(pairs.0[0], (95, 30));
        assert_eq!(pairs.0.last(), Some(&(5, 1)));
    }

    #[test]
    fn test_rank_sort_empty_and_single() {
        let mut empty = Pairs(vec![]);
        rank_sort(&mut empty);
        assert!(empty.is_empty());

        let mut single = Pairs(vec![(1, 1)]);
        rank_sort(&mut single);
        assert_eq!(single.0, vec![(1, 1)]);
    }

    #[test]
    fn test_usability_cmp_total_order() {
        let a = RankKey {
            usability: 80,
            last: 1,
        };
        let b = RankKey {
            usability: 80,
            last: 2,
        };
        let c = RankKey {
            usability: 90,
            last: 0,
        };

        assert_eq!(usability_cmp(&b, &a), Ordering::Less);
        assert_eq!(usability_cmp(&c, &b), Ordering::Less);
        assert!(RankOrder::Usability.entry_before(&c, &a));
        // 可用率领先但时间落后，双重领先规则下不可比较
        assert!(!RankOrder::Dominance.entry_before(&c, &a));
        assert!(!RankOrder::Dominance.entry_before(&a, &c));
    }

    #[test]
    fn test_parse_rank_order() {
        assert_eq!("Dominance".parse::<RankOrder>().unwrap(), RankOrder::Dominance);
        assert_eq!("usability".parse::<RankOrder>().unwrap(), RankOrder::Usability);
        assert!("latency".parse::<RankOrder>().is_err());
        assert_eq!(RankOrder::default().to_string(), "usability");
    }
}
