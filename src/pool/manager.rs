//! 代理节点管理器
//! 并发安全的节点表，独立维护节点数量，提供淘汰与单飞排序快照

use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{debug, info};

use super::metric::Metric;
use super::node::ProxyNode;
use super::rank::{RankEntry, RankOrder, RankSort, rank_sort, usability_cmp};

/// `close_bad` 阈值下限
pub const MIN_BAD_THRESHOLD: i64 = 3;

/// 代理节点管理器
pub struct ProxyManager<K> {
    nodes: DashMap<K, Arc<ProxyNode>>,
    length: AtomicUsize,
    index: AtomicU64,
    ranking: AtomicBool,
    lists: Mutex<Vec<RankEntry>>,
    order: RankOrder,
}

// 排序占用标记，离开作用域时释放
struct RankingClaim<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RankingClaim<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RankingClaim<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// 暂存区上的排序视图，按管理器的排序方式比较
struct StagedList<'a> {
    entries: &'a mut [RankEntry],
    order: RankOrder,
}

impl RankSort for StagedList<'_> {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn less(&self, i: usize, j: usize) -> bool {
        self.order
            .entry_before(self.entries[i].key(), self.entries[j].key())
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.entries.swap(i, j);
    }
}

impl<K> ProxyManager<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::with_order(RankOrder::default())
    }

    pub fn with_order(order: RankOrder) -> Self {
        Self {
            nodes: DashMap::new(),
            length: AtomicUsize::new(0),
            index: AtomicU64::new(0),
            ranking: AtomicBool::new(false),
            lists: Mutex::new(Vec::new()),
            order,
        }
    }

    pub fn order(&self) -> RankOrder {
        self.order
    }

    /// 写入节点，返回被替换的同名旧节点
    ///
    /// 旧节点不会被关闭，它的探测循环由调用方决定是否停止。
    pub fn store(&self, key: K, node: Arc<ProxyNode>) -> Option<Arc<ProxyNode>> {
        match self.nodes.entry(key) {
            Entry::Occupied(mut entry) => Some(entry.insert(node)),
            Entry::Vacant(entry) => {
                // 持有分片锁时计数，删除方一定能看到这次 +1
                let _slot = entry.insert(node);
                self.length.fetch_add(1, Ordering::AcqRel);
                None
            }
        }
    }

    /// 移除节点并返回，不存在时为 None
    pub fn delete(&self, key: &K) -> Option<Arc<ProxyNode>> {
        let (_, node) = self.nodes.remove(key)?;
        self.length.fetch_sub(1, Ordering::AcqRel);
        Some(node)
    }

    pub fn load(&self, key: &K) -> Option<Arc<ProxyNode>> {
        self.nodes.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// 已存在时返回现有节点和 true，否则写入并返回新节点和 false
    pub fn load_or_store(&self, key: K, node: Arc<ProxyNode>) -> (Arc<ProxyNode>, bool) {
        match self.nodes.entry(key) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), true),
            Entry::Vacant(entry) => {
                let _slot = entry.insert(Arc::clone(&node));
                self.length.fetch_add(1, Ordering::AcqRel);
                (node, false)
            }
        }
    }

    /// 遍历节点，访问者返回 false 时停止
    ///
    /// 遍历的是调用时刻的副本，访问者内可以安全地增删节点。
    pub fn range<F>(&self, mut visitor: F)
    where
        F: FnMut(&K, &Arc<ProxyNode>) -> bool,
    {
        let entries: Vec<(K, Arc<ProxyNode>)> = self
            .nodes
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        for (key, node) in &entries {
            if !visitor(key, node) {
                break;
            }
        }
    }

    pub fn is_exist(&self, key: &K) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.length.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 关闭并移除连续失败数超过阈值的节点，返回移除数量
    ///
    /// 阈值小于 3 时按 3 处理。
    pub fn close_bad(&self, threshold: i64) -> usize {
        let threshold = threshold.max(MIN_BAD_THRESHOLD);
        let mut removed = 0;

        self.nodes.retain(|_, node| {
            if node.metric(Metric::ConsecutiveFailures) > threshold {
                node.close();
                self.length.fetch_sub(1, Ordering::AcqRel);
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            info!(
                "淘汰 {} 个连续失败超过 {} 次的节点，剩余 {}",
                removed,
                threshold,
                self.len()
            );
        }

        removed
    }

    /// 获取排序后的节点快照
    ///
    /// 不会阻塞：已有排序在进行时直接返回 None，调用方下个周期重试即可。
    /// `Dominance` 顺序经暂存区上的 [`RankSort`] 视图交给 [`rank_sort`]。
    pub fn get_sort_list(&self) -> Option<Vec<Arc<ProxyNode>>> {
        let Some(_claim) = RankingClaim::try_acquire(&self.ranking) else {
            debug!("排序进行中，跳过本次快照");
            return None;
        };

        let mut lists = self.lists.lock().unwrap_or_else(PoisonError::into_inner);

        lists.clear();
        lists.reserve(self.len());
        lists.extend(
            self.nodes
                .iter()
                .map(|entry| RankEntry::new(Arc::clone(entry.value()))),
        );

        match self.order {
            RankOrder::Usability => lists.sort_by(|a, b| usability_cmp(a.key(), b.key())),
            RankOrder::Dominance => rank_sort(&mut StagedList {
                entries: &mut lists[..],
                order: self.order,
            }),
        }

        let sorted = lists.iter().map(|entry| Arc::clone(entry.node())).collect();
        lists.clear();

        Some(sorted)
    }
}

impl ProxyManager<u64> {
    /// 以自增序号为键写入节点，返回序号
    pub fn add(&self, node: Arc<ProxyNode>) -> u64 {
        let idx = self.index.fetch_add(1, Ordering::AcqRel);
        let _ = self.store(idx, node);
        idx
    }
}

impl<K> Default for ProxyManager<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
