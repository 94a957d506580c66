use crate::config::Config;
use crate::pool::{Metric, ProxyNode};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::info;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// 排名看板：每个名次一行，进度条表示可用率
#[derive(Clone)]
pub struct RankBoard {
    multi_progress: Option<Arc<MultiProgress>>,
    header: Option<ProgressBar>,
    rows: Arc<Mutex<Vec<ProgressBar>>>,
    show_top: usize,
    snapshots: Arc<AtomicU64>,
    skipped: Arc<AtomicU64>,
}

impl RankBoard {
    pub fn new(config: &Config) -> Self {
        if !config.print_progress {
            return Self {
                multi_progress: None,
                header: None,
                rows: Arc::new(Mutex::new(Vec::new())),
                show_top: config.show_top,
                snapshots: Arc::new(AtomicU64::new(0)),
                skipped: Arc::new(AtomicU64::new(0)),
            };
        }

        Self::with_draw_target(ProgressDrawTarget::stderr(), config.show_top)
    }

    fn with_draw_target(target: ProgressDrawTarget, show_top: usize) -> Self {
        let multi_progress = Arc::new(MultiProgress::with_draw_target(target));

        let header = multi_progress.add(ProgressBar::new_spinner());
        header.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        header.set_message("等待首次探测...");

        Self {
            multi_progress: Some(multi_progress),
            header: Some(header),
            rows: Arc::new(Mutex::new(Vec::new())),
            show_top,
            snapshots: Arc::new(AtomicU64::new(0)),
            skipped: Arc::new(AtomicU64::new(0)),
        }
    }

    fn row_style() -> ProgressStyle {
        ProgressStyle::with_template("  {prefix:.bold} [{bar:20.green/red}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
    }

    /// 用最新排序快照刷新看板，`ranked` 为 (节点地址, 节点)
    pub fn update(&self, ranked: &[(String, Arc<ProxyNode>)]) {
        let round = self.snapshots.fetch_add(1, Ordering::Relaxed) + 1;
        let shown = ranked.len().min(self.show_top);

        let Some(multi_progress) = &self.multi_progress else {
            info!("排序快照 #{}: {} 个节点", round, ranked.len());
            for (i, (endpoint, node)) in ranked.iter().take(shown).enumerate() {
                info!("[{:02}] {:<24} {}", i, endpoint, node);
            }
            return;
        };

        if let Some(header) = &self.header {
            header.set_message(format!(
                "快照 #{} | 节点 {} | 跳过 {}",
                round,
                ranked.len(),
                self.skipped.load(Ordering::Relaxed)
            ));
            header.tick();
        }

        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        while rows.len() < shown {
            let row = multi_progress.add(ProgressBar::new(100));
            row.set_style(Self::row_style());
            row.set_prefix(format!("[{:02}]", rows.len()));
            rows.push(row);
        }

        for (i, row) in rows.iter().enumerate() {
            match ranked.get(i) {
                Some((endpoint, node)) if i < shown => {
                    row.set_position(node.metric(Metric::Usability).clamp(0, 100) as u64);
                    row.set_message(format!("{:<24} {}", endpoint, node));
                }
                _ => {
                    row.set_position(0);
                    row.set_message("-");
                }
            }
        }
    }

    /// 排序进行中被跳过的一次快照
    pub fn skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn finalize(&self) {
        for row in self.rows.lock().unwrap_or_else(PoisonError::into_inner).iter() {
            row.abandon();
        }

        if let Some(header) = &self.header {
            header.finish_with_message(format!(
                "共 {} 次快照，跳过 {} 次",
                self.snapshots.load(Ordering::Relaxed),
                self.skipped.load(Ordering::Relaxed)
            ));
        }
    }

    pub fn get_stats(&self) -> BoardStats {
        BoardStats {
            snapshots: self.snapshots.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            rows: self.rows.lock().unwrap_or_else(PoisonError::into_inner).len(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.multi_progress.is_some()
    }
}

pub struct BoardStats {
    pub snapshots: u64,
    pub skipped: u64,
    pub rows: usize,
}
