use anyhow::{Result, bail};
use clap::Parser;
use hyper::StatusCode;
use log::{error, info, warn};
use proxy_pool::check::BannerChecker;
use proxy_pool::config::Config;
use proxy_pool::dial::Socks4Dialer;
use proxy_pool::pool::{Direction, Metric, ProxyManager, ProxyNode, RankOrder};
use proxy_pool::traffic::fetch_via;
use proxy_pool::ui::RankBoard;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// 代理池：持续探测代理节点并经最优节点转发流量
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 配置文件路径
    #[arg(short = 'f', long, default_value = "config/config.yaml")]
    config: String,

    /// 代理节点（多个，用逗号分隔，如 socks4://1.2.3.4:4145?timeout=3s）
    #[arg(short = 'p', long)]
    proxies: Option<String>,

    /// 探测目标（多个，用逗号分隔，如 elitah.xyz:22）
    #[arg(short = 't', long)]
    targets: Option<String>,

    /// 探测首包需要匹配的正则
    #[arg(long)]
    expect: Option<String>,

    /// 排序方式：usability, dominance
    #[arg(long)]
    order: Option<RankOrder>,

    /// 看板按单个指标重新排序，如 lastRoundTripMillis、activeConnectionCount
    #[arg(long)]
    sort_by: Option<Metric>,

    /// 连续失败超过该次数的节点被淘汰（最小 3）
    #[arg(long)]
    threshold: Option<i64>,

    /// 快照刷新间隔（秒）
    #[arg(long)]
    interval: Option<u64>,

    /// 业务流量测试地址
    #[arg(long)]
    traffic_url: Option<String>,

    /// 关闭业务流量测试
    #[arg(long)]
    no_traffic: bool,

    /// 日志级别
    #[arg(long)]
    log_level: Option<String>,

    /// 是否显示排名看板
    #[arg(long)]
    progress: Option<bool>,

    /// 详细输出
    #[arg(short, long)]
    verbose: bool,
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = if Path::new(&args.config).exists() {
        println!("📁 从配置文件加载设置: {}", args.config);
        match Config::load_from_file(&args.config) {
            Ok(config) => config,
            Err(e) => {
                println!("⚠️  配置文件加载失败: {}", e);
                println!("📝 使用默认配置");
                Config::default()
            }
        }
    } else {
        println!("📝 使用默认配置 (配置文件不存在: {})", args.config);
        Config::default()
    };

    // 覆盖命令行参数
    if let Some(proxies) = &args.proxies {
        config.proxies = split_list(proxies);
    }
    if let Some(targets) = &args.targets {
        config.targets = split_list(targets);
    }
    if let Some(expect) = &args.expect {
        config.expect = expect.clone();
    }
    if let Some(order) = args.order {
        config.rank_order = order;
    }
    if let Some(threshold) = args.threshold {
        config.close_bad_threshold = threshold;
    }
    if let Some(interval) = args.interval {
        config.refresh_interval = interval;
    }
    if let Some(url) = &args.traffic_url {
        config.traffic_url = Some(url.clone());
    }
    if args.no_traffic {
        config.traffic_url = None;
    }
    if let Some(progress) = args.progress {
        config.print_progress = progress;
    }
    if args.verbose {
        config.log_level = "debug".to_string();
    } else if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

fn init_logger(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

/// 为快照中的节点找回注册时的地址
fn label_ranked(
    manager: &ProxyManager<String>,
    ranked: Vec<Arc<ProxyNode>>,
) -> Vec<(String, Arc<ProxyNode>)> {
    let mut labels = HashMap::new();
    manager.range(|endpoint, node| {
        labels.insert(Arc::as_ptr(node), endpoint.clone());
        true
    });

    ranked
        .into_iter()
        .map(|node| {
            let label = labels
                .get(&Arc::as_ptr(&node))
                .cloned()
                .unwrap_or_else(|| "(已移除)".to_string());
            (label, node)
        })
        .collect()
}

/// 按单个指标排列，优者在前
fn sort_by_metric(ranked: &mut [(String, Arc<ProxyNode>)], metric: Metric) {
    ranked.sort_by_cached_key(|(_, node)| {
        let value = node.metric(metric);
        match metric.direction() {
            Direction::HigherIsBetter => value.saturating_neg(),
            Direction::LowerIsBetter => value,
        }
    });
}

async fn exercise_top(config: &Config, ranked: &[(String, Arc<ProxyNode>)]) {
    let Some(url) = &config.traffic_url else {
        return;
    };
    let Some((endpoint, node)) = ranked.first() else {
        warn!("没有可用节点，跳过流量测试");
        return;
    };

    match fetch_via(node, url, config.get_traffic_timeout()).await {
        Ok(response) if response.status == StatusCode::OK => {
            info!(
                "经 {} 请求成功 ({:?}): {}",
                endpoint,
                response.elapsed,
                response.body.trim()
            );
        }
        Ok(response) => warn!("经 {} 请求返回状态 {}", endpoint, response.status),
        Err(e) => error!("经 {} 请求失败: {}", endpoint, e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let args = Args::parse();

    println!("🚀 Rust 代理池 v{}", env!("CARGO_PKG_VERSION"));
    println!("{:=<80}", "");

    let config = load_config(&args)?;
    init_logger(&config.log_level);

    println!("\n⚙️  当前配置:");
    println!("  节点数量: {}", config.proxies.len());
    println!("  探测目标: {}", config.targets.join(", "));
    println!("  排序方式: {}", config.rank_order);
    println!("  淘汰阈值: {}", config.close_bad_threshold);
    println!("  刷新间隔: {}s", config.refresh_interval);
    println!(
        "  流量测试: {}",
        config.traffic_url.as_deref().unwrap_or("❌ 禁用")
    );

    let manager = ProxyManager::<String>::with_order(config.rank_order);
    let checker = Arc::new(BannerChecker::from_config(&config)?);
    let board = RankBoard::new(&config);

    for endpoint in &config.proxies {
        let dialer = match Socks4Dialer::from_url(endpoint, config.get_dial_timeout()) {
            Ok(dialer) => dialer,
            Err(e) => {
                warn!("跳过无效节点: {}", e);
                continue;
            }
        };

        let node = ProxyNode::with_backoff(Arc::new(dialer), config.backoff());
        let (node, loaded) = manager.load_or_store(endpoint.clone(), node);
        if loaded {
            warn!("重复节点: {}", endpoint);
            continue;
        }

        node.start_check(checker.clone());
    }

    if manager.is_empty() {
        bail!("没有可用的代理节点，请通过 --proxies 或配置文件提供");
    }
    info!("已启动 {} 个节点的探测", manager.len());

    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.get_refresh_interval()) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("收到退出信号");
                break;
            }
        }

        manager.close_bad(config.close_bad_threshold);

        let Some(sorted) = manager.get_sort_list() else {
            board.skip();
            continue;
        };

        let mut ranked = label_ranked(&manager, sorted);

        exercise_top(&config, &ranked).await;

        if let Some(metric) = args.sort_by {
            sort_by_metric(&mut ranked, metric);
        }
        board.update(&ranked);

        if manager.is_empty() {
            warn!("所有节点均已淘汰");
            break;
        }
    }

    checker.shutdown();
    manager.range(|_, node| {
        node.close();
        true
    });

    board.finalize();
    checker.print_stats();

    println!("\n🎉 代理池已退出");

    Ok(())
}
