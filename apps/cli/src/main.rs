//! # L6470 CLI
//!
//! 台架工具：按支架配置创建模拟轴，以固定周期推进，从标准输入读取 `<axis>:<request>` 行。
//!
//! ```bash
//! # 默认三轴望远镜支架（alt / azi / foc）
//! l6470-cli
//!
//! # 指定配置文件，只启用部分轴
//! l6470-cli --config mount.toml --axes alt,azi --tick-us 200
//! ```
//!
//! ```text
//! alt:slew 90
//! alt:angle
//! azi:track
//! azi:stop
//! quit
//! ```
//!
//! Ctrl+C 或 `quit` 会关闭所有轴（SoftHiZ）后退出。

mod bench;
mod router;

use anyhow::{Context, Result, bail};
use bench::Bench;
use clap::Parser;
use crossbeam_channel::{Receiver, bounded};
use l6470_client::MountConfig;
use router::{Line, parse_line};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// L6470 台架工具
#[derive(Parser, Debug)]
#[command(name = "l6470-cli")]
#[command(about = "Drive simulated L6470 axes from a mount configuration", long_about = None)]
#[command(version)]
struct Args {
    /// 支架配置文件（TOML）
    ///
    /// 默认: 内置三轴望远镜支架
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 只启用这些轴（逗号分隔）
    #[arg(long, value_delimiter = ',')]
    axes: Vec<String>,

    /// 主循环周期（微秒）
    #[arg(long, default_value_t = 100)]
    tick_us: u64,

    /// 模拟运动指令完成所需的状态轮询次数
    #[arg(long, default_value_t = 2000)]
    motion_polls: u32,
}

fn load_mount(args: &Args) -> Result<MountConfig> {
    let mut config = match &args.config {
        Some(path) => MountConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => MountConfig::telescope(),
    };

    if !args.axes.is_empty() {
        for name in &args.axes {
            if config.axis(name).is_none() {
                bail!("axis {:?} is not in the mount configuration", name);
            }
        }
        config.axes.retain(|a| args.axes.contains(&a.name));
    }
    Ok(config)
}

/// 专用输入线程，逐行读取标准输入
fn spawn_input() -> Receiver<String> {
    let (tx, rx) = bounded::<String>(16);
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
        debug!("input closed");
    });
    rx
}

fn run(args: Args) -> Result<()> {
    let config = load_mount(&args)?;
    let mut bench = Bench::new(&config, args.motion_polls)?;
    let names: Vec<&str> = config.axes.iter().map(|a| a.name.as_str()).collect();
    info!("axes: {}", names.join(", "));

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let input = spawn_input();
    let tick = Duration::from_micros(args.tick_us);

    while running.load(Ordering::SeqCst) {
        // 每周期最多处理一行输入
        let stepped = match input.try_recv().map(|line| parse_line(&line)) {
            Ok(Ok(Line::Quit)) => break,
            Ok(Ok(line)) => bench.handle(line).unwrap_or_else(|e| {
                warn!("{:#}", e);
                None
            }),
            Ok(Err(e)) => {
                warn!("{:#}", e);
                None
            },
            Err(_) => None,
        };

        bench.tick_all(stepped);
        bench.drain_events();
        spin_sleep::sleep(tick);
    }

    info!("shutting down");
    bench.shutdown()
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("l6470_cli=info".parse()?),
        )
        .init();

    run(Args::parse())
}
