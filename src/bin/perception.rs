// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 动作感知服务
//! Perception service: reads detection frames (JSON lines), tracks people,
//! counts reps and reports events to the remote session.
//!
//! 运行: cargo run --bin perception -- --config perception.json --input frames.jsonl
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, select, Sender};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use perception_rs::config::PerceptionConfig;
use perception_rs::detection::FrameRecord;
use perception_rs::processor::FrameProcessor;
use perception_rs::session::HttpIngestApi;

/// 动作感知程序
#[derive(Parser, Debug)]
#[command(author, version, about = "多人动作识别与计数", long_about = None)]
struct Args {
    /// 配置文件 (不存在时写入默认配置)
    #[arg(short, long, default_value = "perception.json")]
    config: String,

    /// 会员ID (可选)
    #[arg(short, long)]
    member_id: Option<String>,

    /// 检测帧输入 (JSON lines), "-" 表示标准输入
    #[arg(short, long, default_value = "-")]
    input: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 1. 配置
    let config = PerceptionConfig::load(&args.config)
        .with_context(|| format!("加载配置失败: {}", args.config))?
        .with_env_overrides()?;
    config.validate()?;
    config.print_summary();

    // 2. 会话 (失败则不处理任何帧)
    let api = Arc::new(HttpIngestApi::new(&config.pipeline));
    let mut processor = FrameProcessor::new(&config, api);
    let session_id = processor
        .start(args.member_id.as_deref())
        .context("无法创建会话")?;
    info!("🚀 会话 {} 已开始, 等待检测帧...", session_id);

    // 3. 输入线程 + 退出信号
    let (frame_tx, frame_rx) = bounded::<FrameRecord>(120);
    let (stop_tx, stop_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("注册退出信号失败")?;

    let input = args.input.clone();
    thread::Builder::new()
        .name("frame-reader".to_string())
        .spawn(move || {
            if let Err(e) = read_frames(&input, &frame_tx) {
                error!("❌ 读取检测帧失败: {:#}", e);
            }
        })
        .context("启动输入线程失败")?;

    // 4. 帧循环
    loop {
        select! {
            recv(frame_rx) -> frame => match frame {
                Ok(frame) => {
                    processor.process(&frame.into_detections());
                }
                Err(_) => {
                    info!("📭 输入结束");
                    break;
                }
            },
            recv(stop_rx) -> _ => {
                info!("🛑 收到退出信号");
                break;
            }
        }
    }

    processor.shutdown();
    Ok(())
}

/// 逐行读取检测帧, 解析失败的行跳过
fn read_frames(input: &str, tx: &Sender<FrameRecord>) -> Result<()> {
    let reader: Box<dyn BufRead> = if input == "-" {
        Box::new(io::stdin().lock())
    } else {
        let file = File::open(input).with_context(|| format!("无法打开输入: {}", input))?;
        Box::new(BufReader::new(file))
    };

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<FrameRecord>(&line) {
            Ok(frame) => {
                if tx.send(frame).is_err() {
                    break;
                }
            }
            Err(e) => warn!("⚠️ 第{}行解析失败: {}", idx + 1, e),
        }
    }
    Ok(())
}
