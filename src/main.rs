//! Wear Notify CLI
//!
//! 在本地检查过滤结果、回放通知到模拟设备、查看通知历史

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use wear_notify::notification::packet::{Step, KEY_ID, KEY_PAYLOAD, KEY_STEP};
use wear_notify::notification::service::SUMMARY_DELAY;
use wear_notify::notification::{Capabilities, JsonlHistoryStore, PacketDictionary, Transport};
use wear_notify::{JsonSettingsStore, Notification, PipelineBuilder, PipelineService};

#[derive(Parser)]
#[command(name = "wn")]
#[command(about = "Wear Notify - 把手机通知转发到可穿戴设备")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 对单条通知求值过滤规则
    Decide {
        /// 通知 JSON 文件
        #[arg(long, short)]
        input: PathBuf,
        /// 设置文件（默认 ~/.config/wear-notify/settings.json）
        #[arg(long)]
        settings: Option<PathBuf>,
    },
    /// 把 JSONL 通知回放到自动确认的模拟设备
    Replay {
        /// 通知 JSONL 文件（每行一条）
        #[arg(long, short)]
        input: PathBuf,
        #[arg(long)]
        settings: Option<PathBuf>,
        /// 设备单条消息最大字节数
        #[arg(long, default_value = "256")]
        max_message_size: usize,
        /// 模拟彩色屏幕设备
        #[arg(long)]
        color: bool,
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
        /// 写入通知历史
        #[arg(long)]
        record_history: bool,
    },
    /// 查看最近的通知历史
    History {
        /// 显示最近 N 条
        #[arg(long, short, default_value = "20")]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
}

fn load_settings(path: Option<&Path>) -> Result<JsonSettingsStore> {
    match path {
        Some(path) => JsonSettingsStore::load(path),
        None => JsonSettingsStore::load_default(),
    }
}

fn read_notification(path: &Path) -> Result<Notification> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read notification {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid notification JSON in {}", path.display()))
}

/// 模拟设备事件
enum LoopbackEvent {
    Ready,
    Confirm(i32),
}

/// 回环传输：打印每个包，描述包立即确认
struct LoopbackTransport {
    capabilities: Capabilities,
    events: mpsc::UnboundedSender<LoopbackEvent>,
    json: bool,
    sent: AtomicUsize,
}

impl LoopbackTransport {
    fn print(&self, packet: &PacketDictionary) {
        let id = packet.get_int(KEY_ID).unwrap_or_default();
        let step = packet.get_int(KEY_STEP).unwrap_or_default();
        let payload_len = packet.get_bytes(KEY_PAYLOAD).map_or(0, |p| p.len());
        let step_name = match step {
            s if s == Step::Initial as i64 => "descriptor",
            s if s == Step::TextChunk as i64 => "text",
            s if s == Step::Icon as i64 => "icon",
            _ => "unknown",
        };

        if self.json {
            let line = serde_json::json!({
                "id": id,
                "step": step_name,
                "payload_len": payload_len,
                "encoded_len": packet.encoded_len(),
            });
            println!("{}", line);
        } else {
            println!(
                "  [{}] {:<10} payload={:>3}B encoded={:>3}B",
                id,
                step_name,
                payload_len,
                packet.encoded_len()
            );
        }
    }
}

impl Transport for LoopbackTransport {
    fn send_packet(&self, packet: PacketDictionary) {
        self.print(&packet);
        self.sent.fetch_add(1, Ordering::Relaxed);

        let event = match packet.get_int(KEY_STEP) {
            Some(step) if step == Step::Initial as i64 => {
                LoopbackEvent::Confirm(packet.get_int(KEY_ID).unwrap_or_default() as i32)
            }
            _ => LoopbackEvent::Ready,
        };
        let _ = self.events.send(event);
    }

    fn request_priority_scheduling(&self) {}

    fn advance_when_ready(&self) {
        let _ = self.events.send(LoopbackEvent::Ready);
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }
}

async fn replay(
    input: &Path,
    settings: JsonSettingsStore,
    capabilities: Capabilities,
    json: bool,
    record_history: bool,
) -> Result<()> {
    let content =
        std::fs::read_to_string(input).with_context(|| format!("Failed to read replay input {}", input.display()))?;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let transport = Arc::new(LoopbackTransport {
        capabilities,
        events: events_tx,
        json,
        sent: AtomicUsize::new(0),
    });

    let mut builder = PipelineBuilder::new()
        .settings(Arc::new(settings))
        .transport(transport.clone());
    if record_history {
        builder = builder.history(Arc::new(JsonlHistoryStore::open_default()));
    }
    let pipeline = builder.build();
    let (service, handle) = PipelineService::new(pipeline);
    let service_task = service.spawn();

    let device = handle.clone();
    let driver = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                LoopbackEvent::Ready => device.transfer_ready(),
                LoopbackEvent::Confirm(id) => device.confirm(id),
            };
        }
    });

    let mut submitted = 0;
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Notification>(line) {
            Ok(notification) => {
                debug!(line = line_no + 1, source = %notification.key, "Submitting notification");
                handle.submit(notification);
                submitted += 1;
            }
            Err(e) => warn!(line = line_no + 1, error = %e, "Skipping malformed notification"),
        }
    }

    // 等待延迟处理的分组摘要
    tokio::time::sleep(SUMMARY_DELAY + Duration::from_millis(100)).await;
    while handle.has_pending_work().await? {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let stats = handle.stats().await?;
    handle.shutdown();
    service_task.await.context("Pipeline service panicked")?;
    driver.abort();

    info!(
        submitted,
        outstanding = stats.outstanding,
        packets = transport.sent.load(Ordering::Relaxed),
        "Replay finished"
    );
    if !json {
        println!(
            "\n{} 条通知，{} 条在途，共发送 {} 个包",
            submitted,
            stats.outstanding,
            transport.sent.load(Ordering::Relaxed)
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 通过 RUST_LOG 环境变量控制日志级别，默认为 info
    // 例如: RUST_LOG=wear_notify=debug wn replay -i notifications.jsonl
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wear_notify=info,wn=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Decide { input, settings } => {
            let settings = load_settings(settings.as_deref())?;
            let notification = read_notification(&input)?;
            let mut pipeline = PipelineBuilder::new().settings(Arc::new(settings)).build();
            let disposition = pipeline.process_notification(notification);
            println!("{}", disposition);
        }
        Commands::Replay {
            input,
            settings,
            max_message_size,
            color,
            json,
            record_history,
        } => {
            let settings = load_settings(settings.as_deref())?;
            let capabilities = Capabilities {
                color,
                max_message_size,
            };
            replay(&input, settings, capabilities, json, record_history).await?;
        }
        Commands::History { limit, json } => {
            let store = JsonlHistoryStore::open_default();
            let records = store.read_recent(limit);

            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("暂无通知历史 ({})", store.path().display());
            } else {
                for record in records {
                    let subtitle = if record.subtitle.is_empty() {
                        String::new()
                    } else {
                        format!(" / {}", record.subtitle)
                    };
                    println!(
                        "[{}] {}{}: {}",
                        record.ts.format("%Y-%m-%d %H:%M:%S"),
                        record.title,
                        subtitle,
                        record.body.replace('\n', " ")
                    );
                }
            }
        }
    }

    Ok(())
}
