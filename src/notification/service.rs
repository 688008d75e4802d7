//! 流水线服务 - 在单一 tokio 任务上串行执行所有流水线操作
//!
//! 外部通过 [`ServiceHandle`] 发送命令；捕获层也可以直接使用
//! [`IntakeHandle`](super::pipeline::IntakeHandle) 投递通知。分组摘要延迟处理，
//! 让同时到达的分组成员先进入在途索引。

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::packet::PacketDictionary;
use super::pipeline::DeliveryPipeline;
use super::source::{GroupRole, Notification};

/// 分组摘要的默认延迟
pub const SUMMARY_DELAY: Duration = Duration::from_millis(500);

/// 服务状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceStats {
    pub pending: usize,
    pub current: Option<i32>,
    pub outstanding: usize,
}

/// 服务命令
#[derive(Debug)]
pub enum ServiceCommand {
    Submit(Notification),
    TransferReady,
    Confirmation(i32),
    DeviceMessage(PacketDictionary),
    AppReopened,
    RemoveById(i32),
    ClearAll,
    MuteSource { source: String, until: DateTime<Utc> },
    ClearMutes,
    TriggerAction { id: i32, index: usize },
    ForgetOutstanding(i32),
    HasPendingWork(oneshot::Sender<bool>),
    Stats(oneshot::Sender<ServiceStats>),
    Shutdown,
}

/// 服务句柄，可克隆并跨线程使用
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    commands: mpsc::UnboundedSender<ServiceCommand>,
}

impl ServiceHandle {
    fn send(&self, command: ServiceCommand) -> bool {
        match self.commands.send(command) {
            Ok(()) => true,
            Err(e) => {
                debug!(command = ?e.0, "Pipeline service is not running");
                false
            }
        }
    }

    /// 提交通知（与其他命令保持顺序）
    pub fn submit(&self, notification: Notification) -> bool {
        self.send(ServiceCommand::Submit(notification))
    }

    pub fn transfer_ready(&self) -> bool {
        self.send(ServiceCommand::TransferReady)
    }

    pub fn confirm(&self, id: i32) -> bool {
        self.send(ServiceCommand::Confirmation(id))
    }

    pub fn device_message(&self, message: PacketDictionary) -> bool {
        self.send(ServiceCommand::DeviceMessage(message))
    }

    pub fn app_reopened(&self) -> bool {
        self.send(ServiceCommand::AppReopened)
    }

    pub fn remove_by_id(&self, id: i32) -> bool {
        self.send(ServiceCommand::RemoveById(id))
    }

    pub fn clear_all(&self) -> bool {
        self.send(ServiceCommand::ClearAll)
    }

    pub fn mute_source_until(&self, source: impl Into<String>, until: DateTime<Utc>) -> bool {
        self.send(ServiceCommand::MuteSource {
            source: source.into(),
            until,
        })
    }

    pub fn clear_mutes(&self) -> bool {
        self.send(ServiceCommand::ClearMutes)
    }

    pub fn trigger_action(&self, id: i32, index: usize) -> bool {
        self.send(ServiceCommand::TriggerAction { id, index })
    }

    pub fn forget_outstanding(&self, id: i32) -> bool {
        self.send(ServiceCommand::ForgetOutstanding(id))
    }

    pub async fn has_pending_work(&self) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        if !self.send(ServiceCommand::HasPendingWork(tx)) {
            return Err(anyhow!("Pipeline service stopped"));
        }
        rx.await.map_err(|_| anyhow!("Pipeline service dropped the request"))
    }

    pub async fn stats(&self) -> Result<ServiceStats> {
        let (tx, rx) = oneshot::channel();
        if !self.send(ServiceCommand::Stats(tx)) {
            return Err(anyhow!("Pipeline service stopped"));
        }
        rx.await.map_err(|_| anyhow!("Pipeline service dropped the request"))
    }

    pub fn shutdown(&self) -> bool {
        self.send(ServiceCommand::Shutdown)
    }
}

/// 流水线服务
pub struct PipelineService {
    pipeline: DeliveryPipeline,
    commands: mpsc::UnboundedReceiver<ServiceCommand>,
    deferred_tx: mpsc::UnboundedSender<Notification>,
    deferred_rx: mpsc::UnboundedReceiver<Notification>,
    summary_delay: Duration,
}

impl PipelineService {
    pub fn new(pipeline: DeliveryPipeline) -> (Self, ServiceHandle) {
        let (tx, commands) = mpsc::unbounded_channel();
        let (deferred_tx, deferred_rx) = mpsc::unbounded_channel();
        let service = Self {
            pipeline,
            commands,
            deferred_tx,
            deferred_rx,
            summary_delay: SUMMARY_DELAY,
        };
        (service, ServiceHandle { commands: tx })
    }

    pub fn with_summary_delay(mut self, delay: Duration) -> Self {
        self.summary_delay = delay;
        self
    }

    /// 在后台任务中运行，停止后返回流水线
    pub fn spawn(self) -> JoinHandle<DeliveryPipeline> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) -> DeliveryPipeline {
        info!("Pipeline service started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ServiceCommand::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                Some(notification) = self.pipeline.next_intake() => self.accept(notification),
                Some(notification) = self.deferred_rx.recv() => {
                    debug!(source = %notification.key, "Processing deferred group summary");
                    self.pipeline.process_notification(notification);
                }
            }
        }

        info!("Pipeline service stopped");
        self.pipeline
    }

    fn accept(&mut self, notification: Notification) {
        if notification.group_role != GroupRole::Summary || self.summary_delay.is_zero() {
            self.pipeline.process_notification(notification);
            return;
        }

        let tx = self.deferred_tx.clone();
        let delay = self.summary_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(notification);
        });
    }

    fn handle(&mut self, command: ServiceCommand) {
        match command {
            ServiceCommand::Submit(notification) => self.accept(notification),
            ServiceCommand::TransferReady => {
                self.pipeline.notify_transfer_ready();
            }
            ServiceCommand::Confirmation(id) => {
                self.pipeline.on_device_confirmation(id);
            }
            ServiceCommand::DeviceMessage(message) => {
                if let Err(e) = self.pipeline.handle_device_message(&message) {
                    warn!(error = %e, "Malformed device message");
                }
            }
            ServiceCommand::AppReopened => self.pipeline.on_companion_app_reopened(),
            ServiceCommand::RemoveById(id) => {
                self.pipeline.remove_by_id(id);
            }
            ServiceCommand::ClearAll => self.pipeline.clear_all(),
            ServiceCommand::MuteSource { source, until } => self.pipeline.mute_source_until(&source, until),
            ServiceCommand::ClearMutes => self.pipeline.clear_all_mutes(),
            ServiceCommand::TriggerAction { id, index } => {
                self.pipeline.trigger_action(id, index);
            }
            ServiceCommand::ForgetOutstanding(id) => {
                self.pipeline.forget_outstanding(id);
            }
            ServiceCommand::HasPendingWork(reply) => {
                let _ = reply.send(self.pipeline.has_pending_work());
            }
            ServiceCommand::Stats(reply) => {
                let queue = self.pipeline.queue();
                let _ = reply.send(ServiceStats {
                    pending: queue.pending_len(),
                    current: queue.current().map(|r| r.id),
                    outstanding: self.pipeline.outstanding().len(),
                });
            }
            ServiceCommand::Shutdown => {}
        }
    }
}
