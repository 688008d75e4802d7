//! 投递流水线 - 规范化 → 过滤 → 历史 → 构建记录 → 入队 → 传输
//!
//! 流水线拥有策略状态、在途索引和传输状态机，所有修改都发生在持有
//! `&mut DeliveryPipeline` 的单一执行上下文中。唯一可跨线程写入的结构是
//! 入站队列，通过 [`IntakeHandle`] 投递。
//!
//! # 使用示例
//! ```ignore
//! use wear_notify::notification::PipelineBuilder;
//!
//! let mut pipeline = PipelineBuilder::new().transport(transport).build();
//! pipeline.intake_handle().submit(notification);
//! pipeline.process_intake();
//! while pipeline.notify_transfer_ready() {}
//! ```

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::channel::{
    Attachments, CompanionState, DeviceEnvironment, GroupDismissal, HistoryStore, NativeDelivery, Transport,
};
use super::clock::Clock;
use super::filter::{self, Disposition, FilterContext};
use super::normalizer;
use super::outstanding::OutstandingIndex;
use super::packet::{self, DeviceMessage, PacketDictionary};
use super::policy::PolicyStore;
use super::queue::SendingQueue;
use super::record::{self, DeliveryRecord};
use super::source::{GroupRole, Notification, NotificationAction};
use super::transfer::{ConfirmOutcome, TransferEnv, TransferMachine};
use crate::config::{DeliveryMode, SettingsStore, SourceSettings};

/// 历史记录中每个字段的最大字符数
pub const HISTORY_FIELD_LIMIT: usize = 4000;

/// 原生通道不可用时追加到正文的提示
pub const NATIVE_FALLBACK_NOTICE: &str =
    "\n\nNative notifications are unavailable right now, so this one was shown in the companion app.";

pub const HIDDEN_SUBTITLE: &str = "Hidden notification";
pub const HIDDEN_BODY: &str = "Use Show action to uncover it.";
pub const REVEAL_LABEL: &str = "Show";

/// 入站队列发送端，可在任意线程使用
#[derive(Debug, Clone)]
pub struct IntakeHandle {
    tx: mpsc::UnboundedSender<Notification>,
}

impl IntakeHandle {
    /// 投递一条通知，流水线已关闭时返回 `false`
    pub fn submit(&self, notification: Notification) -> bool {
        self.tx.send(notification).is_ok()
    }
}

/// 流水线使用的外部协作方
pub(crate) struct Collaborators {
    pub settings: Arc<dyn SettingsStore>,
    pub transport: Arc<dyn Transport>,
    pub companion: Arc<dyn CompanionState>,
    pub environment: Arc<dyn DeviceEnvironment>,
    pub groups: Arc<dyn GroupDismissal>,
    pub attachments: Arc<dyn Attachments>,
    pub native: Arc<dyn NativeDelivery>,
    pub history: Arc<dyn HistoryStore>,
    pub clock: Arc<dyn Clock>,
}

pub struct DeliveryPipeline {
    parts: Collaborators,
    policy: PolicyStore,
    outstanding: OutstandingIndex,
    machine: TransferMachine,
    intake_tx: mpsc::UnboundedSender<Notification>,
    intake_rx: mpsc::UnboundedReceiver<Notification>,
}

impl DeliveryPipeline {
    pub(crate) fn new(parts: Collaborators) -> Self {
        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        Self {
            parts,
            policy: PolicyStore::new(),
            outstanding: OutstandingIndex::new(),
            machine: TransferMachine::new(),
            intake_tx,
            intake_rx,
        }
    }

    pub fn intake_handle(&self) -> IntakeHandle {
        IntakeHandle {
            tx: self.intake_tx.clone(),
        }
    }

    /// 放入入站队列（等待规范化与过滤）
    pub fn submit(&self, notification: Notification) {
        // 接收端由自身持有，发送不会失败
        let _ = self.intake_tx.send(notification);
    }

    /// 等待下一条入站通知
    pub async fn next_intake(&mut self) -> Option<Notification> {
        self.intake_rx.recv().await
    }

    /// 同步处理入站队列中的全部通知，分组摘要排在其他通知之后
    pub fn process_intake(&mut self) -> usize {
        let mut summaries = Vec::new();
        let mut processed = 0;

        while let Ok(notification) = self.intake_rx.try_recv() {
            if notification.group_role == GroupRole::Summary {
                summaries.push(notification);
                continue;
            }
            self.process_notification(notification);
            processed += 1;
        }

        for notification in summaries {
            self.process_notification(notification);
            processed += 1;
        }
        processed
    }

    /// 处理单条通知，返回过滤结果
    pub fn process_notification(&mut self, mut notification: Notification) -> Disposition {
        let settings = self.parts.settings.source(&notification.key);
        let global = self.parts.settings.global();

        normalizer::normalize(&mut notification, &settings);

        let context = self.filter_context(&notification);
        let disposition = filter::decide(
            &notification,
            &settings,
            &global,
            &context,
            &mut self.policy,
            &self.outstanding,
        );

        self.write_history(&notification, disposition, &settings);

        if !matches!(disposition, Disposition::Send | Disposition::KeepTemporary) {
            debug!(source = %notification.key, disposition = %disposition, "Notification not delivered");
            return disposition;
        }

        if settings.statusbar_color >> 24 != 0 {
            notification.color = settings.statusbar_color;
        }

        let id = record::assign_id(&self.outstanding);
        let mut record = DeliveryRecord::new(id, Arc::new(notification));

        if disposition == Disposition::KeepTemporary {
            self.outstanding.insert(&record);
            debug!(id, source = record.source(), "Notification kept as placeholder");
            return disposition;
        }

        let list = record.notification.is_list();
        if !list {
            let superseded = self.parts.groups.find_superseded_id(&record.notification.key);
            if settings.no_update_vibration {
                record.prev_id = superseded;
            }
            self.parts.groups.dismiss_group_siblings(&record);
        }

        record.sent_to_transport = true;
        let hide = settings.hide_notification_text && !list && !record.notification.flags.hiding_disallowed;
        if hide {
            self.send_hidden(record);
        } else {
            self.send_notification(record);
        }

        self.parts.history.schedule_retention_cleanup();
        disposition
    }

    fn filter_context(&self, notification: &Notification) -> FilterContext {
        FilterContext {
            now: self.parts.clock.now(),
            minute_of_day: self.parts.clock.minute_of_day(),
            screen_on: self.parts.environment.is_screen_on(),
            ringer: self.parts.environment.ringer_mode(),
            device_reachable: self.parts.companion.is_reachable(),
            interrupt_filtered: self.parts.environment.is_interrupt_filtered(&notification.key),
        }
    }

    fn write_history(&self, notification: &Notification, disposition: Disposition, settings: &SourceSettings) {
        let eligible = matches!(disposition, Disposition::Send | Disposition::HistoryOnly)
            && !notification.flags.history_disabled
            && !notification.is_list()
            && settings.save_to_history;
        if !eligible {
            return;
        }

        let result = self.parts.history.record_notification(
            notification.posted_at,
            &record::trim_chars(&notification.title, HISTORY_FIELD_LIMIT),
            &record::trim_chars(&notification.subtitle, HISTORY_FIELD_LIMIT),
            &record::trim_chars(&notification.body, HISTORY_FIELD_LIMIT),
            notification.icon.as_deref(),
        );
        if let Err(e) = result {
            warn!(source = %notification.key, error = %e, "Failed to write notification history");
        }
    }

    /// 用占位通知包裹原记录，原记录通过 Reveal 动作显示
    fn send_hidden(&mut self, record: DeliveryRecord) {
        let original = &record.notification;
        let mut cover = Notification::new(original.key.clone(), original.title.clone(), HIDDEN_BODY)
            .with_subtitle(HIDDEN_SUBTITLE);
        cover.flags.hiding_disallowed = true;
        cover.flags.history_disabled = true;
        cover.group_key = original.group_key.clone();
        cover.group_role = original.group_role;
        cover.posted_at = original.posted_at;

        debug!(id = record.id, source = record.source(), "Sending hidden cover notification");
        cover.actions = vec![NotificationAction::Reveal {
            label: REVEAL_LABEL.to_string(),
            original: Box::new(record),
        }];

        self.process_notification(cover);
    }

    /// 按投递方式发送记录
    pub fn send_notification(&mut self, mut record: DeliveryRecord) {
        let mode = if record.notification.is_list() {
            DeliveryMode::Companion
        } else {
            let context = self.parts.companion.current_foreground_context();
            self.parts.settings.global().delivery_mode(context.as_deref())
        };

        let mode = if mode == DeliveryMode::Native && !self.parts.native.is_open() {
            warn!(id = record.id, "Native channel closed, falling back to companion delivery");
            Arc::make_mut(&mut record.notification)
                .body
                .push_str(NATIVE_FALLBACK_NOTICE);
            DeliveryMode::Companion
        } else {
            mode
        };

        match mode {
            DeliveryMode::Companion => self.send_to_companion(record),
            DeliveryMode::Native => {
                record.native = true;
                self.outstanding.insert(&record);
                debug!(id = record.id, "Delivering through native channel");
                self.parts.native.deliver(&record.notification);
            }
            DeliveryMode::Disabled => {
                self.outstanding.insert(&record);
                debug!(id = record.id, "Delivery disabled for current foreground context");
            }
        }
    }

    fn send_to_companion(&mut self, mut record: DeliveryRecord) {
        let settings = self.parts.settings.source(&record.notification.key);
        let capabilities = self.parts.transport.capabilities();

        record.native = false;
        record.prepare_text(settings.max_text_length());
        record.icon = record
            .notification
            .icon
            .as_deref()
            .and_then(|raw| self.parts.attachments.prepare_icon(raw, &capabilities));
        record.background_len = record
            .notification
            .background_image
            .as_deref()
            .and_then(|raw| self.parts.attachments.prepare_background(raw, &capabilities))
            .map_or(0, |image| image.len());

        self.outstanding.insert(&record);
        info!(
            id = record.id,
            source = record.source(),
            chunks = record.chunk_count(),
            icon = record.icon.is_some(),
            "Notification accepted for transfer"
        );

        self.parts.companion.open_companion_app();
        self.machine.enqueue(record);
        self.parts.transport.request_priority_scheduling();
        self.parts.transport.advance_when_ready();
    }

    /// 传输层空闲：推进一步，发出了包返回 `true`
    pub fn notify_transfer_ready(&mut self) -> bool {
        let mut env = TransferEnv {
            transport: self.parts.transport.as_ref(),
            settings: self.parts.settings.as_ref(),
            attachments: self.parts.attachments.as_ref(),
            policy: &mut self.policy,
            outstanding: &self.outstanding,
            now: self.parts.clock.now(),
        };
        self.machine.advance(&mut env)
    }

    pub fn on_device_confirmation(&mut self, id: i32) -> ConfirmOutcome {
        let mut env = TransferEnv {
            transport: self.parts.transport.as_ref(),
            settings: self.parts.settings.as_ref(),
            attachments: self.parts.attachments.as_ref(),
            policy: &mut self.policy,
            outstanding: &self.outstanding,
            now: self.parts.clock.now(),
        };
        self.machine.on_confirmation(id, &mut env)
    }

    /// 处理设备发来的通知模块消息
    pub fn handle_device_message(&mut self, message: &PacketDictionary) -> Result<()> {
        match packet::parse_device_message(message)? {
            DeviceMessage::Confirmation { id } => {
                self.on_device_confirmation(id);
            }
            DeviceMessage::Unknown { kind } => {
                debug!(kind, "Ignoring unknown device message");
            }
        }
        Ok(())
    }

    pub fn on_companion_app_reopened(&mut self) {
        info!(pending = self.machine.queue().pending_len(), "Companion app reopened, restarting transfers");
        self.machine.on_app_reopened(self.parts.transport.as_ref());
    }

    /// 移除记录（例如原通知已被清除）；当前记录按完成处理
    pub fn remove_by_id(&mut self, id: i32) -> bool {
        let now = self.parts.clock.now();
        let was_current = self.machine.remove_by_id(id, &mut self.policy, now);
        if was_current {
            self.parts.transport.advance_when_ready();
        }
        was_current
    }

    pub fn clear_all(&mut self) {
        debug!("Sending queue cleared");
        self.machine.clear();
    }

    pub fn has_pending_work(&self) -> bool {
        self.machine.has_pending_work()
    }

    pub fn mute_source_until(&mut self, source: &str, until: DateTime<Utc>) {
        info!(source, until = %until, "Source muted");
        self.policy.mute_until(source, until);
    }

    pub fn clear_all_mutes(&mut self) {
        self.policy.clear_mutes();
    }

    /// 设备上触发了记录 `id` 的第 `index` 个动作，已处理返回 `true`
    pub fn trigger_action(&mut self, id: i32, index: usize) -> bool {
        let Some(entry) = self.outstanding.get(id) else {
            warn!(id, "Action for unknown notification");
            return false;
        };

        match entry.notification.actions.get(index) {
            Some(NotificationAction::Reveal { original, .. }) => {
                let mut revealed = (**original).clone();
                revealed.prev_id = id;
                info!(id = revealed.id, cover = id, "Revealing hidden notification");
                self.send_notification(revealed);
                true
            }
            Some(action) => {
                debug!(id, index, label = action.label(), "Action has no local handler");
                false
            }
            None => {
                warn!(id, index, "Action index out of range");
                false
            }
        }
    }

    /// 从在途索引中移除（设备端已清除）
    pub fn forget_outstanding(&mut self, id: i32) -> bool {
        self.outstanding.forget(id).is_some()
    }

    pub fn clear_outstanding(&mut self) {
        self.outstanding.clear();
    }

    pub fn outstanding(&self) -> &OutstandingIndex {
        &self.outstanding
    }

    pub fn policy(&self) -> &PolicyStore {
        &self.policy
    }

    pub fn queue(&self) -> &SendingQueue {
        self.machine.queue()
    }
}
