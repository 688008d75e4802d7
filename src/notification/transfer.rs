//! 传输状态机 - 描述包 → 等待确认 → 图标 → 文本分块 → 完成
//!
//! 每次 `advance` 最多向传输层发出一个包。没有可发送内容时返回 `false`，
//! 传输层不再回调，直到下一次 `advance_when_ready`。

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::channel::{Attachments, Transport};
use super::outstanding::OutstandingIndex;
use super::packet::{self, DescriptorHeader, KEY_PAYLOAD};
use super::policy::PolicyStore;
use super::queue::SendingQueue;
use super::record::DeliveryRecord;
use super::vibration;
use crate::config::{GlobalSettings, SettingsStore, SourceSettings};

/// 单次推进最多跳过的内部步骤（跳过超大图标、完成记录等）
const MAX_ADVANCE_STEPS: usize = 8;

/// 推进时所需的外部状态
pub struct TransferEnv<'a> {
    pub transport: &'a dyn Transport,
    pub settings: &'a dyn SettingsStore,
    pub attachments: &'a dyn Attachments,
    pub policy: &'a mut PolicyStore,
    pub outstanding: &'a OutstandingIndex,
    pub now: DateTime<Utc>,
}

/// 设备确认的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// 未知 ID，已重置等待标记
    Stale,
    /// 记录成为当前记录
    Promoted,
    /// 重复确认当前记录
    AlreadyCurrent,
    /// ID 在途但已不在队列中（已被移除）
    Detached,
}

enum Progress {
    Sent,
    Idle,
    Continue,
}

#[derive(Debug, Default)]
pub struct TransferMachine {
    queue: SendingQueue,
}

impl TransferMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self) -> &SendingQueue {
        &self.queue
    }

    pub fn enqueue(&mut self, record: DeliveryRecord) {
        debug!(id = record.id, source = record.source(), chunks = record.chunk_count(), "Record queued");
        self.queue.push(record);
    }

    pub fn has_pending_work(&self) -> bool {
        self.queue.has_pending_work()
    }

    /// 推进一步，发出了包返回 `true`
    pub fn advance(&mut self, env: &mut TransferEnv<'_>) -> bool {
        for _ in 0..MAX_ADVANCE_STEPS {
            match self.step(env) {
                Progress::Sent => return true,
                Progress::Idle => return false,
                Progress::Continue => continue,
            }
        }
        warn!("Transfer advance exceeded step limit");
        false
    }

    fn step(&mut self, env: &mut TransferEnv<'_>) -> Progress {
        let Some(current) = self.queue.current_mut() else {
            return match self.queue.head_mut() {
                Some(head) if !head.awaiting_confirmation => {
                    send_descriptor(head, env);
                    Progress::Sent
                }
                _ => Progress::Idle,
            };
        };

        if current.cursor.is_none() {
            send_descriptor(current, env);
            return Progress::Sent;
        }

        if current.needs_icon {
            current.needs_icon = false;
            if let Some(icon) = current.icon.as_ref() {
                let mut packet = packet::icon_packet_base(current.id);
                let budget = env.transport.remaining_bytes_in_packet(&packet);
                if icon.len() <= budget {
                    packet.add_bytes(KEY_PAYLOAD, icon.clone());
                    env.transport.send_packet(packet);
                    return Progress::Sent;
                }
                warn!(id = current.id, icon_len = icon.len(), budget, "Icon exceeds packet budget, skipping");
            }
            return Progress::Continue;
        }

        let cursor = current.cursor.unwrap_or(0);
        if let Some(chunk) = current.text.chunk(cursor) {
            env.transport.send_packet(packet::text_chunk_packet(current.id, chunk));
            current.cursor = Some(cursor + 1);
            return Progress::Sent;
        }

        if let Some(done) = self.queue.take_current() {
            complete(&done, env.policy, env.now);
        }
        Progress::Continue
    }

    /// 处理设备对描述包的确认
    pub fn on_confirmation(&mut self, id: i32, env: &mut TransferEnv<'_>) -> ConfirmOutcome {
        if !env.outstanding.contains(id) {
            warn!(id, "Confirmation for unknown notification, restarting transfer");
            self.queue.reset_confirmations();
            if self.queue.has_pending_work() {
                env.transport.request_priority_scheduling();
                env.transport.advance_when_ready();
            }
            return ConfirmOutcome::Stale;
        }

        let outcome = match self.queue.take_pending(id) {
            Some(mut record) => {
                record.awaiting_confirmation = false;
                let background_len = record.background_len;
                if let Some(mut displaced) = self.queue.set_current(record) {
                    debug!(id = displaced.id, "Current record displaced by confirmation");
                    displaced.awaiting_confirmation = false;
                    self.queue.push_front(displaced);
                }
                if background_len > 0 && env.transport.supports_color() {
                    env.attachments.start_image_transfer(id, background_len);
                }
                ConfirmOutcome::Promoted
            }
            None => match self.queue.current_mut() {
                Some(current) if current.id == id => {
                    current.awaiting_confirmation = false;
                    debug!(id, state = ?current.state(), "Repeated confirmation for current record");
                    ConfirmOutcome::AlreadyCurrent
                }
                current => {
                    debug!(
                        id,
                        current = ?current.map(|c| (c.id, c.state())),
                        "Confirmed record is no longer queued"
                    );
                    ConfirmOutcome::Detached
                }
            },
        };

        env.transport.request_priority_scheduling();
        env.transport.advance_when_ready();
        outcome
    }

    /// 伴侣应用在设备上重新打开：从头重发所有未完成记录
    pub fn on_app_reopened(&mut self, transport: &dyn Transport) {
        self.queue.reset_confirmations();
        if let Some(current) = self.queue.current() {
            debug!(id = current.id, state = ?current.state(), "Current record folded back into queue");
        }
        self.queue.fold_current_back();
        if self.queue.has_pending_work() {
            transport.request_priority_scheduling();
            transport.advance_when_ready();
        }
    }

    /// 从队列移除指定 ID；若为当前记录则按完成处理，返回 `true`
    pub fn remove_by_id(&mut self, id: i32, policy: &mut PolicyStore, now: DateTime<Utc>) -> bool {
        let removed = self.queue.remove_pending(id);
        if removed > 0 {
            debug!(id, removed, "Queued record removed");
        }

        if self.queue.current().is_some_and(|c| c.id == id) {
            if let Some(done) = self.queue.take_current() {
                debug!(id, state = ?done.state(), "Current record removed, treating as delivered");
                complete(&done, policy, now);
            }
            return true;
        }
        false
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

fn complete(record: &DeliveryRecord, policy: &mut PolicyStore, now: DateTime<Utc>) {
    policy.record_delivery(record.source(), record.vibrated, now);
    info!(id = record.id, source = record.source(), vibrated = record.vibrated, "Notification transfer complete");
}

fn send_descriptor(record: &mut DeliveryRecord, env: &mut TransferEnv<'_>) {
    let settings = env.settings.source(&record.notification.key);
    let global = env.settings.global();

    let vibration = select_vibration(record, &settings, env.policy, env.now);
    let header = build_header(record, &settings, &global, env.transport.supports_color());
    let icon_len = record.icon.as_ref().map_or(0, |icon| icon.len().min(u16::MAX as usize) as u16);

    record.cursor = Some(0);
    record.awaiting_confirmation = true;
    record.sent_to_transport = true;
    record.needs_icon = record.icon.is_some();

    debug!(
        id = record.id,
        prev_id = record.prev_id,
        text_len = header.text_length,
        vibrated = record.vibrated,
        "Sending notification descriptor"
    );
    env.transport
        .send_packet(packet::descriptor_packet(record.id, record.prev_id, &header, &vibration, icon_len));
}

/// 选择振动模式；最小振动间隔内使用静音模式
pub fn select_vibration(
    record: &mut DeliveryRecord,
    settings: &SourceSettings,
    policy: &PolicyStore,
    now: DateTime<Utc>,
) -> Vec<u8> {
    let interval = settings.min_vibration_interval_secs();
    if policy.within_vibration_interval(record.source(), interval, now) {
        debug!(source = record.source(), interval, "Vibration suppressed by minimum interval");
        record.vibrated = false;
        return vibration::silent_pattern();
    }

    record.vibrated = true;
    match record.notification.forced_vibration.as_deref() {
        Some(pattern) => vibration::from_platform_pattern(pattern),
        None => vibration::parse_pattern(&settings.vibration_pattern),
    }
}

/// 组装描述包头部
pub fn build_header(
    record: &DeliveryRecord,
    settings: &SourceSettings,
    global: &GlobalSettings,
    color_capable: bool,
) -> DescriptorHeader {
    let notification = &record.notification;
    let action_count = notification.actions.len().min(u8::MAX as usize) as u8;

    let mut flags = 0u8;
    if notification.flags.list {
        flags |= packet::FLAG_LIST;
    }
    if settings.switch_to_most_recent || notification.flags.force_switch {
        flags |= packet::FLAG_SWITCH_TO_THIS;
    }
    if notification.flags.scroll_to_end {
        flags |= packet::FLAG_SCROLL_TO_END;
    }
    if action_count > 0 && global.show_menu_instantly {
        if notification.flags.force_action_menu || settings.select_press_action == 2 {
            flags |= packet::FLAG_SELECT_PRESS_MENU;
        }
        if settings.select_hold_action == 2 {
            flags |= packet::FLAG_SELECT_HOLD_MENU;
        }
    }

    // 菜单未预先发送时，摇晃不能打开菜单，退化为关闭
    let shake_action = if settings.shake_action == 2 && !global.show_menu_instantly {
        1
    } else {
        settings.shake_action
    };

    DescriptorHeader {
        flags,
        periodic_vibration: settings.periodic_vibration_interval(),
        action_count,
        text_length: record.text.len().min(u16::MAX as usize) as u16,
        shake_action,
        title_font: settings.title_font,
        subtitle_font: settings.subtitle_font,
        body_font: settings.body_font,
        color: if color_capable { packet::reduce_color(notification.color) } else { 0 },
        background_len: if color_capable {
            record.background_len.min(u16::MAX as usize) as u16
        } else {
            0
        },
        subtitle_offset: record.text.subtitle_offset,
        body_offset: record.text.body_offset,
    }
}
