//! 外部协作方接口 - 传输层、设备状态、分组撤回、附件、原生通知、历史
//!
//! 流水线只通过这些 trait 与外界交互；所有实现都必须是 `Send + Sync`，
//! 以便流水线在专用 worker 上运行。

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::filter::RingerMode;
use super::packet::PacketDictionary;
use super::record::DeliveryRecord;
use super::source::{Notification, SourceKey};

/// 默认单条消息上限，可容纳完整的 100 字节文本分块包
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 256;

/// 已连接设备的能力
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub color: bool,
    /// 单条消息的最大字节数
    pub max_message_size: usize,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            color: false,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// 传输层
pub trait Transport: Send + Sync {
    /// 发送一个包（发出即返回，不等待结果）
    fn send_packet(&self, packet: PacketDictionary);

    /// 请求优先调度发送模块
    fn request_priority_scheduling(&self);

    /// 传输空闲时回调 `notify_transfer_ready`
    fn advance_when_ready(&self);

    fn capabilities(&self) -> Capabilities;

    fn supports_color(&self) -> bool {
        self.capabilities().color
    }

    /// 在 `partial` 基础上再加一个元组时可用的字节数
    fn remaining_bytes_in_packet(&self, partial: &PacketDictionary) -> usize {
        partial.remaining_bytes(self.capabilities().max_message_size)
    }
}

/// 伴侣设备状态
pub trait CompanionState: Send + Sync {
    fn is_reachable(&self) -> bool;

    /// 设备当前前台上下文（例如正在运行的表盘/应用）
    fn current_foreground_context(&self) -> Option<String>;

    fn open_companion_app(&self);
}

/// 手机本地环境（屏幕、响铃、勿扰）
pub trait DeviceEnvironment: Send + Sync {
    fn is_screen_on(&self) -> bool;

    fn ringer_mode(&self) -> RingerMode;

    fn is_interrupt_filtered(&self, key: &SourceKey) -> bool;
}

/// 分组/替换协作方
pub trait GroupDismissal: Send + Sync {
    /// 应被新通知替换的旧投递 ID（0 表示无）
    fn find_superseded_id(&self, key: &SourceKey) -> i32;

    /// 撤回设备上与该记录同组的旧通知
    fn dismiss_group_siblings(&self, record: &DeliveryRecord);
}

/// 图片附件协作方（像素格式转换与背景图传输）
pub trait Attachments: Send + Sync {
    fn prepare_icon(&self, raw: &[u8], capabilities: &Capabilities) -> Option<Vec<u8>>;

    fn prepare_background(&self, raw: &[u8], capabilities: &Capabilities) -> Option<Vec<u8>>;

    /// 设备确认后开始传输背景图
    fn start_image_transfer(&self, id: i32, background_len: usize);
}

/// 原生通知通道
pub trait NativeDelivery: Send + Sync {
    fn is_open(&self) -> bool;

    fn deliver(&self, notification: &Notification);
}

/// 通知历史
pub trait HistoryStore: Send + Sync {
    fn record_notification(
        &self,
        posted_at: DateTime<Utc>,
        title: &str,
        subtitle: &str,
        body: &str,
        icon: Option<&[u8]>,
    ) -> Result<()>;

    fn schedule_retention_cleanup(&self);
}

/// 默认协作方：设备可达、屏幕关闭、响铃正常、无替换、附件原样透传、原生通道关闭、不写历史
///
/// 作为传输层时丢弃所有包
#[derive(Debug, Default, Clone, Copy)]
pub struct Unattached;

impl Transport for Unattached {
    fn send_packet(&self, _packet: PacketDictionary) {}

    fn request_priority_scheduling(&self) {}

    fn advance_when_ready(&self) {}

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }
}

impl CompanionState for Unattached {
    fn is_reachable(&self) -> bool {
        true
    }

    fn current_foreground_context(&self) -> Option<String> {
        None
    }

    fn open_companion_app(&self) {}
}

impl DeviceEnvironment for Unattached {
    fn is_screen_on(&self) -> bool {
        false
    }

    fn ringer_mode(&self) -> RingerMode {
        RingerMode::Normal
    }

    fn is_interrupt_filtered(&self, _key: &SourceKey) -> bool {
        false
    }
}

impl GroupDismissal for Unattached {
    fn find_superseded_id(&self, _key: &SourceKey) -> i32 {
        0
    }

    fn dismiss_group_siblings(&self, _record: &DeliveryRecord) {}
}

impl Attachments for Unattached {
    fn prepare_icon(&self, raw: &[u8], _capabilities: &Capabilities) -> Option<Vec<u8>> {
        Some(raw.to_vec())
    }

    fn prepare_background(&self, raw: &[u8], capabilities: &Capabilities) -> Option<Vec<u8>> {
        capabilities.color.then(|| raw.to_vec())
    }

    fn start_image_transfer(&self, _id: i32, _background_len: usize) {}
}

impl NativeDelivery for Unattached {
    fn is_open(&self) -> bool {
        false
    }

    fn deliver(&self, _notification: &Notification) {}
}

impl HistoryStore for Unattached {
    fn record_notification(
        &self,
        _posted_at: DateTime<Utc>,
        _title: &str,
        _subtitle: &str,
        _body: &str,
        _icon: Option<&[u8]>,
    ) -> Result<()> {
        Ok(())
    }

    fn schedule_retention_cleanup(&self) {}
}

/// 记录所有发出包的传输层（测试与回放使用）
#[derive(Debug, Default)]
pub struct RecordingTransport {
    capabilities: Capabilities,
    sent: Mutex<Vec<PacketDictionary>>,
    priority_requests: AtomicUsize,
    wants_advance: AtomicBool,
}

impl RecordingTransport {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            ..Self::default()
        }
    }

    /// 取出已发送的包
    pub fn take_sent(&self) -> Vec<PacketDictionary> {
        match self.sent.lock() {
            Ok(mut sent) => std::mem::take(&mut *sent),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn priority_requests(&self) -> usize {
        self.priority_requests.load(Ordering::SeqCst)
    }

    /// 读取并清除"请求推进"标记
    pub fn take_advance_request(&self) -> bool {
        self.wants_advance.swap(false, Ordering::SeqCst)
    }
}

impl Transport for RecordingTransport {
    fn send_packet(&self, packet: PacketDictionary) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(packet);
        }
    }

    fn request_priority_scheduling(&self) {
        self.priority_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn advance_when_ready(&self) {
        self.wants_advance.store(true, Ordering::SeqCst);
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::packet;
    use crate::notification::record::CHUNK_SIZE;

    #[test]
    fn test_recording_transport() {
        let transport = RecordingTransport::new(Capabilities::default());
        let mut packet = PacketDictionary::new();
        packet.add_u8(0, 1);
        transport.send_packet(packet.clone());
        transport.request_priority_scheduling();
        transport.advance_when_ready();

        assert_eq!(transport.sent_count(), 1);
        assert_eq!(transport.priority_requests(), 1);
        assert!(transport.take_advance_request());
        assert!(!transport.take_advance_request());
        assert_eq!(transport.take_sent(), vec![packet]);
        assert_eq!(transport.sent_count(), 0);
    }

    #[test]
    fn test_default_remaining_bytes_uses_capabilities() {
        let transport = RecordingTransport::new(Capabilities {
            color: true,
            max_message_size: 200,
        });
        let packet = PacketDictionary::new();
        assert_eq!(transport.remaining_bytes_in_packet(&packet), 200 - 1 - 7);
        assert!(transport.supports_color());
    }

    #[test]
    fn test_default_budget_fits_full_text_chunk() {
        let packet = packet::text_chunk_packet(42, &[b'x'; CHUNK_SIZE]);
        assert!(packet.encoded_len() <= Capabilities::default().max_message_size);
        assert!(Unattached.remaining_bytes_in_packet(&packet::icon_packet_base(42)) >= 100);
    }
}
