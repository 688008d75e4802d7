//! 投递记录 - 一条通知从接受到设备确认完成期间的可变状态

use rand::Rng;
use std::sync::Arc;

use super::outstanding::OutstandingIndex;
use super::source::Notification;

/// 每个文本分块的字节数
pub const CHUNK_SIZE: usize = 100;
/// 0-9 为系统保留 ID
pub const FIRST_ASSIGNABLE_ID: i32 = 10;

/// 传输状态（由记录字段推导）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// 已入队，未开始
    Pending,
    /// 已发送初始描述包，等待设备确认
    AwaitingConfirm,
    /// 正在发送图标
    SendingIcon,
    /// 正在发送文本分块
    SendingText,
    /// 全部发送完成
    Done,
}

/// 已编码的文本：`title \0 subtitle \0 body`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextPayload {
    pub bytes: Vec<u8>,
    /// 副标题第一个字节的偏移
    pub subtitle_offset: u16,
    /// 正文第一个字节的偏移
    pub body_offset: u16,
}

impl TextPayload {
    /// 组装并截断文本，记录副标题/正文偏移
    pub fn build(title: &str, subtitle: &str, body: &str, limit: usize) -> Self {
        let merged = format!("{}\0{}\0{}", title, subtitle, body);
        let bytes = truncate_text(&merged, limit).into_bytes();

        let mut separators = bytes
            .iter()
            .enumerate()
            .filter(|(_, b)| **b == 0)
            .map(|(i, _)| (i + 1) as u16);
        let subtitle_offset = separators.next().unwrap_or(0);
        let body_offset = separators.next().unwrap_or(0);

        Self {
            bytes,
            subtitle_offset,
            body_offset,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn chunk_count(&self) -> usize {
        self.bytes.len().div_ceil(CHUNK_SIZE)
    }

    pub fn chunk(&self, index: usize) -> Option<&[u8]> {
        self.bytes.chunks(CHUNK_SIZE).nth(index)
    }
}

/// 超过 `limit` 个字符时截断为 `limit - 3` 个字符加 `...`
pub fn truncate_text(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let kept: String = text.chars().take(limit.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// 按字符数截断（不加省略号），用于历史记录
pub fn trim_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

/// 投递记录
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    /// 投递 ID
    pub id: i32,
    /// 被替换的上一条记录 ID（0 表示无）
    pub prev_id: i32,
    pub notification: Arc<Notification>,
    pub text: TextPayload,
    /// 下一个要发送的分块，`None` 表示尚未发送初始描述包
    pub cursor: Option<usize>,
    pub awaiting_confirmation: bool,
    pub needs_icon: bool,
    /// 已编码图标，超过单包预算时为 `None`
    pub icon: Option<Vec<u8>>,
    /// 已编码背景图长度，0 表示无
    pub background_len: usize,
    pub sent_to_transport: bool,
    pub vibrated: bool,
    /// 是否走原生通知
    pub native: bool,
}

impl DeliveryRecord {
    pub fn new(id: i32, notification: Arc<Notification>) -> Self {
        Self {
            id,
            prev_id: 0,
            notification,
            text: TextPayload::default(),
            cursor: None,
            awaiting_confirmation: false,
            needs_icon: false,
            icon: None,
            background_len: 0,
            sent_to_transport: false,
            vibrated: false,
            native: false,
        }
    }

    /// 来源包名（限流维度）
    pub fn source(&self) -> &str {
        &self.notification.key.package
    }

    /// 生成文本分块
    pub fn prepare_text(&mut self, limit: usize) {
        let n = &self.notification;
        self.text = TextPayload::build(&n.title, &n.subtitle, &n.body, limit);
    }

    pub fn chunk_count(&self) -> usize {
        self.text.chunk_count()
    }

    pub fn state(&self) -> TransferState {
        match self.cursor {
            None if self.awaiting_confirmation => TransferState::AwaitingConfirm,
            None => TransferState::Pending,
            Some(_) if self.awaiting_confirmation => TransferState::AwaitingConfirm,
            Some(_) if self.needs_icon => TransferState::SendingIcon,
            Some(cursor) if cursor < self.chunk_count() => TransferState::SendingText,
            Some(_) => TransferState::Done,
        }
    }
}

/// 随机分配不与在途索引冲突的 ID
pub fn assign_id(outstanding: &OutstandingIndex) -> i32 {
    let mut rng = rand::thread_rng();
    loop {
        let id = rng.gen_range(FIRST_ASSIGNABLE_ID..i32::MAX);
        if !outstanding.contains(id) {
            return id;
        }
    }
}
