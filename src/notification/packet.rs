//! 数据包编码 - 键值元组字典及通知传输各步骤的包
//!
//! 线上格式：`count:u8`，随后每个元组为 `key:u32le, type:u8, len:u16le, value`，
//! 整数值为小端序。描述包头部（key 3 的字节块）内的多字节字段为大端序。

use anyhow::{anyhow, bail, Result};

/// 通知发送模块 ID
pub const MODULE_NOTIFICATION_SENDING: u8 = 1;

pub const KEY_MODULE: u32 = 0;
pub const KEY_STEP: u32 = 1;
pub const KEY_ID: u32 = 2;
pub const KEY_PAYLOAD: u32 = 3;
pub const KEY_PREV_ID: u32 = 4;
pub const KEY_ICON_SIZE: u32 = 5;
/// 初始描述包标记
pub const KEY_INITIAL_MARKER: u32 = 999;

/// 每个元组的头部长度
pub const TUPLE_HEADER_LEN: usize = 7;
/// 描述包固定头部长度
pub const DESCRIPTOR_HEADER_LEN: usize = 18;

pub const FLAG_LIST: u8 = 0x02;
pub const FLAG_SWITCH_TO_THIS: u8 = 0x04;
pub const FLAG_SCROLL_TO_END: u8 = 0x08;
pub const FLAG_SELECT_PRESS_MENU: u8 = 0x10;
pub const FLAG_SELECT_HOLD_MENU: u8 = 0x20;

/// 传输步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Step {
    Initial = 0,
    TextChunk = 1,
    Icon = 2,
}

/// 元组值
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TupleValue {
    Bytes(Vec<u8>),
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Int32(i32),
}

impl TupleValue {
    fn type_tag(&self) -> u8 {
        match self {
            TupleValue::Bytes(_) => 0,
            TupleValue::Uint8(_) | TupleValue::Uint16(_) | TupleValue::Uint32(_) => 2,
            TupleValue::Int32(_) => 3,
        }
    }

    fn value_bytes(&self) -> Vec<u8> {
        match self {
            TupleValue::Bytes(b) => b.clone(),
            TupleValue::Uint8(v) => vec![*v],
            TupleValue::Uint16(v) => v.to_le_bytes().to_vec(),
            TupleValue::Uint32(v) => v.to_le_bytes().to_vec(),
            TupleValue::Int32(v) => v.to_le_bytes().to_vec(),
        }
    }

    fn value_len(&self) -> usize {
        match self {
            TupleValue::Bytes(b) => b.len(),
            TupleValue::Uint8(_) => 1,
            TupleValue::Uint16(_) => 2,
            TupleValue::Uint32(_) | TupleValue::Int32(_) => 4,
        }
    }
}

/// 键值元组字典（保持插入顺序，同键覆盖）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketDictionary {
    tuples: Vec<(u32, TupleValue)>,
}

impl PacketDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: u32, value: TupleValue) {
        match self.tuples.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.tuples.push((key, value)),
        }
    }

    pub fn add_u8(&mut self, key: u32, value: u8) {
        self.insert(key, TupleValue::Uint8(value));
    }

    pub fn add_u16(&mut self, key: u32, value: u16) {
        self.insert(key, TupleValue::Uint16(value));
    }

    pub fn add_i32(&mut self, key: u32, value: i32) {
        self.insert(key, TupleValue::Int32(value));
    }

    pub fn add_bytes(&mut self, key: u32, value: Vec<u8>) {
        self.insert(key, TupleValue::Bytes(value));
    }

    pub fn get(&self, key: u32) -> Option<&TupleValue> {
        self.tuples.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// 读取整数值（任意整数类型）
    pub fn get_int(&self, key: u32) -> Option<i64> {
        match self.get(key)? {
            TupleValue::Uint8(v) => Some(*v as i64),
            TupleValue::Uint16(v) => Some(*v as i64),
            TupleValue::Uint32(v) => Some(*v as i64),
            TupleValue::Int32(v) => Some(*v as i64),
            TupleValue::Bytes(_) => None,
        }
    }

    pub fn get_bytes(&self, key: u32) -> Option<&[u8]> {
        match self.get(key)? {
            TupleValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// 编码后的字节长度
    pub fn encoded_len(&self) -> usize {
        1 + self
            .tuples
            .iter()
            .map(|(_, v)| TUPLE_HEADER_LEN + v.value_len())
            .sum::<usize>()
    }

    /// 在 `max_size` 的消息中，再添加一个元组时可用的值字节数
    pub fn remaining_bytes(&self, max_size: usize) -> usize {
        max_size.saturating_sub(self.encoded_len() + TUPLE_HEADER_LEN)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.push(self.tuples.len() as u8);
        for (key, value) in &self.tuples {
            out.extend_from_slice(&key.to_le_bytes());
            out.push(value.type_tag());
            out.extend_from_slice(&(value.value_len() as u16).to_le_bytes());
            out.extend_from_slice(&value.value_bytes());
        }
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let (&count, mut rest) = data.split_first().ok_or_else(|| anyhow!("Empty packet"))?;
        let mut dict = Self::new();

        for _ in 0..count {
            if rest.len() < TUPLE_HEADER_LEN {
                bail!("Truncated tuple header");
            }
            let key = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
            let tag = rest[4];
            let len = u16::from_le_bytes([rest[5], rest[6]]) as usize;
            rest = &rest[TUPLE_HEADER_LEN..];
            if rest.len() < len {
                bail!("Truncated tuple value for key {}", key);
            }
            let raw = &rest[..len];
            rest = &rest[len..];

            let value = match (tag, len) {
                (0, _) | (1, _) => TupleValue::Bytes(raw.to_vec()),
                (2, 1) => TupleValue::Uint8(raw[0]),
                (2, 2) => TupleValue::Uint16(u16::from_le_bytes([raw[0], raw[1]])),
                (2, 4) => TupleValue::Uint32(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
                (3, 1) => TupleValue::Int32(raw[0] as i8 as i32),
                (3, 2) => TupleValue::Int32(i16::from_le_bytes([raw[0], raw[1]]) as i32),
                (3, 4) => TupleValue::Int32(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
                _ => bail!("Unsupported tuple type {} with length {}", tag, len),
            };
            dict.insert(key, value);
        }

        Ok(dict)
    }
}

/// 描述包固定头部
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorHeader {
    pub flags: u8,
    pub periodic_vibration: u16,
    pub action_count: u8,
    pub text_length: u16,
    pub shake_action: u8,
    pub title_font: u8,
    pub subtitle_font: u8,
    pub body_font: u8,
    pub color: u8,
    pub background_len: u16,
    pub subtitle_offset: u16,
    pub body_offset: u16,
}

impl DescriptorHeader {
    /// 头部 + 振动模式
    pub fn to_bytes(&self, vibration: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(DESCRIPTOR_HEADER_LEN + vibration.len());
        out.push(self.flags);
        out.extend_from_slice(&self.periodic_vibration.to_be_bytes());
        out.push(self.action_count);
        out.extend_from_slice(&self.text_length.to_be_bytes());
        out.push(self.shake_action);
        out.push(self.title_font);
        out.push(self.subtitle_font);
        out.push(self.body_font);
        out.push(self.color);
        out.extend_from_slice(&self.background_len.to_be_bytes());
        out.extend_from_slice(&self.subtitle_offset.to_be_bytes());
        out.extend_from_slice(&self.body_offset.to_be_bytes());
        out.push(vibration.len() as u8);
        out.extend_from_slice(vibration);
        out
    }

    /// 解析头部，返回 (头部, 振动模式)
    pub fn parse(data: &[u8]) -> Result<(Self, Vec<u8>)> {
        if data.len() < DESCRIPTOR_HEADER_LEN {
            bail!("Descriptor header too short: {} bytes", data.len());
        }
        let be = |i: usize| u16::from_be_bytes([data[i], data[i + 1]]);
        let header = Self {
            flags: data[0],
            periodic_vibration: be(1),
            action_count: data[3],
            text_length: be(4),
            shake_action: data[6],
            title_font: data[7],
            subtitle_font: data[8],
            body_font: data[9],
            color: data[10],
            background_len: be(11),
            subtitle_offset: be(13),
            body_offset: be(15),
        };
        let vib_len = data[17] as usize;
        let vibration = data
            .get(DESCRIPTOR_HEADER_LEN..DESCRIPTOR_HEADER_LEN + vib_len)
            .ok_or_else(|| anyhow!("Vibration pattern truncated"))?
            .to_vec();
        Ok((header, vibration))
    }
}

fn base_packet(step: Step, id: i32) -> PacketDictionary {
    let mut dict = PacketDictionary::new();
    dict.add_u8(KEY_MODULE, MODULE_NOTIFICATION_SENDING);
    dict.add_u8(KEY_STEP, step as u8);
    dict.add_i32(KEY_ID, id);
    dict
}

/// 初始描述包
pub fn descriptor_packet(id: i32, prev_id: i32, header: &DescriptorHeader, vibration: &[u8], icon_len: u16) -> PacketDictionary {
    let mut dict = base_packet(Step::Initial, id);
    dict.add_bytes(KEY_PAYLOAD, header.to_bytes(vibration));
    dict.add_i32(KEY_PREV_ID, prev_id);
    dict.add_u8(KEY_INITIAL_MARKER, 1);
    dict.add_u16(KEY_ICON_SIZE, icon_len);
    dict
}

/// 文本分块包
pub fn text_chunk_packet(id: i32, chunk: &[u8]) -> PacketDictionary {
    let mut dict = base_packet(Step::TextChunk, id);
    dict.add_bytes(KEY_PAYLOAD, chunk.to_vec());
    dict
}

/// 图标包（不含图标数据，调用方按剩余预算决定是否附加）
pub fn icon_packet_base(id: i32) -> PacketDictionary {
    base_packet(Step::Icon, id)
}

/// ARGB 转设备 8 位调色板 `0b11RRGGBB`；透明色按黑色处理
pub fn reduce_color(argb: u32) -> u8 {
    let argb = if argb == 0 { 0xFF00_0000 } else { argb };
    let r = ((argb >> 16) & 0xFF) as u8;
    let g = ((argb >> 8) & 0xFF) as u8;
    let b = (argb & 0xFF) as u8;
    0b1100_0000 | ((r / 85) << 4) | ((g / 85) << 2) | (b / 85)
}

/// 设备发来的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceMessage {
    /// 设备确认收到初始描述包
    Confirmation { id: i32 },
    Unknown { kind: i64 },
}

/// 解析设备发来的通知模块消息（key 1 = 消息类型，key 2 = 投递 ID）
pub fn parse_device_message(dict: &PacketDictionary) -> Result<DeviceMessage> {
    let kind = dict.get_int(KEY_STEP).ok_or_else(|| anyhow!("Device message without kind"))?;
    match kind {
        0 => {
            let id = dict.get_int(KEY_ID).ok_or_else(|| anyhow!("Confirmation without id"))?;
            Ok(DeviceMessage::Confirmation { id: id as i32 })
        }
        other => Ok(DeviceMessage::Unknown { kind: other }),
    }
}
