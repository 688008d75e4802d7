//! 发送队列 - 待发送记录 FIFO + 至多一条"当前"记录
//!
//! 当前记录与队列中的记录互不重叠。

use std::collections::VecDeque;

use super::record::DeliveryRecord;

#[derive(Debug, Default)]
pub struct SendingQueue {
    pending: VecDeque<DeliveryRecord>,
    current: Option<DeliveryRecord>,
}

impl SendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: DeliveryRecord) {
        self.pending.push_back(record);
    }

    pub fn push_front(&mut self, record: DeliveryRecord) {
        self.pending.push_front(record);
    }

    pub fn head(&self) -> Option<&DeliveryRecord> {
        self.pending.front()
    }

    pub fn head_mut(&mut self) -> Option<&mut DeliveryRecord> {
        self.pending.front_mut()
    }

    pub fn current(&self) -> Option<&DeliveryRecord> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut DeliveryRecord> {
        self.current.as_mut()
    }

    pub fn set_current(&mut self, record: DeliveryRecord) -> Option<DeliveryRecord> {
        self.current.replace(record)
    }

    pub fn take_current(&mut self) -> Option<DeliveryRecord> {
        self.current.take()
    }

    /// 从待发送队列中取出指定 ID 的记录
    pub fn take_pending(&mut self, id: i32) -> Option<DeliveryRecord> {
        let pos = self.pending.iter().position(|r| r.id == id)?;
        self.pending.remove(pos)
    }

    /// 删除待发送队列中所有指定 ID 的记录，返回删除数量
    pub fn remove_pending(&mut self, id: i32) -> usize {
        let before = self.pending.len();
        self.pending.retain(|r| r.id != id);
        before - self.pending.len()
    }

    /// 清除所有"等待确认"标记
    pub fn reset_confirmations(&mut self) {
        for record in self.pending.iter_mut() {
            record.awaiting_confirmation = false;
        }
        if let Some(current) = self.current.as_mut() {
            current.awaiting_confirmation = false;
        }
    }

    /// 把当前记录放回队首
    pub fn fold_current_back(&mut self) -> bool {
        match self.current.take() {
            Some(record) => {
                self.pending.push_front(record);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.current = None;
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending_work(&self) -> bool {
        self.current.is_some() || !self.pending.is_empty()
    }

    pub fn pending(&self) -> impl Iterator<Item = &DeliveryRecord> {
        self.pending.iter()
    }
}
