//! 在途投递索引 - 所有已发往设备（或占位保留）的记录
//!
//! 条目由外层会话显式清除，本地队列删除记录不会影响索引。

use std::collections::HashMap;
use std::sync::Arc;

use super::record::DeliveryRecord;
use super::source::Notification;

/// 索引条目（只保存分组/去重/确认所需的不可变部分）
#[derive(Debug, Clone)]
pub struct OutstandingEntry {
    pub id: i32,
    pub notification: Arc<Notification>,
    pub background_len: usize,
    /// 是否实际发往设备（占位条目为 false）
    pub sent_to_device: bool,
}

impl From<&DeliveryRecord> for OutstandingEntry {
    fn from(record: &DeliveryRecord) -> Self {
        Self {
            id: record.id,
            notification: record.notification.clone(),
            background_len: record.background_len,
            sent_to_device: record.sent_to_transport,
        }
    }
}

/// 在途索引
#[derive(Debug, Default)]
pub struct OutstandingIndex {
    entries: HashMap<i32, OutstandingEntry>,
}

impl OutstandingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: &DeliveryRecord) {
        self.entries.insert(record.id, OutstandingEntry::from(record));
    }

    pub fn get(&self, id: i32) -> Option<&OutstandingEntry> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: i32) -> bool {
        self.entries.contains_key(&id)
    }

    /// 移除单个条目
    pub fn forget(&mut self, id: i32) -> Option<OutstandingEntry> {
        self.entries.remove(&id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutstandingEntry> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::source::SourceKey;

    #[test]
    fn test_insert_and_forget() {
        let mut index = OutstandingIndex::new();
        let n = Arc::new(Notification::new(SourceKey::new("com.chat"), "T", "B"));
        let mut record = DeliveryRecord::new(11, n);
        record.background_len = 300;
        index.insert(&record);

        assert!(index.contains(11));
        assert_eq!(index.get(11).unwrap().background_len, 300);
        assert!(!index.get(11).unwrap().sent_to_device);

        assert!(index.forget(11).is_some());
        assert!(index.is_empty());
    }
}
