//! 通知历史 - 本地 JSONL 文件读写

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

use super::channel::HistoryStore;

/// 历史记录（JSONL 格式）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// 通知原始时间
    pub ts: DateTime<Utc>,
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub body: String,
    /// 图标字节数（图标本身不落盘）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_len: Option<usize>,
}

const MAX_RECORDS: usize = 200;
const KEEP_AFTER_CLEANUP: usize = 100;
const CLEANUP_CHECK_INTERVAL: usize = 10;
/// 估算行数时使用的平均行长
const ESTIMATED_LINE_BYTES: u64 = 120;

/// JSONL 历史存储
#[derive(Debug)]
pub struct JsonlHistoryStore {
    path: PathBuf,
    writes: AtomicUsize,
}

impl JsonlHistoryStore {
    /// 默认存储文件路径
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("wear-notify")
            .join("history.jsonl")
    }

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn open_default() -> Self {
        Self::new(Self::default_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 追加记录（带文件锁）
    pub fn append(&self, record: &HistoryRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create history dir: {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open history file: {}", self.path.display()))?;

        file.lock_exclusive()?;
        let result = writeln!(file, "{}", serde_json::to_string(record)?);
        file.unlock()?;
        result?;

        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// 读取最近 N 条记录（按时间排序）
    pub fn read_recent(&self, n: usize) -> Vec<HistoryRecord> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };

        let records = read_records(BufReader::new(file));
        let start = records.len().saturating_sub(n);
        let mut recent = records[start..].to_vec();
        recent.sort_by_key(|r| r.ts);
        recent
    }

    /// 写入次数达到检查间隔且文件估算行数过多时清理
    pub fn maybe_cleanup(&self) {
        let count = self.writes.load(Ordering::Relaxed);
        if count == 0 || count % CLEANUP_CHECK_INTERVAL != 0 {
            return;
        }

        if let Ok(metadata) = fs::metadata(&self.path) {
            if metadata.len() / ESTIMATED_LINE_BYTES > MAX_RECORDS as u64 {
                if let Err(e) = self.cleanup() {
                    warn!(path = %self.path.display(), error = %e, "History cleanup failed");
                }
            }
        }
    }

    /// 超过上限时只保留最近的记录，返回删除的条数
    pub fn cleanup(&self) -> Result<usize> {
        let file = File::open(&self.path)?;
        file.lock_exclusive()?;

        let records = read_records(BufReader::new(&file));
        if records.len() <= MAX_RECORDS {
            file.unlock()?;
            return Ok(0);
        }

        let start = records.len().saturating_sub(KEEP_AFTER_CLEANUP);
        let temp_path = self.path.with_extension("tmp");
        {
            let mut temp_file = File::create(&temp_path)?;
            for record in &records[start..] {
                writeln!(temp_file, "{}", serde_json::to_string(record)?)?;
            }
        }

        fs::rename(&temp_path, &self.path)?;
        file.unlock()?;

        debug!(removed = start, kept = records.len() - start, "History cleaned up");
        Ok(start)
    }
}

fn read_records(reader: impl BufRead) -> Vec<HistoryRecord> {
    reader
        .lines()
        .map_while(|line| line.ok())
        .filter_map(|line| serde_json::from_str(&line).ok())
        .collect()
}

impl HistoryStore for JsonlHistoryStore {
    fn record_notification(
        &self,
        posted_at: DateTime<Utc>,
        title: &str,
        subtitle: &str,
        body: &str,
        icon: Option<&[u8]>,
    ) -> Result<()> {
        self.append(&HistoryRecord {
            ts: posted_at,
            title: title.to_string(),
            subtitle: subtitle.to_string(),
            body: body.to_string(),
            icon_len: icon.map(|i| i.len()),
        })
    }

    fn schedule_retention_cleanup(&self) {
        self.maybe_cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn record(title: &str, ts: DateTime<Utc>) -> HistoryRecord {
        HistoryRecord {
            ts,
            title: title.to_string(),
            subtitle: String::new(),
            body: "body".to_string(),
            icon_len: None,
        }
    }

    #[test]
    fn test_append_and_read_recent() {
        let dir = TempDir::new().unwrap();
        let store = JsonlHistoryStore::new(dir.path().join("nested").join("history.jsonl"));
        let now = Utc::now();

        store.append(&record("first", now)).unwrap();
        store.append(&record("second", now + Duration::seconds(1))).unwrap();
        store.append(&record("third", now + Duration::seconds(2))).unwrap();

        let recent = store.read_recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].title, "second");
        assert_eq!(recent[1].title, "third");
    }

    #[test]
    fn test_read_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = JsonlHistoryStore::new(dir.path().join("none.jsonl"));
        assert!(store.read_recent(10).is_empty());
    }

    #[test]
    fn test_record_notification_keeps_icon_length() {
        let dir = TempDir::new().unwrap();
        let store = JsonlHistoryStore::new(dir.path().join("history.jsonl"));
        store
            .record_notification(Utc::now(), "Chat", "Bob", "hi", Some(&[1, 2, 3]))
            .unwrap();

        let recent = store.read_recent(1);
        assert_eq!(recent[0].subtitle, "Bob");
        assert_eq!(recent[0].icon_len, Some(3));
    }

    #[test]
    fn test_cleanup_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let store = JsonlHistoryStore::new(dir.path().join("history.jsonl"));
        let start = Utc::now();
        for i in 0..(MAX_RECORDS + 5) {
            store
                .append(&record(&format!("n{}", i), start + Duration::seconds(i as i64)))
                .unwrap();
        }

        let removed = store.cleanup().unwrap();
        assert_eq!(removed, MAX_RECORDS + 5 - KEEP_AFTER_CLEANUP);

        let all = store.read_recent(usize::MAX);
        assert_eq!(all.len(), KEEP_AFTER_CLEANUP);
        assert_eq!(all.last().unwrap().title, format!("n{}", MAX_RECORDS + 4));
    }

    #[test]
    fn test_cleanup_below_limit_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = JsonlHistoryStore::new(dir.path().join("history.jsonl"));
        store.append(&record("only", Utc::now())).unwrap();
        assert_eq!(store.cleanup().unwrap(), 0);
        assert_eq!(store.read_recent(10).len(), 1);
    }
}
