//! 限流/静音状态 - 按来源记录最近振动、最近通知和临时静音

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::debug;

/// 按来源（应用包名）维护的投递策略状态
#[derive(Debug, Default)]
pub struct PolicyStore {
    /// 最近一次振动
    last_vibration: HashMap<String, DateTime<Utc>>,
    /// 最近一次完成投递
    last_notification: HashMap<String, DateTime<Utc>>,
    /// 临时静音到期时间
    mutes: HashMap<String, DateTime<Utc>>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 静音指定来源直到 `until`
    pub fn mute_until(&mut self, source: &str, until: DateTime<Utc>) {
        debug!(source = %source, until = %until, "Source muted");
        self.mutes.insert(source.to_string(), until);
    }

    /// 清除所有临时静音
    pub fn clear_mutes(&mut self) {
        self.mutes.clear();
    }

    /// 移除已过期的静音记录
    pub fn evict_expired_mute(&mut self, source: &str, now: DateTime<Utc>) {
        if let Some(until) = self.mutes.get(source) {
            if *until <= now {
                debug!(source = %source, "Temporary mute expired");
                self.mutes.remove(source);
            }
        }
    }

    /// 是否处于静音中
    pub fn is_muted(&self, source: &str, now: DateTime<Utc>) -> bool {
        self.mutes.get(source).is_some_and(|until| *until > now)
    }

    /// 距上次投递是否仍在最小间隔内
    pub fn within_notification_interval(&self, source: &str, interval_secs: u64, now: DateTime<Utc>) -> bool {
        elapsed(self.last_notification.get(source), now)
            .is_some_and(|e| interval_secs > 0 && interval(interval_secs).map_or(true, |limit| e < limit))
    }

    /// 距上次振动是否仍在最小间隔内（含边界）
    pub fn within_vibration_interval(&self, source: &str, interval_secs: u64, now: DateTime<Utc>) -> bool {
        elapsed(self.last_vibration.get(source), now)
            .is_some_and(|e| interval_secs > 0 && interval(interval_secs).map_or(true, |limit| e <= limit))
    }

    /// 记录一次完成的投递
    pub fn record_delivery(&mut self, source: &str, vibrated: bool, now: DateTime<Utc>) {
        if vibrated {
            self.last_vibration.insert(source.to_string(), now);
        }
        self.last_notification.insert(source.to_string(), now);
    }

    pub fn last_notification(&self, source: &str) -> Option<DateTime<Utc>> {
        self.last_notification.get(source).copied()
    }

    pub fn last_vibration(&self, source: &str) -> Option<DateTime<Utc>> {
        self.last_vibration.get(source).copied()
    }

    pub fn mute_count(&self) -> usize {
        self.mutes.len()
    }
}

/// 超出 `Duration` 表示范围时返回 `None`（视为永不到期）
fn interval(secs: u64) -> Option<Duration> {
    i64::try_from(secs).ok().and_then(Duration::try_seconds)
}

fn elapsed(last: Option<&DateTime<Utc>>, now: DateTime<Utc>) -> Option<Duration> {
    last.map(|last| now.signed_duration_since(*last))
}
