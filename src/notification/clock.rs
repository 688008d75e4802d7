//! 时钟 - 流水线读取当前时间的唯一入口

use chrono::{DateTime, Duration, Local, Timelike, Utc};
use std::sync::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// 本地时间的当天分钟数（静默时段判断使用）
    fn minute_of_day(&self) -> u32;
}

/// 系统时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn minute_of_day(&self) -> u32 {
        let local = Local::now();
        local.hour() * 60 + local.minute()
    }
}

/// 手动推进的时钟，分钟数按 UTC 计算
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = at;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn minute_of_day(&self) -> u32 {
        let now = self.now();
        now.hour() * 60 + now.minute()
    }
}
