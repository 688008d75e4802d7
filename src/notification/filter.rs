//! 过滤引擎 - 决定通知是否、以及如何投递到设备
//!
//! 规则按固定顺序求值，第一条命中的规则决定结果；全部未命中则为 `Send`。
//! 列表通知不经过过滤，直接发送。

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, warn};

use super::group;
use super::outstanding::OutstandingIndex;
use super::policy::PolicyStore;
use super::source::Notification;
use crate::config::{GlobalSettings, SourceSettings};

/// 过滤结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// 发送到设备
    Send,
    /// 只写历史
    HistoryOnly,
    /// 不显示，但登记到在途索引（供后续分组/去重判断）
    KeepTemporary,
    /// 完全忽略
    Ignore,
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Disposition::Send => "SEND",
            Disposition::HistoryOnly => "HISTORY_ONLY",
            Disposition::KeepTemporary => "KEEP_TEMPORARY",
            Disposition::Ignore => "IGNORE",
        };
        write!(f, "{}", s)
    }
}

/// 手机响铃模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RingerMode {
    #[default]
    Normal,
    Vibrate,
    Silent,
}

/// 过滤时的环境快照
#[derive(Debug, Clone)]
pub struct FilterContext {
    pub now: DateTime<Utc>,
    /// 本地时间当天分钟数（静默时段判断用）
    pub minute_of_day: u32,
    pub screen_on: bool,
    pub ringer: RingerMode,
    pub device_reachable: bool,
    /// 平台勿扰模式是否过滤了此通知
    pub interrupt_filtered: bool,
}

impl FilterContext {
    pub fn at(now: DateTime<Utc>, minute_of_day: u32) -> Self {
        Self {
            now,
            minute_of_day,
            screen_on: false,
            ringer: RingerMode::Normal,
            device_reachable: true,
            interrupt_filtered: false,
        }
    }
}

/// 规则求值输入
pub struct RuleInput<'a> {
    pub notification: &'a Notification,
    pub settings: &'a SourceSettings,
    pub global: &'a GlobalSettings,
    pub context: &'a FilterContext,
    pub policy: &'a PolicyStore,
    pub outstanding: &'a OutstandingIndex,
}

/// 过滤规则
pub struct FilterRule {
    pub name: &'static str,
    pub disposition: Disposition,
    pub matches: fn(&RuleInput<'_>) -> bool,
}

/// 规则链（顺序即优先级）
pub const RULES: &[FilterRule] = &[
    FilterRule {
        name: "included_regex",
        disposition: Disposition::KeepTemporary,
        matches: |i| !i.settings.included_regex.is_empty() && !contains_regexes(&i.notification.combined_text(), &i.settings.included_regex),
    },
    FilterRule {
        name: "excluded_regex",
        disposition: Disposition::KeepTemporary,
        matches: |i| contains_regexes(&i.notification.combined_text(), &i.settings.excluded_regex),
    },
    FilterRule {
        name: "blank",
        disposition: Disposition::Ignore,
        matches: |i| {
            !i.settings.send_blank_notifications
                && i.notification.body.trim().is_empty()
                && i.notification.subtitle.trim().is_empty()
        },
    },
    FilterRule {
        name: "notifications_disabled",
        disposition: Disposition::HistoryOnly,
        matches: |i| i.global.notifications_disabled,
    },
    FilterRule {
        name: "screen_on",
        disposition: Disposition::HistoryOnly,
        matches: |i| i.settings.disable_notify_screen_on && i.context.screen_on,
    },
    FilterRule {
        name: "ringer_silent",
        disposition: Disposition::HistoryOnly,
        matches: |i| i.global.no_notify_when_silent && i.context.ringer != RingerMode::Normal,
    },
    FilterRule {
        name: "quiet_time",
        disposition: Disposition::HistoryOnly,
        matches: |i| {
            let (start, end) = i.settings.quiet_window();
            i.settings.quiet_time_enabled && in_quiet_window(start, end, i.context.minute_of_day)
        },
    },
    FilterRule {
        name: "device_unreachable",
        disposition: Disposition::HistoryOnly,
        matches: |i| i.global.no_notifications_without_device && !i.context.device_reachable,
    },
    FilterRule {
        name: "interrupt_filter",
        disposition: Disposition::HistoryOnly,
        matches: |i| i.settings.respect_interrupt_filter && i.context.interrupt_filtered,
    },
    FilterRule {
        name: "temporary_mute",
        disposition: Disposition::Ignore,
        matches: |i| i.policy.is_muted(&i.notification.key.package, i.context.now),
    },
    FilterRule {
        name: "minimum_interval",
        disposition: Disposition::HistoryOnly,
        matches: |i| {
            i.policy.within_notification_interval(
                &i.notification.key.package,
                i.settings.min_notification_interval_secs(),
                i.context.now,
            )
        },
    },
    FilterRule {
        name: "group",
        disposition: Disposition::KeepTemporary,
        matches: |i| !group::is_admissible(i.notification, i.settings, i.outstanding),
    },
];

/// 静默时段判断，支持跨零点（起止均含边界）
pub fn in_quiet_window(start: u32, end: u32, now: u32) -> bool {
    (end > start && now >= start && now <= end) || (end < start && (now <= end || now >= start))
}

/// 文本是否匹配任一正则；无效正则记录警告后跳过
pub fn contains_regexes(text: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| match Regex::new(pattern) {
        Ok(re) => re.is_match(text),
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "Invalid filter regex");
            false
        }
    })
}

/// 求值过滤规则链
///
/// 过期的静音记录在此时惰性清除。
pub fn decide(
    notification: &Notification,
    settings: &SourceSettings,
    global: &GlobalSettings,
    context: &FilterContext,
    policy: &mut PolicyStore,
    outstanding: &OutstandingIndex,
) -> Disposition {
    if notification.is_list() {
        return Disposition::Send;
    }

    policy.evict_expired_mute(&notification.key.package, context.now);

    let input = RuleInput {
        notification,
        settings,
        global,
        context,
        policy,
        outstanding,
    };

    for rule in RULES {
        if (rule.matches)(&input) {
            debug!(source = %notification.key, rule = rule.name, disposition = %rule.disposition, "Notification filtered");
            return rule.disposition;
        }
    }

    Disposition::Send
}
