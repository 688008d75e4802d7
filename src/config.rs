//! 配置 - 全局设置与按来源（应用）设置
//!
//! 配置文件：`~/.config/wear-notify/settings.json`
//!
//! ```json
//! {
//!   "global": { "notifications_disabled": false },
//!   "default": { "vibration_pattern": "500, 200, 500" },
//!   "sources": { "com.chat": { "quiet_time_enabled": true } }
//! }
//! ```
//!
//! `sources` 中的对象只需包含要覆盖的字段，会合并到 `default` 之上。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::notification::source::SourceKey;

/// 默认最大文本长度（字符）
pub const DEFAULT_TEXT_LIMIT: usize = 2000;
/// 最大文本长度下限（保证能放下 `...`）
pub const MIN_TEXT_LIMIT: usize = 4;
/// 周期振动间隔上限
pub const MAX_PERIODIC_VIBRATION: u16 = 30000;

/// 设备上的投递方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// 通过伴侣应用分块传输
    #[default]
    Companion,
    /// 交给设备原生通知
    Native,
    /// 不投递
    Disabled,
}

/// 全局设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    /// 全局关闭通知（仍写历史）
    pub notifications_disabled: bool,
    /// 响铃模式非正常时不通知
    pub no_notify_when_silent: bool,
    /// 设备未连接时不通知
    pub no_notifications_without_device: bool,
    /// 有动作时立即显示菜单
    pub show_menu_instantly: bool,
    /// 前台上下文 -> 投递方式
    pub context_modes: HashMap<String, DeliveryMode>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            notifications_disabled: false,
            no_notify_when_silent: false,
            no_notifications_without_device: false,
            show_menu_instantly: true,
            context_modes: HashMap::new(),
        }
    }
}

impl GlobalSettings {
    pub fn delivery_mode(&self, context: Option<&str>) -> DeliveryMode {
        context
            .and_then(|c| self.context_modes.get(c).copied())
            .unwrap_or_default()
    }
}

/// 单个来源的设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub included_regex: Vec<String>,
    pub excluded_regex: Vec<String>,
    pub send_blank_notifications: bool,
    pub disable_notify_screen_on: bool,
    pub quiet_time_enabled: bool,
    pub quiet_time_start_hour: u32,
    pub quiet_time_start_minute: u32,
    pub quiet_time_end_hour: u32,
    pub quiet_time_end_minute: u32,
    pub respect_interrupt_filter: bool,
    /// 秒，字符串形式保存
    pub minimum_notification_interval: String,
    /// 秒，字符串形式保存
    pub minimum_vibration_interval: String,
    pub use_group_notifications: bool,
    pub send_identical_notifications: bool,
    /// 空白字符串表示用副标题替代标题
    pub custom_title: String,
    pub save_to_history: bool,
    /// ARGB，alpha 为 0 表示不覆盖
    pub statusbar_color: u32,
    pub no_update_vibration: bool,
    pub hide_notification_text: bool,
    pub periodic_vibration: String,
    pub switch_to_most_recent: bool,
    pub select_press_action: u8,
    pub select_hold_action: u8,
    pub shake_action: u8,
    pub title_font: u8,
    pub subtitle_font: u8,
    pub body_font: u8,
    /// 逗号分隔的毫秒列表
    pub vibration_pattern: String,
    pub maximum_text_length: String,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            included_regex: Vec::new(),
            excluded_regex: Vec::new(),
            send_blank_notifications: false,
            disable_notify_screen_on: false,
            quiet_time_enabled: false,
            quiet_time_start_hour: 0,
            quiet_time_start_minute: 0,
            quiet_time_end_hour: 0,
            quiet_time_end_minute: 0,
            respect_interrupt_filter: false,
            minimum_notification_interval: "0".to_string(),
            minimum_vibration_interval: "0".to_string(),
            use_group_notifications: true,
            send_identical_notifications: false,
            custom_title: String::new(),
            save_to_history: true,
            statusbar_color: 0,
            no_update_vibration: false,
            hide_notification_text: false,
            periodic_vibration: "0".to_string(),
            switch_to_most_recent: false,
            select_press_action: 0,
            select_hold_action: 1,
            shake_action: 0,
            title_font: 0,
            subtitle_font: 0,
            body_font: 0,
            vibration_pattern: "500".to_string(),
            maximum_text_length: DEFAULT_TEXT_LIMIT.to_string(),
        }
    }
}

/// 解析以字符串保存的数值设置（32 位范围），失败或越界时回退到默认值
fn parse_numeric(name: &str, raw: &str, default: u32) -> u32 {
    match raw.trim().parse::<u32>() {
        Ok(v) => v,
        Err(_) => {
            debug!(option = name, value = raw, default, "Malformed numeric setting, using default");
            default
        }
    }
}

fn minute_of_day(hour: u32, minute: u32) -> u32 {
    hour.min(23).saturating_mul(60).saturating_add(minute.min(59))
}

impl SourceSettings {
    /// 最小通知间隔（秒）
    pub fn min_notification_interval_secs(&self) -> u64 {
        parse_numeric("minimum_notification_interval", &self.minimum_notification_interval, 0).into()
    }

    /// 最小振动间隔（秒）
    pub fn min_vibration_interval_secs(&self) -> u64 {
        parse_numeric("minimum_vibration_interval", &self.minimum_vibration_interval, 0).into()
    }

    /// 周期振动间隔，上限 30000
    pub fn periodic_vibration_interval(&self) -> u16 {
        parse_numeric("periodic_vibration", &self.periodic_vibration, 0)
            .min(MAX_PERIODIC_VIBRATION.into()) as u16
    }

    /// 最大文本长度：不超过 2000，不低于 4，解析失败为 2000
    pub fn max_text_length(&self) -> usize {
        match self.maximum_text_length.trim().parse::<usize>() {
            Ok(v) => v.min(DEFAULT_TEXT_LIMIT).max(MIN_TEXT_LIMIT),
            Err(_) => {
                debug!(value = %self.maximum_text_length, "Malformed maximum_text_length, using default");
                DEFAULT_TEXT_LIMIT
            }
        }
    }

    /// 静默时段（起止均为当天分钟数），越界的时/分按 23:59 截断
    pub fn quiet_window(&self) -> (u32, u32) {
        (
            minute_of_day(self.quiet_time_start_hour, self.quiet_time_start_minute),
            minute_of_day(self.quiet_time_end_hour, self.quiet_time_end_minute),
        )
    }
}

/// 设置存储
pub trait SettingsStore: Send + Sync {
    /// 指定来源的设置
    fn source(&self, key: &SourceKey) -> SourceSettings;

    /// 全局设置
    fn global(&self) -> GlobalSettings;
}

/// 内存设置（测试和嵌入使用）
#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    pub global: GlobalSettings,
    pub default: SourceSettings,
    pub sources: HashMap<String, SourceSettings>,
}

impl StaticSettings {
    pub fn new(default: SourceSettings) -> Self {
        Self {
            default,
            ..Self::default()
        }
    }

    pub fn with_global(mut self, global: GlobalSettings) -> Self {
        self.global = global;
        self
    }

    pub fn with_source(mut self, package: impl Into<String>, settings: SourceSettings) -> Self {
        self.sources.insert(package.into(), settings);
        self
    }
}

impl SettingsStore for StaticSettings {
    fn source(&self, key: &SourceKey) -> SourceSettings {
        self.sources
            .get(&key.package)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }

    fn global(&self) -> GlobalSettings {
        self.global.clone()
    }
}

/// JSON 文件设置
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    global: GlobalSettings,
    default: Value,
    sources: HashMap<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SettingsFile {
    global: GlobalSettings,
    default: Value,
    sources: HashMap<String, Value>,
}

impl JsonSettingsStore {
    /// 默认配置文件路径
    pub fn path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("wear-notify")
            .join("settings.json")
    }

    /// 从默认路径加载，文件不存在时使用默认设置
    pub fn load_default() -> Result<Self> {
        let path = Self::path();
        if !path.exists() {
            return Self::parse("{}");
        }
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let file: SettingsFile = serde_json::from_str(content)?;
        let default = match file.default {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        // 提前校验，避免运行时才发现格式错误
        serde_json::from_value::<SourceSettings>(default.clone())
            .context("Invalid default source settings")?;
        for (package, overrides) in &file.sources {
            let merged = merge(&default, overrides);
            serde_json::from_value::<SourceSettings>(merged)
                .with_context(|| format!("Invalid settings for source {}", package))?;
        }

        Ok(Self {
            global: file.global,
            default,
            sources: file.sources,
        })
    }
}

/// 浅合并：`overrides` 中的字段覆盖 `base`
fn merge(base: &Value, overrides: &Value) -> Value {
    let mut merged = base.clone();
    if let (Value::Object(target), Value::Object(extra)) = (&mut merged, overrides) {
        for (k, v) in extra {
            target.insert(k.clone(), v.clone());
        }
    }
    merged
}

impl SettingsStore for JsonSettingsStore {
    fn source(&self, key: &SourceKey) -> SourceSettings {
        let value = match self.sources.get(&key.package) {
            Some(overrides) => merge(&self.default, overrides),
            None => self.default.clone(),
        };
        // 加载时已校验
        serde_json::from_value(value).unwrap_or_default()
    }

    fn global(&self) -> GlobalSettings {
        self.global.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_text_length_bounds() {
        let mut s = SourceSettings::default();
        assert_eq!(s.max_text_length(), 2000);

        s.maximum_text_length = "5000".to_string();
        assert_eq!(s.max_text_length(), 2000);

        s.maximum_text_length = "1".to_string();
        assert_eq!(s.max_text_length(), 4);

        s.maximum_text_length = "abc".to_string();
        assert_eq!(s.max_text_length(), 2000);
    }

    #[test]
    fn test_malformed_interval_falls_back_to_zero() {
        let s = SourceSettings {
            minimum_notification_interval: "ten".to_string(),
            minimum_vibration_interval: " 60 ".to_string(),
            ..SourceSettings::default()
        };
        assert_eq!(s.min_notification_interval_secs(), 0);
        assert_eq!(s.min_vibration_interval_secs(), 60);
    }

    #[test]
    fn test_out_of_range_interval_falls_back_to_zero() {
        let s = SourceSettings {
            minimum_notification_interval: "10000000000000000".to_string(),
            minimum_vibration_interval: "-5".to_string(),
            periodic_vibration: "99999999999".to_string(),
            ..SourceSettings::default()
        };
        assert_eq!(s.min_notification_interval_secs(), 0);
        assert_eq!(s.min_vibration_interval_secs(), 0);
        assert_eq!(s.periodic_vibration_interval(), 0);
    }

    #[test]
    fn test_quiet_window_clamps_out_of_range_fields() {
        let store = JsonSettingsStore::parse(
            r#"{"default": {"quiet_time_enabled": true, "quiet_time_start_hour": 4294967295,
                "quiet_time_start_minute": 4294967295, "quiet_time_end_hour": 6, "quiet_time_end_minute": 75}}"#,
        )
        .unwrap();
        let s = store.source(&SourceKey::new("com.chat"));
        assert_eq!(s.quiet_window(), (23 * 60 + 59, 6 * 60 + 59));
    }

    #[test]
    fn test_periodic_vibration_clamped() {
        let s = SourceSettings {
            periodic_vibration: "90000".to_string(),
            ..SourceSettings::default()
        };
        assert_eq!(s.periodic_vibration_interval(), 30000);
    }

    #[test]
    fn test_json_store_merges_source_over_default() {
        let store = JsonSettingsStore::parse(
            r#"{
                "global": {"show_menu_instantly": false},
                "default": {"vibration_pattern": "100, 100", "save_to_history": false},
                "sources": {"com.chat": {"save_to_history": true}}
            }"#,
        )
        .unwrap();

        let chat = store.source(&SourceKey::new("com.chat"));
        assert!(chat.save_to_history);
        assert_eq!(chat.vibration_pattern, "100, 100");

        let other = store.source(&SourceKey::new("com.other"));
        assert!(!other.save_to_history);
        assert!(!store.global().show_menu_instantly);
    }

    #[test]
    fn test_json_store_rejects_bad_types() {
        let result = JsonSettingsStore::parse(r#"{"sources": {"com.chat": {"quiet_time_enabled": "yes"}}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_json_store_empty_document() {
        let store = JsonSettingsStore::parse("{}").unwrap();
        let s = store.source(&SourceKey::new("any"));
        assert!(s.use_group_notifications);
        assert!(store.global().show_menu_instantly);
    }

    #[test]
    fn test_delivery_mode_lookup() {
        let mut global = GlobalSettings::default();
        global.context_modes.insert("watchface".to_string(), DeliveryMode::Native);
        assert_eq!(global.delivery_mode(Some("watchface")), DeliveryMode::Native);
        assert_eq!(global.delivery_mode(Some("music")), DeliveryMode::Companion);
        assert_eq!(global.delivery_mode(None), DeliveryMode::Companion);
    }
}
