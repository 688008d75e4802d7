//! 通知源数据结构 - 由平台捕获层创建，规范化一次后只读

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::DeliveryRecord;

/// 通知来源标识（应用包名 + 可选 tag）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceKey {
    /// 应用包名，限流/静音按此维度统计
    pub package: String,
    /// 同一应用内区分通知的 tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl SourceKey {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

impl std::fmt::Display for SourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{}:{}", self.package, tag),
            None => write!(f, "{}", self.package),
        }
    }
}

/// 分组角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupRole {
    /// 独立通知
    #[default]
    None,
    /// 分组成员
    Member,
    /// 分组摘要
    Summary,
}

/// 通知上的动作
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationAction {
    /// 由捕获层提供的普通动作，只携带显示文本
    Custom { label: String },
    /// 在设备上显示被隐藏的原始通知
    #[serde(skip)]
    Reveal {
        label: String,
        original: Box<DeliveryRecord>,
    },
}

impl NotificationAction {
    pub fn label(&self) -> &str {
        match self {
            NotificationAction::Custom { label } => label,
            NotificationAction::Reveal { label, .. } => label,
        }
    }
}

/// 通知标志位
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationFlags {
    /// 不写入历史
    pub history_disabled: bool,
    /// 不允许隐藏正文
    pub hiding_disallowed: bool,
    /// 强制设备切换到此通知
    pub force_switch: bool,
    /// 强制打开动作菜单
    pub force_action_menu: bool,
    /// 打开后滚动到末尾
    pub scroll_to_end: bool,
    /// 列表（聚合）通知，跳过过滤
    pub list: bool,
}

/// 通知
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub key: SourceKey,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub body: String,
    /// 图标原始数据，像素格式转换由附件协作方负责
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<Vec<u8>>,
    /// 背景大图原始数据
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_image: Option<Vec<u8>>,
    /// ARGB 颜色，0 表示透明（未设置）
    #[serde(default)]
    pub color: u32,
    /// 平台格式的强制振动模式 `[delay, on, off, ...]`（毫秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forced_vibration: Option<Vec<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_key: Option<String>,
    #[serde(default)]
    pub group_role: GroupRole,
    #[serde(default)]
    pub flags: NotificationFlags,
    #[serde(default)]
    pub actions: Vec<NotificationAction>,
    /// 平台上报的原始时间
    #[serde(default = "Utc::now")]
    pub posted_at: DateTime<Utc>,
    /// 是否已规范化（规范化只执行一次）
    #[serde(skip)]
    pub(crate) normalized: bool,
}

impl Notification {
    pub fn new(key: SourceKey, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            key,
            title: title.into(),
            subtitle: String::new(),
            body: body.into(),
            icon: None,
            background_image: None,
            color: 0,
            forced_vibration: None,
            group_key: None,
            group_role: GroupRole::None,
            flags: NotificationFlags::default(),
            actions: Vec::new(),
            posted_at: Utc::now(),
            normalized: false,
        }
    }

    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = subtitle.into();
        self
    }

    pub fn with_group(mut self, group_key: impl Into<String>, role: GroupRole) -> Self {
        self.group_key = Some(group_key.into());
        self.group_role = role;
        self
    }

    pub fn with_icon(mut self, icon: Vec<u8>) -> Self {
        self.icon = Some(icon);
        self
    }

    pub fn with_actions(mut self, actions: Vec<NotificationAction>) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_flags(mut self, flags: NotificationFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn is_list(&self) -> bool {
        self.flags.list
    }

    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    /// 过滤规则匹配使用的合并文本
    pub fn combined_text(&self) -> String {
        format!("{}\n{}\n{}", self.title, self.subtitle, self.body)
    }

    /// 内容是否完全一致（同一应用、同一标题/副标题/正文）
    pub fn has_identical_content(&self, other: &Notification) -> bool {
        self.key.package == other.key.package
            && self.title == other.title
            && self.subtitle == other.subtitle
            && self.body == other.body
    }

    /// 同一应用同一分组
    pub fn same_group(&self, other: &Notification) -> bool {
        self.key.package == other.key.package
            && self.group_key.is_some()
            && self.group_key == other.group_key
    }
}
