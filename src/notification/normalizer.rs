//! 通知规范化 - 推导标题、副标题和正文
//!
//! 处理顺序：
//! 1. 自定义标题覆盖（空白字符串表示用副标题替代标题）
//! 2. 副标题为空时，从正文第一行推断副标题
//! 3. 标题与副标题相同时清空副标题

use super::source::Notification;
use crate::config::SourceSettings;

/// 换行位置必须落在正文前 80% 内才会拆出副标题
const SUBTITLE_SPLIT_RATIO: f64 = 0.8;

/// 规范化通知（只执行一次，重复调用无效果）
pub fn normalize(notification: &mut Notification, settings: &SourceSettings) {
    if notification.normalized {
        return;
    }

    apply_custom_title(notification, &settings.custom_title);

    if notification.subtitle.is_empty() {
        let (subtitle, body) = infer_subtitle(&notification.body);
        notification.subtitle = subtitle;
        notification.body = body;
    }

    if notification.title.trim() == notification.subtitle.trim() {
        notification.subtitle.clear();
    }

    notification.normalized = true;
}

fn apply_custom_title(notification: &mut Notification, custom_title: &str) {
    if custom_title.is_empty() {
        return;
    }

    if custom_title.trim().is_empty() {
        notification.title = std::mem::take(&mut notification.subtitle);
    } else {
        notification.title = custom_title.to_string();
    }
}

/// 从正文推断副标题，返回 (副标题, 新正文)
fn infer_subtitle(body: &str) -> (String, String) {
    let Some(line_break) = body.find('\n') else {
        return (String::new(), body.to_string());
    };

    let break_pos = body[..line_break].chars().count() as f64;
    let total = body.chars().count() as f64;
    if break_pos >= total * SUBTITLE_SPLIT_RATIO {
        return (String::new(), body.to_string());
    }

    (
        body[..line_break].trim().to_string(),
        body[line_break..].trim().to_string(),
    )
}
