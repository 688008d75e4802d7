//! 分组通知准入 - 分组摘要、分组成员与重复内容检查

use tracing::debug;

use super::outstanding::OutstandingIndex;
use super::source::{GroupRole, Notification};
use crate::config::SourceSettings;

/// 检查分组通知是否可以显示
///
/// # 规则
/// - 启用分组时，若同一应用同一分组已有成员在途，则摘要不显示
/// - 未启用分组时，分组成员不显示
/// - 未允许重复时，与在途记录内容完全一致的通知不显示
///   （允许重复时，分组成员仍会与非摘要条目比较）
pub fn is_admissible(notification: &Notification, settings: &SourceSettings, outstanding: &OutstandingIndex) -> bool {
    let groups_enabled = settings.use_group_notifications;

    match notification.group_role {
        GroupRole::Summary if groups_enabled => {
            let member_visible = outstanding.iter().any(|entry| {
                entry.notification.group_role == GroupRole::Member && entry.notification.same_group(notification)
            });
            if member_visible {
                debug!(source = %notification.key, "Group summary suppressed, members already outstanding");
                return false;
            }
        }
        GroupRole::Member if !groups_enabled => {
            debug!(source = %notification.key, "Group member suppressed, group notifications disabled");
            return false;
        }
        _ => {}
    }

    let send_identical = settings.send_identical_notifications;
    if notification.group_role == GroupRole::Member || !send_identical {
        let duplicate = outstanding.iter().any(|entry| {
            (entry.notification.group_role != GroupRole::Summary || !send_identical)
                && notification.has_identical_content(&entry.notification)
        });
        if duplicate {
            debug!(source = %notification.key, "Identical notification already outstanding");
            return false;
        }
    }

    true
}
