//! 通知实体

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::{NotificationId, UserId};

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// 收到新私信
    Dm,
    /// 在全局聊天中被提及
    Mention,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Dm => "dm",
            NotificationKind::Mention => "mention",
        }
    }
}

/// 待写入的通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
}

impl NewNotification {
    pub fn direct_message(recipient: UserId, sender_username: &str) -> Self {
        Self {
            user_id: recipient,
            kind: NotificationKind::Dm,
            title: "New private message".to_owned(),
            body: format!("{sender_username} sent you a message."),
            link: None,
        }
    }

    pub fn mention(recipient: UserId, author_username: &str, excerpt: &str) -> Self {
        Self {
            user_id: recipient,
            kind: NotificationKind::Mention,
            title: "You were mentioned".to_owned(),
            body: format!("{author_username}: {excerpt}"),
            link: Some("/chat".to_owned()),
        }
    }
}

/// 持久化的通知
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn from_new(new: NewNotification, now: DateTime<Utc>) -> Self {
        Self {
            id: NotificationId::generate(),
            user_id: new.user_id,
            kind: new.kind,
            title: new.title,
            body: new.body,
            link: new.link,
            read: false,
            created_at: now,
        }
    }
}
