//! 全局聊天消息实体

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::user::UserProfile;
use crate::value_objects::{ChatMessageId, UserId};

/// 持久化的全局聊天消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: ChatMessageId,
    pub text: String,
    pub author_id: UserId,
    /// 作者资料快照，便于客户端直接渲染
    pub author: UserProfile,
    pub created_at: DateTime<Utc>,
    pub edited: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn new(text: String, author: UserProfile, now: DateTime<Utc>) -> Self {
        Self {
            id: ChatMessageId::generate(),
            text,
            author_id: author.id,
            author,
            created_at: now,
            edited: false,
            updated_at: None,
        }
    }

    /// 编辑内容；全局消息没有次数上限，权限由调用方检查
    pub fn apply_edit(&mut self, text: String, now: DateTime<Utc>) {
        self.text = text;
        self.edited = true;
        self.updated_at = Some(now);
    }
}
