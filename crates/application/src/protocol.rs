//! WebSocket 线路协议
//!
//! 每一帧都是带 `type` 判别字段的单个 JSON 对象。入站帧先按 `type`
//! 判断是否为已知事件，未知类型与非法 JSON 统一作为坏帧拒绝；
//! 类型已知但字段缺失或格式错误则作为校验失败拒绝。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use domain::{
    ChatMessage, ChatMessageId, ConversationId, DirectMessage, DirectMessageId, Notification,
    ReactionSummary, UserId,
};

use crate::error::HubError;

/// 客户端发送的事件
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum InboundEvent {
    GlobalMessage {
        text: String,
        #[serde(default)]
        client_id: Option<String>,
    },
    ChatEdit {
        id: ChatMessageId,
        text: String,
    },
    #[serde(alias = "reaction")]
    ChatReaction {
        message_id: ChatMessageId,
        emoji: String,
    },
    Typing {
        #[serde(default)]
        chat: Option<String>,
    },
    DmMessage {
        to_id: UserId,
        text: String,
        #[serde(default)]
        client_id: Option<String>,
    },
    DmEdit {
        id: DirectMessageId,
        text: String,
    },
    DmRevoke {
        id: DirectMessageId,
    },
    DmReaction {
        message_id: DirectMessageId,
        emoji: String,
    },
    DmTyping {
        to_id: UserId,
    },
    DmDelivered {
        conversation_id: ConversationId,
    },
    DmRead {
        conversation_id: ConversationId,
    },
    Resync {
        #[serde(default)]
        limit: Option<usize>,
    },
}

/// 所有已知的入站 `type` 值（含别名）
const KNOWN_INBOUND_TYPES: [&str; 13] = [
    "global_message",
    "chat_edit",
    "chat_reaction",
    "reaction",
    "typing",
    "dm_message",
    "dm_edit",
    "dm_revoke",
    "dm_reaction",
    "dm_typing",
    "dm_delivered",
    "dm_read",
    "resync",
];

impl InboundEvent {
    /// 解码一个文本帧
    pub fn decode(raw: &str) -> Result<Self, HubError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|err| HubError::BadFrame(err.to_string()))?;

        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| HubError::BadFrame("missing `type` field".into()))?;
        if !KNOWN_INBOUND_TYPES.contains(&kind) {
            return Err(HubError::BadFrame(format!("unknown event type `{kind}`")));
        }

        serde_json::from_value(value).map_err(|err| HubError::validation(err.to_string()))
    }

    /// 事件名，用于日志
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::GlobalMessage { .. } => "global_message",
            InboundEvent::ChatEdit { .. } => "chat_edit",
            InboundEvent::ChatReaction { .. } => "chat_reaction",
            InboundEvent::Typing { .. } => "typing",
            InboundEvent::DmMessage { .. } => "dm_message",
            InboundEvent::DmEdit { .. } => "dm_edit",
            InboundEvent::DmRevoke { .. } => "dm_revoke",
            InboundEvent::DmReaction { .. } => "dm_reaction",
            InboundEvent::DmTyping { .. } => "dm_typing",
            InboundEvent::DmDelivered { .. } => "dm_delivered",
            InboundEvent::DmRead { .. } => "dm_read",
            InboundEvent::Resync { .. } => "resync",
        }
    }

    /// 客户端附带的关联ID，错误回复时原样带回
    pub fn client_id(&self) -> Option<&str> {
        match self {
            InboundEvent::GlobalMessage { client_id, .. }
            | InboundEvent::DmMessage { client_id, .. } => client_id.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// 服务端推送的事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum OutboundEvent {
    PresenceSnapshot {
        users: Vec<UserId>,
    },
    PresenceUpdate {
        user_id: UserId,
        status: PresenceStatus,
    },
    GlobalMessage {
        message: ChatMessage,
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
    ChatEdit {
        message: ChatMessage,
    },
    ChatReaction {
        message_id: ChatMessageId,
        reactions: Vec<ReactionSummary>,
    },
    History {
        messages: Vec<ChatMessage>,
    },
    Typing {
        user_id: UserId,
        username: String,
    },
    DmMessage {
        message: DirectMessage,
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
    DmEdit {
        message: DirectMessage,
    },
    DmRevoke {
        message: DirectMessage,
    },
    DmReaction {
        message_id: DirectMessageId,
        reactions: Vec<ReactionSummary>,
    },
    DmTyping {
        from_id: UserId,
        username: String,
    },
    DmDelivered {
        conversation_id: ConversationId,
        message_ids: Vec<DirectMessageId>,
        delivered_at: DateTime<Utc>,
    },
    DmRead {
        conversation_id: ConversationId,
        message_ids: Vec<DirectMessageId>,
        reader_id: UserId,
        read_at: DateTime<Utc>,
    },
    Notification {
        user_id: UserId,
        notification: Notification,
    },
    Error {
        code: &'static str,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
}

impl OutboundEvent {
    pub fn error(err: &HubError, client_id: Option<String>) -> Self {
        OutboundEvent::Error {
            code: err.code(),
            message: err.to_string(),
            client_id,
        }
    }
}
