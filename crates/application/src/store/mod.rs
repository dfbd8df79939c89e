//! 消息存储网关
//!
//! 实时消息中心访问持久化存储的唯一通道。除 `touch_last_online` 与通知写入外，
//! 所有调用都在广播之前被同步等待；失败时事件被放弃，不会广播未持久化的状态。

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use domain::{
    ChatMessage, ChatMessageId, Conversation, ConversationId, DirectMessage, DirectMessageId,
    DomainError, NewNotification, Notification, Reaction, Role, UserId, UserProfile,
};

pub use memory::MemoryMessageStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// 目标记录不存在
    #[error("record not found: {0}")]
    NotFound(String),
    /// 存储层在写入时发现规则已被违反（例如并发编辑超过上限）
    #[error("write rejected: {0}")]
    Rejected(DomainError),
    /// 后端故障
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        StoreError::Backend(message.into())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// 读取用户资料
    async fn find_user(&self, id: UserId) -> StoreResult<Option<UserProfile>>;

    /// 读取最新角色（角色可能在服务端被修改）
    async fn find_user_role(&self, id: UserId) -> StoreResult<Option<Role>>;

    /// 按用户名批量查找（用于解析 @提及）
    async fn find_users_by_usernames(&self, usernames: &[String]) -> StoreResult<Vec<UserProfile>>;

    /// 记录最后在线时间，调用方不等待结果
    async fn touch_last_online(&self, id: UserId, at: DateTime<Utc>) -> StoreResult<()>;

    async fn create_chat_message(&self, text: &str, author_id: UserId) -> StoreResult<ChatMessage>;

    async fn find_chat_message(&self, id: ChatMessageId) -> StoreResult<Option<ChatMessage>>;

    /// 更新全局消息文本并标记已编辑；权限由调用方预先检查
    async fn update_chat_message(&self, id: ChatMessageId, text: &str) -> StoreResult<ChatMessage>;

    /// 切换反应并返回该消息的完整反应集合
    async fn toggle_chat_reaction(
        &self,
        message_id: ChatMessageId,
        user_id: UserId,
        emoji: &str,
    ) -> StoreResult<Vec<Reaction>>;

    /// 最近的 `limit` 条全局消息，按时间正序
    async fn find_recent_global_messages(&self, limit: usize) -> StoreResult<Vec<ChatMessage>>;

    /// 创建私信，必要时创建所属会话
    async fn create_direct_message(
        &self,
        from_id: UserId,
        to_id: UserId,
        text: &str,
    ) -> StoreResult<DirectMessage>;

    async fn find_direct_message(&self, id: DirectMessageId) -> StoreResult<Option<DirectMessage>>;

    /// 编辑私信；超过编辑上限或已撤回时返回 `Rejected`
    async fn update_direct_message(
        &self,
        id: DirectMessageId,
        text: &str,
    ) -> StoreResult<DirectMessage>;

    /// 撤回私信；已撤回时返回 `Rejected`
    async fn revoke_direct_message(&self, id: DirectMessageId) -> StoreResult<DirectMessage>;

    async fn toggle_dm_reaction(
        &self,
        message_id: DirectMessageId,
        user_id: UserId,
        emoji: &str,
    ) -> StoreResult<Vec<Reaction>>;

    async fn find_conversation(&self, id: ConversationId) -> StoreResult<Option<Conversation>>;

    /// 将会话中发给 `recipient_id` 且尚未送达的私信标记为已送达，返回被修改的ID
    async fn mark_delivered(
        &self,
        conversation_id: ConversationId,
        recipient_id: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<Vec<DirectMessageId>>;

    /// 将会话中发给 `reader_id` 且尚未读的私信标记为已读，返回被修改的ID
    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        reader_id: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<Vec<DirectMessageId>>;

    async fn create_notification(&self, notification: NewNotification) -> StoreResult<Notification>;
}
