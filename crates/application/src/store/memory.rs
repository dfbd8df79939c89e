//! 进程内消息存储
//!
//! 未配置数据库时使用，也是应用层测试的默认存储。全部状态放在一把读写锁之后，
//! 每个操作在持锁期间完成，因此对单条消息的读改写是原子的。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use domain::{
    ChatMessage, ChatMessageId, Conversation, ConversationId, DirectMessage, DirectMessageId,
    NewNotification, Notification, Reaction, ReactionSet, Role, UserId, UserProfile,
};

use super::{MessageStore, StoreError, StoreResult};
use crate::clock::{Clock, SystemClock};

#[derive(Default)]
struct MemoryState {
    users: HashMap<UserId, UserProfile>,
    last_online: HashMap<UserId, DateTime<Utc>>,
    chat_messages: HashMap<ChatMessageId, ChatMessage>,
    /// 全局消息的插入顺序
    chat_order: Vec<ChatMessageId>,
    chat_reactions: HashMap<ChatMessageId, ReactionSet>,
    conversations: HashMap<ConversationId, Conversation>,
    conversation_index: HashMap<(UserId, UserId), ConversationId>,
    direct_messages: HashMap<DirectMessageId, DirectMessage>,
    dm_order: Vec<DirectMessageId>,
    dm_reactions: HashMap<DirectMessageId, ReactionSet>,
    notifications: Vec<Notification>,
}

impl MemoryState {
    fn username_of(&self, id: UserId) -> String {
        self.users
            .get(&id)
            .map(|u| u.username.clone())
            .unwrap_or_default()
    }

    fn conversation_for(&mut self, a: UserId, b: UserId, now: DateTime<Utc>) -> ConversationId {
        let pair = Conversation::canonical_pair(a, b);
        if let Some(id) = self.conversation_index.get(&pair) {
            return *id;
        }
        let conversation = Conversation::new(a, b, now);
        let id = conversation.id;
        self.conversation_index.insert(pair, id);
        self.conversations.insert(id, conversation);
        id
    }

    /// 会话中发给 `recipient` 的私信，按发送顺序
    fn inbound_messages(
        &mut self,
        conversation_id: ConversationId,
        recipient: UserId,
    ) -> Vec<&mut DirectMessage> {
        let order = &self.dm_order;
        let mut matching: Vec<&mut DirectMessage> = self
            .direct_messages
            .values_mut()
            .filter(|m| m.conversation_id == conversation_id && m.to_id == recipient)
            .collect();
        matching.sort_by_key(|m| order.iter().position(|id| *id == m.id));
        matching
    }
}

pub struct MemoryMessageStore {
    clock: Arc<dyn Clock>,
    state: RwLock<MemoryState>,
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryMessageStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// 写入（或覆盖）一个用户资料
    pub async fn insert_user(&self, profile: UserProfile) {
        let mut state = self.state.write().await;
        state.users.insert(profile.id, profile);
    }

    /// 修改用户角色，模拟服务端的角色变更
    pub async fn set_role(&self, id: UserId, role: Role) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;
        user.role = role;
        Ok(())
    }

    pub async fn notifications_for(&self, id: UserId) -> Vec<Notification> {
        let state = self.state.read().await;
        state
            .notifications
            .iter()
            .filter(|n| n.user_id == id)
            .cloned()
            .collect()
    }

    pub async fn last_online(&self, id: UserId) -> Option<DateTime<Utc>> {
        self.state.read().await.last_online.get(&id).copied()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn find_user(&self, id: UserId) -> StoreResult<Option<UserProfile>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn find_user_role(&self, id: UserId) -> StoreResult<Option<Role>> {
        Ok(self.state.read().await.users.get(&id).map(|u| u.role))
    }

    async fn find_users_by_usernames(&self, usernames: &[String]) -> StoreResult<Vec<UserProfile>> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .filter(|u| usernames.contains(&u.username))
            .cloned()
            .collect())
    }

    async fn touch_last_online(&self, id: UserId, at: DateTime<Utc>) -> StoreResult<()> {
        self.state.write().await.last_online.insert(id, at);
        Ok(())
    }

    async fn create_chat_message(&self, text: &str, author_id: UserId) -> StoreResult<ChatMessage> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let author = state
            .users
            .get(&author_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("user {author_id}")))?;
        let message = ChatMessage::new(text.to_owned(), author, now);
        state.chat_order.push(message.id);
        state.chat_messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn find_chat_message(&self, id: ChatMessageId) -> StoreResult<Option<ChatMessage>> {
        Ok(self.state.read().await.chat_messages.get(&id).cloned())
    }

    async fn update_chat_message(&self, id: ChatMessageId, text: &str) -> StoreResult<ChatMessage> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let message = state
            .chat_messages
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("message {id}")))?;
        message.apply_edit(text.to_owned(), now);
        Ok(message.clone())
    }

    async fn toggle_chat_reaction(
        &self,
        message_id: ChatMessageId,
        user_id: UserId,
        emoji: &str,
    ) -> StoreResult<Vec<Reaction>> {
        let mut state = self.state.write().await;
        if !state.chat_messages.contains_key(&message_id) {
            return Err(StoreError::NotFound(format!("message {message_id}")));
        }
        let username = state.username_of(user_id);
        let set = state.chat_reactions.entry(message_id).or_default();
        set.toggle(message_id.into(), user_id, &username, emoji);
        Ok(set.as_slice().to_vec())
    }

    async fn find_recent_global_messages(&self, limit: usize) -> StoreResult<Vec<ChatMessage>> {
        let state = self.state.read().await;
        let start = state.chat_order.len().saturating_sub(limit);
        Ok(state.chat_order[start..]
            .iter()
            .filter_map(|id| state.chat_messages.get(id).cloned())
            .collect())
    }

    async fn create_direct_message(
        &self,
        from_id: UserId,
        to_id: UserId,
        text: &str,
    ) -> StoreResult<DirectMessage> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        if !state.users.contains_key(&to_id) {
            return Err(StoreError::NotFound(format!("user {to_id}")));
        }
        let conversation_id = state.conversation_for(from_id, to_id, now);
        let message = DirectMessage::new(conversation_id, from_id, to_id, text.to_owned(), now);
        state.dm_order.push(message.id);
        state.direct_messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn find_direct_message(&self, id: DirectMessageId) -> StoreResult<Option<DirectMessage>> {
        Ok(self.state.read().await.direct_messages.get(&id).cloned())
    }

    async fn update_direct_message(
        &self,
        id: DirectMessageId,
        text: &str,
    ) -> StoreResult<DirectMessage> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let message = state
            .direct_messages
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("direct message {id}")))?;
        message
            .apply_edit(text.to_owned(), now)
            .map_err(StoreError::Rejected)?;
        Ok(message.clone())
    }

    async fn revoke_direct_message(&self, id: DirectMessageId) -> StoreResult<DirectMessage> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let message = state
            .direct_messages
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("direct message {id}")))?;
        message.revoke(now).map_err(StoreError::Rejected)?;
        Ok(message.clone())
    }

    async fn toggle_dm_reaction(
        &self,
        message_id: DirectMessageId,
        user_id: UserId,
        emoji: &str,
    ) -> StoreResult<Vec<Reaction>> {
        let mut state = self.state.write().await;
        if !state.direct_messages.contains_key(&message_id) {
            return Err(StoreError::NotFound(format!("direct message {message_id}")));
        }
        let username = state.username_of(user_id);
        let set = state.dm_reactions.entry(message_id).or_default();
        set.toggle(message_id.into(), user_id, &username, emoji);
        Ok(set.as_slice().to_vec())
    }

    async fn find_conversation(&self, id: ConversationId) -> StoreResult<Option<Conversation>> {
        Ok(self.state.read().await.conversations.get(&id).cloned())
    }

    async fn mark_delivered(
        &self,
        conversation_id: ConversationId,
        recipient_id: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<Vec<DirectMessageId>> {
        let mut state = self.state.write().await;
        Ok(state
            .inbound_messages(conversation_id, recipient_id)
            .into_iter()
            .filter_map(|m| m.mark_delivered(at).then_some(m.id))
            .collect())
    }

    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        reader_id: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<Vec<DirectMessageId>> {
        let mut state = self.state.write().await;
        Ok(state
            .inbound_messages(conversation_id, reader_id)
            .into_iter()
            .filter_map(|m| m.mark_read(at).then_some(m.id))
            .collect())
    }

    async fn create_notification(&self, notification: NewNotification) -> StoreResult<Notification> {
        let stored = Notification::from_new(notification, self.clock.now());
        self.state.write().await.notifications.push(stored.clone());
        Ok(stored)
    }
}
