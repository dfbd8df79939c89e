//! 入站事件路由
//!
//! 每个事件依次经过：限流 → 校验 → 授权 → 持久化 → 扇出。前四步任何一步失败都
//! 只回复发起连接，不会产生广播；持久化失败时放弃该事件。
//! 路由器在事件之间不保存状态，身份永远取自连接本身。

use std::sync::Arc;

use config::{HubConfig, RateLimitPolicy};
use domain::{
    aggregate_reactions, can_modify, validate_client_id, validate_emoji, validate_text,
    ChatMessageId, ConversationId, DirectMessageId, UserId,
};

use crate::broadcaster::Broadcaster;
use crate::clock::Clock;
use crate::error::HubError;
use crate::notifier::Notifier;
use crate::protocol::{InboundEvent, OutboundEvent};
use crate::rate_limiter::RateLimiter;
use crate::registry::ConnectionHandle;
use crate::store::MessageStore;

pub type RouteResult = Result<(), HubError>;

#[derive(Clone)]
pub struct EventRouter {
    store: Arc<dyn MessageStore>,
    limiter: Arc<RateLimiter>,
    broadcaster: Broadcaster,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    config: Arc<HubConfig>,
}

impl EventRouter {
    pub fn new(
        store: Arc<dyn MessageStore>,
        limiter: Arc<RateLimiter>,
        broadcaster: Broadcaster,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
        config: Arc<HubConfig>,
    ) -> Self {
        Self {
            store,
            limiter,
            broadcaster,
            notifier,
            clock,
            config,
        }
    }

    /// 处理一个文本帧，失败时向发起连接回复 error 帧
    pub async fn handle_frame(&self, origin: &ConnectionHandle, raw: &str) -> RouteResult {
        // 已关闭的连接不再接受新事件
        if !origin.is_open() {
            tracing::debug!(
                user_id = %origin.user_id(),
                connection_id = origin.id,
                "连接已关闭，丢弃入站帧"
            );
            return Err(HubError::ConnectionClosed);
        }

        if raw.len() > self.config.max_frame_bytes {
            let err = HubError::BadFrame(format!(
                "frame exceeds {} bytes",
                self.config.max_frame_bytes
            ));
            self.reject(origin, &err, None);
            return Err(err);
        }

        let event = match InboundEvent::decode(raw) {
            Ok(event) => event,
            Err(err) => {
                self.reject(origin, &err, None);
                return Err(err);
            }
        };

        let kind = event.kind();
        let client_id = event.client_id().map(str::to_owned);
        match self.dispatch(origin, event).await {
            Ok(()) => {
                tracing::trace!(user_id = %origin.user_id(), event = kind, "事件处理完成");
                Ok(())
            }
            Err(err) => {
                self.reject(origin, &err, client_id);
                Err(err)
            }
        }
    }

    /// 记录被拒绝的事件，并按配置回复 error 帧
    pub fn reject(&self, origin: &ConnectionHandle, err: &HubError, client_id: Option<String>) {
        match err {
            HubError::Store(_) => tracing::error!(
                user_id = %origin.user_id(),
                connection_id = origin.id,
                error = %err,
                "存储失败，事件已放弃"
            ),
            _ => tracing::debug!(
                user_id = %origin.user_id(),
                connection_id = origin.id,
                code = err.code(),
                error = %err,
                "事件被拒绝"
            ),
        }

        if self.config.error_replies {
            self.broadcaster
                .send_to(origin, &OutboundEvent::error(err, client_id));
        }
    }

    pub async fn dispatch(&self, origin: &ConnectionHandle, event: InboundEvent) -> RouteResult {
        match event {
            InboundEvent::GlobalMessage { text, client_id } => {
                self.global_message(origin, text, client_id).await
            }
            InboundEvent::ChatEdit { id, text } => self.chat_edit(origin, id, text).await,
            InboundEvent::ChatReaction { message_id, emoji } => {
                self.chat_reaction(origin, message_id, emoji).await
            }
            InboundEvent::Typing { chat } => self.typing(origin, chat).await,
            InboundEvent::DmMessage {
                to_id,
                text,
                client_id,
            } => self.dm_message(origin, to_id, text, client_id).await,
            InboundEvent::DmEdit { id, text } => self.dm_edit(origin, id, text).await,
            InboundEvent::DmRevoke { id } => self.dm_revoke(origin, id).await,
            InboundEvent::DmReaction { message_id, emoji } => {
                self.dm_reaction(origin, message_id, emoji).await
            }
            InboundEvent::DmTyping { to_id } => self.dm_typing(origin, to_id).await,
            InboundEvent::DmDelivered { conversation_id } => {
                self.dm_receipt(origin, conversation_id, Receipt::Delivered)
                    .await
            }
            InboundEvent::DmRead { conversation_id } => {
                self.dm_receipt(origin, conversation_id, Receipt::Read).await
            }
            InboundEvent::Resync { limit } => self.resync(origin, limit).await,
        }
    }

    fn check_rate(
        &self,
        origin: &ConnectionHandle,
        action: &'static str,
        policy: &RateLimitPolicy,
    ) -> RouteResult {
        if self.limiter.allow_action(action, origin.user_id(), policy) {
            Ok(())
        } else {
            Err(HubError::RateLimited { action })
        }
    }

    async fn global_message(
        &self,
        origin: &ConnectionHandle,
        text: String,
        client_id: Option<String>,
    ) -> RouteResult {
        self.check_rate(origin, "chat_send", &self.config.rate_limits.chat_send)?;
        let text = validate_text("text", &text)?;
        let client_id = validate_client_id(client_id)?;

        let message = self
            .store
            .create_chat_message(&text, origin.user_id())
            .await?;
        tracing::debug!(message_id = %message.id, user_id = %origin.user_id(), "全局消息已保存");

        self.broadcaster
            .broadcast_all(&OutboundEvent::GlobalMessage {
                message,
                client_id,
            })
            .await;
        self.notifier
            .mentions(origin.user_id(), &origin.username, &text);
        Ok(())
    }

    async fn chat_edit(
        &self,
        origin: &ConnectionHandle,
        id: ChatMessageId,
        text: String,
    ) -> RouteResult {
        let text = validate_text("text", &text)?;
        let existing = self
            .store
            .find_chat_message(id)
            .await?
            .ok_or_else(|| HubError::not_found(format!("message {id}")))?;

        // 角色可能在连接建立后被修改，以存储中的最新值为准
        let role = self
            .store
            .find_user_role(origin.user_id())
            .await?
            .unwrap_or_default();
        if !can_modify(origin.user_id(), role, existing.author_id) {
            return Err(HubError::forbidden("only the author or a moderator may edit"));
        }

        let message = self.store.update_chat_message(id, &text).await?;
        self.broadcaster
            .broadcast_all(&OutboundEvent::ChatEdit { message })
            .await;
        Ok(())
    }

    async fn chat_reaction(
        &self,
        origin: &ConnectionHandle,
        message_id: ChatMessageId,
        emoji: String,
    ) -> RouteResult {
        self.check_rate(origin, "reaction", &self.config.rate_limits.reaction)?;
        let emoji = validate_emoji(&emoji)?;

        let reactions = self
            .store
            .toggle_chat_reaction(message_id, origin.user_id(), &emoji)
            .await?;
        self.broadcaster
            .broadcast_all(&OutboundEvent::ChatReaction {
                message_id,
                reactions: aggregate_reactions(&reactions, origin.user_id()),
            })
            .await;
        Ok(())
    }

    async fn typing(&self, origin: &ConnectionHandle, chat: Option<String>) -> RouteResult {
        self.check_rate(origin, "typing", &self.config.rate_limits.typing)?;
        if let Some(chat) = chat.as_deref() {
            if chat != "global" {
                return Err(HubError::validation(format!("unknown chat `{chat}`")));
            }
        }

        self.broadcaster
            .broadcast_except(
                origin.user_id(),
                &OutboundEvent::Typing {
                    user_id: origin.user_id(),
                    username: origin.username.clone(),
                },
            )
            .await;
        Ok(())
    }

    async fn dm_message(
        &self,
        origin: &ConnectionHandle,
        to_id: UserId,
        text: String,
        client_id: Option<String>,
    ) -> RouteResult {
        self.check_rate(origin, "dm_send", &self.config.rate_limits.dm_send)?;
        let text = validate_text("text", &text)?;
        let client_id = validate_client_id(client_id)?;
        let from_id = origin.user_id();
        if to_id == from_id {
            return Err(HubError::validation("cannot send a direct message to yourself"));
        }

        let message = self
            .store
            .create_direct_message(from_id, to_id, &text)
            .await?;
        tracing::debug!(
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            "私信已保存"
        );

        self.broadcaster
            .send_to_users(
                &[from_id, to_id],
                &OutboundEvent::DmMessage { message, client_id },
            )
            .await;
        self.notifier.direct_message(to_id, &origin.username);
        Ok(())
    }

    async fn dm_edit(
        &self,
        origin: &ConnectionHandle,
        id: DirectMessageId,
        text: String,
    ) -> RouteResult {
        let text = validate_text("text", &text)?;
        let existing = self.find_direct_message(id).await?;
        existing.ensure_editable_by(origin.user_id())?;

        let message = self.store.update_direct_message(id, &text).await?;
        let participants = [message.from_id, message.to_id];
        self.broadcaster
            .send_to_users(&participants, &OutboundEvent::DmEdit { message })
            .await;
        Ok(())
    }

    async fn dm_revoke(&self, origin: &ConnectionHandle, id: DirectMessageId) -> RouteResult {
        let existing = self.find_direct_message(id).await?;
        existing.ensure_revocable_by(origin.user_id())?;

        let message = self.store.revoke_direct_message(id).await?;
        let participants = [message.from_id, message.to_id];
        self.broadcaster
            .send_to_users(&participants, &OutboundEvent::DmRevoke { message })
            .await;
        Ok(())
    }

    async fn dm_reaction(
        &self,
        origin: &ConnectionHandle,
        message_id: DirectMessageId,
        emoji: String,
    ) -> RouteResult {
        self.check_rate(origin, "reaction", &self.config.rate_limits.reaction)?;
        let emoji = validate_emoji(&emoji)?;
        let existing = self.find_direct_message(message_id).await?;
        if !existing.is_participant(origin.user_id()) {
            return Err(HubError::forbidden("only participants may react"));
        }

        let reactions = self
            .store
            .toggle_dm_reaction(message_id, origin.user_id(), &emoji)
            .await?;
        self.broadcaster
            .send_to_users(
                &[existing.from_id, existing.to_id],
                &OutboundEvent::DmReaction {
                    message_id,
                    reactions: aggregate_reactions(&reactions, origin.user_id()),
                },
            )
            .await;
        Ok(())
    }

    async fn dm_typing(&self, origin: &ConnectionHandle, to_id: UserId) -> RouteResult {
        self.check_rate(origin, "typing", &self.config.rate_limits.typing)?;
        if to_id == origin.user_id() {
            return Ok(());
        }

        self.broadcaster
            .send_to_user(
                to_id,
                &OutboundEvent::DmTyping {
                    from_id: origin.user_id(),
                    username: origin.username.clone(),
                },
            )
            .await;
        Ok(())
    }

    async fn dm_receipt(
        &self,
        origin: &ConnectionHandle,
        conversation_id: ConversationId,
        receipt: Receipt,
    ) -> RouteResult {
        let reader = origin.user_id();
        let conversation = self
            .store
            .find_conversation(conversation_id)
            .await?
            .ok_or_else(|| HubError::not_found(format!("conversation {conversation_id}")))?;
        let Some(counterpart) = conversation.other_participant(reader) else {
            return Err(HubError::forbidden("not a participant of this conversation"));
        };

        let at = self.clock.now();
        let event = match receipt {
            Receipt::Delivered => {
                let message_ids = self
                    .store
                    .mark_delivered(conversation_id, reader, at)
                    .await?;
                if message_ids.is_empty() {
                    return Ok(());
                }
                OutboundEvent::DmDelivered {
                    conversation_id,
                    message_ids,
                    delivered_at: at,
                }
            }
            Receipt::Read => {
                let message_ids = self.store.mark_read(conversation_id, reader, at).await?;
                if message_ids.is_empty() {
                    return Ok(());
                }
                OutboundEvent::DmRead {
                    conversation_id,
                    message_ids,
                    reader_id: reader,
                    read_at: at,
                }
            }
        };

        self.broadcaster.send_to_user(counterpart, &event).await;
        Ok(())
    }

    async fn resync(&self, origin: &ConnectionHandle, limit: Option<usize>) -> RouteResult {
        let bound = self.config.history_limit;
        let limit = limit.map_or(bound, |requested| requested.min(bound));
        let messages = self.store.find_recent_global_messages(limit).await?;
        tracing::debug!(
            user_id = %origin.user_id(),
            count = messages.len(),
            "返回历史消息"
        );
        self.broadcaster
            .send_to(origin, &OutboundEvent::History { messages });
        Ok(())
    }

    async fn find_direct_message(
        &self,
        id: DirectMessageId,
    ) -> Result<domain::DirectMessage, HubError> {
        self.store
            .find_direct_message(id)
            .await?
            .ok_or_else(|| HubError::not_found(format!("direct message {id}")))
    }
}

#[derive(Debug, Clone, Copy)]
enum Receipt {
    Delivered,
    Read,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::registry::{ConnectionRegistry, OutboundFrame};
    use crate::store::{MemoryMessageStore, MockMessageStore, StoreError};
    use chrono::Duration;
    use domain::{Role, UserProfile, DM_EDIT_LIMIT, REVOKED_PLACEHOLDER};
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct Client {
        profile: UserProfile,
        handle: Arc<ConnectionHandle>,
        rx: mpsc::Receiver<OutboundFrame>,
    }

    impl Client {
        fn drain(&mut self) -> Vec<Value> {
            let mut events = Vec::new();
            while let Ok(frame) = self.rx.try_recv() {
                if let OutboundFrame::Text(text) = frame {
                    events.push(serde_json::from_str(&text).unwrap());
                }
            }
            events
        }

        fn id(&self) -> UserId {
            self.profile.id
        }
    }

    struct Harness {
        router: EventRouter,
        registry: Arc<ConnectionRegistry>,
        store: Arc<MemoryMessageStore>,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(HubConfig::default())
        }

        fn with_config(config: HubConfig) -> Self {
            let clock = Arc::new(ManualClock::default());
            let store = Arc::new(MemoryMessageStore::new(clock.clone()));
            let registry = Arc::new(ConnectionRegistry::new());
            let router = build_router(store.clone(), Arc::clone(&registry), clock.clone(), config);
            Self {
                router,
                registry,
                store,
                clock,
            }
        }

        async fn join(&self, name: &str, role: Role) -> Client {
            let profile = UserProfile {
                id: UserId::generate(),
                username: name.to_owned(),
                avatar_url: None,
                role,
            };
            self.store.insert_user(profile.clone()).await;
            let (tx, rx) = mpsc::channel(64);
            let registration = self
                .registry
                .add(&profile, tx, CancellationToken::new())
                .await;
            Client {
                profile,
                handle: registration.handle,
                rx,
            }
        }

        async fn send(&self, client: &Client, frame: Value) -> RouteResult {
            self.router
                .handle_frame(&client.handle, &frame.to_string())
                .await
        }
    }

    fn build_router(
        store: Arc<dyn MessageStore>,
        registry: Arc<ConnectionRegistry>,
        clock: Arc<ManualClock>,
        config: HubConfig,
    ) -> EventRouter {
        let broadcaster = Broadcaster::new(registry);
        EventRouter::new(
            Arc::clone(&store),
            Arc::new(RateLimiter::new(clock.clone())),
            broadcaster.clone(),
            Notifier::new(store, broadcaster),
            clock,
            Arc::new(config),
        )
    }

    #[tokio::test]
    async fn global_message_reaches_everyone_including_sender() {
        let h = Harness::new();
        let mut alice = h.join("alice", Role::User).await;
        let mut bob = h.join("bob", Role::User).await;

        h.send(&alice, json!({"type": "global_message", "text": "  hello  ", "clientId": "c1"}))
            .await
            .unwrap();

        for events in [alice.drain(), bob.drain()] {
            assert_eq!(events.len(), 1);
            assert_eq!(events[0]["type"], "global_message");
            assert_eq!(events[0]["message"]["text"], "hello");
            assert_eq!(events[0]["message"]["authorId"], alice.id().to_string());
            assert_eq!(events[0]["message"]["edited"], false);
            assert_eq!(events[0]["clientId"], "c1");
        }
    }

    #[tokio::test]
    async fn terminated_connection_cannot_publish() {
        let h = Harness::new();
        let alice = h.join("alice", Role::User).await;
        let mut bob = h.join("bob", Role::User).await;

        alice.handle.terminate();
        let result = h
            .send(&alice, json!({"type": "global_message", "text": "after close"}))
            .await;

        assert!(matches!(result, Err(HubError::ConnectionClosed)));
        assert!(bob.drain().is_empty());
        assert!(h
            .store
            .find_recent_global_messages(10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn non_owner_edit_is_rejected_without_broadcast() {
        let h = Harness::new();
        let mut alice = h.join("alice", Role::User).await;
        let mut bob = h.join("bob", Role::User).await;

        h.send(&alice, json!({"type": "global_message", "text": "hello"}))
            .await
            .unwrap();
        let id = alice.drain()[0]["message"]["id"].clone();
        bob.drain();

        let result = h
            .send(&bob, json!({"type": "chat_edit", "id": id, "text": "x"}))
            .await;
        assert!(matches!(result, Err(HubError::AuthorizationDenied(_))));

        assert!(alice.drain().is_empty());
        let bob_events = bob.drain();
        assert_eq!(bob_events.len(), 1);
        assert_eq!(bob_events[0]["type"], "error");
        assert_eq!(bob_events[0]["code"], "FORBIDDEN");

        let recent = h.store.find_recent_global_messages(10).await.unwrap();
        assert_eq!(recent[0].text, "hello");
        assert!(!recent[0].edited);
    }

    #[tokio::test]
    async fn moderator_may_edit_and_role_is_reread() {
        let h = Harness::new();
        let mut alice = h.join("alice", Role::User).await;
        let mut mod_user = h.join("mod", Role::User).await;

        h.send(&alice, json!({"type": "global_message", "text": "hello"}))
            .await
            .unwrap();
        let id = alice.drain()[0]["message"]["id"].clone();
        mod_user.drain();

        // 连接建立后才被提升为版主
        h.store.set_role(mod_user.id(), Role::Moderator).await.unwrap();
        h.send(&mod_user, json!({"type": "chat_edit", "id": id, "text": "moderated"}))
            .await
            .unwrap();

        let events = alice.drain();
        assert_eq!(events[0]["type"], "chat_edit");
        assert_eq!(events[0]["message"]["text"], "moderated");
        assert_eq!(events[0]["message"]["edited"], true);
    }

    #[tokio::test]
    async fn sixth_send_in_window_is_rate_limited() {
        let h = Harness::new();
        let mut alice = h.join("alice", Role::User).await;
        let mut bob = h.join("bob", Role::User).await;

        for i in 0..5 {
            h.send(&alice, json!({"type": "global_message", "text": format!("m{i}")}))
                .await
                .unwrap();
        }
        let result = h
            .send(&alice, json!({"type": "global_message", "text": "m5", "clientId": "late"}))
            .await;
        assert!(matches!(result, Err(HubError::RateLimited { .. })));

        assert_eq!(bob.drain().len(), 5);
        let alice_events = alice.drain();
        let last = alice_events.last().unwrap();
        assert_eq!(last["code"], "RATE_LIMITED");
        assert_eq!(last["clientId"], "late");

        h.clock.advance(Duration::seconds(10));
        h.send(&alice, json!({"type": "global_message", "text": "again"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn direct_message_goes_only_to_the_two_participants() {
        let h = Harness::new();
        let mut alice = h.join("alice", Role::User).await;
        let mut bob = h.join("bob", Role::User).await;
        let mut carol = h.join("carol", Role::User).await;

        h.send(&alice, json!({"type": "dm_message", "toId": bob.id(), "text": "psst"}))
            .await
            .unwrap();

        let alice_events = alice.drain();
        assert_eq!(alice_events.len(), 1);
        assert_eq!(alice_events[0]["type"], "dm_message");
        let bob_events = bob.drain();
        assert_eq!(bob_events[0]["message"]["text"], "psst");
        assert!(carol.drain().is_empty());
    }

    #[tokio::test]
    async fn direct_message_validation_failures() {
        let h = Harness::new();
        let alice = h.join("alice", Role::User).await;

        let to_self = h
            .send(&alice, json!({"type": "dm_message", "toId": alice.id(), "text": "me"}))
            .await;
        assert!(matches!(to_self, Err(HubError::Validation(_))));

        let unknown = h
            .send(
                &alice,
                json!({"type": "dm_message", "toId": UserId::generate(), "text": "hi"}),
            )
            .await;
        assert!(matches!(unknown, Err(HubError::NotFound(_))));

        let long_id = "x".repeat(65);
        let bad_client_id = h
            .send(
                &alice,
                json!({"type": "global_message", "text": "hi", "clientId": long_id}),
            )
            .await;
        assert!(matches!(bad_client_id, Err(HubError::Validation(_))));
    }

    #[tokio::test]
    async fn dm_edit_ceiling_and_revoke_are_enforced() {
        let h = Harness::new();
        let mut alice = h.join("alice", Role::User).await;
        let mut bob = h.join("bob", Role::Admin).await;

        h.send(&alice, json!({"type": "dm_message", "toId": bob.id(), "text": "v0"}))
            .await
            .unwrap();
        let id = alice.drain()[0]["message"]["id"].clone();
        bob.drain();

        // 管理员也不能编辑别人的私信
        let by_admin = h
            .send(&bob, json!({"type": "dm_edit", "id": id, "text": "hijack"}))
            .await;
        assert!(matches!(by_admin, Err(HubError::AuthorizationDenied(_))));

        for i in 1..=DM_EDIT_LIMIT {
            h.send(&alice, json!({"type": "dm_edit", "id": id, "text": format!("v{i}")}))
                .await
                .unwrap();
        }
        let fourth = h
            .send(&alice, json!({"type": "dm_edit", "id": id, "text": "v4"}))
            .await;
        assert!(matches!(fourth, Err(HubError::AuthorizationDenied(_))));

        let bob_events = bob.drain();
        let edits: Vec<_> = bob_events.iter().filter(|e| e["type"] == "dm_edit").collect();
        assert_eq!(edits.len(), 3);
        assert_eq!(edits[2]["message"]["editCount"], 3);
        assert_eq!(edits[2]["message"]["text"], "v3");

        h.send(&alice, json!({"type": "dm_revoke", "id": id}))
            .await
            .unwrap();
        let revoked = bob.drain();
        assert_eq!(revoked[0]["type"], "dm_revoke");
        assert_eq!(revoked[0]["message"]["text"], REVOKED_PLACEHOLDER);
        assert_eq!(revoked[0]["message"]["revoked"], true);

        let again = h.send(&alice, json!({"type": "dm_revoke", "id": id})).await;
        assert!(matches!(again, Err(HubError::AuthorizationDenied(_))));
    }

    #[tokio::test]
    async fn reaction_toggle_twice_restores_aggregate() {
        let h = Harness::new();
        let mut alice = h.join("alice", Role::User).await;
        let mut bob = h.join("bob", Role::User).await;

        h.send(&alice, json!({"type": "global_message", "text": "react to me"}))
            .await
            .unwrap();
        let id = alice.drain()[0]["message"]["id"].clone();
        bob.drain();

        h.send(&bob, json!({"type": "reaction", "messageId": id, "emoji": "👍"}))
            .await
            .unwrap();
        let added = alice.drain();
        assert_eq!(added[0]["type"], "chat_reaction");
        assert_eq!(added[0]["reactions"][0]["count"], 1);
        assert_eq!(added[0]["reactions"][0]["mine"], true);
        assert_eq!(added[0]["reactions"][0]["users"][0], "bob");

        h.send(&bob, json!({"type": "chat_reaction", "messageId": id, "emoji": "👍"}))
            .await
            .unwrap();
        let removed = alice.drain();
        assert_eq!(removed[0]["reactions"], json!([]));

        let disallowed = h
            .send(&bob, json!({"type": "chat_reaction", "messageId": id, "emoji": "🚀"}))
            .await;
        assert!(matches!(disallowed, Err(HubError::Validation(_))));
    }

    #[tokio::test]
    async fn dm_reaction_is_limited_to_participants() {
        let h = Harness::new();
        let mut alice = h.join("alice", Role::User).await;
        let bob = h.join("bob", Role::User).await;
        let carol = h.join("carol", Role::User).await;

        h.send(&alice, json!({"type": "dm_message", "toId": bob.id(), "text": "hi"}))
            .await
            .unwrap();
        let id = alice.drain()[0]["message"]["id"].clone();

        let outsider = h
            .send(&carol, json!({"type": "dm_reaction", "messageId": id, "emoji": "❤️"}))
            .await;
        assert!(matches!(outsider, Err(HubError::AuthorizationDenied(_))));

        h.send(&bob, json!({"type": "dm_reaction", "messageId": id, "emoji": "❤️"}))
            .await
            .unwrap();
        let events = alice.drain();
        assert_eq!(events[0]["type"], "dm_reaction");
        assert_eq!(events[0]["reactions"][0]["userIds"][0], bob.id().to_string());
    }

    #[tokio::test]
    async fn receipts_go_to_the_sender_only_when_state_changes() {
        let h = Harness::new();
        let mut alice = h.join("alice", Role::User).await;
        let mut bob = h.join("bob", Role::User).await;
        let carol = h.join("carol", Role::User).await;

        h.send(&alice, json!({"type": "dm_message", "toId": bob.id(), "text": "hi"}))
            .await
            .unwrap();
        let conversation_id = alice.drain()[0]["message"]["conversationId"].clone();
        bob.drain();

        h.send(&bob, json!({"type": "dm_read", "conversationId": conversation_id}))
            .await
            .unwrap();
        let events = alice.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "dm_read");
        assert_eq!(events[0]["readerId"], bob.id().to_string());
        assert!(bob.drain().iter().all(|e| e["type"] != "dm_read"));

        // 已读之后的送达回执不再改变状态
        h.send(&bob, json!({"type": "dm_delivered", "conversationId": conversation_id}))
            .await
            .unwrap();
        assert!(alice.drain().is_empty());

        let outsider = h
            .send(&carol, json!({"type": "dm_read", "conversationId": conversation_id}))
            .await;
        assert!(matches!(outsider, Err(HubError::AuthorizationDenied(_))));
    }

    #[tokio::test]
    async fn typing_scopes() {
        let h = Harness::new();
        let mut alice = h.join("alice", Role::User).await;
        let mut bob = h.join("bob", Role::User).await;
        let mut carol = h.join("carol", Role::User).await;

        h.send(&alice, json!({"type": "typing", "chat": "global"}))
            .await
            .unwrap();
        assert!(alice.drain().is_empty());
        assert_eq!(bob.drain()[0]["username"], "alice");
        assert_eq!(carol.drain()[0]["type"], "typing");

        h.send(&alice, json!({"type": "dm_typing", "toId": bob.id()}))
            .await
            .unwrap();
        let events = bob.drain();
        assert_eq!(events[0]["type"], "dm_typing");
        assert_eq!(events[0]["fromId"], alice.id().to_string());
        assert!(carol.drain().is_empty());
    }

    #[tokio::test]
    async fn resync_returns_bounded_chronological_history() {
        let mut config = HubConfig::default();
        config.history_limit = 3;
        config.rate_limits.chat_send = RateLimitPolicy::new(100, 10_000);
        let h = Harness::with_config(config);
        let mut alice = h.join("alice", Role::User).await;

        for i in 0..5 {
            h.send(&alice, json!({"type": "global_message", "text": format!("m{i}")}))
                .await
                .unwrap();
        }
        alice.drain();

        h.send(&alice, json!({"type": "resync", "limit": 50}))
            .await
            .unwrap();
        let events = alice.drain();
        assert_eq!(events[0]["type"], "history");
        let texts: Vec<_> = events[0]["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["text"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);

        h.send(&alice, json!({"type": "resync", "limit": 1}))
            .await
            .unwrap();
        assert_eq!(alice.drain()[0]["messages"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_frames_are_answered_with_bad_frame() {
        let h = Harness::new();
        let mut alice = h.join("alice", Role::User).await;

        assert!(matches!(
            h.router.handle_frame(&alice.handle, "{oops").await,
            Err(HubError::BadFrame(_))
        ));
        assert!(h
            .send(&alice, json!({"type": "self_destruct"}))
            .await
            .is_err());
        let events = alice.drain();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e["code"] == "BAD_FRAME"));
    }

    #[tokio::test]
    async fn error_replies_can_be_disabled() {
        let mut config = HubConfig::default();
        config.error_replies = false;
        let h = Harness::with_config(config);
        let mut alice = h.join("alice", Role::User).await;

        assert!(h
            .send(&alice, json!({"type": "global_message", "text": "   "}))
            .await
            .is_err());
        assert!(alice.drain().is_empty());
    }

    #[tokio::test]
    async fn store_failure_aborts_without_broadcast() {
        let clock = Arc::new(ManualClock::default());
        let registry = Arc::new(ConnectionRegistry::new());
        let mut store = MockMessageStore::new();
        store
            .expect_create_chat_message()
            .returning(|_, _| Err(StoreError::backend("connection reset")));
        let router = build_router(
            Arc::new(store),
            Arc::clone(&registry),
            clock,
            HubConfig::default(),
        );

        let alice = UserProfile {
            id: UserId::generate(),
            username: "alice".into(),
            avatar_url: None,
            role: Role::User,
        };
        let bob = UserProfile {
            id: UserId::generate(),
            username: "bob".into(),
            avatar_url: None,
            role: Role::User,
        };
        let (alice_tx, mut alice_rx) = mpsc::channel(8);
        let (bob_tx, mut bob_rx) = mpsc::channel(8);
        let origin = registry
            .add(&alice, alice_tx, CancellationToken::new())
            .await
            .handle;
        registry.add(&bob, bob_tx, CancellationToken::new()).await;

        let result = router
            .handle_frame(
                &origin,
                &json!({"type": "global_message", "text": "lost", "clientId": "c9"}).to_string(),
            )
            .await;
        assert!(matches!(result, Err(HubError::Store(_))));

        assert!(bob_rx.try_recv().is_err());
        match alice_rx.try_recv() {
            Ok(OutboundFrame::Text(text)) => {
                let value: Value = serde_json::from_str(&text).unwrap();
                assert_eq!(value["code"], "STORE_FAILURE");
                assert_eq!(value["clientId"], "c9");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
