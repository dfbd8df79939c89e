//! 通知副作用
//!
//! 私信通知和 @提及 通知在主广播路径之外异步执行，失败只记录日志。

use std::sync::Arc;

use tokio::task::JoinHandle;

use domain::{extract_mentions, NewNotification, UserId};

use crate::broadcaster::Broadcaster;
use crate::protocol::OutboundEvent;
use crate::store::{MessageStore, StoreResult};

/// 提及通知正文中引用的最大字符数
const EXCERPT_CHARS: usize = 80;

#[derive(Clone)]
pub struct Notifier {
    store: Arc<dyn MessageStore>,
    broadcaster: Broadcaster,
}

impl Notifier {
    pub fn new(store: Arc<dyn MessageStore>, broadcaster: Broadcaster) -> Self {
        Self { store, broadcaster }
    }

    /// 通知私信接收者
    pub fn direct_message(&self, recipient: UserId, sender_username: &str) -> JoinHandle<()> {
        let notifier = self.clone();
        let notification = NewNotification::direct_message(recipient, sender_username);
        tokio::spawn(async move {
            if let Err(err) = notifier.deliver(notification).await {
                tracing::warn!(user_id = %recipient, error = %err, "私信通知写入失败");
            }
        })
    }

    /// 为消息中被 @ 的用户创建通知，发送者本人除外
    pub fn mentions(&self, author: UserId, author_username: &str, text: &str) -> Option<JoinHandle<()>> {
        let usernames = extract_mentions(text);
        if usernames.is_empty() {
            return None;
        }

        let notifier = self.clone();
        let author_username = author_username.to_owned();
        let excerpt: String = text.chars().take(EXCERPT_CHARS).collect();
        Some(tokio::spawn(async move {
            let users = match notifier.store.find_users_by_usernames(&usernames).await {
                Ok(users) => users,
                Err(err) => {
                    tracing::warn!(error = %err, "解析提及用户失败");
                    return;
                }
            };
            for user in users.into_iter().filter(|u| u.id != author) {
                let notification = NewNotification::mention(user.id, &author_username, &excerpt);
                if let Err(err) = notifier.deliver(notification).await {
                    tracing::warn!(user_id = %user.id, error = %err, "提及通知写入失败");
                }
            }
        }))
    }

    async fn deliver(&self, notification: NewNotification) -> StoreResult<()> {
        let stored = self.store.create_notification(notification).await?;
        let user_id = stored.user_id;
        let event = OutboundEvent::Notification {
            user_id,
            notification: stored,
        };
        self.broadcaster.send_to_user(user_id, &event).await;
        Ok(())
    }
}
