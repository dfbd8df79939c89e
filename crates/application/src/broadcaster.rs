//! 事件扇出
//!
//! 事件只序列化一次，所有目标连接共享同一份文本。写入是非阻塞的，
//! 单个慢连接不会拖慢其他连接。

use std::sync::Arc;

use domain::UserId;

use crate::protocol::OutboundEvent;
use crate::registry::{ConnectionHandle, ConnectionRegistry, OutboundFrame};

#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    fn encode(event: &OutboundEvent) -> Option<Arc<str>> {
        match serde_json::to_string(event) {
            Ok(text) => Some(Arc::from(text)),
            Err(err) => {
                tracing::error!(error = %err, "序列化出站事件失败");
                None
            }
        }
    }

    /// 直接写给某个连接（例如只回复发起者）
    pub fn send_to(&self, handle: &ConnectionHandle, event: &OutboundEvent) -> bool {
        match Self::encode(event) {
            Some(text) => handle.send(OutboundFrame::Text(text)),
            None => false,
        }
    }

    /// 写给某个用户当前登记的连接；用户不在线时静默跳过
    pub async fn send_to_user(&self, user_id: UserId, event: &OutboundEvent) -> bool {
        match self.registry.get(user_id).await {
            Some(handle) => self.send_to(&handle, event),
            None => false,
        }
    }

    /// 写给一组用户，重复的用户只发送一次；返回实际写入的连接数
    pub async fn send_to_users(&self, user_ids: &[UserId], event: &OutboundEvent) -> usize {
        let Some(text) = Self::encode(event) else {
            return 0;
        };
        let mut targets = user_ids.to_vec();
        targets.sort();
        targets.dedup();

        let mut delivered = 0;
        for user_id in targets {
            if let Some(handle) = self.registry.get(user_id).await {
                if handle.send(OutboundFrame::Text(Arc::clone(&text))) {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// 写给所有在线连接
    pub async fn broadcast_all(&self, event: &OutboundEvent) -> usize {
        self.broadcast_filtered(event, |_| true).await
    }

    /// 写给除 `excluded` 以外的所有在线连接
    pub async fn broadcast_except(&self, excluded: UserId, event: &OutboundEvent) -> usize {
        self.broadcast_filtered(event, |handle| handle.user_id() != excluded)
            .await
    }

    async fn broadcast_filtered<F>(&self, event: &OutboundEvent, keep: F) -> usize
    where
        F: Fn(&ConnectionHandle) -> bool,
    {
        let Some(text) = Self::encode(event) else {
            return 0;
        };
        let targets = self.registry.all_live().await;
        let mut delivered = 0;
        for handle in targets.iter().filter(|h| keep(h)) {
            if handle.send(OutboundFrame::Text(Arc::clone(&text))) {
                delivered += 1;
            }
        }
        tracing::debug!(
            targets = targets.len(),
            delivered,
            "广播事件"
        );
        delivered
    }
}
