//! 在线状态跟踪
//!
//! 由注册表的增删推导上下线事件。上线时只有首次进入在线集合才向其他连接广播，
//! 新连接总是单独收到一份完整快照；下线时只有真正移除登记项才广播。

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use domain::{UserId, UserProfile};

use crate::broadcaster::Broadcaster;
use crate::clock::Clock;
use crate::protocol::{OutboundEvent, PresenceStatus};
use crate::registry::{ConnectionHandle, ConnectionRegistry, OutboundFrame};
use crate::store::MessageStore;

#[derive(Clone)]
pub struct PresenceTracker {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    store: Arc<dyn MessageStore>,
    clock: Arc<dyn Clock>,
}

impl PresenceTracker {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        broadcaster: Broadcaster,
        store: Arc<dyn MessageStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            store,
            clock,
        }
    }

    /// 登记连接并发出上线事件
    pub async fn connect(
        &self,
        profile: &UserProfile,
        outbound: mpsc::Sender<OutboundFrame>,
        shutdown: CancellationToken,
    ) -> Arc<ConnectionHandle> {
        let registration = self.registry.add(profile, outbound, shutdown).await;
        let handle = registration.handle;

        match registration.replaced {
            Some(previous) => {
                tracing::info!(
                    user_id = %profile.id,
                    old_connection = previous.id,
                    new_connection = handle.id,
                    "同一用户的新连接替换旧连接"
                );
                previous.send(OutboundFrame::Close);
                previous.terminate();
            }
            None => {
                let update = OutboundEvent::PresenceUpdate {
                    user_id: profile.id,
                    status: PresenceStatus::Online,
                };
                self.broadcaster.broadcast_except(profile.id, &update).await;
            }
        }

        let snapshot = OutboundEvent::PresenceSnapshot {
            users: self.registry.online_ids().await,
        };
        self.broadcaster.send_to(&handle, &snapshot);

        self.touch_last_online(profile.id);
        tracing::info!(user_id = %profile.id, connection_id = handle.id, "用户上线");
        handle
    }

    /// 注销连接；只有该连接仍是登记项时才发出下线事件
    pub async fn disconnect(&self, handle: &ConnectionHandle) -> bool {
        handle.terminate();
        let user_id = handle.user_id();
        if !self.registry.remove(user_id, handle.id).await {
            tracing::debug!(
                user_id = %user_id,
                connection_id = handle.id,
                "连接已被替换，跳过下线广播"
            );
            return false;
        }

        let update = OutboundEvent::PresenceUpdate {
            user_id,
            status: PresenceStatus::Offline,
        };
        self.broadcaster.broadcast_all(&update).await;
        self.touch_last_online(user_id);
        tracing::info!(user_id = %user_id, connection_id = handle.id, "用户下线");
        true
    }

    pub async fn online_users(&self) -> Vec<UserId> {
        self.registry.online_ids().await
    }

    /// 尽力写入最后在线时间，不等待结果
    fn touch_last_online(&self, user_id: UserId) {
        let store = Arc::clone(&self.store);
        let at = self.clock.now();
        tokio::spawn(async move {
            if let Err(err) = store.touch_last_online(user_id, at).await {
                tracing::warn!(user_id = %user_id, error = %err, "更新最后在线时间失败");
            }
        });
    }
}
