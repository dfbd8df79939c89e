//! 在线连接注册表
//!
//! 每个用户最多登记一个连接；同一用户的新连接会替换旧连接，旧连接由调用方终止。
//! 注册表只在内存中，进程重启后为空。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use domain::{Identity, UserId, UserProfile};

pub type ConnectionId = u64;

/// 写往单个连接的出站帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// 已序列化的 JSON 文本，广播时多个连接共享同一份
    Text(Arc<str>),
    Ping,
    Close,
}

/// 一个已认证的实时连接
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub identity: Identity,
    pub username: String,
    outbound: mpsc::Sender<OutboundFrame>,
    alive: AtomicBool,
    shutdown: CancellationToken,
}

impl ConnectionHandle {
    pub fn user_id(&self) -> UserId {
        self.identity.id
    }

    /// 非阻塞写入出站队列；连接已关闭或队列已满时返回 false
    pub fn send(&self, frame: OutboundFrame) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    connection_id = self.id,
                    user_id = %self.identity.id,
                    "出站队列已满，丢弃帧"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.shutdown.is_cancelled() && !self.outbound.is_closed()
    }

    /// 收到 pong 时调用
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
    }

    /// 读取并清除存活标记
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    /// 终止连接：读写循环都会观察到取消信号
    pub fn terminate(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

/// `add` 的结果
#[derive(Debug)]
pub struct Registration {
    pub handle: Arc<ConnectionHandle>,
    /// 被替换掉的同一用户的旧连接
    pub replaced: Option<Arc<ConnectionHandle>>,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<UserId, Arc<ConnectionHandle>>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个新连接
    pub async fn add(
        &self,
        profile: &UserProfile,
        outbound: mpsc::Sender<OutboundFrame>,
        shutdown: CancellationToken,
    ) -> Registration {
        let handle = Arc::new(ConnectionHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            identity: profile.identity(),
            username: profile.username.clone(),
            outbound,
            alive: AtomicBool::new(true),
            shutdown,
        });

        let replaced = self
            .connections
            .write()
            .await
            .insert(profile.id, Arc::clone(&handle));

        Registration { handle, replaced }
    }

    /// 仅当登记的仍是该连接时移除；返回是否真的移除
    pub async fn remove(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(&user_id) {
            Some(current) if current.id == connection_id => {
                connections.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    pub async fn get(&self, user_id: UserId) -> Option<Arc<ConnectionHandle>> {
        self.connections.read().await.get(&user_id).cloned()
    }

    /// 当前仍处于打开状态的连接快照
    pub async fn all_live(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections
            .read()
            .await
            .values()
            .filter(|handle| handle.is_open())
            .cloned()
            .collect()
    }

    /// 全部连接快照，包括已终止但尚未移除的连接
    pub async fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.read().await.values().cloned().collect()
    }

    pub async fn online_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.connections.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.connections.read().await.contains_key(&user_id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::Role;

    fn profile(name: &str) -> UserProfile {
        UserProfile {
            id: UserId::generate(),
            username: name.to_owned(),
            avatar_url: None,
            role: Role::User,
        }
    }

    #[tokio::test]
    async fn second_connection_replaces_the_first() {
        let registry = ConnectionRegistry::new();
        let alice = profile("alice");

        let (tx1, _rx1) = mpsc::channel(4);
        let first = registry.add(&alice, tx1, CancellationToken::new()).await;
        assert!(first.replaced.is_none());

        let (tx2, _rx2) = mpsc::channel(4);
        let second = registry.add(&alice, tx2, CancellationToken::new()).await;
        assert_eq!(second.replaced.as_ref().map(|h| h.id), Some(first.handle.id));
        assert_eq!(registry.len().await, 1);

        // 旧连接的断开不会移除新连接
        assert!(!registry.remove(alice.id, first.handle.id).await);
        assert!(registry.is_online(alice.id).await);
        assert!(registry.remove(alice.id, second.handle.id).await);
        assert!(!registry.is_online(alice.id).await);
    }

    #[tokio::test]
    async fn full_queue_drops_frames_without_blocking() {
        let registry = ConnectionRegistry::new();
        let alice = profile("alice");
        let (tx, mut rx) = mpsc::channel(1);
        let registration = registry.add(&alice, tx, CancellationToken::new()).await;

        assert!(registration.handle.send(OutboundFrame::Ping));
        assert!(!registration.handle.send(OutboundFrame::Ping));
        assert_eq!(rx.recv().await, Some(OutboundFrame::Ping));
    }

    #[tokio::test]
    async fn terminated_connections_are_not_live() {
        let registry = ConnectionRegistry::new();
        let alice = profile("alice");
        let bob = profile("bob");
        let (tx1, _rx1) = mpsc::channel(4);
        let (tx2, _rx2) = mpsc::channel(4);
        let a = registry.add(&alice, tx1, CancellationToken::new()).await;
        registry.add(&bob, tx2, CancellationToken::new()).await;

        a.handle.terminate();
        let live = registry.all_live().await;
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].user_id(), bob.id);
        assert!(!a.handle.send(OutboundFrame::Ping));
    }

    #[test]
    fn alive_flag_is_cleared_on_take() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = ConnectionHandle {
            id: 1,
            identity: Identity::new(UserId::generate(), Role::User),
            username: "alice".into(),
            outbound: tx,
            alive: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
        };
        assert!(handle.take_alive());
        assert!(!handle.take_alive());
        handle.mark_alive();
        assert!(handle.take_alive());
    }
}
