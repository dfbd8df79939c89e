//! 实时消息中心门面
//!
//! 把注册表、在线状态、限流、路由、通知和心跳组装在一起，
//! 传输层只需要面对这一个类型。

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use config::HubConfig;
use domain::{UserId, UserProfile};

use crate::broadcaster::Broadcaster;
use crate::clock::{Clock, SystemClock};
use crate::error::HubError;
use crate::heartbeat::HeartbeatSupervisor;
use crate::notifier::Notifier;
use crate::presence::PresenceTracker;
use crate::rate_limiter::{ConnectionLimiter, RateLimiter};
use crate::registry::{ConnectionHandle, ConnectionRegistry, OutboundFrame};
use crate::router::{EventRouter, RouteResult};
use crate::store::MessageStore;

pub struct Hub {
    config: Arc<HubConfig>,
    store: Arc<dyn MessageStore>,
    registry: Arc<ConnectionRegistry>,
    limiter: Arc<RateLimiter>,
    connection_limiter: Arc<ConnectionLimiter>,
    presence: PresenceTracker,
    router: EventRouter,
}

impl Hub {
    pub fn new(store: Arc<dyn MessageStore>, config: HubConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn MessageStore>,
        config: HubConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(ConnectionRegistry::new());
        let limiter = Arc::new(RateLimiter::new(Arc::clone(&clock)));
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let notifier = Notifier::new(Arc::clone(&store), broadcaster.clone());

        let presence = PresenceTracker::new(
            Arc::clone(&registry),
            broadcaster.clone(),
            Arc::clone(&store),
            Arc::clone(&clock),
        );
        let router = EventRouter::new(
            Arc::clone(&store),
            Arc::clone(&limiter),
            broadcaster,
            notifier,
            clock,
            Arc::clone(&config),
        );

        Self {
            connection_limiter: ConnectionLimiter::new(config.max_connections_per_ip),
            config,
            store,
            registry,
            limiter,
            presence,
            router,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn connection_limiter(&self) -> &Arc<ConnectionLimiter> {
        &self.connection_limiter
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// 握手阶段加载用户资料；未知用户视为认证失败
    pub async fn resolve_profile(&self, user_id: UserId) -> Result<UserProfile, HubError> {
        self.store
            .find_user(user_id)
            .await?
            .ok_or(HubError::AuthRejected)
    }

    /// 登记一个已认证的连接，返回句柄和它的出站队列
    pub async fn attach(
        &self,
        profile: &UserProfile,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(self.config.outbound_queue_capacity.max(1));
        let handle = self
            .presence
            .connect(profile, tx, CancellationToken::new())
            .await;
        (handle, rx)
    }

    /// 连接结束时调用；返回是否发出了下线事件
    pub async fn detach(&self, handle: &ConnectionHandle) -> bool {
        self.presence.disconnect(handle).await
    }

    pub async fn handle_frame(&self, origin: &ConnectionHandle, raw: &str) -> RouteResult {
        self.router.handle_frame(origin, raw).await
    }

    /// 二进制帧不属于协议
    pub fn reject_binary(&self, origin: &ConnectionHandle) {
        self.router.reject(
            origin,
            &HubError::BadFrame("binary frames are not supported".into()),
            None,
        );
    }

    pub fn heartbeat(&self) -> HeartbeatSupervisor {
        HeartbeatSupervisor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.limiter),
            self.config.heartbeat_interval(),
        )
    }

    pub async fn online_users(&self) -> Vec<UserId> {
        self.presence.online_users().await
    }
}
