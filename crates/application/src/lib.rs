//! 应用层实现。
//!
//! 实时消息中心的核心：线路协议、连接注册表、在线状态、限流、事件路由、
//! 广播扇出、通知副作用和心跳巡检，以及对持久化存储的抽象。

pub mod broadcaster;
pub mod clock;
pub mod error;
pub mod heartbeat;
pub mod hub;
pub mod notifier;
pub mod presence;
pub mod protocol;
pub mod rate_limiter;
pub mod registry;
pub mod router;
pub mod store;

pub use broadcaster::Broadcaster;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::HubError;
pub use heartbeat::{HeartbeatReport, HeartbeatSupervisor};
pub use hub::Hub;
pub use notifier::Notifier;
pub use presence::PresenceTracker;
pub use protocol::{InboundEvent, OutboundEvent, PresenceStatus};
pub use rate_limiter::{ConnectionLimiter, ConnectionPermit, RateLimitError, RateLimiter};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, OutboundFrame};
pub use router::EventRouter;
pub use store::{MemoryMessageStore, MessageStore, StoreError, StoreResult};
