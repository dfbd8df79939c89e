//! 领域实体定义
//!
//! 实时消息中心涉及的实体：身份、全局消息、私信、会话、反应和通知。

pub mod chat_message;
pub mod conversation;
pub mod direct_message;
pub mod notification;
pub mod reaction;
pub mod user;

// 重新导出核心实体
pub use chat_message::ChatMessage;
pub use conversation::Conversation;
pub use direct_message::DirectMessage;
pub use notification::{NewNotification, Notification, NotificationKind};
pub use reaction::{aggregate_reactions, Reaction, ReactionSet, ReactionSummary};
pub use user::{Identity, Role, UserProfile};
