//! 论坛实时消息中心的领域模型
//!
//! 包含身份、全局聊天消息、私信、反应、通知等实体，以及持久化之前
//! 必须满足的业务规则。

pub mod business_rules;
pub mod entities;
pub mod errors;
pub mod value_objects;

// 重新导出常用类型
pub use business_rules::*;
pub use entities::*;
pub use errors::*;
pub use value_objects::*;
