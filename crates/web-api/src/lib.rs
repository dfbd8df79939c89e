//! Web API 层。
//!
//! 提供 Axum 路由：健康检查和唯一的 WebSocket 升级端点。升级前完成
//! 来源校验、连接数限制和凭证校验，升级后的连接交给应用层的 `Hub`。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{extract_credential, Claims, JwtService};
pub use error::{ApiError, ErrorBody};
pub use routes::router;
pub use state::AppState;
