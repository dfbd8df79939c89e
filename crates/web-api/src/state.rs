use std::sync::Arc;

use application::Hub;

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub jwt_service: Arc<JwtService>,
    /// 原始 `Cookie:` 头中凭证的键名
    pub cookie_name: Arc<str>,
    /// 唯一的升级路径
    pub ws_path: Arc<str>,
}

impl AppState {
    pub fn new(
        hub: Arc<Hub>,
        jwt_service: Arc<JwtService>,
        cookie_name: impl Into<Arc<str>>,
        ws_path: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            hub,
            jwt_service,
            cookie_name: cookie_name.into(),
            ws_path: ws_path.into(),
        }
    }
}
