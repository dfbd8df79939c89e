#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use application::{Hub, MemoryMessageStore};
use config::HubConfig;
use domain::{Role, UserId, UserProfile};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{net::TcpListener, net::TcpStream, sync::oneshot, time::timeout};
use tokio_util::sync::CancellationToken;
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest,
    http::{header, HeaderValue, StatusCode},
    Error as WsError, Message,
};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use web_api::{router, AppState, JwtService};

pub const SECRET: &str = "integration-test-secret-with-32-bytes";
const WAIT: Duration = Duration::from_secs(3);

/// 绑定随机端口的测试服务器，使用内存存储并运行心跳巡检
pub struct TestServer {
    pub addr: SocketAddr,
    pub hub: Arc<Hub>,
    pub store: Arc<MemoryMessageStore>,
    pub jwt: JwtService,
    heartbeat: CancellationToken,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start(config: HubConfig) -> Self {
        let store = Arc::new(MemoryMessageStore::default());
        let hub = Arc::new(Hub::new(store.clone(), config));
        let jwt = JwtService::new(SECRET);
        let heartbeat = CancellationToken::new();
        hub.heartbeat().spawn(heartbeat.clone());
        let state = AppState::new(Arc::clone(&hub), Arc::new(jwt.clone()), "token", "/ws");

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let app = router(state);
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
        });

        Self {
            addr,
            hub,
            store,
            jwt,
            heartbeat,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn user(&self, username: &str) -> UserProfile {
        let profile = UserProfile {
            id: UserId::generate(),
            username: username.to_owned(),
            avatar_url: None,
            role: Role::User,
        };
        self.store.insert_user(profile.clone()).await;
        profile
    }

    pub fn token(&self, profile: &UserProfile) -> String {
        self.jwt
            .generate_token(profile.identity(), chrono::Duration::hours(1))
            .expect("token")
    }

    /// 使用 Bearer 头连接，并等待在线快照
    pub async fn connect_bearer(&self, profile: &UserProfile) -> (WsClient, Value) {
        let token = self.token(profile);
        let header = format!("Bearer {token}");
        self.connect_with(&[(header::AUTHORIZATION, header.as_str())])
            .await
            .expect("bearer connect")
    }

    /// 使用原始 Cookie 头连接，并等待在线快照
    pub async fn connect_cookie(&self, profile: &UserProfile) -> (WsClient, Value) {
        let cookie = format!("theme=dark; token={}", self.token(profile));
        self.connect_with(&[(header::COOKIE, cookie.as_str())])
            .await
            .expect("cookie connect")
    }

    pub async fn connect_with(
        &self,
        headers: &[(header::HeaderName, &str)],
    ) -> Result<(WsClient, Value), StatusCode> {
        let mut client = self.try_connect(&self.ws_url(), headers).await?;
        let snapshot = client.next_of_type("presence_snapshot").await;
        Ok((client, snapshot))
    }

    /// 只完成握手，返回升级失败时的 HTTP 状态码
    pub async fn try_connect(
        &self,
        url: &str,
        headers: &[(header::HeaderName, &str)],
    ) -> Result<WsClient, StatusCode> {
        let mut request = url.into_client_request().expect("request");
        for (name, value) in headers {
            request
                .headers_mut()
                .insert(name.clone(), HeaderValue::from_str(value).expect("header"));
        }
        match connect_async(request).await {
            Ok((stream, _)) => Ok(WsClient { stream }),
            Err(WsError::Http(response)) => Err(response.status()),
            Err(err) => panic!("unexpected handshake error: {err}"),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.heartbeat.cancel();
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn send_json(&mut self, value: Value) {
        self.stream
            .send(Message::Text(value.to_string().into()))
            .await
            .expect("send");
    }

    /// 读取下一条文本事件；连接关闭时返回 None
    pub async fn next_event(&mut self, wait: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match timeout(remaining, self.stream.next()).await {
                Err(_) => return None,
                Ok(None) | Ok(Some(Err(_))) => return None,
                Ok(Some(Ok(Message::Text(text)))) => {
                    return Some(serde_json::from_str(text.as_str()).expect("json frame"))
                }
                Ok(Some(Ok(Message::Close(_)))) => return None,
                Ok(Some(Ok(_))) => continue,
            }
        }
    }

    /// 跳过其他事件，直到收到指定类型
    pub async fn next_of_type(&mut self, kind: &str) -> Value {
        self.next_of_type_within(kind, WAIT).await
    }

    pub async fn next_of_type_within(&mut self, kind: &str, wait: Duration) -> Value {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.next_event(remaining).await {
                Some(event) if event["type"] == kind => return event,
                Some(_) => continue,
                None => panic!("connection ended before `{kind}` arrived"),
            }
        }
    }

    /// 在给定时间内没有指定类型的事件
    pub async fn assert_no(&mut self, kind: &str, wait: Duration) {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return;
            }
            match self.next_event(remaining).await {
                Some(event) if event["type"] == kind => panic!("unexpected `{kind}`: {event}"),
                Some(_) => continue,
                None => return,
            }
        }
    }

    /// 连接是否已被服务端关闭
    pub async fn is_closed_within(&mut self, wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match timeout(remaining, self.stream.next()).await {
                Err(_) => return false,
                Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => return true,
                Ok(Some(Ok(_))) => continue,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}
