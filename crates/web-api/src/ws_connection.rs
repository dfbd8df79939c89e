use std::sync::Arc;
use std::time::Duration;

use application::{ConnectionHandle, ConnectionPermit, Hub, OutboundFrame};
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::UserProfile;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

/// 关闭帧的最长写入等待
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// 单个已认证的 WebSocket 连接
///
/// 写任务独占 sender，消费 hub 的出站队列和本地命令；读任务把文本帧交给
/// hub 路由。任一任务结束即视为断开。
pub struct WebSocketConnection {
    hub: Arc<Hub>,
    handle: Arc<ConnectionHandle>,
    outbound: mpsc::Receiver<OutboundFrame>,
    permit: ConnectionPermit,
}

impl WebSocketConnection {
    /// 在 hub 中登记连接，会触发在线状态广播和快照下发
    pub async fn open(hub: Arc<Hub>, profile: &UserProfile, permit: ConnectionPermit) -> Self {
        let (handle, outbound) = hub.attach(profile).await;
        tracing::info!(
            user_id = %handle.user_id(),
            connection_id = handle.id,
            "WebSocket 连接已建立"
        );

        Self {
            hub,
            handle,
            outbound,
            permit,
        }
    }

    pub async fn run(self, socket: WebSocket) {
        let Self {
            hub,
            handle,
            mut outbound,
            permit,
        } = self;

        let (mut sender, mut incoming) = socket.split();
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);
        let shutdown = handle.shutdown_token();

        // 发送任务：统一处理所有对 WebSocket sender 的写操作
        let send_task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let message = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        Some(cmd) = cmd_rx.recv() => match cmd {
                            WsCommand::SendPong(data) => WsMessage::Pong(data),
                        },
                        frame = outbound.recv() => match frame {
                            Some(OutboundFrame::Text(text)) => WsMessage::Text(text.to_string().into()),
                            Some(OutboundFrame::Ping) => WsMessage::Ping(Bytes::new()),
                            Some(OutboundFrame::Close) | None => break,
                        },
                    };
                    // 对端停止读取时写操作可能一直挂起
                    let written = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        result = sender.send(message) => result,
                    };
                    if let Err(err) = written {
                        tracing::debug!(error = %err, "WebSocket 写入失败");
                        break;
                    }
                }
                let _ =
                    tokio::time::timeout(CLOSE_TIMEOUT, sender.send(WsMessage::Close(None))).await;
            })
        };

        // 接收任务：处理来自客户端的帧
        let recv_task = {
            let hub = Arc::clone(&hub);
            let handle = Arc::clone(&handle);
            tokio::spawn(async move {
                loop {
                    // 已终止的连接不再读取缓冲中的帧
                    let message = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        next = incoming.next() => match next {
                            Some(Ok(message)) => message,
                            Some(Err(err)) => {
                                tracing::debug!(error = %err, "WebSocket 读取失败");
                                break;
                            }
                            None => break,
                        },
                    };

                    match message {
                        WsMessage::Text(text) => {
                            // 失败已经由路由记录并回复
                            let _ = hub.handle_frame(&handle, text.as_str()).await;
                        }
                        WsMessage::Binary(_) => hub.reject_binary(&handle),
                        WsMessage::Ping(data) => {
                            if cmd_tx.send(WsCommand::SendPong(data)).await.is_err() {
                                break;
                            }
                        }
                        WsMessage::Pong(_) => handle.mark_alive(),
                        WsMessage::Close(_) => break,
                    }
                }
            })
        };

        // 等待任意一个任务完成（连接断开）
        tokio::select! {
            _ = send_task => {}
            _ = recv_task => {}
        }

        let went_offline = hub.detach(&handle).await;
        drop(permit);

        tracing::info!(
            user_id = %handle.user_id(),
            connection_id = handle.id,
            went_offline,
            "WebSocket 连接已断开"
        );
    }
}

/// WebSocket 写操作命令
#[derive(Debug)]
enum WsCommand {
    SendPong(Bytes),
}
