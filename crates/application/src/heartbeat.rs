//! 心跳巡检
//!
//! 每个周期：上一周期内没有回应 pong 的连接被终止；其余连接清除存活标记并发送 ping。
//! 同一周期顺带清理过期的限流窗口。

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::rate_limiter::RateLimiter;
use crate::registry::{ConnectionRegistry, OutboundFrame};

/// 一次巡检的结果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub pinged: usize,
    pub terminated: usize,
    pub purged_windows: usize,
}

#[derive(Clone)]
pub struct HeartbeatSupervisor {
    registry: Arc<ConnectionRegistry>,
    limiter: Arc<RateLimiter>,
    interval: Duration,
}

impl HeartbeatSupervisor {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        limiter: Arc<RateLimiter>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            limiter,
            interval,
        }
    }

    pub async fn tick(&self) -> HeartbeatReport {
        let mut report = HeartbeatReport::default();

        for handle in self.registry.snapshot().await {
            if !handle.take_alive() {
                tracing::info!(
                    user_id = %handle.user_id(),
                    connection_id = handle.id,
                    "心跳超时，终止连接"
                );
                handle.terminate();
                report.terminated += 1;
                continue;
            }
            if handle.send(OutboundFrame::Ping) {
                report.pinged += 1;
            }
        }

        report.purged_windows = self.limiter.purge_expired();
        if report.terminated > 0 || report.purged_windows > 0 {
            tracing::debug!(?report, "心跳巡检完成");
        }
        report
    }

    /// 按固定周期巡检，直到收到取消信号
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        // 第一次 tick 立即完成
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }

        tracing::info!("心跳巡检已停止");
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tracing::info!(interval_secs = self.interval.as_secs(), "心跳巡检已启动");
        tokio::spawn(self.run(shutdown))
    }
}
